use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A user's recorded participation for one scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum AttendanceStatus {
    #[default]
    None,
    /// Saw part of the set.
    SawSome,
    /// Saw the whole set.
    SawAll,
    /// Decided not to attend.
    SawNone,
}

impl AttendanceStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AttendanceStatus::None),
            1 => Some(AttendanceStatus::SawSome),
            2 => Some(AttendanceStatus::SawAll),
            3 => Some(AttendanceStatus::SawNone),
            _ => None,
        }
    }

    /// Accepts either a numeric code or one of the legacy string tokens
    /// (`sawAll`, `sawSome`, `sawNone`) older clients wrote to the remote store.
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload {
            "sawAll" => Some(AttendanceStatus::SawAll),
            "sawSome" => Some(AttendanceStatus::SawSome),
            "sawNone" => Some(AttendanceStatus::SawNone),
            other => other.parse::<i64>().ok().and_then(Self::from_code),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            AttendanceStatus::None => 0,
            AttendanceStatus::SawSome => 1,
            AttendanceStatus::SawAll => 2,
            AttendanceStatus::SawNone => 3,
        }
    }

    pub fn icon(self) -> Option<&'static str> {
        match self {
            AttendanceStatus::None => None,
            AttendanceStatus::SawSome => Some("icon-seen-partial"),
            AttendanceStatus::SawAll => Some("icon-seen"),
            AttendanceStatus::SawNone => Some("icon-seen-none"),
        }
    }
}

impl From<AttendanceStatus> for i64 {
    fn from(s: AttendanceStatus) -> i64 {
        s.code()
    }
}

impl TryFrom<i64> for AttendanceStatus {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        AttendanceStatus::from_code(code).ok_or_else(|| format!("invalid attendance code {code}"))
    }
}

/// Errors produced when parsing an attendance key or one of its parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIndexError {
    #[error("expected {expected} colon-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("field `{0}` contains the `:` delimiter")]
    Delimiter(&'static str),

    #[error("invalid start time: {0}")]
    InvalidTime(String),

    #[error("invalid event year: {0}")]
    InvalidYear(String),
}

/// Wall-clock start of an event, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StartTime {
    pub hour: u8,
    pub minute: u8,
}

impl StartTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ParseIndexError> {
        if hour > 23 || minute > 59 {
            return Err(ParseIndexError::InvalidTime(format!("{hour}:{minute}")));
        }
        Ok(Self { hour, minute })
    }

    /// Builds a start time from separate hour and minute fields.
    pub fn from_parts(hour: &str, minute: &str) -> Result<Self, ParseIndexError> {
        let bad = || ParseIndexError::InvalidTime(format!("{hour}:{minute}"));
        let h = hour.trim().parse::<u8>().map_err(|_| bad())?;
        let m = minute.trim().parse::<u8>().map_err(|_| bad())?;
        Self::new(h, m).map_err(|_| bad())
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for StartTime {
    type Err = ParseIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((h, m)) => Self::from_parts(h, m),
            None => Err(ParseIndexError::InvalidTime(s.to_string())),
        }
    }
}

/// Identifies one scheduled event: who plays, where, when and what kind.
///
/// The textual form is `band:location:HH:MM:type:year`. The start time is the
/// only component that itself contains the delimiter, so it occupies two
/// fields of the joined string. The text fields may not contain `:`; use
/// [`try_new`](Self::try_new) or [`validate`](Self::validate) before storing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttendanceIndex {
    pub band: String,
    pub location: String,
    pub start_time: StartTime,
    pub event_type: String,
    pub year: i32,
}

const INDEX_FIELDS: usize = 6;

impl AttendanceIndex {
    pub fn new(
        band: impl Into<String>,
        location: impl Into<String>,
        start_time: StartTime,
        event_type: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            band: band.into(),
            location: location.into(),
            start_time,
            event_type: event_type.into(),
            year,
        }
    }

    /// Like [`new`](Self::new), but rejects fields the textual form cannot carry.
    pub fn try_new(
        band: impl Into<String>,
        location: impl Into<String>,
        start_time: StartTime,
        event_type: impl Into<String>,
        year: i32,
    ) -> Result<Self, ParseIndexError> {
        let index = Self::new(band, location, start_time, event_type, year);
        index.validate()?;
        Ok(index)
    }

    /// Checks that the textual form parses back to this index.
    pub fn validate(&self) -> Result<(), ParseIndexError> {
        if self.band.is_empty() {
            return Err(ParseIndexError::EmptyField("band"));
        }
        if self.location.is_empty() {
            return Err(ParseIndexError::EmptyField("location"));
        }
        for (name, value) in [
            ("band", &self.band),
            ("location", &self.location),
            ("event_type", &self.event_type),
        ] {
            if value.contains(':') {
                return Err(ParseIndexError::Delimiter(name));
            }
        }
        Ok(())
    }

    /// Parses the six fields of an already-split key.
    pub fn from_fields(fields: &[&str]) -> Result<Self, ParseIndexError> {
        let [band, location, hour, minute, event_type, year] = fields else {
            return Err(ParseIndexError::FieldCount {
                expected: INDEX_FIELDS,
                found: fields.len(),
            });
        };
        if band.is_empty() {
            return Err(ParseIndexError::EmptyField("band"));
        }
        if location.is_empty() {
            return Err(ParseIndexError::EmptyField("location"));
        }
        let start_time = StartTime::from_parts(hour, minute)?;
        let year = year
            .trim()
            .parse::<i32>()
            .map_err(|_| ParseIndexError::InvalidYear((*year).to_string()))?;
        Ok(Self {
            band: (*band).to_string(),
            location: (*location).to_string(),
            start_time,
            event_type: (*event_type).to_string(),
            year,
        })
    }
}

impl fmt::Display for AttendanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.band, self.location, self.start_time, self.event_type, self.year
        )
    }
}

impl FromStr for AttendanceIndex {
    type Err = ParseIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        Self::from_fields(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_is_zero_padded() {
        let t = StartTime::new(9, 5).unwrap();
        assert_eq!(t.to_string(), "09:05");
    }

    #[test]
    fn start_time_rejects_out_of_range() {
        assert!(StartTime::new(24, 0).is_err());
        assert!(StartTime::new(0, 60).is_err());
        assert!("7".parse::<StartTime>().is_err());
    }

    #[test]
    fn legacy_tokens_map_to_codes() {
        assert_eq!(AttendanceStatus::from_payload("sawAll"), Some(AttendanceStatus::SawAll));
        assert_eq!(AttendanceStatus::from_payload("sawSome"), Some(AttendanceStatus::SawSome));
        assert_eq!(AttendanceStatus::from_payload("sawNone"), Some(AttendanceStatus::SawNone));
        assert_eq!(AttendanceStatus::from_payload("2"), Some(AttendanceStatus::SawAll));
        assert_eq!(AttendanceStatus::from_payload("sawHalf"), None);
        assert_eq!(AttendanceStatus::from_payload("9"), None);
    }

    #[test]
    fn index_with_wrong_field_count_is_rejected() {
        let err = "Metallica:Pool:20:00:Show".parse::<AttendanceIndex>().unwrap_err();
        assert_eq!(err, ParseIndexError::FieldCount { expected: 6, found: 5 });
    }

    #[test]
    fn delimiter_in_a_text_field_is_rejected() {
        let at = StartTime::new(20, 0).unwrap();
        let err = AttendanceIndex::try_new("AC:DC", "Pool", at, "Show", 2026).unwrap_err();
        assert_eq!(err, ParseIndexError::Delimiter("band"));
        let err = AttendanceIndex::try_new("Slayer", "Pool", at, "Meet:Greet", 2026).unwrap_err();
        assert_eq!(err, ParseIndexError::Delimiter("event_type"));
        assert!(AttendanceIndex::try_new("Slayer", "Pool", at, "", 2026).is_ok());
    }

    #[test]
    fn index_with_bad_year_is_rejected() {
        let err = "Metallica:Pool:20:00:Show:20x6".parse::<AttendanceIndex>().unwrap_err();
        assert!(matches!(err, ParseIndexError::InvalidYear(_)));
    }
}
