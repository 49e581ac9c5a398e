use serde::{Deserialize, Serialize};
use std::fmt;

/// A user's interest ranking for a band.
///
/// The numeric codes are part of the storage and wire formats and must not
/// be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Priority {
    #[default]
    Unknown,
    Must,
    Might,
    Wont,
}

impl Priority {
    /// Decodes a stored or transmitted code. Out-of-range codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Priority::Unknown),
            1 => Some(Priority::Must),
            2 => Some(Priority::Might),
            3 => Some(Priority::Wont),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Priority::Unknown => 0,
            Priority::Must => 1,
            Priority::Might => 2,
            Priority::Wont => 3,
        }
    }

    /// Icon asset shown in list rows; `None` for unranked bands.
    pub fn icon(self) -> Option<&'static str> {
        match self {
            Priority::Unknown => None,
            Priority::Must => Some("icon-going-yes"),
            Priority::Might => Some("icon-going-maybe"),
            Priority::Wont => Some("icon-going-no"),
        }
    }

    pub fn is_set(self) -> bool {
        self != Priority::Unknown
    }
}

impl From<Priority> for i64 {
    fn from(p: Priority) -> i64 {
        p.code()
    }
}

impl TryFrom<i64> for Priority {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Priority::from_code(code).ok_or_else(|| format!("invalid priority code {code}"))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Unknown => write!(f, "Unknown"),
            Priority::Must => write!(f, "Must"),
            Priority::Might => write!(f, "Might"),
            Priority::Wont => write!(f, "Won't"),
        }
    }
}
