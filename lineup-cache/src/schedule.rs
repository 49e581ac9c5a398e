//! The upstream schedule and band facts the cache projects.

use lineup_types::{ChangeBus, ChangeKind, EntityChanged, StartTime};
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A single field of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    Location,
    Day,
    StartTime,
    EndTime,
    EventType,
    Notes,
}

/// One entry of the list the cache is built from: a band alone, or one of its events.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub band: String,
    /// Sort key of the event; `None` for a band without events.
    pub time_index: Option<f64>,
}

impl ListItem {
    pub fn band(band: impl Into<String>) -> Self {
        Self {
            band: band.into(),
            time_index: None,
        }
    }

    pub fn event(band: impl Into<String>, time_index: f64) -> Self {
        Self {
            band: band.into(),
            time_index: Some(time_index),
        }
    }
}

/// Read access to schedule and band facts. Changes are announced on the
/// [`ChangeBus`] as [`ChangeKind::Band`] or [`ChangeKind::Event`].
pub trait ScheduleProvider: Send + Sync {
    fn band_names(&self) -> Vec<String>;

    fn band_count(&self, year: i32) -> usize;

    fn event_field(&self, band: &str, time_index: f64, field: EventField) -> Option<String>;

    /// Every list entry for `year`, in no particular order.
    fn list_items(&self, _year: i32) -> Vec<ListItem> {
        self.band_names().into_iter().map(ListItem::band).collect()
    }
}

// ── StaticSchedule ──────────────────────────────────────────────

/// A scheduled performance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEvent {
    pub band: String,
    pub year: i32,
    pub time_index: f64,
    pub location: String,
    pub day: String,
    pub start_time: StartTime,
    pub end_time: StartTime,
    pub event_type: String,
    pub notes: String,
}

/// In-memory schedule, used by tests and as the fallback data set.
#[derive(Default)]
pub struct StaticSchedule {
    bands: RwLock<Vec<(String, i32)>>,
    events: RwLock<Vec<ScheduleEvent>>,
    bus: Option<ChangeBus>,
}

impl StaticSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces every change on `bus`.
    pub fn with_bus(bus: ChangeBus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::default()
        }
    }

    fn bands(&self) -> RwLockReadGuard<'_, Vec<(String, i32)>> {
        self.bands.read().unwrap_or_else(|p| p.into_inner())
    }

    fn bands_mut(&self) -> RwLockWriteGuard<'_, Vec<(String, i32)>> {
        self.bands.write().unwrap_or_else(|p| p.into_inner())
    }

    fn events(&self) -> RwLockReadGuard<'_, Vec<ScheduleEvent>> {
        self.events.read().unwrap_or_else(|p| p.into_inner())
    }

    fn events_mut(&self) -> RwLockWriteGuard<'_, Vec<ScheduleEvent>> {
        self.events.write().unwrap_or_else(|p| p.into_inner())
    }

    fn announce(&self, kind: ChangeKind, band: &str) {
        if let Some(bus) = &self.bus {
            bus.publish(EntityChanged::upstream(kind, vec![band.to_string()]));
        }
    }

    pub fn add_band(&self, band: &str, year: i32) {
        {
            let mut bands = self.bands_mut();
            if !bands.iter().any(|(b, y)| b == band && *y == year) {
                bands.push((band.to_string(), year));
            }
        }
        self.announce(ChangeKind::Band, band);
    }

    /// Adds an event, registering its band for the event's year if needed.
    pub fn add_event(&self, event: ScheduleEvent) {
        let band = event.band.clone();
        {
            let mut bands = self.bands_mut();
            if !bands.iter().any(|(b, y)| *b == band && *y == event.year) {
                bands.push((band.clone(), event.year));
            }
        }
        self.events_mut().push(event);
        self.announce(ChangeKind::Event, &band);
    }

    /// Replaces the location of every event of `band`.
    pub fn move_band(&self, band: &str, location: &str) {
        for event in self.events_mut().iter_mut().filter(|e| e.band == band) {
            event.location = location.to_string();
        }
        self.announce(ChangeKind::Event, band);
    }
}

impl ScheduleProvider for StaticSchedule {
    fn band_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.bands().iter().map(|(b, _)| b.clone()).collect();
        names.into_iter().collect()
    }

    fn band_count(&self, year: i32) -> usize {
        self.bands().iter().filter(|(_, y)| *y == year).count()
    }

    fn event_field(&self, band: &str, time_index: f64, field: EventField) -> Option<String> {
        let events = self.events();
        let event = events
            .iter()
            .find(|e| e.band == band && e.time_index == time_index)?;
        Some(match field {
            EventField::Location => event.location.clone(),
            EventField::Day => event.day.clone(),
            EventField::StartTime => event.start_time.to_string(),
            EventField::EndTime => event.end_time.to_string(),
            EventField::EventType => event.event_type.clone(),
            EventField::Notes => event.notes.clone(),
        })
    }

    fn list_items(&self, year: i32) -> Vec<ListItem> {
        let events = self.events();
        let mut items: Vec<ListItem> = events
            .iter()
            .filter(|e| e.year == year)
            .map(|e| ListItem::event(e.band.clone(), e.time_index))
            .collect();
        for (band, _) in self.bands().iter().filter(|(_, y)| *y == year) {
            if !events.iter().any(|e| e.year == year && &e.band == band) {
                items.push(ListItem::band(band.clone()));
            }
        }
        items
    }
}
