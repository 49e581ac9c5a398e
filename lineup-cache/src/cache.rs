//! The derived display-row cache.
//!
//! Readers take a brief shared lock and get an `Arc` snapshot of the row
//! array. Every mutation (full rebuild or in-place patch) first takes the
//! writer mutex, so a patch issued during a rebuild runs entirely before or
//! entirely after the rebuild's swap. Store reads happen while only the
//! writer mutex is held; the shared lock is held exclusively just for the
//! swap or the patch itself.

use crate::error::{CacheError, CacheResult};
use crate::row::{CellDisplayRow, SortKey};
use crate::schedule::{EventField, ListItem, ScheduleProvider};
use lineup_store::PreferenceStore;
use lineup_types::time::now_epoch_secs;
use lineup_types::{AttendanceIndex, AttendanceStatus, Priority, StartTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Which profile, year and ordering the current rows were built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheContext {
    pub profile: String,
    pub year: i32,
    pub sort: SortKey,
}

#[derive(Default)]
struct Snapshot {
    rows: Arc<Vec<CellDisplayRow>>,
    context: Option<CacheContext>,
}

pub struct DerivedCellCache {
    provider: Arc<dyn ScheduleProvider>,
    store: PreferenceStore,
    max_capacity: usize,
    state: RwLock<Snapshot>,
    writer: Mutex<()>,
    /// Epoch seconds of the last full rebuild as `f64` bits; zero when stale.
    last_full_rebuild: AtomicU64,
}

impl DerivedCellCache {
    pub fn new(provider: Arc<dyn ScheduleProvider>, store: PreferenceStore, max_capacity: usize) -> Self {
        Self {
            provider,
            store,
            max_capacity,
            state: RwLock::new(Snapshot::default()),
            writer: Mutex::new(()),
            last_full_rebuild: AtomicU64::new(0),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            warn!("cache writer recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn get_row(&self, index: usize) -> Option<CellDisplayRow> {
        self.read_state().rows.get(index).cloned()
    }

    /// The current row array. Later mutations never show through it.
    pub fn snapshot(&self) -> Arc<Vec<CellDisplayRow>> {
        Arc::clone(&self.read_state().rows)
    }

    pub fn len(&self) -> usize {
        self.read_state().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn context(&self) -> Option<CacheContext> {
        self.read_state().context.clone()
    }

    /// Epoch seconds of the last full rebuild, `0.0` when stale.
    pub fn last_full_rebuild(&self) -> f64 {
        f64::from_bits(self.last_full_rebuild.load(Ordering::Relaxed))
    }

    pub fn needs_full_rebuild(&self) -> bool {
        self.last_full_rebuild() == 0.0
    }

    // ── Full rebuild ────────────────────────────────────────────

    /// Rebuilds every row for `items`, which must already be in display order.
    ///
    /// Over capacity, the existing rows stay in place and an error is returned.
    pub fn rebuild(&self, context: CacheContext, items: &[ListItem], reason: &str) -> CacheResult<usize> {
        let _writer = self.lock_writer();
        if items.len() > self.max_capacity {
            warn!(
                "rejecting rebuild ({reason}): {} items exceed capacity {}",
                items.len(),
                self.max_capacity
            );
            return Err(CacheError::OverCapacity {
                requested: items.len(),
                max: self.max_capacity,
            });
        }

        let priorities = self.store.get_all_priorities(context.year, &context.profile);
        let attendance = self
            .store
            .get_all_attendance_by_index(context.year, &context.profile);
        let now = now_epoch_secs();
        let rows: Vec<CellDisplayRow> = items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let partial = context.sort == SortKey::Name
                    && position > 0
                    && items[position - 1].band == item.band;
                self.build_row(position, item, &context, partial, &priorities, &attendance, now)
            })
            .collect();

        let count = rows.len();
        {
            let mut state = self.write_state();
            state.rows = Arc::new(rows);
            state.context = Some(context);
        }
        self.last_full_rebuild.store(now.to_bits(), Ordering::Relaxed);
        info!("cache rebuilt ({reason}): {count} rows");
        Ok(count)
    }

    /// [`rebuild`](Self::rebuild), then `on_complete` exactly once with the outcome.
    pub fn rebuild_with<F>(&self, context: CacheContext, items: &[ListItem], reason: &str, on_complete: F)
    where
        F: FnOnce(CacheResult<usize>),
    {
        on_complete(self.rebuild(context, items, reason));
    }

    #[allow(clippy::too_many_arguments)]
    fn build_row(
        &self,
        position: usize,
        item: &ListItem,
        context: &CacheContext,
        is_partial_info: bool,
        priorities: &HashMap<String, Priority>,
        attendance: &HashMap<AttendanceIndex, AttendanceStatus>,
        now: f64,
    ) -> CellDisplayRow {
        let field = |f: EventField| {
            item.time_index
                .and_then(|t| self.provider.event_field(&item.band, t, f))
                .unwrap_or_default()
        };
        let location = field(EventField::Location);
        let start_time = field(EventField::StartTime);
        let event_type = field(EventField::EventType);
        let index = item
            .time_index
            .and_then(|_| event_index(&item.band, &location, &start_time, &event_type, context.year));

        let priority = priorities.get(&item.band).copied().unwrap_or_default();
        let status = index
            .as_ref()
            .and_then(|i| attendance.get(i))
            .copied()
            .unwrap_or_default();

        CellDisplayRow {
            position,
            band: item.band.clone(),
            time_index: item.time_index,
            index,
            day: field(EventField::Day),
            end_time: field(EventField::EndTime),
            notes: field(EventField::Notes),
            location,
            start_time,
            event_type,
            priority,
            priority_icon: priority.icon(),
            attendance: status,
            attendance_icon: status.icon(),
            is_partial_info,
            cache_timestamp: now,
        }
    }

    // ── Incremental patches ─────────────────────────────────────

    /// Refreshes the priority of every row of `band`. Returns the number of rows patched.
    pub fn update_priority_for(&self, band: &str) -> usize {
        let _writer = self.lock_writer();
        let Some(context) = self.context() else {
            return 0;
        };
        if !self.snapshot().iter().any(|r| r.band == band) {
            return 0;
        }
        let priority = self.store.get_priority(band, context.year, &context.profile);
        let now = now_epoch_secs();

        let mut state = self.write_state();
        let rows = Arc::make_mut(&mut state.rows);
        let mut patched = 0;
        for row in rows.iter_mut().filter(|r| r.band == band) {
            row.set_priority(priority, now);
            patched += 1;
        }
        debug!("patched priority on {patched} rows for {band}");
        patched
    }

    /// Refreshes the attendance of every event row of `band`.
    pub fn update_attendance_for(&self, band: &str) -> usize {
        let _writer = self.lock_writer();
        let Some(context) = self.context() else {
            return 0;
        };
        let statuses: Vec<(usize, AttendanceStatus)> = self
            .snapshot()
            .iter()
            .filter(|r| r.band == band)
            .filter_map(|r| r.index.as_ref().map(|i| (r.position, i)))
            .map(|(position, index)| {
                (
                    position,
                    self.store.get_attendance_status_by_index(index, &context.profile),
                )
            })
            .collect();
        if statuses.is_empty() {
            return 0;
        }
        let now = now_epoch_secs();

        let mut state = self.write_state();
        let rows = Arc::make_mut(&mut state.rows);
        for (position, status) in &statuses {
            if let Some(row) = rows.get_mut(*position) {
                row.set_attendance(*status, now);
            }
        }
        debug!("patched attendance on {} rows for {band}", statuses.len());
        statuses.len()
    }

    /// Recomputes every field of the rows of `band` after its schedule facts
    /// changed. Positions and the array length stay as they are.
    pub fn refresh_band(&self, band: &str) -> usize {
        let _writer = self.lock_writer();
        let Some(context) = self.context() else {
            return 0;
        };
        let current = self.snapshot();
        if !current.iter().any(|r| r.band == band) {
            return 0;
        }
        let priorities = self.store.get_all_priorities(context.year, &context.profile);
        let attendance = self
            .store
            .get_all_attendance_by_index(context.year, &context.profile);
        let now = now_epoch_secs();
        let rebuilt: Vec<CellDisplayRow> = current
            .iter()
            .filter(|r| r.band == band)
            .map(|r| {
                let item = ListItem {
                    band: r.band.clone(),
                    time_index: r.time_index,
                };
                self.build_row(r.position, &item, &context, r.is_partial_info, &priorities, &attendance, now)
            })
            .collect();

        let mut state = self.write_state();
        let rows = Arc::make_mut(&mut state.rows);
        for row in &rebuilt {
            if let Some(slot) = rows.get_mut(row.position) {
                *slot = row.clone();
            }
        }
        rebuilt.len()
    }

    // ── Invalidation ────────────────────────────────────────────

    /// Drops all rows and marks the cache stale. The context is kept.
    pub fn invalidate(&self) {
        let _writer = self.lock_writer();
        self.write_state().rows = Arc::new(Vec::new());
        self.mark_stale();
        debug!("cache invalidated");
    }

    /// Drops all rows and the context they were built for.
    pub fn clear(&self) {
        let _writer = self.lock_writer();
        *self.write_state() = Snapshot::default();
        self.mark_stale();
        debug!("cache cleared");
    }

    /// Requests a full rebuild at the next opportunity without dropping rows.
    pub fn mark_stale(&self) {
        self.last_full_rebuild.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

fn event_index(
    band: &str,
    location: &str,
    start_time: &str,
    event_type: &str,
    year: i32,
) -> Option<AttendanceIndex> {
    let start = start_time.parse::<StartTime>().ok()?;
    AttendanceIndex::try_new(band, location, start, event_type, year).ok()
}
