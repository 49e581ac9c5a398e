//! Profile-scoped priority and attendance marks backed by SQLite.
//!
//! All access goes through the [`StoreWorker`] queue. Reads block the caller
//! until the queue reaches them (bounded by the configured timeout) and fall
//! back to a default value on any failure. Writes return a
//! [`WriteCompletion`] immediately and publish an [`EntityChanged`] on the
//! change bus once committed.
//!
//! Every write is an upsert keyed by the table's unique constraint, so a
//! second write for the same key replaces the first. The `update_*` methods
//! read, decide and write within a single job, so no other write can land
//! between the read and the upsert.

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::schema::initialize_preference_schema;
use crate::worker::{StoreWorker, WriteCompletion};
use lineup_types::time::now_epoch_secs;
use lineup_types::{
    AttendanceIndex, AttendanceRecord, AttendanceStatus, ChangeBus, DeviceId, EntityChanged,
    Priority, PriorityRecord,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Number of marks a profile holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileCounts {
    pub priorities: u32,
    pub attendance: u32,
}

/// Embedded store of priority and attendance records.
///
/// Cheap to clone; clones share the same worker thread.
#[derive(Clone)]
pub struct PreferenceStore {
    inner: Arc<Inner>,
}

struct Inner {
    /// `None` when the database could not be opened; the store is then a logged no-op.
    worker: Option<StoreWorker>,
    device: DeviceId,
    bus: ChangeBus,
    read_timeout: Duration,
}

impl PreferenceStore {
    /// Opens the store, degrading to a no-op store if the database cannot be
    /// opened or migrated.
    pub fn open(config: &StoreConfig, device: DeviceId, bus: ChangeBus) -> Self {
        match Self::try_open(config, device.clone(), bus.clone()) {
            Ok(store) => store,
            Err(e) => {
                error!("preference store unavailable, continuing without persistence: {e}");
                Self::unavailable(device, bus, config.read_timeout())
            }
        }
    }

    /// Opens the store, returning the failure instead of degrading.
    pub fn try_open(config: &StoreConfig, device: DeviceId, bus: ChangeBus) -> StoreResult<Self> {
        let mut conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        initialize_preference_schema(&mut conn)?;
        let worker = StoreWorker::spawn(conn)?;
        info!(
            "preference store opened ({})",
            config
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".into())
        );
        Ok(Self {
            inner: Arc::new(Inner {
                worker: Some(worker),
                device,
                bus,
                read_timeout: config.read_timeout(),
            }),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(device: DeviceId, bus: ChangeBus) -> StoreResult<Self> {
        Self::try_open(&StoreConfig::in_memory(), device, bus)
    }

    fn unavailable(device: DeviceId, bus: ChangeBus, read_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker: None,
                device,
                bus,
                read_timeout,
            }),
        }
    }

    /// False when the store degraded to a no-op.
    pub fn is_available(&self) -> bool {
        self.inner.worker.is_some()
    }

    /// The device id recorded on local writes.
    pub fn device(&self) -> &DeviceId {
        &self.inner.device
    }

    pub fn change_bus(&self) -> &ChangeBus {
        &self.inner.bus
    }

    fn read<T, F>(&self, op: &'static str, f: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let Some(worker) = &self.inner.worker else {
            return T::default();
        };
        match worker.read(self.inner.read_timeout, f) {
            Ok(value) => value,
            Err(e) => {
                warn!("store read `{op}` failed, returning default: {e}");
                T::default()
            }
        }
    }

    fn write<F>(&self, op: &'static str, change: Option<EntityChanged>, f: F) -> WriteCompletion
    where
        F: FnOnce(&mut Connection) -> StoreResult<()> + Send + 'static,
    {
        self.write_if(op, change, move |conn| f(conn).map(|()| true))
    }

    /// Like [`write`](Self::write), but `f` reports whether it wrote anything.
    /// Nothing is published and the completion resolves to `false` when it did not.
    fn write_if<F>(&self, op: &'static str, change: Option<EntityChanged>, f: F) -> WriteCompletion
    where
        F: FnOnce(&mut Connection) -> StoreResult<bool> + Send + 'static,
    {
        let Some(worker) = &self.inner.worker else {
            debug!("store write `{op}` dropped: store unavailable");
            return WriteCompletion::failed();
        };
        let bus = self.inner.bus.clone();
        worker.write(op, move |conn| {
            let written = f(conn)?;
            if written {
                if let Some(change) = change {
                    bus.publish(change);
                }
            }
            Ok(written)
        })
    }

    /// Blocks until every previously submitted job has run.
    pub fn flush(&self) -> bool {
        self.read("flush", |_| Ok(true))
    }

    // ── Priorities ──────────────────────────────────────────────

    /// Upserts a priority mark written by this device. A missing timestamp means now.
    pub fn set_priority(
        &self,
        band: &str,
        year: i32,
        profile: &str,
        priority: Priority,
        timestamp: Option<f64>,
    ) -> WriteCompletion {
        let record = PriorityRecord {
            band: band.to_string(),
            year,
            profile: profile.to_string(),
            priority,
            last_modified: Some(timestamp.unwrap_or_else(now_epoch_secs)),
            origin_device: Some(self.inner.device.clone()),
        };
        self.apply_priority_record(record)
    }

    /// Upserts a complete record, keeping its timestamp and origin device as given.
    pub fn apply_priority_record(&self, record: PriorityRecord) -> WriteCompletion {
        let change = EntityChanged::priority(&record.profile, &record.band);
        self.write("set_priority", Some(change), move |conn| {
            upsert_priority(conn, &record)
        })
    }

    /// Reads the current record for `band` and upserts whatever `f` returns
    /// for it, in one job. Resolves to `false` when `f` returns `None`.
    pub fn update_priority_record<F>(&self, band: &str, year: i32, profile: &str, f: F) -> WriteCompletion
    where
        F: FnOnce(Option<PriorityRecord>) -> Option<PriorityRecord> + Send + 'static,
    {
        let change = EntityChanged::priority(profile, band);
        let (band, profile) = (band.to_string(), profile.to_string());
        self.write_if("update_priority", Some(change), move |conn| {
            let current = query_priority(conn, &band, year, &profile)?;
            match f(current) {
                Some(record) => upsert_priority(conn, &record).map(|()| true),
                None => Ok(false),
            }
        })
    }

    /// Returns the stored priority, or `Unknown` if there is none.
    pub fn get_priority(&self, band: &str, year: i32, profile: &str) -> Priority {
        self.get_priority_record(band, year, profile)
            .map(|r| r.priority)
            .unwrap_or_default()
    }

    pub fn get_priority_record(
        &self,
        band: &str,
        year: i32,
        profile: &str,
    ) -> Option<PriorityRecord> {
        let (band, profile) = (band.to_string(), profile.to_string());
        self.read("get_priority", move |conn| query_priority(conn, &band, year, &profile))
    }

    /// All priorities a profile holds for one year, keyed by band name.
    pub fn get_all_priorities(&self, year: i32, profile: &str) -> HashMap<String, Priority> {
        let profile = profile.to_string();
        self.read("get_all_priorities", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT band, priority FROM priorities WHERE event_year = ?1 AND profile = ?2",
            )?;
            let map = stmt
                .query_map(params![year, profile], |row| {
                    let code: i64 = row.get(1)?;
                    Ok((row.get::<_, String>(0)?, Priority::from_code(code).unwrap_or_default()))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(map)
        })
    }

    /// Every priority record of a profile, across all years.
    pub fn priority_records(&self, profile: &str) -> Vec<PriorityRecord> {
        let profile = profile.to_string();
        self.read("priority_records", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT band, event_year, profile, priority, last_modified, origin_device \
                 FROM priorities WHERE profile = ?1 ORDER BY event_year, band",
            )?;
            let records = stmt
                .query_map(params![profile], row_to_priority)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(records)
        })
    }

    pub fn delete_priority(&self, band: &str, year: i32, profile: &str) -> WriteCompletion {
        let change = EntityChanged::priority(profile, band);
        let (band, profile) = (band.to_string(), profile.to_string());
        self.write("delete_priority", Some(change), move |conn| {
            conn.execute(
                "DELETE FROM priorities WHERE band = ?1 AND event_year = ?2 AND profile = ?3",
                params![band, year, profile],
            )?;
            Ok(())
        })
    }

    /// Bulk upsert of one profile's priorities for a year, in a single transaction.
    pub fn import_priorities(
        &self,
        profile: &str,
        priorities: &HashMap<String, Priority>,
        year: i32,
    ) -> WriteCompletion {
        let now = now_epoch_secs();
        let records: Vec<PriorityRecord> = priorities
            .iter()
            .map(|(band, priority)| PriorityRecord {
                band: band.clone(),
                year,
                profile: profile.to_string(),
                priority: *priority,
                last_modified: Some(now),
                origin_device: Some(self.inner.device.clone()),
            })
            .collect();
        self.import_priority_records(profile, records)
    }

    /// Bulk upsert of complete priority records into `profile`, keeping their
    /// timestamps and origin devices. The records' own profile field is ignored.
    pub fn import_priority_records(
        &self,
        profile: &str,
        records: Vec<PriorityRecord>,
    ) -> WriteCompletion {
        let records: Vec<PriorityRecord> = records
            .into_iter()
            .map(|r| PriorityRecord {
                profile: profile.to_string(),
                ..r
            })
            .collect();
        let count = records.len();
        self.write("import_priorities", Some(EntityChanged::bulk(profile)), move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                upsert_priority(&tx, record)?;
            }
            tx.commit()?;
            debug!("imported {count} priorities");
            Ok(())
        })
    }

    // ── Attendance ──────────────────────────────────────────────

    /// Upserts an attendance mark written by this device.
    ///
    /// Without a finite `time_index` the existing sort key is kept, or a
    /// fallback derived from the index is used for a new row.
    pub fn set_attendance_status(
        &self,
        index: &AttendanceIndex,
        profile: &str,
        status: AttendanceStatus,
        time_index: Option<f64>,
        timestamp: Option<f64>,
    ) -> WriteCompletion {
        let change = EntityChanged::attendance(profile, &index.band);
        let time_index = time_index.filter(|t| t.is_finite());
        let mut record = AttendanceRecord {
            index: index.clone(),
            profile: profile.to_string(),
            status,
            time_index: time_index.unwrap_or(f64::NAN),
            last_modified: Some(timestamp.unwrap_or_else(now_epoch_secs)),
            origin_device: Some(self.inner.device.clone()),
        };
        self.write("set_attendance", Some(change), move |conn| {
            if time_index.is_none() {
                record.time_index = existing_time_index(conn, &record.index, &record.profile)?
                    .unwrap_or_else(|| AttendanceRecord::fallback_time_index(&record.index));
            }
            upsert_attendance(conn, &record)
        })
    }

    /// Upserts a complete record, keeping its timestamp and origin device as given.
    pub fn apply_attendance_record(&self, record: AttendanceRecord) -> WriteCompletion {
        let change = EntityChanged::attendance(&record.profile, &record.index.band);
        self.write("apply_attendance", Some(change), move |conn| {
            upsert_attendance(conn, &record)
        })
    }

    /// Returns the stored status, or `None` (status 0) if there is no record.
    pub fn get_attendance_status_by_index(
        &self,
        index: &AttendanceIndex,
        profile: &str,
    ) -> AttendanceStatus {
        self.get_attendance_record(index, profile)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn get_attendance_record(
        &self,
        index: &AttendanceIndex,
        profile: &str,
    ) -> Option<AttendanceRecord> {
        let (index, profile) = (index.clone(), profile.to_string());
        self.read("get_attendance", move |conn| query_attendance(conn, &index, &profile))
    }

    /// Reads the current record for `index` and upserts whatever `f` returns
    /// for it, in one job. Resolves to `false` when `f` returns `None`.
    pub fn update_attendance_record<F>(&self, index: &AttendanceIndex, profile: &str, f: F) -> WriteCompletion
    where
        F: FnOnce(Option<AttendanceRecord>) -> Option<AttendanceRecord> + Send + 'static,
    {
        let change = EntityChanged::attendance(profile, &index.band);
        let (index, profile) = (index.clone(), profile.to_string());
        self.write_if("update_attendance", Some(change), move |conn| {
            let current = query_attendance(conn, &index, &profile)?;
            match f(current) {
                Some(record) => upsert_attendance(conn, &record).map(|()| true),
                None => Ok(false),
            }
        })
    }

    /// All attendance marks a profile holds for one year.
    pub fn get_all_attendance_by_index(
        &self,
        year: i32,
        profile: &str,
    ) -> HashMap<AttendanceIndex, AttendanceStatus> {
        let profile = profile.to_string();
        self.read("get_all_attendance", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT attendance_index, profile, status, time_index, last_modified, origin_device \
                 FROM attendance WHERE event_year = ?1 AND profile = ?2",
            )?;
            let map = stmt
                .query_map(params![year, profile], row_to_attendance)?
                .filter_map(|r| r.ok().flatten())
                .map(|r| (r.index, r.status))
                .collect();
            Ok(map)
        })
    }

    /// Every attendance record of a profile, across all years.
    pub fn attendance_records(&self, profile: &str) -> Vec<AttendanceRecord> {
        let profile = profile.to_string();
        self.read("attendance_records", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT attendance_index, profile, status, time_index, last_modified, origin_device \
                 FROM attendance WHERE profile = ?1 ORDER BY time_index",
            )?;
            let records = stmt
                .query_map(params![profile], row_to_attendance)?
                .filter_map(|r| r.ok().flatten())
                .collect();
            Ok(records)
        })
    }

    pub fn delete_attendance(&self, index: &AttendanceIndex, profile: &str) -> WriteCompletion {
        let change = EntityChanged::attendance(profile, &index.band);
        let (key, profile) = (index.to_string(), profile.to_string());
        self.write("delete_attendance", Some(change), move |conn| {
            conn.execute(
                "DELETE FROM attendance WHERE attendance_index = ?1 AND profile = ?2",
                params![key, profile],
            )?;
            Ok(())
        })
    }

    /// Bulk upsert of attendance records into `profile`, in a single transaction.
    ///
    /// The records' own profile field is ignored.
    pub fn import_attendance(
        &self,
        profile: &str,
        records: Vec<AttendanceRecord>,
    ) -> WriteCompletion {
        let now = now_epoch_secs();
        let device = self.inner.device.clone();
        let records: Vec<AttendanceRecord> = records
            .into_iter()
            .map(|r| AttendanceRecord {
                profile: profile.to_string(),
                last_modified: r.last_modified.or(Some(now)),
                origin_device: r.origin_device.or_else(|| Some(device.clone())),
                ..r
            })
            .collect();
        let count = records.len();
        self.write("import_attendance", Some(EntityChanged::bulk(profile)), move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                upsert_attendance(&tx, record)?;
            }
            tx.commit()?;
            debug!("imported {count} attendance records");
            Ok(())
        })
    }

    // ── Profiles ────────────────────────────────────────────────

    /// Removes every record of `profile` from both tables.
    pub fn delete_profile(&self, profile: &str) -> WriteCompletion {
        let owned = profile.to_string();
        self.write("delete_profile", Some(EntityChanged::bulk(profile)), move |conn| {
            let tx = conn.transaction()?;
            let p = tx.execute("DELETE FROM priorities WHERE profile = ?1", params![owned])?;
            let a = tx.execute("DELETE FROM attendance WHERE profile = ?1", params![owned])?;
            tx.commit()?;
            info!("deleted profile data for {owned}: {p} priorities, {a} attendance");
            Ok(())
        })
    }

    /// Copies every record of `from` into `to` as fresh local writes, so the
    /// copies win the next last-writer-wins comparison.
    pub fn copy_profile(&self, from: &str, to: &str) -> WriteCompletion {
        let (from, to_owned) = (from.to_string(), to.to_string());
        let now = now_epoch_secs();
        let device = self.inner.device.to_string();
        self.write("copy_profile", Some(EntityChanged::bulk(to)), move |conn| {
            let tx = conn.transaction()?;
            let p = tx.execute(
                "INSERT OR REPLACE INTO priorities (band, event_year, profile, priority, last_modified, origin_device) \
                 SELECT band, event_year, ?2, priority, ?3, ?4 FROM priorities WHERE profile = ?1",
                params![from, to_owned, now, device],
            )?;
            let a = tx.execute(
                "INSERT OR REPLACE INTO attendance (attendance_index, profile, band, event_year, status, time_index, last_modified, origin_device) \
                 SELECT attendance_index, ?2, band, event_year, status, time_index, ?3, ?4 FROM attendance WHERE profile = ?1",
                params![from, to_owned, now, device],
            )?;
            tx.commit()?;
            info!("copied {p} priorities and {a} attendance records from {from} to {to_owned}");
            Ok(())
        })
    }

    /// Distinct profile keys that actually have data in either table.
    pub fn get_all_profile_names(&self) -> BTreeSet<String> {
        self.read("get_all_profile_names", |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT profile FROM priorities UNION SELECT DISTINCT profile FROM attendance",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(names)
        })
    }

    pub fn counts(&self, profile: &str) -> ProfileCounts {
        let profile = profile.to_string();
        self.read("counts", move |conn| {
            let priorities: u32 = conn.query_row(
                "SELECT COUNT(*) FROM priorities WHERE profile = ?1 AND priority != 0",
                params![profile],
                |row| row.get(0),
            )?;
            let attendance: u32 = conn.query_row(
                "SELECT COUNT(*) FROM attendance WHERE profile = ?1 AND status != 0",
                params![profile],
                |row| row.get(0),
            )?;
            Ok(ProfileCounts {
                priorities,
                attendance,
            })
        })
    }
}

fn upsert_priority(conn: &Connection, record: &PriorityRecord) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO priorities (
            band, event_year, profile, priority, last_modified, origin_device
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            record.band,
            record.year,
            record.profile,
            record.priority.code(),
            record.last_modified,
            record.origin_device.as_ref().map(|d| d.as_str()),
        ],
    )?;
    Ok(())
}

/// Rejects indexes whose key would not parse back. A non-finite sort key
/// is replaced by the fallback derived from the index.
fn upsert_attendance(conn: &Connection, record: &AttendanceRecord) -> StoreResult<()> {
    record.index.validate()?;
    let time_index = if record.time_index.is_finite() {
        record.time_index
    } else {
        AttendanceRecord::fallback_time_index(&record.index)
    };
    conn.execute(
        r#"
        INSERT OR REPLACE INTO attendance (
            attendance_index, profile, band, event_year, status,
            time_index, last_modified, origin_device
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            record.index.to_string(),
            record.profile,
            record.index.band,
            record.index.year,
            record.status.code(),
            time_index,
            record.last_modified,
            record.origin_device.as_ref().map(|d| d.as_str()),
        ],
    )?;
    Ok(())
}

fn query_priority(
    conn: &Connection,
    band: &str,
    year: i32,
    profile: &str,
) -> StoreResult<Option<PriorityRecord>> {
    let record = conn
        .query_row(
            "SELECT band, event_year, profile, priority, last_modified, origin_device \
             FROM priorities WHERE band = ?1 AND event_year = ?2 AND profile = ?3",
            params![band, year, profile],
            row_to_priority,
        )
        .optional()?;
    Ok(record)
}

fn query_attendance(
    conn: &Connection,
    index: &AttendanceIndex,
    profile: &str,
) -> StoreResult<Option<AttendanceRecord>> {
    let record = conn
        .query_row(
            "SELECT attendance_index, profile, status, time_index, last_modified, origin_device \
             FROM attendance WHERE attendance_index = ?1 AND profile = ?2",
            params![index.to_string(), profile],
            row_to_attendance,
        )
        .optional()?
        .flatten();
    Ok(record)
}

fn existing_time_index(
    conn: &Connection,
    index: &AttendanceIndex,
    profile: &str,
) -> StoreResult<Option<f64>> {
    let value = conn
        .query_row(
            "SELECT time_index FROM attendance WHERE attendance_index = ?1 AND profile = ?2",
            params![index.to_string(), profile],
            |row| row.get::<_, f64>(0),
        )
        .optional()?;
    Ok(value)
}

fn row_to_priority(row: &Row<'_>) -> rusqlite::Result<PriorityRecord> {
    let code: i64 = row.get(3)?;
    Ok(PriorityRecord {
        band: row.get(0)?,
        year: row.get(1)?,
        profile: row.get(2)?,
        priority: Priority::from_code(code).unwrap_or_default(),
        last_modified: row.get(4)?,
        origin_device: row.get::<_, Option<String>>(5)?.map(DeviceId::from),
    })
}

/// Maps an attendance row. Rows whose stored key no longer parses are skipped.
fn row_to_attendance(row: &Row<'_>) -> rusqlite::Result<Option<AttendanceRecord>> {
    let key: String = row.get(0)?;
    let index = match key.parse::<AttendanceIndex>() {
        Ok(index) => index,
        Err(e) => {
            warn!("skipping attendance row with unparsable key {key:?}: {e}");
            return Ok(None);
        }
    };
    let code: i64 = row.get(2)?;
    Ok(Some(AttendanceRecord {
        index,
        profile: row.get(1)?,
        status: AttendanceStatus::from_code(code).unwrap_or_default(),
        time_index: row.get(3)?,
        last_modified: row.get(4)?,
        origin_device: row.get::<_, Option<String>>(5)?.map(DeviceId::from),
    }))
}
