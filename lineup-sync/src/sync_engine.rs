//! Last-writer-wins sync of the owner profile against the remote store.
//!
//! Only the `"Default"` profile ever leaves the device. Imported profiles
//! stay local. The engine reads and writes the [`PreferenceStore`] and never
//! touches profile metadata.
//!
//! Pull applies three rules per key, in order:
//!
//! 1. Remote value written by this device and a local record exists: skip.
//! 2. A local record exists: overwrite only when the remote timestamp is
//!    strictly newer. A local record without a timestamp is never overwritten.
//! 3. No local record: accept the remote value.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote_kv::{RemoteChange, RemoteKv};
use crate::wire::{RemoteKey, RemoteValue};
use lineup_store::PreferenceStore;
use lineup_types::{
    AttendanceIndex, AttendanceRecord, DEFAULT_PROFILE, DeviceId, PriorityRecord,
};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// What one sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote values written into the local store.
    pub applied: usize,
    /// Remote values left alone by the merge rules, or foreign keys.
    pub skipped: usize,
    /// Keys or values that could not be parsed.
    pub malformed: usize,
    /// Local records written to the remote store.
    pub pushed: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.malformed += other.malformed;
        self.pushed += other.pushed;
    }
}

/// Outcome of the merge rules for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Accept,
    SkipSameDevice,
    SkipNotNewer,
    SkipNoLocalTimestamp,
}

/// The local side of a merge: `None` when there is no local record, else its
/// timestamp.
pub fn decide(local: Option<Option<f64>>, remote: &RemoteValue, current: &DeviceId) -> MergeDecision {
    match local {
        Some(_) if &remote.device == current => MergeDecision::SkipSameDevice,
        Some(None) => MergeDecision::SkipNoLocalTimestamp,
        Some(Some(local_ts)) if remote.timestamp > local_ts => MergeDecision::Accept,
        Some(Some(_)) => MergeDecision::SkipNotNewer,
        None => MergeDecision::Accept,
    }
}

/// Commands accepted by a running engine.
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a full sync now and report back.
    SyncNow(oneshot::Sender<SyncResult<SyncReport>>),
    Stop,
}

/// Handle for sending commands to a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SyncCommand::SyncNow(reply_tx))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// Syncs the owner profile with a [`RemoteKv`].
#[derive(Clone)]
pub struct SyncEngine {
    store: PreferenceStore,
    remote: Arc<dyn RemoteKv>,
    device: DeviceId,
    event_year: Arc<AtomicI32>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: PreferenceStore,
        remote: Arc<dyn RemoteKv>,
        config: SyncConfig,
        event_year: i32,
    ) -> Self {
        let device = store.device().clone();
        Self {
            store,
            remote,
            device,
            event_year: Arc::new(AtomicI32::new(event_year)),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Year that priority keys (which carry no year) are read and written for.
    pub fn event_year(&self) -> i32 {
        self.event_year.load(Ordering::Relaxed)
    }

    pub fn set_event_year(&self, year: i32) {
        self.event_year.store(year, Ordering::Relaxed);
    }

    /// Wraps one remote call in the configured timeout.
    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        let limit = self.config.remote_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("remote `{op}` timed out after {limit:?}");
                Err(SyncError::Timeout {
                    op,
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// Runs a blocking store call off the async executor.
    async fn with_store<T, F>(&self, f: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&PreferenceStore) -> T + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .unwrap_or_else(|e| {
                warn!("store task failed: {e}");
                T::default()
            })
    }

    // ── Pull ────────────────────────────────────────────────────

    /// Merges every remote key into the local owner profile.
    pub async fn pull(&self) -> SyncResult<SyncReport> {
        self.call("synchronize", self.remote.synchronize()).await?;
        let keys = self.call("get_all_keys", self.remote.get_all_keys()).await?;
        self.pull_keys(&keys).await
    }

    /// Merges the given remote keys. A malformed record is logged and skipped.
    pub async fn pull_keys(&self, keys: &[String]) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        for raw_key in keys {
            let key = match RemoteKey::parse(raw_key) {
                Ok(key) => key,
                Err(SyncError::UnknownKey(_)) => {
                    debug!("ignoring foreign remote key {raw_key:?}");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("skipping remote record: {e}");
                    report.malformed += 1;
                    continue;
                }
            };
            let Some(raw_value) = self.call("get", self.remote.get(raw_key)).await? else {
                report.skipped += 1;
                continue;
            };
            let value = match RemoteValue::parse(&raw_value) {
                Ok(value) => value,
                Err(e) => {
                    warn!("skipping remote record {raw_key:?}: {e}");
                    report.malformed += 1;
                    continue;
                }
            };
            match self.merge(key, value).await {
                Ok(true) => report.applied += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("skipping remote record {raw_key:?}: {e}");
                    report.malformed += 1;
                }
            }
        }
        debug!(
            "pull: {} applied, {} skipped, {} malformed",
            report.applied, report.skipped, report.malformed
        );
        Ok(report)
    }

    /// Applies one remote record if the merge rules allow. Returns whether it was written.
    ///
    /// The local read, the decision and the upsert run as one store job, so a
    /// local edit cannot slip in between and be overwritten by an older value.
    async fn merge(&self, key: RemoteKey, value: RemoteValue) -> SyncResult<bool> {
        let device = self.device.clone();
        match key {
            RemoteKey::Priority(band) => {
                let priority = value.priority()?;
                let year = self.event_year();
                let name = band.clone();
                let written = self
                    .store
                    .update_priority_record(&band, year, DEFAULT_PROFILE, move |local| {
                        let decision = decide(local.as_ref().map(|r| r.last_modified), &value, &device);
                        if decision != MergeDecision::Accept {
                            debug!("priority {name}: {decision:?}");
                            return None;
                        }
                        Some(PriorityRecord {
                            band: name,
                            year,
                            profile: DEFAULT_PROFILE.to_string(),
                            priority,
                            last_modified: Some(value.timestamp),
                            origin_device: Some(value.device),
                        })
                    })
                    .finished()
                    .await;
                Ok(written)
            }
            RemoteKey::Attendance(index) => {
                let status = value.attendance()?;
                let target = index.clone();
                let written = self
                    .store
                    .update_attendance_record(&index, DEFAULT_PROFILE, move |local| {
                        let decision = decide(local.as_ref().map(|r| r.last_modified), &value, &device);
                        if decision != MergeDecision::Accept {
                            debug!("attendance {target}: {decision:?}");
                            return None;
                        }
                        let time_index = local
                            .map(|r| r.time_index)
                            .unwrap_or_else(|| AttendanceRecord::fallback_time_index(&target));
                        Some(AttendanceRecord {
                            index: target,
                            profile: DEFAULT_PROFILE.to_string(),
                            status,
                            time_index,
                            last_modified: Some(value.timestamp),
                            origin_device: Some(value.device),
                        })
                    })
                    .finished()
                    .await;
                Ok(written)
            }
        }
    }

    // ── Push ────────────────────────────────────────────────────

    /// Writes every owner record of the current year that is newer than its
    /// remote counterpart.
    pub async fn push(&self) -> SyncResult<SyncReport> {
        let year = self.event_year();
        let priorities = self
            .with_store(|s| s.priority_records(DEFAULT_PROFILE))
            .await;
        let attendance = self
            .with_store(|s| s.attendance_records(DEFAULT_PROFILE))
            .await;

        let mut report = SyncReport::default();
        for record in priorities.iter().filter(|r| r.year == year) {
            let (key, value) = self.priority_entry(record);
            self.push_entry(&key, value, &mut report).await?;
        }
        for record in attendance.iter().filter(|r| r.index.year == year) {
            let (key, value) = self.attendance_entry(record);
            self.push_entry(&key, value, &mut report).await?;
        }
        if report.pushed > 0 {
            self.call("synchronize", self.remote.synchronize()).await?;
        }
        debug!("push: {} pushed, {} skipped", report.pushed, report.skipped);
        Ok(report)
    }

    /// Pushes one owner priority right after a local edit.
    pub async fn push_priority(&self, band: &str) -> SyncResult<SyncReport> {
        let (band, year) = (band.to_string(), self.event_year());
        let record = self
            .with_store(move |s| s.get_priority_record(&band, year, DEFAULT_PROFILE))
            .await;
        let mut report = SyncReport::default();
        if let Some(record) = record {
            let (key, value) = self.priority_entry(&record);
            self.push_entry(&key, value, &mut report).await?;
        }
        Ok(report)
    }

    /// Pushes one owner attendance mark right after a local edit.
    pub async fn push_attendance(&self, index: &AttendanceIndex) -> SyncResult<SyncReport> {
        let index = index.clone();
        let record = self
            .with_store(move |s| s.get_attendance_record(&index, DEFAULT_PROFILE))
            .await;
        let mut report = SyncReport::default();
        if let Some(record) = record {
            let (key, value) = self.attendance_entry(&record);
            self.push_entry(&key, value, &mut report).await?;
        }
        Ok(report)
    }

    fn priority_entry(&self, record: &PriorityRecord) -> (RemoteKey, RemoteValue) {
        (
            RemoteKey::Priority(record.band.clone()),
            RemoteValue::new(
                record.priority.code().to_string(),
                record.origin_device.clone().unwrap_or_else(|| self.device.clone()),
                record.last_modified.unwrap_or(0.0),
            ),
        )
    }

    fn attendance_entry(&self, record: &AttendanceRecord) -> (RemoteKey, RemoteValue) {
        (
            RemoteKey::Attendance(record.index.clone()),
            RemoteValue::new(
                record.status.code().to_string(),
                record.origin_device.clone().unwrap_or_else(|| self.device.clone()),
                record.last_modified.unwrap_or(0.0),
            ),
        )
    }

    async fn push_entry(
        &self,
        key: &RemoteKey,
        local: RemoteValue,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let raw_key = key.to_string();
        if let Some(existing) = self.call("get", self.remote.get(&raw_key)).await? {
            match RemoteValue::parse(&existing) {
                Ok(remote) if remote.timestamp >= local.timestamp => {
                    report.skipped += 1;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => debug!("replacing unreadable remote value for {raw_key:?}: {e}"),
            }
        }
        self.call("set", self.remote.set(&raw_key, &local.to_string()))
            .await?;
        report.pushed += 1;
        Ok(())
    }

    // ── Full sync & background loop ─────────────────────────────

    /// Pull, then push.
    pub async fn perform_full_sync(&self) -> SyncResult<SyncReport> {
        let mut report = self.pull().await?;
        report.absorb(self.push().await?);
        info!(
            "sync complete: {} applied, {} pushed, {} skipped, {} malformed",
            report.applied, report.pushed, report.skipped, report.malformed
        );
        Ok(report)
    }

    /// Starts the background loop on the current runtime.
    pub fn spawn(&self) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        tokio::spawn(self.clone().run(command_rx));
        SyncHandle { command_tx }
    }

    /// Runs full syncs on the poll interval, targeted pulls on remote change
    /// notifications, and commands until stopped.
    pub async fn run(self, mut commands: mpsc::Receiver<SyncCommand>) {
        info!("sync engine started for device {}", self.device);

        let mut changes = self.remote.subscribe();
        let mut notifications_open = true;
        let mut poll = tokio::time::interval(self.config.poll_interval());
        // Skip first immediate tick
        poll.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.perform_full_sync().await {
                        warn!("periodic sync failed: {e}");
                    }
                }
                change = changes.recv(), if notifications_open => {
                    match change {
                        Ok(RemoteChange { keys }) => {
                            if let Err(e) = self.pull_keys(&keys).await {
                                warn!("pull of changed keys failed: {e}");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("missed {missed} remote change notifications, pulling everything");
                            if let Err(e) = self.pull().await {
                                warn!("catch-up pull failed: {e}");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("remote change notifications closed");
                            notifications_open = false;
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(SyncCommand::SyncNow(reply)) => {
                            let _ = reply.send(self.perform_full_sync().await);
                        }
                        Some(SyncCommand::Stop) => {
                            info!("sync engine stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping sync engine");
                            break;
                        }
                    }
                }
            }
        }

        info!("sync engine stopped");
    }
}
