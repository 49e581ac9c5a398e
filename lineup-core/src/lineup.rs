//! The facade the application talks to.

use crate::config::LineupConfig;
use crate::device::load_or_create_device_id;
use crate::error::{CoreError, CoreResult};
use lineup_cache::{
    CacheCoordinator, CacheEvent, CoordinatorHandle, DerivedCellCache, ScheduleProvider,
};
use lineup_store::{PreferenceStore, ProfileRegistry, SharedProfile, StoreError};
use lineup_sync::{RemoteKv, SyncEngine, SyncHandle, SyncReport};
use lineup_types::{
    AttendanceIndex, AttendanceStatus, ChangeBus, DEFAULT_PROFILE, DeviceId, Priority, Profile,
    is_default_profile,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Owns the store, registry, sync engine and display cache of one device.
///
/// Must be opened inside a tokio runtime: the sync loop and the cache
/// coordinator are spawned onto it.
pub struct LineupCore {
    config: LineupConfig,
    store: PreferenceStore,
    registry: ProfileRegistry,
    sync: SyncEngine,
    sync_handle: SyncHandle,
    coordinator: CoordinatorHandle,
    event_year: AtomicI32,
}

impl LineupCore {
    /// Opens every component. Storage failures degrade instead of failing.
    pub fn open(
        config: LineupConfig,
        remote: Arc<dyn RemoteKv>,
        provider: Arc<dyn ScheduleProvider>,
        bus: ChangeBus,
    ) -> CoreResult<Self> {
        let device = load_or_create_device_id(config.store.path.as_deref());
        info!("opening lineup core for device {device}");
        let store = PreferenceStore::open(&config.store, device, bus.clone());
        let registry = open_registry(&config, store.clone())?;
        let restored = registry.reconcile();
        if !restored.is_empty() {
            info!("restored {} profile rows at startup", restored.len());
        }

        let sync = SyncEngine::new(store.clone(), remote, config.sync.clone(), config.event_year);
        let sync_handle = sync.spawn();

        let active = registry.active_profile();
        let cache = Arc::new(DerivedCellCache::new(
            Arc::clone(&provider),
            store.clone(),
            config.cache.max_capacity,
        ));
        let coordinator = CacheCoordinator::new(
            cache,
            provider,
            bus,
            config.cache.clone(),
            &active,
            config.event_year,
        )
        .spawn();

        Ok(Self {
            event_year: AtomicI32::new(config.event_year),
            config,
            store,
            registry,
            sync,
            sync_handle,
            coordinator,
        })
    }

    pub fn config(&self) -> &LineupConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceId {
        self.store.device()
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<DerivedCellCache> {
        self.coordinator.cache()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.coordinator.subscribe()
    }

    pub fn event_year(&self) -> i32 {
        self.event_year.load(Ordering::Relaxed)
    }

    pub fn active_profile(&self) -> String {
        self.registry.active_profile()
    }

    /// Runs a blocking store or registry call off the async executor.
    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(ProfileRegistry) -> CoreResult<T> + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(registry))
            .await
            .map_err(|e| CoreError::Task(e.to_string()))?
    }

    fn writable_active_profile(&self) -> CoreResult<String> {
        let active = self.active_profile();
        if self.registry.is_read_only(&active) {
            return Err(CoreError::ReadOnlyProfile(active));
        }
        Ok(active)
    }

    // ── Marks ───────────────────────────────────────────────────

    /// Marks `band` in the active profile and pushes it when that is the owner profile.
    pub async fn set_priority(&self, band: &str, priority: Priority) -> CoreResult<()> {
        let profile = self.writable_active_profile()?;
        let committed = self
            .store
            .set_priority(band, self.event_year(), &profile, priority, None)
            .finished()
            .await;
        if !committed {
            return Err(CoreError::WriteFailed("set_priority"));
        }
        if is_default_profile(&profile) && self.config.sync.write_through {
            if let Err(e) = self.sync.push_priority(band).await {
                warn!("write-through of {band} failed, next sync retries: {e}");
            }
        }
        Ok(())
    }

    pub fn priority(&self, band: &str) -> Priority {
        self.store
            .get_priority(band, self.event_year(), &self.active_profile())
    }

    /// Records attendance for one event in the active profile.
    pub async fn set_attendance(&self, index: &AttendanceIndex, status: AttendanceStatus) -> CoreResult<()> {
        let profile = self.writable_active_profile()?;
        let committed = self
            .store
            .set_attendance_status(index, &profile, status, None, None)
            .finished()
            .await;
        if !committed {
            return Err(CoreError::WriteFailed("set_attendance"));
        }
        if is_default_profile(&profile) && self.config.sync.write_through {
            if let Err(e) = self.sync.push_attendance(index).await {
                warn!("write-through of {index} failed, next sync retries: {e}");
            }
        }
        Ok(())
    }

    pub fn attendance(&self, index: &AttendanceIndex) -> AttendanceStatus {
        self.store
            .get_attendance_status_by_index(index, &self.active_profile())
    }

    // ── Profiles ────────────────────────────────────────────────

    /// Every selectable profile, owner first, after restoring orphaned data.
    pub async fn profiles(&self) -> CoreResult<Vec<Profile>> {
        self.blocking(|registry| Ok(registry.available_profiles()))
            .await
    }

    /// Makes `user_id` the active profile.
    ///
    /// The cache is suspended for the quiet window, so the switch produces a
    /// single rebuild and one refresh event.
    pub async fn switch_profile(&self, user_id: &str) -> CoreResult<()> {
        if self.registry.get_profile(user_id).is_none() {
            return Err(CoreError::ProfileNotFound(user_id.to_string()));
        }
        info!("switching active profile to {user_id}");
        self.coordinator.suspend().await?;
        let owned = user_id.to_string();
        let stored = self
            .blocking(move |registry| Ok(registry.set_active_profile(&owned)?))
            .await;
        if stored.is_ok() {
            self.coordinator.set_profile(user_id).await?;
        }
        tokio::time::sleep(self.config.cache.profile_switch_quiet()).await;
        self.coordinator.resume().await?;
        stored
    }

    /// Imports a shared profile document under `label`.
    pub async fn import_profile(&self, json: &str, label: &str) -> CoreResult<Profile> {
        let doc = SharedProfile::from_json(json)?;
        self.coordinator.suspend().await?;
        let label = label.to_string();
        let imported = self
            .blocking(move |registry| Ok(doc.import_into(&registry, &label)?))
            .await;
        self.coordinator.resume().await?;
        imported
    }

    /// Serializes a profile's marks for the current year into a shareable document.
    pub fn export_profile(&self, user_id: &str, sender_name: &str) -> CoreResult<String> {
        if self.registry.get_profile(user_id).is_none() {
            return Err(CoreError::ProfileNotFound(user_id.to_string()));
        }
        let sender_id = if is_default_profile(user_id) {
            self.device().to_string()
        } else {
            user_id.to_string()
        };
        let doc = SharedProfile::from_store(&self.store, user_id, &sender_id, sender_name, self.event_year());
        Ok(doc.to_json()?)
    }

    /// Deletes an imported profile and its marks. An active profile falls back to the owner.
    pub async fn delete_profile(&self, user_id: &str) -> CoreResult<()> {
        if is_default_profile(user_id) {
            return Err(StoreError::OwnerProfile.into());
        }
        let was_active = self.active_profile() == user_id;
        self.coordinator.suspend().await?;
        let owned = user_id.to_string();
        let deleted = self
            .blocking(move |registry| Ok(registry.delete_profile(&owned)?))
            .await;
        if was_active {
            self.coordinator.set_profile(DEFAULT_PROFILE).await?;
        }
        self.coordinator.resume().await?;
        deleted
    }

    pub async fn rename_profile(&self, user_id: &str, label: &str) -> CoreResult<()> {
        let (owned, label) = (user_id.to_string(), label.to_string());
        self.blocking(move |registry| Ok(registry.update_label(&owned, &label)?))
            .await
    }

    /// Copies every mark of `user_id` into the owner profile as fresh local
    /// writes, then pushes them.
    pub async fn copy_to_default(&self, user_id: &str) -> CoreResult<SyncReport> {
        if is_default_profile(user_id) {
            return Ok(SyncReport::default());
        }
        if self.registry.get_profile(user_id).is_none() {
            return Err(CoreError::ProfileNotFound(user_id.to_string()));
        }
        if !self.store.copy_profile(user_id, DEFAULT_PROFILE).finished().await {
            return Err(CoreError::WriteFailed("copy_profile"));
        }
        let _ = self
            .blocking(|registry| Ok(registry.refresh_counts(DEFAULT_PROFILE)?))
            .await?;
        info!("copied {user_id} into {DEFAULT_PROFILE}");
        if !self.config.sync.write_through {
            return Ok(SyncReport::default());
        }
        match self.sync.push().await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!("push after copy failed, next sync retries: {e}");
                Ok(SyncReport::default())
            }
        }
    }

    // ── Year & sync ─────────────────────────────────────────────

    /// Switches the festival year for the cache and for sync.
    pub async fn change_year(&self, year: i32) -> CoreResult<()> {
        self.event_year.store(year, Ordering::Relaxed);
        self.sync.set_event_year(year);
        self.coordinator.change_year(year).await?;
        Ok(())
    }

    /// Runs a full sync on the background loop and waits for its report.
    pub async fn sync_now(&self) -> CoreResult<SyncReport> {
        Ok(self.sync_handle.sync_now().await?)
    }

    /// Stops the background tasks and waits for queued writes to land.
    pub async fn shutdown(&self) -> CoreResult<()> {
        if let Err(e) = self.sync_handle.stop().await {
            warn!("sync loop already stopped: {e}");
        }
        if let Err(e) = self.coordinator.shutdown().await {
            warn!("cache coordinator already stopped: {e}");
        }
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.flush())
            .await
            .map_err(|e| CoreError::Task(e.to_string()))?;
        info!("lineup core shut down");
        Ok(())
    }
}

/// Opens the on-disk registry, falling back to an in-memory one so profile
/// metadata problems never keep the marks themselves from loading.
fn open_registry(config: &LineupConfig, store: PreferenceStore) -> CoreResult<ProfileRegistry> {
    let Some(path) = config.registry_path() else {
        return Ok(ProfileRegistry::open_in_memory(store, config.event_year)?);
    };
    match ProfileRegistry::open(&path, store.clone(), config.event_year) {
        Ok(registry) => Ok(registry),
        Err(e) => {
            warn!("profile registry at {} unavailable ({e}), using memory", path.display());
            Ok(ProfileRegistry::open_in_memory(store, config.event_year)?)
        }
    }
}
