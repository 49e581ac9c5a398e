//! The remote key/value store the owner's devices share.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

/// Keys changed on the remote store by another device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub keys: Vec<String>,
}

/// An eventually-consistent string key/value store.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    async fn get_all_keys(&self) -> SyncResult<Vec<String>>;

    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Asks the store to exchange pending changes with its backend.
    async fn synchronize(&self) -> SyncResult<()>;

    /// Notifications for changes that originated on other devices.
    fn subscribe(&self) -> broadcast::Receiver<RemoteChange>;
}

// ── MemoryKv ────────────────────────────────────────────────────

/// In-process remote store. Used by tests and as a stand-in when no
/// platform store is available.
///
/// Writes made through [`RemoteKv::set`] are treated as local and produce no
/// notification; [`MemoryKv::set_external`] simulates another device.
#[derive(Clone)]
pub struct MemoryKv {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    entries: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<RemoteChange>,
    latency_ms: AtomicU64,
    offline: AtomicBool,
    sync_calls: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                entries: Mutex::new(BTreeMap::new()),
                changes,
                latency_ms: AtomicU64::new(0),
                offline: AtomicBool::new(false),
                sync_calls: AtomicU64::new(0),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.inner.entries.lock().unwrap_or_else(|poisoned| {
            warn!("memory kv recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Writes a value as if another device had, and notifies subscribers.
    pub fn set_external(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
        let _ = self.inner.changes.send(RemoteChange {
            keys: vec![key.to_string()],
        });
    }

    /// Raw value, bypassing latency and offline simulation.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delay applied to every trait call.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// When offline every trait call fails.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Relaxed);
    }

    pub fn synchronize_calls(&self) -> u64 {
        self.inner.sync_calls.load(Ordering::Relaxed)
    }

    async fn simulate(&self) -> SyncResult<()> {
        let latency = self.inner.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.offline.load(Ordering::Relaxed) {
            return Err(SyncError::Remote("store is offline".into()));
        }
        Ok(())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteKv for MemoryKv {
    async fn get_all_keys(&self) -> SyncResult<Vec<String>> {
        self.simulate().await?;
        Ok(self.entries().keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        self.simulate().await?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.simulate().await?;
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn synchronize(&self) -> SyncResult<()> {
        self.simulate().await?;
        self.inner.sync_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.inner.changes.subscribe()
    }
}
