//! Keeps the derived cache coherent with the store and the schedule.
//!
//! The coordinator is a task driving a small state machine:
//!
//! ```text
//! Waiting -> Loading -> Ready -> YearChanging -> Waiting ...
//! ```
//!
//! - `Waiting` polls the schedule for data under a [`WaitPolicy`].
//! - `Loading` collects the full item list and rebuilds the cache.
//! - `Ready` turns each change notification into the matching incremental
//!   patch, or a full rebuild when the cache is stale. Rows built from
//!   fallback data are kept until upstream reports bands.
//! - `YearChanging` drops the subscription, clears the cache and restarts.
//!
//! While suspended, notifications are only noted. Resuming performs at most
//! one rebuild and emits exactly one [`CacheEvent::Refreshed`].

use crate::cache::{CacheContext, DerivedCellCache};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::row::sort_items;
use crate::schedule::{ListItem, ScheduleProvider};
use crate::wait::{WaitDecision, WaitPolicy};
use lineup_types::{ChangeBus, ChangeKind, EntityChanged};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Waiting,
    Loading,
    Ready,
    YearChanging,
}

/// Notifications for list consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The first build after waiting finished.
    Ready { rows: usize },
    /// Rows of one band were patched in place.
    RowsUpdated { band: String },
    /// The whole list may have changed; reload it.
    Refreshed,
}

#[derive(Debug)]
enum Command {
    ChangeYear(i32),
    SetProfile(String),
    Suspend,
    Resume,
    RequestRebuild,
    Shutdown,
}

/// Handle for driving a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<CacheEvent>,
    state: watch::Receiver<CoordinatorState>,
    cache: Arc<DerivedCellCache>,
}

impl CoordinatorHandle {
    async fn send(&self, command: Command) -> CacheResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| CacheError::ChannelClosed)
    }

    /// Clears the cache and starts over for `year`.
    pub async fn change_year(&self, year: i32) -> CacheResult<()> {
        self.send(Command::ChangeYear(year)).await
    }

    /// Clears the cache and builds subsequent rows for `profile`.
    pub async fn set_profile(&self, profile: &str) -> CacheResult<()> {
        self.send(Command::SetProfile(profile.to_string())).await
    }

    /// Ignores notifications until [`resume`](Self::resume).
    pub async fn suspend(&self) -> CacheResult<()> {
        self.send(Command::Suspend).await
    }

    pub async fn resume(&self) -> CacheResult<()> {
        self.send(Command::Resume).await
    }

    pub async fn request_rebuild(&self) -> CacheResult<()> {
        self.send(Command::RequestRebuild).await
    }

    pub async fn shutdown(&self) -> CacheResult<()> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub async fn wait_for_state(&self, target: CoordinatorState) -> CacheResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| CacheError::ChannelClosed)
    }

    pub fn cache(&self) -> &Arc<DerivedCellCache> {
        &self.cache
    }
}

enum Next {
    Change(Result<EntityChanged, RecvError>),
    Command(Option<Command>),
}

/// The coordinator task. Build with [`CacheCoordinator::new`], then [`spawn`](Self::spawn).
pub struct CacheCoordinator {
    cache: Arc<DerivedCellCache>,
    provider: Arc<dyn ScheduleProvider>,
    bus: ChangeBus,
    config: CacheConfig,
    policy: WaitPolicy,
    profile: String,
    year: i32,
    fallback: Vec<ListItem>,
    /// Rows come from the fallback list until upstream reports bands.
    on_fallback: bool,
    state_tx: watch::Sender<CoordinatorState>,
    state_rx: watch::Receiver<CoordinatorState>,
    events: broadcast::Sender<CacheEvent>,
    subscription: Option<broadcast::Receiver<EntityChanged>>,
    attempt: u32,
    pending_year: Option<i32>,
    suspended: bool,
    missed_while_suspended: bool,
}

impl CacheCoordinator {
    pub fn new(
        cache: Arc<DerivedCellCache>,
        provider: Arc<dyn ScheduleProvider>,
        bus: ChangeBus,
        config: CacheConfig,
        profile: &str,
        year: i32,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Waiting);
        let (events, _) = broadcast::channel(64);
        let policy = WaitPolicy::new(config.wait_max_attempts, config.wait_cooldown());
        Self {
            cache,
            provider,
            bus,
            config,
            policy,
            profile: profile.to_string(),
            year,
            fallback: Vec::new(),
            on_fallback: false,
            state_tx,
            state_rx,
            events,
            subscription: None,
            attempt: 0,
            pending_year: None,
            suspended: false,
            missed_while_suspended: false,
        }
    }

    /// Items to show when upstream has nothing yet.
    pub fn with_fallback(mut self, items: Vec<ListItem>) -> Self {
        self.fallback = items;
        self
    }

    /// Starts the coordinator task on the current runtime.
    pub fn spawn(self) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let handle = CoordinatorHandle {
            command_tx,
            events: self.events.clone(),
            state: self.state_rx.clone(),
            cache: Arc::clone(&self.cache),
        };
        tokio::spawn(self.run(command_rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("cache coordinator started for {} / {}", self.profile, self.year);
        loop {
            let state = *self.state_rx.borrow();
            let keep_going = match state {
                CoordinatorState::Waiting => self.wait_step(&mut commands).await,
                CoordinatorState::Loading => {
                    self.load().await;
                    true
                }
                CoordinatorState::Ready => self.ready_step(&mut commands).await,
                CoordinatorState::YearChanging => {
                    self.change_year().await;
                    true
                }
            };
            if !keep_going {
                break;
            }
        }
        info!("cache coordinator stopped");
    }

    fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    fn set_state(&self, state: CoordinatorState) {
        debug!("cache coordinator -> {state:?}");
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.events.send(event);
    }

    fn context(&self) -> CacheContext {
        CacheContext {
            profile: self.profile.clone(),
            year: self.year,
            sort: self.config.sort_key,
        }
    }

    /// Runs a blocking cache call off the async executor.
    async fn on_cache<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&DerivedCellCache) -> T + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || f(&cache)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("cache task failed: {e}");
                None
            }
        }
    }

    // ── Waiting ─────────────────────────────────────────────────

    async fn wait_step(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        let upstream = self.upstream_band_count().await;

        match self.policy.decide(self.attempt, upstream, self.fallback.len()) {
            WaitDecision::Proceed => self.set_state(CoordinatorState::Loading),
            WaitDecision::UseFallback => {
                info!("upstream empty, building from {} fallback items", self.fallback.len());
                self.subscribe();
                self.on_fallback = true;
                let rows = self.rebuild_from(self.fallback_items(), "fallback data").await;
                self.enter_ready(rows);
            }
            WaitDecision::GiveUp => {
                warn!(
                    "no schedule data for {} after {} attempts, continuing with an empty list",
                    self.year,
                    self.attempt + 1
                );
                self.on_cache(|c| c.clear()).await;
                self.subscribe();
                self.enter_ready(0);
            }
            WaitDecision::Retry { after } => {
                self.attempt += 1;
                debug!("waiting for schedule data (attempt {})", self.attempt);
                tokio::select! {
                    _ = tokio::time::sleep(after) => {}
                    cmd = commands.recv() => return self.handle_command(cmd).await,
                }
            }
        }
        true
    }

    // ── Loading ─────────────────────────────────────────────────

    async fn load(&mut self) {
        self.subscribe();
        match self.collect_items().await {
            Ok(items) => {
                let rows = self.rebuild_from(items, "initial load").await;
                self.enter_ready(rows);
            }
            Err(e) => {
                self.attempt += 1;
                if self.attempt >= self.policy.max_attempts {
                    warn!("loading schedule data failed ({e}), continuing with an empty list");
                    self.on_cache(|c| c.clear()).await;
                    self.enter_ready(0);
                } else {
                    warn!("loading schedule data failed ({e}), waiting again");
                    self.subscription = None;
                    self.set_state(CoordinatorState::Waiting);
                }
            }
        }
    }

    fn fallback_items(&self) -> Vec<ListItem> {
        let mut items = self.fallback.clone();
        sort_items(&mut items, self.config.sort_key);
        items
    }

    async fn upstream_band_count(&self) -> usize {
        let provider = Arc::clone(&self.provider);
        let year = self.year;
        tokio::task::spawn_blocking(move || provider.band_count(year))
            .await
            .unwrap_or(0)
    }

    /// True once a fallback-built cache should be replaced by upstream data.
    async fn upstream_replaces_fallback(&mut self) -> bool {
        if !self.on_fallback || self.upstream_band_count().await == 0 {
            return false;
        }
        info!("upstream data arrived, replacing fallback rows");
        self.on_fallback = false;
        true
    }

    /// Reads and orders the full upstream item list, abandoning it after the collect timeout.
    async fn collect_items(&self) -> CacheResult<Vec<ListItem>> {
        let provider = Arc::clone(&self.provider);
        let (year, sort) = (self.year, self.config.sort_key);
        let collect = tokio::task::spawn_blocking(move || {
            let mut items = provider.list_items(year);
            sort_items(&mut items, sort);
            items
        });
        match tokio::time::timeout(self.config.collect_timeout(), collect).await {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(CacheError::Task(e.to_string())),
            Err(_) => Err(CacheError::Task(format!(
                "collecting items timed out after {:?}",
                self.config.collect_timeout()
            ))),
        }
    }

    async fn rebuild_from(&self, items: Vec<ListItem>, reason: &'static str) -> usize {
        let context = self.context();
        let outcome = self
            .on_cache(move |c| c.rebuild(context, &items, reason))
            .await;
        match outcome {
            Some(Ok(rows)) => rows,
            Some(Err(e)) => {
                warn!("rebuild skipped: {e}");
                self.cache.len()
            }
            None => self.cache.len(),
        }
    }

    /// Collects upstream items again and rebuilds. Returns the row count.
    ///
    /// While upstream is still empty, a fallback-built cache is rebuilt from
    /// the fallback list instead.
    async fn full_rebuild(&mut self, reason: &'static str) -> usize {
        if self.on_fallback && !self.upstream_replaces_fallback().await {
            return self.rebuild_from(self.fallback_items(), reason).await;
        }
        match self.collect_items().await {
            Ok(items) => self.rebuild_from(items, reason).await,
            Err(e) => {
                warn!("full rebuild ({reason}) abandoned: {e}");
                self.cache.len()
            }
        }
    }

    async fn rebuild_and_announce(&mut self, reason: &'static str) {
        self.full_rebuild(reason).await;
        self.emit(CacheEvent::Refreshed);
    }

    fn subscribe(&mut self) {
        if self.subscription.is_none() {
            self.subscription = Some(self.bus.subscribe());
        }
    }

    fn enter_ready(&mut self, rows: usize) {
        self.attempt = 0;
        self.set_state(CoordinatorState::Ready);
        self.emit(CacheEvent::Ready { rows });
    }

    // ── Ready ───────────────────────────────────────────────────

    async fn ready_step(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        let next = match self.subscription.as_mut() {
            Some(changes) => tokio::select! {
                biased;
                cmd = commands.recv() => Next::Command(cmd),
                change = changes.recv() => Next::Change(change),
            },
            None => Next::Command(commands.recv().await),
        };
        match next {
            Next::Change(change) => {
                self.on_change(change).await;
                true
            }
            Next::Command(cmd) => self.handle_command(cmd).await,
        }
    }

    async fn on_change(&mut self, change: Result<EntityChanged, RecvError>) {
        let change = match change {
            Ok(change) => change,
            Err(RecvError::Lagged(missed)) => {
                warn!("missed {missed} change notifications");
                if self.suspended {
                    self.missed_while_suspended = true;
                } else {
                    self.rebuild_and_announce("missed notifications").await;
                }
                return;
            }
            Err(RecvError::Closed) => {
                debug!("change bus closed");
                self.subscription = None;
                return;
            }
        };

        if let Some(profile) = &change.profile {
            if *profile != self.profile {
                debug!("ignoring change for inactive profile {profile}");
                return;
            }
        }
        if self.suspended {
            self.missed_while_suspended = true;
            return;
        }
        if self.upstream_replaces_fallback().await {
            self.rebuild_and_announce("upstream data arrived").await;
            return;
        }
        if change.kind == ChangeKind::Bulk || change.ids.is_empty() || self.cache.needs_full_rebuild() {
            self.rebuild_and_announce("change notification").await;
            return;
        }

        for band in change.ids {
            let target = band.clone();
            let patched = match change.kind {
                ChangeKind::Priority => self.on_cache(move |c| c.update_priority_for(&target)).await,
                ChangeKind::Attendance => self.on_cache(move |c| c.update_attendance_for(&target)).await,
                ChangeKind::Band | ChangeKind::Event => {
                    self.on_cache(move |c| c.refresh_band(&target)).await
                }
                ChangeKind::Bulk => None,
            };
            if patched.unwrap_or(0) > 0 {
                self.emit(CacheEvent::RowsUpdated { band });
            }
        }
    }

    async fn handle_command(&mut self, cmd: Option<Command>) -> bool {
        match cmd {
            None | Some(Command::Shutdown) => {
                info!("cache coordinator shutting down");
                return false;
            }
            Some(Command::ChangeYear(year)) => {
                self.pending_year = Some(year);
                self.set_state(CoordinatorState::YearChanging);
            }
            Some(Command::SetProfile(profile)) => {
                info!("cache switching to profile {profile}");
                self.profile = profile;
                self.on_cache(|c| c.clear()).await;
                if self.state() == CoordinatorState::Ready {
                    if self.suspended {
                        self.missed_while_suspended = true;
                    } else {
                        self.rebuild_and_announce("profile switch").await;
                    }
                }
            }
            Some(Command::Suspend) => {
                debug!("cache notifications suspended");
                self.suspended = true;
            }
            Some(Command::Resume) => {
                if !self.suspended {
                    return true;
                }
                self.suspended = false;
                self.drain_suppressed();
                let missed = std::mem::take(&mut self.missed_while_suspended);
                if self.state() == CoordinatorState::Ready && (missed || self.cache.needs_full_rebuild()) {
                    self.full_rebuild("resume").await;
                }
                self.emit(CacheEvent::Refreshed);
            }
            Some(Command::RequestRebuild) => {
                if self.state() != CoordinatorState::Ready {
                    debug!("rebuild requested before ready, ignoring");
                } else if self.suspended {
                    self.missed_while_suspended = true;
                } else {
                    self.rebuild_and_announce("requested").await;
                }
            }
        }
        true
    }

    /// Folds notifications still queued from the suspended period into one refresh.
    fn drain_suppressed(&mut self) {
        let Some(changes) = self.subscription.as_mut() else {
            return;
        };
        loop {
            match changes.try_recv() {
                Ok(change) => {
                    if change.profile.as_ref().is_none_or(|p| *p == self.profile) {
                        self.missed_while_suspended = true;
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => self.missed_while_suspended = true,
                Err(_) => break,
            }
        }
    }

    // ── YearChanging ────────────────────────────────────────────

    async fn change_year(&mut self) {
        self.subscription = None;
        self.on_cache(|c| c.clear()).await;
        self.attempt = 0;
        self.on_fallback = false;
        if let Some(year) = self.pending_year.take() {
            info!("cache switching to year {year}");
            self.year = year;
        }
        self.set_state(CoordinatorState::Waiting);
    }
}
