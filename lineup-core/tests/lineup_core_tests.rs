use lineup_cache::{CacheConfig, CacheEvent, CoordinatorState, ScheduleEvent, StaticSchedule};
use lineup_core::{CoreError, LineupConfig, LineupCore};
use lineup_store::{SharedProfile, StoreConfig, StoreError};
use lineup_sync::{MemoryKv, SyncConfig, SyncError};
use lineup_types::{AttendanceIndex, AttendanceStatus, ChangeBus, DEFAULT_PROFILE, Priority, StartTime};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const YEAR: i32 = 2026;
const FRIEND: &str = "device-B";

fn event(band: &str, time_index: f64, year: i32) -> ScheduleEvent {
    ScheduleEvent {
        band: band.into(),
        year,
        time_index,
        location: "Pool Deck".into(),
        day: "Day 1".into(),
        start_time: StartTime::new(20, 0).unwrap(),
        end_time: StartTime::new(21, 0).unwrap(),
        event_type: "Show".into(),
        notes: String::new(),
    }
}

fn config() -> LineupConfig {
    LineupConfig {
        cache: CacheConfig {
            wait_max_attempts: 3,
            wait_cooldown_ms: 10,
            profile_switch_quiet_ms: 50,
            ..CacheConfig::default()
        },
        event_year: YEAR,
        ..LineupConfig::default()
    }
}

fn shared_doc() -> String {
    format!(
        r#"{{
            "senderUserId": "{FRIEND}",
            "senderName": "Alex",
            "shareDate": "2026-01-31T18:00:00Z",
            "eventYear": {YEAR},
            "priorities": {{ "Slayer": 3, "Metallica": 2 }},
            "attendance": {{}},
            "version": "1.0"
        }}"#
    )
}

struct Fixture {
    core: LineupCore,
    remote: MemoryKv,
    schedule: Arc<StaticSchedule>,
}

async fn open_with(config: LineupConfig) -> Fixture {
    let bus = ChangeBus::new();
    let schedule = Arc::new(StaticSchedule::with_bus(bus.clone()));
    schedule.add_event(event("Metallica", 10.0, YEAR));
    schedule.add_event(event("Slayer", 20.0, YEAR));
    let remote = MemoryKv::new();
    let core = LineupCore::open(config, Arc::new(remote.clone()), schedule.clone(), bus).unwrap();
    core.coordinator()
        .wait_for_state(CoordinatorState::Ready)
        .await
        .unwrap();
    Fixture {
        core,
        remote,
        schedule,
    }
}

async fn open() -> Fixture {
    open_with(config()).await
}

async fn next_event(events: &mut broadcast::Receiver<CacheEvent>) -> CacheEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for cache event")
        .expect("event channel closed")
}

fn slayer_show() -> AttendanceIndex {
    AttendanceIndex::new("Slayer", "Pool Deck", StartTime::new(20, 0).unwrap(), "Show", YEAR)
}

// ── Startup ──────────────────────────────────────────────────────

#[tokio::test]
async fn opens_with_the_owner_profile_active() {
    let f = open().await;

    assert_eq!(f.core.active_profile(), DEFAULT_PROFILE);
    let profiles = f.core.profiles().await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert!(profiles[0].is_default());
    assert_eq!(f.core.cache().len(), 2);
}

#[tokio::test]
async fn on_disk_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.store = StoreConfig::at(dir.path().join("lineup.sqlite"));

    let device = {
        let f = open_with(cfg.clone()).await;
        f.core.import_profile(&shared_doc(), "Alex").await.unwrap();
        f.core.switch_profile(FRIEND).await.unwrap();
        f.core.shutdown().await.unwrap();
        f.core.device().clone()
    };

    let f = open_with(cfg).await;
    assert_eq!(f.core.device(), &device);
    assert_eq!(f.core.active_profile(), FRIEND);
    assert_eq!(f.core.priority("Slayer"), Priority::Wont);
}

// ── Marks & write-through ────────────────────────────────────────

#[tokio::test]
async fn owner_priority_is_pushed_immediately() {
    let f = open().await;
    f.core.set_priority("Metallica", Priority::Must).await.unwrap();

    assert_eq!(f.core.priority("Metallica"), Priority::Must);
    let pushed = f.remote.peek("bandName:Metallica").unwrap();
    assert!(pushed.starts_with(&format!("1:{}:", f.core.device())), "{pushed}");
}

#[tokio::test]
async fn owner_attendance_is_pushed_immediately() {
    let f = open().await;
    f.core
        .set_attendance(&slayer_show(), AttendanceStatus::SawAll)
        .await
        .unwrap();

    assert_eq!(f.core.attendance(&slayer_show()), AttendanceStatus::SawAll);
    let pushed = f
        .remote
        .peek("eventName:Slayer:Pool Deck:20:00:Show:2026")
        .unwrap();
    assert!(pushed.starts_with("2:"), "{pushed}");
}

#[tokio::test]
async fn write_through_can_be_disabled() {
    let mut cfg = config();
    cfg.sync = SyncConfig {
        write_through: false,
        ..SyncConfig::default()
    };
    let f = open_with(cfg).await;
    f.core.set_priority("Metallica", Priority::Must).await.unwrap();

    assert_eq!(f.core.priority("Metallica"), Priority::Must);
    assert!(f.remote.is_empty());
}

#[tokio::test]
async fn owner_edit_patches_the_cache() {
    let f = open().await;
    let mut events = f.core.subscribe();
    f.core.set_priority("Slayer", Priority::Might).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::RowsUpdated {
            band: "Slayer".into()
        }
    );
    assert_eq!(f.core.cache().get_row(1).unwrap().priority, Priority::Might);
}

// ── Profiles ─────────────────────────────────────────────────────

#[tokio::test]
async fn imported_profile_is_read_only_and_switchable() {
    let f = open().await;
    let mut events = f.core.subscribe();
    let profile = f.core.import_profile(&shared_doc(), "Alex's picks").await.unwrap();
    assert_eq!(profile.user_id, FRIEND);
    assert_eq!(profile.label, "Alex's picks");
    assert!(profile.is_read_only);
    assert_eq!(next_event(&mut events).await, CacheEvent::Refreshed);

    f.core.switch_profile(FRIEND).await.unwrap();

    assert_eq!(next_event(&mut events).await, CacheEvent::Refreshed);
    assert_eq!(f.core.active_profile(), FRIEND);
    assert_eq!(f.core.cache().context().unwrap().profile, FRIEND);
    assert_eq!(f.core.cache().get_row(1).unwrap().priority, Priority::Wont);
    assert_eq!(f.core.priority("Metallica"), Priority::Might);

    let denied = f.core.set_priority("Slayer", Priority::Must).await;
    assert!(matches!(denied, Err(CoreError::ReadOnlyProfile(p)) if p == FRIEND));
    assert_eq!(f.core.priority("Slayer"), Priority::Wont);
}

#[tokio::test]
async fn imports_never_touch_the_owner_profile() {
    let f = open().await;
    f.core.import_profile(&shared_doc(), "Alex").await.unwrap();

    assert_eq!(f.core.priority("Slayer"), Priority::Unknown);
    assert!(f.remote.is_empty());
}

#[tokio::test]
async fn switching_to_an_unknown_profile_fails() {
    let f = open().await;
    let result = f.core.switch_profile("nobody").await;
    assert!(matches!(result, Err(CoreError::ProfileNotFound(p)) if p == "nobody"));
    assert_eq!(f.core.active_profile(), DEFAULT_PROFILE);
}

#[tokio::test]
async fn deleting_the_active_profile_falls_back_to_owner() {
    let f = open().await;
    let mut events = f.core.subscribe();
    f.core.import_profile(&shared_doc(), "Alex").await.unwrap();
    assert_eq!(next_event(&mut events).await, CacheEvent::Refreshed);
    f.core.switch_profile(FRIEND).await.unwrap();
    assert_eq!(next_event(&mut events).await, CacheEvent::Refreshed);

    f.core.delete_profile(FRIEND).await.unwrap();

    assert_eq!(next_event(&mut events).await, CacheEvent::Refreshed);
    assert_eq!(f.core.active_profile(), DEFAULT_PROFILE);
    assert_eq!(f.core.cache().context().unwrap().profile, DEFAULT_PROFILE);
    assert_eq!(f.core.store().counts(FRIEND).priorities, 0);
    let profiles = f.core.profiles().await.unwrap();
    assert!(profiles.iter().all(|p| p.user_id != FRIEND));
}

#[tokio::test]
async fn owner_profile_cannot_be_deleted() {
    let f = open().await;
    let result = f.core.delete_profile(DEFAULT_PROFILE).await;
    assert!(matches!(result, Err(CoreError::Store(StoreError::OwnerProfile))));
}

#[tokio::test]
async fn rename_changes_only_the_label() {
    let f = open().await;
    f.core.import_profile(&shared_doc(), "Alex").await.unwrap();
    f.core.rename_profile(FRIEND, "Alex (2026)").await.unwrap();

    let profile = f.core.registry().get_profile(FRIEND).unwrap();
    assert_eq!(profile.label, "Alex (2026)");
    assert_eq!(profile.user_id, FRIEND);
}

#[tokio::test]
async fn copy_to_default_takes_the_marks_and_pushes_them() {
    let f = open().await;
    f.core.import_profile(&shared_doc(), "Alex").await.unwrap();

    let report = f.core.copy_to_default(FRIEND).await.unwrap();

    assert_eq!(report.pushed, 2);
    assert_eq!(f.core.priority("Slayer"), Priority::Wont);
    let pushed = f.remote.peek("bandName:Slayer").unwrap();
    assert!(pushed.starts_with(&format!("3:{}:", f.core.device())), "{pushed}");
    let owner = f.core.registry().get_profile(DEFAULT_PROFILE).unwrap();
    assert_eq!(owner.priority_count, 2);
}

#[tokio::test]
async fn export_round_trips_through_a_share_document() {
    let f = open().await;
    f.core.set_priority("Metallica", Priority::Must).await.unwrap();

    let json = f.core.export_profile(DEFAULT_PROFILE, "Sam").unwrap();
    let doc = SharedProfile::from_json(&json).unwrap();
    assert_eq!(doc.sender_user_id, f.core.device().to_string());
    assert_eq!(doc.sender_name, "Sam");
    assert_eq!(doc.priorities.get("Metallica"), Some(&1));
    assert_eq!(doc.event_year, YEAR);
}

// ── Sync & year ──────────────────────────────────────────────────

#[tokio::test]
async fn sync_now_pulls_remote_marks() {
    let f = open().await;
    f.remote.set_external("bandName:Kreator", "2:deviceZ:100");

    f.core.sync_now().await.unwrap();
    assert_eq!(f.core.priority("Kreator"), Priority::Might);
}

#[tokio::test]
async fn year_change_reloads_the_cache() {
    let f = open().await;
    f.schedule.add_event(event("Kreator", 5.0, YEAR + 1));
    let mut events = f.core.subscribe();

    f.core.change_year(YEAR + 1).await.unwrap();

    assert_eq!(next_event(&mut events).await, CacheEvent::Ready { rows: 1 });
    assert_eq!(f.core.event_year(), YEAR + 1);
    assert_eq!(f.core.sync_engine().event_year(), YEAR + 1);
}

#[tokio::test]
async fn shutdown_stops_background_tasks() {
    let f = open().await;
    f.core.shutdown().await.unwrap();

    let result = f.core.sync_now().await;
    assert!(matches!(result, Err(CoreError::Sync(SyncError::ChannelClosed))));
}
