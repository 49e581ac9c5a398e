use lineup_store::PreferenceStore;
use lineup_sync::{MemoryKv, RemoteKv, SyncConfig, SyncEngine, SyncError, SyncReport};
use lineup_types::{
    AttendanceIndex, AttendanceRecord, AttendanceStatus, ChangeBus, ChangeKind, DEFAULT_PROFILE,
    DeviceId, Priority, PriorityRecord, StartTime,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const YEAR: i32 = 2026;

struct Fixture {
    store: PreferenceStore,
    kv: MemoryKv,
    engine: SyncEngine,
    bus: ChangeBus,
}

fn fixture() -> Fixture {
    let bus = ChangeBus::new();
    let store = PreferenceStore::open_in_memory(DeviceId::from("deviceA"), bus.clone()).unwrap();
    let kv = MemoryKv::new();
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(kv.clone()),
        SyncConfig::default(),
        YEAR,
    );
    Fixture {
        store,
        kv,
        engine,
        bus,
    }
}

fn priority(band: &str, value: Priority, ts: Option<f64>, origin: &str) -> PriorityRecord {
    PriorityRecord {
        band: band.into(),
        year: YEAR,
        profile: DEFAULT_PROFILE.into(),
        priority: value,
        last_modified: ts,
        origin_device: Some(DeviceId::from(origin)),
    }
}

fn index(band: &str) -> AttendanceIndex {
    AttendanceIndex::new(band, "Pool Deck", StartTime::new(20, 30).unwrap(), "Show", YEAR)
}

// ── Pull rules ───────────────────────────────────────────────────

#[tokio::test]
async fn pull_accepts_remote_when_no_local_record() {
    let f = fixture();
    f.kv.set("bandName:Metallica", "2:deviceB:200").await.unwrap();

    let report = f.engine.pull().await.unwrap();

    assert_eq!(report.applied, 1);
    let record = f.store.get_priority_record("Metallica", YEAR, DEFAULT_PROFILE).unwrap();
    assert_eq!(record.priority, Priority::Might);
    assert_eq!(record.last_modified, Some(200.0));
    assert_eq!(record.origin_device, Some(DeviceId::from("deviceB")));
}

#[tokio::test]
async fn pull_skips_values_this_device_already_pushed() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Must, Some(100.0), "deviceA"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceA:999").await.unwrap();

    let report = f.engine.pull().await.unwrap();

    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(f.store.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Must);
}

#[tokio::test]
async fn pull_keeps_local_when_remote_is_older() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Must, Some(100.0), "deviceB"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceC:50").await.unwrap();

    f.engine.pull().await.unwrap();

    assert_eq!(f.store.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Must);
}

#[tokio::test]
async fn pull_overwrites_local_when_remote_is_newer() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Must, Some(100.0), "deviceB"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceC:150").await.unwrap();

    let report = f.engine.pull().await.unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(f.store.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Wont);
}

#[tokio::test]
async fn pull_never_overwrites_local_without_timestamp() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Must, None, "deviceB"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceC:1000000").await.unwrap();

    f.engine.pull().await.unwrap();

    assert_eq!(f.store.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Must);
}

#[tokio::test]
async fn pull_touches_only_the_owner_profile() {
    let f = fixture();
    assert!(f
        .store
        .set_priority("Metallica", YEAR, "friend", Priority::Wont, Some(1.0))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "1:deviceB:200").await.unwrap();

    f.engine.pull().await.unwrap();

    assert_eq!(f.store.get_priority("Metallica", YEAR, "friend"), Priority::Wont);
    assert_eq!(f.store.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Must);
}

#[tokio::test]
async fn local_edit_racing_a_pull_keeps_the_newer_mark() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Might, Some(100.0), "deviceB"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceC:150").await.unwrap();

    let edit = f
        .store
        .set_priority("Metallica", YEAR, DEFAULT_PROFILE, Priority::Must, Some(200.0));
    let (report, committed) = tokio::join!(f.engine.pull(), edit.finished());

    assert!(committed);
    assert_eq!(report.unwrap().applied, 0);
    let record = f.store.get_priority_record("Metallica", YEAR, DEFAULT_PROFILE).unwrap();
    assert_eq!(record.priority, Priority::Must);
    assert_eq!(record.last_modified, Some(200.0));
}

#[tokio::test]
async fn skipped_merge_publishes_no_change() {
    let f = fixture();
    assert!(f
        .store
        .apply_priority_record(priority("Metallica", Priority::Must, Some(500.0), "deviceB"))
        .finished()
        .await);
    f.kv.set("bandName:Metallica", "3:deviceC:150").await.unwrap();
    let mut changes = f.bus.subscribe();

    let report = f.engine.pull().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn malformed_records_are_skipped_without_aborting() {
    let f = fixture();
    f.kv.set("bandName:Bad", "2:deviceB").await.unwrap();
    f.kv.set("bandName:AlsoBad", "2:deviceB:yesterday").await.unwrap();
    f.kv.set("bandName:WrongCode", "9:deviceB:10").await.unwrap();
    f.kv.set("eventName:Broken:Stage:20:Show:2026", "1:deviceB:10").await.unwrap();
    f.kv.set("unrelatedSetting", "whatever").await.unwrap();
    f.kv.set("bandName:Good", "1:deviceB:10").await.unwrap();

    let report = f.engine.pull().await.unwrap();

    assert_eq!(
        report,
        SyncReport {
            applied: 1,
            skipped: 1,
            malformed: 4,
            pushed: 0
        }
    );
    assert_eq!(f.store.get_priority("Good", YEAR, DEFAULT_PROFILE), Priority::Must);
}

#[tokio::test]
async fn pull_applies_attendance_with_legacy_tokens() {
    let f = fixture();
    let key = format!("eventName:{}", index("Slayer"));
    f.kv.set(&key, "sawSome:deviceB:300").await.unwrap();

    f.engine.pull().await.unwrap();

    let record = f.store.get_attendance_record(&index("Slayer"), DEFAULT_PROFILE).unwrap();
    assert_eq!(record.status, AttendanceStatus::SawSome);
    assert_eq!(record.time_index, AttendanceRecord::fallback_time_index(&index("Slayer")));
}

#[tokio::test]
async fn pull_keeps_existing_attendance_sort_key() {
    let f = fixture();
    assert!(f
        .store
        .set_attendance_status(&index("Slayer"), DEFAULT_PROFILE, AttendanceStatus::SawNone, Some(42.0), Some(10.0))
        .finished()
        .await);
    f.kv.set(&format!("eventName:{}", index("Slayer")), "2:deviceB:20").await.unwrap();

    f.engine.pull().await.unwrap();

    let record = f.store.get_attendance_record(&index("Slayer"), DEFAULT_PROFILE).unwrap();
    assert_eq!(record.status, AttendanceStatus::SawAll);
    assert_eq!(record.time_index, 42.0);
}

#[tokio::test]
async fn applied_records_are_announced_on_the_bus() {
    let f = fixture();
    let mut rx = f.bus.subscribe();
    f.kv.set("bandName:Metallica", "2:deviceB:200").await.unwrap();

    f.engine.pull().await.unwrap();

    let change = rx.try_recv().unwrap();
    assert_eq!(change.kind, ChangeKind::Priority);
    assert_eq!(change.ids, vec!["Metallica".to_string()]);
}

// ── Push ─────────────────────────────────────────────────────────

#[tokio::test]
async fn push_writes_missing_and_newer_records() {
    let f = fixture();
    let _ = f.store.apply_priority_record(priority("New", Priority::Must, Some(100.0), "deviceA"));
    let _ = f.store.apply_priority_record(priority("Newer", Priority::Might, Some(300.0), "deviceA"));
    assert!(f
        .store
        .apply_priority_record(priority("Stale", Priority::Wont, Some(100.0), "deviceA"))
        .finished()
        .await);
    f.kv.set("bandName:Newer", "1:deviceB:200").await.unwrap();
    f.kv.set("bandName:Stale", "1:deviceB:500").await.unwrap();

    let report = f.engine.push().await.unwrap();

    assert_eq!(report.pushed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(f.kv.peek("bandName:New").as_deref(), Some("1:deviceA:100"));
    assert_eq!(f.kv.peek("bandName:Newer").as_deref(), Some("2:deviceA:300"));
    assert_eq!(f.kv.peek("bandName:Stale").as_deref(), Some("1:deviceB:500"));
}

#[tokio::test]
async fn push_ignores_imported_profiles_and_other_years() {
    let f = fixture();
    let _ = f.store.set_priority("Friend", YEAR, "friend", Priority::Must, None);
    assert!(f
        .store
        .set_priority("Old", YEAR - 1, DEFAULT_PROFILE, Priority::Must, None)
        .finished()
        .await);

    let report = f.engine.push().await.unwrap();

    assert_eq!(report.pushed, 0);
    assert!(f.kv.is_empty());
}

#[tokio::test]
async fn push_encodes_attendance_keys() {
    let f = fixture();
    assert!(f
        .store
        .set_attendance_status(&index("Slayer"), DEFAULT_PROFILE, AttendanceStatus::SawAll, None, Some(77.0))
        .finished()
        .await);

    f.engine.push().await.unwrap();

    assert_eq!(
        f.kv.peek("eventName:Slayer:Pool Deck:20:30:Show:2026").as_deref(),
        Some("2:deviceA:77")
    );
}

#[tokio::test]
async fn write_through_pushes_a_single_record() {
    let f = fixture();
    let _ = f.store.set_priority("Other", YEAR, DEFAULT_PROFILE, Priority::Must, Some(5.0));
    assert!(f
        .store
        .set_priority("Metallica", YEAR, DEFAULT_PROFILE, Priority::Must, Some(10.0))
        .finished()
        .await);

    let report = f.engine.push_priority("Metallica").await.unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(f.kv.len(), 1);
    assert_eq!(f.kv.peek("bandName:Metallica").as_deref(), Some("1:deviceA:10"));
}

#[tokio::test]
async fn full_sync_round_trips_between_devices() {
    let kv = MemoryKv::new();
    let make = |device: &str| {
        let store =
            PreferenceStore::open_in_memory(DeviceId::from(device), ChangeBus::new()).unwrap();
        let engine = SyncEngine::new(store.clone(), Arc::new(kv.clone()), SyncConfig::default(), YEAR);
        (store, engine)
    };
    let (store_a, engine_a) = make("deviceA");
    let (store_b, engine_b) = make("deviceB");

    assert!(store_a
        .set_priority("Metallica", YEAR, DEFAULT_PROFILE, Priority::Must, Some(100.0))
        .finished()
        .await);
    engine_a.perform_full_sync().await.unwrap();
    engine_b.perform_full_sync().await.unwrap();
    assert_eq!(store_b.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Must);

    assert!(store_b
        .set_priority("Metallica", YEAR, DEFAULT_PROFILE, Priority::Wont, Some(200.0))
        .finished()
        .await);
    engine_b.perform_full_sync().await.unwrap();
    let report = engine_a.perform_full_sync().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(store_a.get_priority("Metallica", YEAR, DEFAULT_PROFILE), Priority::Wont);

    // Converged: nothing left to move.
    let report = engine_a.perform_full_sync().await.unwrap();
    assert_eq!(report.applied + report.pushed, 0);
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out() {
    let store = PreferenceStore::open_in_memory(DeviceId::from("deviceA"), ChangeBus::new()).unwrap();
    let kv = MemoryKv::new();
    kv.set_latency(Duration::from_secs(30));
    let config = SyncConfig {
        remote_timeout_secs: 1,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(store, Arc::new(kv), config, YEAR);

    let err = engine.pull().await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout { op: "synchronize", secs: 1 }));
}

#[tokio::test]
async fn offline_remote_reports_error() {
    let f = fixture();
    f.kv.set_offline(true);
    assert!(matches!(f.engine.perform_full_sync().await, Err(SyncError::Remote(_))));
}

// ── Background loop ──────────────────────────────────────────────

#[tokio::test]
async fn running_engine_pulls_external_changes() {
    let f = fixture();
    let mut changes = f.bus.subscribe();
    let handle = f.engine.spawn();
    // Round trip through the loop so it is subscribed before the change lands.
    handle.sync_now().await.unwrap();

    f.kv.set_external("bandName:Slayer", "1:deviceB:500");

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.ids, vec!["Slayer".to_string()]);
    assert_eq!(f.store.get_priority("Slayer", YEAR, DEFAULT_PROFILE), Priority::Must);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_engine_rejects_commands() {
    let f = fixture();
    let handle = f.engine.spawn();
    handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(handle.sync_now().await, Err(SyncError::ChannelClosed)));
}
