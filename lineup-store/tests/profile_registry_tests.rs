use lineup_store::{PreferenceStore, ProfileRegistry, StoreError};
use lineup_types::{
    AttendanceIndex, AttendanceStatus, ChangeBus, DEFAULT_PROFILE, DeviceId, PROFILE_PALETTE,
    Priority, Profile, RECOVERED_LABEL, StartTime,
};
use pretty_assertions::assert_eq;

const YEAR: i32 = 2026;

fn registry() -> ProfileRegistry {
    let store = PreferenceStore::open_in_memory(DeviceId::from("deviceA"), ChangeBus::new()).unwrap();
    ProfileRegistry::open_in_memory(store, YEAR).unwrap()
}

fn friend(user_id: &str, label: &str, color: &str) -> Profile {
    Profile {
        user_id: user_id.to_string(),
        label: label.to_string(),
        color: color.to_string(),
        is_read_only: true,
        import_date: None,
        share_date: None,
        event_year: YEAR,
        priority_count: 0,
        attendance_count: 0,
    }
}

// ── Owner profile ────────────────────────────────────────────────

#[test]
fn owner_row_is_created_on_open() {
    let registry = registry();
    let owner = registry.get_profile(DEFAULT_PROFILE).unwrap();
    assert!(!owner.is_read_only);
    assert_eq!(owner.color, PROFILE_PALETTE[0]);
    assert_eq!(registry.active_profile(), DEFAULT_PROFILE);
}

#[test]
fn owner_is_listed_first_then_by_label() {
    let registry = registry();
    registry.save_profile(&friend("u2", "zed", PROFILE_PALETTE[1])).unwrap();
    registry.save_profile(&friend("u1", "Amy", PROFILE_PALETTE[2])).unwrap();

    let keys: Vec<String> = registry.get_all_profiles().into_iter().map(|p| p.user_id).collect();
    assert_eq!(keys, vec!["Default", "u1", "u2"]);
}

#[test]
fn owner_profile_cannot_be_deleted() {
    let registry = registry();
    assert!(matches!(
        registry.delete_profile(DEFAULT_PROFILE),
        Err(StoreError::OwnerProfile)
    ));
    assert!(registry.get_profile(DEFAULT_PROFILE).is_some());
}

// ── Reconciliation ───────────────────────────────────────────────

#[test]
fn orphaned_data_gets_a_recovered_read_only_row() {
    let registry = registry();
    let store = registry.store();
    assert!(store.set_priority("Metallica", YEAR, "orphan", Priority::Must, None).wait());

    let profiles = registry.available_profiles();
    let recovered = profiles.iter().find(|p| p.user_id == "orphan").unwrap();
    assert_eq!(recovered.label, RECOVERED_LABEL);
    assert!(recovered.is_read_only);
    assert_eq!(recovered.priority_count, 1);
    assert_ne!(recovered.color, PROFILE_PALETTE[0]);

    // Already registered, nothing more to restore.
    assert!(registry.reconcile().is_empty());
}

#[test]
fn unknown_profiles_are_read_only_except_owner() {
    let registry = registry();
    assert!(registry.is_read_only("never-seen"));
    assert!(!registry.is_read_only(DEFAULT_PROFILE));
}

// ── Deletion ─────────────────────────────────────────────────────

#[test]
fn delete_cascades_to_store_and_resets_active() {
    let registry = registry();
    let store = registry.store().clone();
    let index = AttendanceIndex::new("A", "Theater", StartTime::new(18, 0).unwrap(), "Show", YEAR);
    let _ = store.set_priority("A", YEAR, "friend", Priority::Must, None);
    assert!(store
        .set_attendance_status(&index, "friend", AttendanceStatus::SawAll, None, None)
        .wait());
    registry.save_profile(&friend("friend", "Friend", PROFILE_PALETTE[1])).unwrap();
    registry.set_active_profile("friend").unwrap();

    registry.delete_profile("friend").unwrap();

    assert!(registry.get_profile("friend").is_none());
    assert!(store.priority_records("friend").is_empty());
    assert!(store.attendance_records("friend").is_empty());
    assert_eq!(registry.active_profile(), DEFAULT_PROFILE);
    // Nothing left to resurrect.
    assert!(registry.reconcile().is_empty());
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn update_label_keeps_the_key() {
    let registry = registry();
    registry.save_profile(&friend("u1", "Old", PROFILE_PALETTE[1])).unwrap();
    registry.update_label("u1", "New").unwrap();

    let profile = registry.get_profile("u1").unwrap();
    assert_eq!(profile.user_id, "u1");
    assert_eq!(profile.label, "New");
    assert!(matches!(
        registry.update_label("missing", "x"),
        Err(StoreError::ProfileNotFound(_))
    ));
}

#[test]
fn set_active_requires_a_registered_profile() {
    let registry = registry();
    assert!(registry.set_active_profile("ghost").is_err());
    assert_eq!(registry.active_profile(), DEFAULT_PROFILE);
}

#[test]
fn next_color_skips_used_colors() {
    let registry = registry();
    assert_eq!(registry.next_color(), PROFILE_PALETTE[1]);
    registry.save_profile(&friend("u1", "One", PROFILE_PALETTE[1])).unwrap();
    assert_eq!(registry.next_color(), PROFILE_PALETTE[2]);
}

#[test]
fn refresh_counts_reads_the_store() {
    let registry = registry();
    let store = registry.store();
    let _ = store.set_priority("A", YEAR, DEFAULT_PROFILE, Priority::Must, None);
    assert!(store.set_priority("B", YEAR, DEFAULT_PROFILE, Priority::Wont, None).wait());

    let owner = registry.refresh_counts(DEFAULT_PROFILE).unwrap();
    assert_eq!(owner.priority_count, 2);
    assert_eq!(registry.get_profile(DEFAULT_PROFILE).unwrap().priority_count, 2);
}

#[test]
fn registry_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles.sqlite");
    let store = PreferenceStore::open_in_memory(DeviceId::from("deviceA"), ChangeBus::new()).unwrap();
    {
        let registry = ProfileRegistry::open(&path, store.clone(), YEAR).unwrap();
        registry.save_profile(&friend("u1", "Pat", PROFILE_PALETTE[3])).unwrap();
        registry.set_active_profile("u1").unwrap();
    }
    let registry = ProfileRegistry::open(&path, store, YEAR).unwrap();
    assert_eq!(registry.get_profile("u1").unwrap().label, "Pat");
    assert_eq!(registry.active_profile(), "u1");
}
