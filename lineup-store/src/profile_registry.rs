//! Profile metadata: labels, colors, read-only flags, counts and the active selection.
//!
//! The registry keeps its own small database next to the preference store.
//! It only reaches into the [`PreferenceStore`] through its public API, to
//! cascade deletions and to discover profiles that have data but no row here.

use crate::error::{StoreError, StoreResult};
use crate::preference_store::PreferenceStore;
use crate::schema::initialize_registry_schema;
use chrono::{DateTime, Utc};
use lineup_types::{DEFAULT_PROFILE, PROFILE_PALETTE, Profile, is_default_profile};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const ACTIVE_PROFILE_KEY: &str = "active_profile";

/// CRUD over profile metadata, self-healing against orphaned store data.
#[derive(Clone)]
pub struct ProfileRegistry {
    conn: Arc<Mutex<Connection>>,
    store: PreferenceStore,
    event_year: i32,
}

impl ProfileRegistry {
    /// Opens or creates the registry database at `path`.
    pub fn open(path: &Path, store: PreferenceStore, event_year: i32) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?, store, event_year)
    }

    /// Opens an in-memory registry (for testing).
    pub fn open_in_memory(store: PreferenceStore, event_year: i32) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, store, event_year)
    }

    fn with_connection(
        mut conn: Connection,
        store: PreferenceStore,
        event_year: i32,
    ) -> StoreResult<Self> {
        initialize_registry_schema(&mut conn)?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
            event_year,
        };
        if registry.get_profile(DEFAULT_PROFILE).is_none() {
            registry.save_profile(&Profile::owner(event_year))?;
        }
        Ok(registry)
    }

    /// Acquire the connection lock, recovering from poison.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("profile registry recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn get_profile(&self, user_id: &str) -> Option<Profile> {
        let conn = self.lock_conn();
        let result = conn
            .query_row(
                "SELECT user_id, label, color, is_read_only, import_date, share_date, \
                 event_year, priority_count, attendance_count FROM profiles WHERE user_id = ?1",
                params![user_id],
                row_to_profile,
            )
            .optional();
        match result {
            Ok(profile) => profile,
            Err(e) => {
                warn!("failed to load profile {user_id}: {e}");
                None
            }
        }
    }

    /// Every registered profile, owner first, the rest by label.
    pub fn get_all_profiles(&self) -> Vec<Profile> {
        let conn = self.lock_conn();
        let mut profiles: Vec<Profile> = match conn.prepare(
            "SELECT user_id, label, color, is_read_only, import_date, share_date, \
             event_year, priority_count, attendance_count FROM profiles",
        ) {
            Ok(mut stmt) => match stmt.query_map([], row_to_profile) {
                Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
                Err(e) => {
                    warn!("failed to list profiles: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("failed to list profiles: {e}");
                Vec::new()
            }
        };
        profiles.sort_by(|a, b| {
            b.is_default()
                .cmp(&a.is_default())
                .then_with(|| a.label.to_lowercase().cmp(&b.label.to_lowercase()))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        profiles
    }

    /// The profiles a user can pick from, after restoring any missing registry rows.
    pub fn available_profiles(&self) -> Vec<Profile> {
        self.reconcile();
        self.get_all_profiles()
    }

    /// Synthesizes a placeholder row for every profile that has data in the
    /// store but no registry entry. Returns the keys that were restored.
    pub fn reconcile(&self) -> Vec<String> {
        let data_profiles = self.store.get_all_profile_names();
        let registered: BTreeSet<String> = self
            .get_all_profiles()
            .into_iter()
            .map(|p| p.user_id)
            .collect();

        let mut restored = Vec::new();
        for user_id in data_profiles.difference(&registered) {
            let mut profile = Profile::recovered(user_id, &self.next_color(), self.event_year);
            let counts = self.store.counts(user_id);
            profile.priority_count = counts.priorities;
            profile.attendance_count = counts.attendance;
            match self.save_profile(&profile) {
                Ok(()) => {
                    warn!("restored registry row for orphaned profile data: {user_id}");
                    restored.push(user_id.clone());
                }
                Err(e) => warn!("could not restore registry row for {user_id}: {e}"),
            }
        }
        restored
    }

    /// Upserts a profile row.
    pub fn save_profile(&self, profile: &Profile) -> StoreResult<()> {
        let conn = self.lock_conn();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO profiles (
                user_id, label, color, is_read_only, import_date, share_date,
                event_year, priority_count, attendance_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                profile.user_id,
                profile.label,
                profile.color,
                profile.is_read_only,
                profile.import_date.map(|d| d.to_rfc3339()),
                profile.share_date.map(|d| d.to_rfc3339()),
                profile.event_year,
                profile.priority_count,
                profile.attendance_count,
            ],
        )?;
        Ok(())
    }

    /// Deletes a profile's marks, its registry row and its color assignment.
    ///
    /// If the profile was active the selection falls back to `"Default"`. The
    /// owner profile itself cannot be deleted.
    pub fn delete_profile(&self, user_id: &str) -> StoreResult<()> {
        if is_default_profile(user_id) {
            warn!("refusing to delete the owner profile");
            return Err(StoreError::OwnerProfile);
        }
        if !self.store.delete_profile(user_id).wait() && self.store.is_available() {
            warn!("profile data for {user_id} could not be deleted");
        }
        let was_active = self.active_profile() == user_id;
        {
            let conn = self.lock_conn();
            conn.execute("DELETE FROM profiles WHERE user_id = ?1", params![user_id])?;
        }
        if was_active {
            self.set_active_profile(DEFAULT_PROFILE)?;
        }
        info!("deleted profile {user_id}");
        Ok(())
    }

    /// Changes the display label. The key never changes.
    pub fn update_label(&self, user_id: &str, label: &str) -> StoreResult<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE profiles SET label = ?1 WHERE user_id = ?2",
            params![label, user_id],
        )?;
        if updated == 0 {
            return Err(StoreError::ProfileNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Unknown profiles are treated as read-only, except the owner.
    pub fn is_read_only(&self, user_id: &str) -> bool {
        match self.get_profile(user_id) {
            Some(profile) => profile.is_read_only,
            None => !is_default_profile(user_id),
        }
    }

    /// The active profile key, `"Default"` when unset or no longer registered.
    pub fn active_profile(&self) -> String {
        let stored: Option<String> = {
            let conn = self.lock_conn();
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![ACTIVE_PROFILE_KEY],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!("failed to read active profile: {e}");
                None
            })
        };
        match stored {
            Some(user_id) if self.get_profile(&user_id).is_some() => user_id,
            _ => DEFAULT_PROFILE.to_string(),
        }
    }

    pub fn set_active_profile(&self, user_id: &str) -> StoreResult<()> {
        if self.get_profile(user_id).is_none() {
            return Err(StoreError::ProfileNotFound(user_id.to_string()));
        }
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![ACTIVE_PROFILE_KEY, user_id],
        )?;
        Ok(())
    }

    /// Recomputes the stored mark counts of a profile from the store.
    pub fn refresh_counts(&self, user_id: &str) -> StoreResult<Profile> {
        let mut profile = self
            .get_profile(user_id)
            .ok_or_else(|| StoreError::ProfileNotFound(user_id.to_string()))?;
        let counts = self.store.counts(user_id);
        profile.priority_count = counts.priorities;
        profile.attendance_count = counts.attendance;
        self.save_profile(&profile)?;
        Ok(profile)
    }

    /// First palette color no registered profile uses. Wraps around when all are taken.
    pub fn next_color(&self) -> String {
        let used: BTreeSet<String> = self
            .get_all_profiles()
            .into_iter()
            .map(|p| p.color)
            .collect();
        PROFILE_PALETTE[1..]
            .iter()
            .find(|c| !used.contains(**c))
            .copied()
            .unwrap_or_else(|| PROFILE_PALETTE[1 + used.len() % (PROFILE_PALETTE.len() - 1)])
            .to_string()
    }
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: row.get(0)?,
        label: row.get(1)?,
        color: row.get(2)?,
        is_read_only: row.get(3)?,
        import_date: parse_date(row.get(4)?),
        share_date: parse_date(row.get(5)?),
        event_year: row.get(6)?,
        priority_count: row.get(7)?,
        attendance_count: row.get(8)?,
    })
}

fn parse_date(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}
