//! Schema creation and versioned migrations.
//!
//! Each database tracks its schema version in `PRAGMA user_version`. A
//! migration step runs inside a transaction together with the version bump.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;

/// Ordered migrations for the preference database. Index `i` migrates from
/// version `i` to `i + 1`.
const PREFERENCE_MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS priorities (
        band TEXT NOT NULL,
        event_year INTEGER NOT NULL,
        profile TEXT NOT NULL,
        priority INTEGER NOT NULL,
        last_modified REAL,
        UNIQUE (band, event_year, profile)
    );
    CREATE INDEX IF NOT EXISTS idx_priorities_profile ON priorities(profile, event_year);

    CREATE TABLE IF NOT EXISTS attendance (
        attendance_index TEXT NOT NULL,
        profile TEXT NOT NULL,
        band TEXT NOT NULL,
        event_year INTEGER NOT NULL,
        status INTEGER NOT NULL,
        time_index REAL NOT NULL,
        last_modified REAL,
        UNIQUE (attendance_index, profile)
    );
    CREATE INDEX IF NOT EXISTS idx_attendance_profile ON attendance(profile, event_year);
    CREATE INDEX IF NOT EXISTS idx_attendance_band ON attendance(band);
    "#,
    // v2: remember which device produced each write so sync can skip echoes.
    r#"
    ALTER TABLE priorities ADD COLUMN origin_device TEXT;
    ALTER TABLE attendance ADD COLUMN origin_device TEXT;
    "#,
];

const REGISTRY_MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS profiles (
        user_id TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        color TEXT NOT NULL,
        is_read_only INTEGER NOT NULL DEFAULT 0,
        import_date TEXT,
        share_date TEXT,
        event_year INTEGER NOT NULL DEFAULT 0,
        priority_count INTEGER NOT NULL DEFAULT 0,
        attendance_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#];

pub fn initialize_preference_schema(conn: &mut Connection) -> StoreResult<()> {
    migrate(conn, PREFERENCE_MIGRATIONS)
}

pub fn initialize_registry_schema(conn: &mut Connection) -> StoreResult<()> {
    migrate(conn, REGISTRY_MIGRATIONS)
}

/// Current schema version of the preference database.
pub fn preference_schema_version() -> i64 {
    PREFERENCE_MIGRATIONS.len() as i64
}

fn migrate(conn: &mut Connection, steps: &[&str]) -> StoreResult<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for (i, sql) in steps.iter().enumerate().skip(current.max(0) as usize) {
        let version = i as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| StoreError::Migration {
            version,
            reason: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
