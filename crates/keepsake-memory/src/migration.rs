//! Versioned SQLite schema for facts and persona state.
//!
//! The schema version lives in `PRAGMA user_version`. Each step runs in its
//! own transaction together with the version bump, so a database is always
//! at exactly one known version.

use rusqlite::Connection;

type Step = fn(&Connection) -> Result<(), rusqlite::Error>;

/// Schema steps in order; the version a step produces is its position + 1.
const STEPS: &[Step] = &[migrate_v1, migrate_v2];

/// Bring the database up to the latest schema. Already-applied steps are
/// skipped, so this is safe on every open.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    for (version, step) in (1u32..).zip(STEPS).skip(applied as usize) {
        let tx = conn.unchecked_transaction()?;
        step(&tx)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}

/// Version 1: memory facts.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_facts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            companion_id TEXT NOT NULL,
            content TEXT NOT NULL,
            kind TEXT NOT NULL,
            category TEXT NOT NULL,
            clarity INTEGER NOT NULL DEFAULT 100,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            last_accessed TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_owner ON memory_facts(owner_id, companion_id, last_accessed);
        CREATE INDEX IF NOT EXISTS idx_facts_kind ON memory_facts(kind);
        ",
    )?;
    Ok(())
}

/// Version 2: per-session persona state.
///
/// Composite fields are stored as JSON text written from the typed structs.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS session_states (
            owner_id TEXT NOT NULL,
            companion_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            current_activity TEXT NOT NULL,
            clothing TEXT NOT NULL,
            hair_style TEXT NOT NULL,
            makeup TEXT NOT NULL,
            mood TEXT NOT NULL,
            energy TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (owner_id, companion_id, session_id)
        );

        CREATE TABLE IF NOT EXISTS spatial_states (
            owner_id TEXT NOT NULL,
            companion_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            body_position TEXT NOT NULL,
            proximity TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (owner_id, companion_id, session_id)
        );
        ",
    )?;
    Ok(())
}
