//! One SQLite database behind both store traits.

use crate::facts::FactStore;
use crate::migration::run_migrations;
use crate::session_store::SessionStore;
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::memory::MemoryStore;
use keepsake_types::state::StateStore;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// The fact store and the session store sharing a migrated connection.
#[derive(Clone)]
pub struct MemorySubstrate {
    facts: FactStore,
    sessions: SessionStore,
}

impl MemorySubstrate {
    /// Open (or create) the database at `path` and bring its schema current.
    pub fn open(path: &Path) -> KeepsakeResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        let substrate = Self::from_connection(conn)?;
        info!(path = %path.display(), "Memory substrate opened");
        Ok(substrate)
    }

    /// A throwaway database, for tests and dry runs.
    pub fn open_in_memory() -> KeepsakeResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> KeepsakeResult<Self> {
        run_migrations(&conn).map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            facts: FactStore::new(Arc::clone(&conn)),
            sessions: SessionStore::new(conn),
        })
    }

    pub fn facts(&self) -> Arc<dyn MemoryStore> {
        Arc::new(self.facts.clone())
    }

    pub fn sessions(&self) -> Arc<dyn StateStore> {
        Arc::new(self.sessions.clone())
    }

    /// The concrete fact store, for synchronous inspection.
    pub fn fact_store(&self) -> &FactStore {
        &self.facts
    }
}
