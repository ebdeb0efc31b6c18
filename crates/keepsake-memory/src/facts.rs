//! SQLite fact store: append, partitioned context reads, clarity updates, deletes.

use chrono::{DateTime, SecondsFormat, Utc};
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::ids::{CompanionId, FactId, OwnerId};
use keepsake_types::memory::{
    Clarity, ContextLimits, FactContext, FactKind, MemoryFact, MemoryFactDraft, MemoryStore,
};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const FACT_COLUMNS: &str =
    "id, owner_id, companion_id, content, kind, category, clarity, tags, created_at, last_accessed";

/// Fact store backed by SQLite.
#[derive(Clone)]
pub struct FactStore {
    conn: Arc<Mutex<Connection>>,
}

impl FactStore {
    /// Create a new fact store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Append drafts as new rows. No-op on empty input.
    pub fn insert_drafts(&self, drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let fact = draft.into_fact();
            let tags = serde_json::to_string(&fact.tags)
                .map_err(|e| KeepsakeError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO memory_facts (id, owner_id, companion_id, content, kind, category, clarity, tags, created_at, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    fact.id.to_string(),
                    fact.owner_id.as_str(),
                    fact.companion_id.as_str(),
                    fact.content,
                    fact.kind.as_str(),
                    fact.category.as_str(),
                    fact.clarity.value(),
                    tags,
                    timestamp(fact.created_at),
                    timestamp(fact.last_accessed),
                ],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
            ids.push(fact.id);
        }
        tx.commit()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        debug!(count = ids.len(), "Inserted memory facts");
        Ok(ids)
    }

    /// All live facts for the pair, most recently accessed first.
    ///
    /// Exhausted rows (clarity 0) are never returned even if a decay pass
    /// has not deleted them yet.
    pub fn facts_for(
        &self,
        owner_id: &OwnerId,
        companion_id: &CompanionId,
    ) -> KeepsakeResult<Vec<MemoryFact>> {
        let sql = format!(
            "SELECT {FACT_COLUMNS} FROM memory_facts
             WHERE owner_id = ?1 AND companion_id = ?2 AND clarity > 0
             ORDER BY last_accessed DESC, created_at DESC, rowid ASC"
        );
        self.select(
            &sql,
            rusqlite::params![owner_id.as_str(), companion_id.as_str()],
        )
    }

    /// Every trigger across all owners.
    pub fn triggers(&self) -> KeepsakeResult<Vec<MemoryFact>> {
        let sql = format!(
            "SELECT {FACT_COLUMNS} FROM memory_facts WHERE kind = ?1 ORDER BY created_at ASC"
        );
        self.select(&sql, rusqlite::params![FactKind::Trigger.as_str()])
    }

    /// Overwrite clarity and last-accessed for one fact.
    pub fn set_clarity(
        &self,
        id: FactId,
        clarity: Clarity,
        last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        conn.execute(
            "UPDATE memory_facts SET clarity = ?1, last_accessed = ?2 WHERE id = ?3",
            rusqlite::params![clarity.value(), timestamp(last_accessed), id.to_string()],
        )
        .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(())
    }

    /// Stamp `last_accessed` on a batch of facts.
    pub fn touch(&self, ids: &[FactId], at: DateTime<Utc>) -> KeepsakeResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        let at = timestamp(at);
        for id in ids {
            tx.execute(
                "UPDATE memory_facts SET last_accessed = ?1 WHERE id = ?2",
                rusqlite::params![at, id.to_string()],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(())
    }

    /// Physically remove a fact.
    pub fn remove(&self, id: FactId) -> KeepsakeResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        conn.execute(
            "DELETE FROM memory_facts WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )
        .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(())
    }

    fn select(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> KeepsakeResult<Vec<MemoryFact>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(RawFact {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    companion_id: row.get(2)?,
                    content: row.get(3)?,
                    kind: row.get(4)?,
                    category: row.get(5)?,
                    clarity: row.get(6)?,
                    tags: row.get(7)?,
                    created_at: row.get(8)?,
                    last_accessed: row.get(9)?,
                })
            })
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;

        let mut facts = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| KeepsakeError::Memory(e.to_string()))?;
            let id = raw.id.clone();
            match raw.into_fact() {
                Ok(fact) => facts.push(fact),
                Err(e) => warn!(fact = %id, "Skipping unreadable memory fact: {e}"),
            }
        }
        Ok(facts)
    }

    async fn blocking<T, F>(&self, f: F) -> KeepsakeResult<T>
    where
        F: FnOnce(&FactStore) -> KeepsakeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| KeepsakeError::Internal(format!("spawn_blocking join failed: {e}")))?
    }
}

/// Split facts (already ordered by `last_accessed` descending) into the
/// three context lists.
pub fn partition(facts: Vec<MemoryFact>, limits: ContextLimits) -> FactContext {
    let recent = facts.iter().take(limits.recent_limit).cloned().collect();
    let mut anchors = Vec::new();
    let mut triggers = Vec::new();
    for fact in facts {
        match fact.kind {
            FactKind::Anchor => anchors.push(fact),
            FactKind::Trigger if fact.clarity.value() > limits.trigger_floor => {
                triggers.push(fact)
            }
            FactKind::Trigger => {}
        }
    }
    FactContext {
        anchors,
        triggers,
        recent,
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{s}': {e}"))
}

struct RawFact {
    id: String,
    owner_id: String,
    companion_id: String,
    content: String,
    kind: String,
    category: String,
    clarity: i64,
    tags: String,
    created_at: String,
    last_accessed: String,
}

impl RawFact {
    fn into_fact(self) -> Result<MemoryFact, String> {
        let tags: BTreeSet<String> =
            serde_json::from_str(&self.tags).map_err(|e| format!("bad tags: {e}"))?;
        Ok(MemoryFact {
            id: self.id.parse().map_err(|e| format!("bad id: {e}"))?,
            owner_id: OwnerId(self.owner_id),
            companion_id: CompanionId(self.companion_id),
            content: self.content,
            kind: self.kind.parse()?,
            category: self.category.parse()?,
            clarity: u8::try_from(self.clarity)
                .ok()
                .filter(|v| *v <= Clarity::FULL.value())
                .map(Clarity::new)
                .ok_or_else(|| format!("bad clarity: {}", self.clarity))?,
            created_at: parse_timestamp(&self.created_at)?,
            last_accessed: parse_timestamp(&self.last_accessed)?,
            tags,
        })
    }
}

#[async_trait::async_trait]
impl MemoryStore for FactStore {
    async fn insert(&self, drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        self.blocking(move |s| s.insert_drafts(drafts)).await
    }

    async fn query_context(
        &self,
        owner_id: &OwnerId,
        companion_id: &CompanionId,
        limits: ContextLimits,
    ) -> KeepsakeResult<FactContext> {
        let owner_id = owner_id.clone();
        let companion_id = companion_id.clone();
        let facts = self
            .blocking(move |s| s.facts_for(&owner_id, &companion_id))
            .await?;
        Ok(partition(facts, limits))
    }

    async fn list_triggers(&self) -> KeepsakeResult<Vec<MemoryFact>> {
        self.blocking(|s| s.triggers()).await
    }

    async fn update_clarity(
        &self,
        id: FactId,
        clarity: Clarity,
        last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()> {
        self.blocking(move |s| s.set_clarity(id, clarity, last_accessed))
            .await
    }

    async fn mark_accessed(&self, ids: &[FactId], at: DateTime<Utc>) -> KeepsakeResult<()> {
        let ids = ids.to_vec();
        self.blocking(move |s| s.touch(&ids, at)).await
    }

    async fn delete(&self, id: FactId) -> KeepsakeResult<()> {
        self.blocking(move |s| s.remove(id)).await
    }
}
