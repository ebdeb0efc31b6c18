//! The per-turn memory facade.

use crate::error::{KernelError, KernelResult};
use chrono::Utc;
use dashmap::DashMap;
use keepsake_memory::context::ContextAssembler;
use keepsake_memory::decay::DecayEngine;
use keepsake_memory::extractor::extract;
use keepsake_memory::spatial::extract_updates;
use keepsake_memory::tracker::{ObservedState, StateTracker};
use keepsake_memory::MemorySubstrate;
use keepsake_types::config::MemoryConfig;
use keepsake_types::context::ContextBundle;
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::ids::{CompanionId, OwnerId, SessionKey};
use keepsake_types::memory::{DecayReport, FactContext, MemoryStore};
use keepsake_types::state::{SessionState, SpatialState, StateStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Memory for one companion service process.
///
/// Constructed once with its stores injected; every method is safe to call
/// from many tasks at once.
pub struct CompanionMemory {
    config: MemoryConfig,
    facts: Arc<dyn MemoryStore>,
    states: Arc<dyn StateStore>,
    tracker: StateTracker,
    assembler: ContextAssembler,
    decay: DecayEngine,
    /// Serializes observations per session in this process.
    session_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl CompanionMemory {
    /// Open the configured database and wire everything to it.
    pub fn boot(config: MemoryConfig) -> KernelResult<Self> {
        let path = config.database_path();
        let substrate = MemorySubstrate::open(&path).map_err(|e| KernelError::Storage {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Companion memory booted");
        Ok(Self::with_stores(config, substrate.facts(), substrate.sessions()))
    }

    /// Wire an in-memory database. Nothing survives the process.
    pub fn ephemeral(config: MemoryConfig) -> KernelResult<Self> {
        let substrate = MemorySubstrate::open_in_memory().map_err(|e| KernelError::Storage {
            path: ":memory:".into(),
            reason: e.to_string(),
        })?;
        Ok(Self::with_stores(config, substrate.facts(), substrate.sessions()))
    }

    /// Wire caller-supplied stores.
    pub fn with_stores(
        config: MemoryConfig,
        facts: Arc<dyn MemoryStore>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        let assembler = ContextAssembler::new(Arc::clone(&facts))
            .with_limits(config.context_limits())
            .with_recent_in_context(config.recent_in_context)
            .with_note_access(config.note_access);
        Self {
            tracker: StateTracker::new(Arc::clone(&states)),
            decay: DecayEngine::new(Arc::clone(&facts)),
            assembler,
            facts,
            states,
            config,
            session_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn decay_engine(&self) -> DecayEngine {
        self.decay.clone()
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }

    /// Run a store call under the per-turn budget.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = KeepsakeResult<T>>,
    ) -> KeepsakeResult<T> {
        let budget = self.store_timeout();
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(KeepsakeError::Memory(format!(
                "store did not answer within {}ms",
                budget.as_millis()
            ))),
        }
    }

    /// Extract facts from a user message and persist them.
    ///
    /// Returns how many facts were stored. A store failure is logged and
    /// reported as zero; it never fails the turn.
    pub async fn remember_user_message(
        &self,
        owner_id: &OwnerId,
        companion_id: &CompanionId,
        message: &str,
    ) -> usize {
        let drafts = extract(message, owner_id, companion_id);
        if drafts.is_empty() {
            return 0;
        }
        match self.bounded(self.facts.insert(drafts)).await {
            Ok(ids) => {
                debug!(owner = %owner_id, stored = ids.len(), "Remembered facts");
                ids.len()
            }
            Err(e) => {
                warn!(owner = %owner_id, error = %e, "Failed to store facts, continuing without");
                0
            }
        }
    }

    /// Build the context bundle for the next generation.
    ///
    /// Each read is attempted independently and whatever succeeded is used.
    /// With nothing available the bundle is empty.
    pub async fn context_for_turn(&self, key: &SessionKey) -> ContextBundle {
        let session = self
            .soft_read(key, "session", self.states.load_session(key))
            .await;
        let spatial = self
            .soft_read(key, "spatial", self.states.load_spatial(key))
            .await;

        match self
            .bounded(self.assembler.assemble(
                &key.owner_id,
                &key.companion_id,
                session.as_ref(),
                spatial.as_ref(),
            ))
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(session = %key, error = %e, "Fact context unavailable, using state only");
                self.assembler
                    .render(&FactContext::default(), session.as_ref(), spatial.as_ref())
            }
        }
    }

    async fn soft_read<T>(
        &self,
        key: &SessionKey,
        record: &'static str,
        fut: impl Future<Output = KeepsakeResult<Option<T>>>,
    ) -> Option<T> {
        match self.bounded(fut).await {
            Ok(value) => value,
            Err(e) => {
                warn!(session = %key, record, error = %e, "State read failed, skipping");
                None
            }
        }
    }

    /// Create both state records at baseline. Safe to call again.
    ///
    /// When the store fails or stalls, the turn goes on with baseline state
    /// that was not persisted.
    pub async fn start_session(&self, key: &SessionKey) -> KernelResult<(SessionState, SpatialState)> {
        let now = Utc::now();
        let session = self
            .soft_write(key, "session", self.tracker.initialize_session_state(key))
            .await?
            .unwrap_or_else(|| SessionState::baseline(now));
        let spatial = self
            .soft_write(key, "spatial", self.tracker.initialize_spatial_state(key))
            .await?
            .unwrap_or_else(|| SpatialState::baseline(now));
        Ok((session, spatial))
    }

    /// Merge state changes described in an assistant reply.
    ///
    /// Each record is merged under its own store budget, and the result
    /// holds exactly the records that were written. Observing a session that
    /// was never started is an error. Any other failure is logged and that
    /// record is reported as unchanged.
    pub async fn observe_reply(&self, key: &SessionKey, reply: &str) -> KernelResult<ObservedState> {
        let lock = self
            .session_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.observe_locked(key, reply).await
        };
        drop(lock);
        self.session_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn observe_locked(&self, key: &SessionKey, reply: &str) -> KernelResult<ObservedState> {
        let updates = extract_updates(reply);
        let session = match &updates.session {
            Some(update) => {
                self.soft_write(key, "session", self.tracker.apply_session_update(key, update))
                    .await?
                    .flatten()
            }
            None => None,
        };
        let spatial = match &updates.spatial {
            Some(update) => {
                self.soft_write(key, "spatial", self.tracker.apply_spatial_update(key, update))
                    .await?
                    .flatten()
            }
            None => None,
        };
        Ok(ObservedState {
            updates,
            session,
            spatial,
        })
    }

    /// Run a state write under the store budget. Soft failures become
    /// `None`; a merge into a missing record is returned as an error.
    async fn soft_write<T>(
        &self,
        key: &SessionKey,
        record: &'static str,
        fut: impl Future<Output = KeepsakeResult<T>>,
    ) -> KernelResult<Option<T>> {
        match self.bounded(fut).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if !e.is_soft() => {
                error!(session = %key, record, error = %e, "State written before session start");
                Err(e.into())
            }
            Err(e) => {
                warn!(session = %key, record, error = %e, "Failed to write state, continuing without");
                Ok(None)
            }
        }
    }

    /// Current state records. A record that is missing, unreadable or slow
    /// to load is `None`.
    pub async fn session_snapshot(
        &self,
        key: &SessionKey,
    ) -> (Option<SessionState>, Option<SpatialState>) {
        let session = self
            .soft_read(key, "session", self.tracker.session_state(key))
            .await;
        let spatial = self
            .soft_read(key, "spatial", self.tracker.spatial_state(key))
            .await;
        (session, spatial)
    }

    /// Run one decay pass under the configured pass timeout.
    pub async fn decay_now(&self) -> KernelResult<DecayReport> {
        let limit = Duration::from_secs(self.config.decay_timeout_secs);
        match tokio::time::timeout(limit, self.decay.decay_all()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(KernelError::DecayTimedOut {
                secs: limit.as_secs(),
            }),
        }
    }
}
