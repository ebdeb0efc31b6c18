//! Session and spatial state tracking.
//!
//! Records are created at baseline when a session starts and afterwards only
//! change through field-level merges. Each merge is a read, an in-memory
//! apply, and a compare-and-swap on `last_updated`, retried a few times when
//! another writer lands in between.

use crate::spatial::{extract_updates, ExtractedUpdates};
use chrono::{DateTime, Duration, Utc};
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::ids::SessionKey;
use keepsake_types::state::{SessionState, SessionUpdate, SpatialState, SpatialUpdate, StateStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Attempts before a merge gives up with [`KeepsakeError::Conflict`].
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Records written by one observed assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// The extracted partial updates.
    pub updates: ExtractedUpdates,
    /// The session record after the merge, if it changed.
    pub session: Option<SessionState>,
    /// The spatial record after the merge, if it changed.
    pub spatial: Option<SpatialState>,
}

/// Owns the lifecycle of per-session persona state.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn StateStore>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Create the session record at baseline. Calling this on a session that
    /// already has a record returns the existing record unchanged.
    pub async fn initialize_session_state(&self, key: &SessionKey) -> KeepsakeResult<SessionState> {
        let state = self
            .store
            .insert_session_if_absent(key, &SessionState::baseline(Utc::now()))
            .await?;
        info!(session = %key, "Session state ready");
        Ok(state)
    }

    /// Create the spatial record at baseline. Idempotent like
    /// [`initialize_session_state`](Self::initialize_session_state).
    pub async fn initialize_spatial_state(&self, key: &SessionKey) -> KeepsakeResult<SpatialState> {
        let state = self
            .store
            .insert_spatial_if_absent(key, &SpatialState::baseline(Utc::now()))
            .await?;
        info!(session = %key, "Spatial state ready");
        Ok(state)
    }

    pub async fn session_state(&self, key: &SessionKey) -> KeepsakeResult<Option<SessionState>> {
        self.store.load_session(key).await
    }

    pub async fn spatial_state(&self, key: &SessionKey) -> KeepsakeResult<Option<SpatialState>> {
        self.store.load_spatial(key).await
    }

    /// Merge a partial update into the session record.
    ///
    /// Returns `None` without touching the store when the update is empty.
    pub async fn apply_session_update(
        &self,
        key: &SessionKey,
        update: &SessionUpdate,
    ) -> KeepsakeResult<Option<SessionState>> {
        if update.is_empty() {
            return Ok(None);
        }
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(current) = self.store.load_session(key).await? else {
                error!(session = %key, "Session update for uninitialized session");
                return Err(KeepsakeError::SessionNotInitialized {
                    key: key.to_string(),
                    record: "session",
                });
            };
            let expected = current.last_updated;
            let mut next = current;
            next.apply(update, next_stamp(expected));
            if self
                .store
                .compare_and_swap_session(key, expected, &next)
                .await?
            {
                debug!(session = %key, attempt, "Session state merged");
                return Ok(Some(next));
            }
            debug!(session = %key, attempt, "Session state changed underneath, retrying");
        }
        Err(KeepsakeError::Conflict(format!(
            "session state for {key} after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    /// Merge a partial update into the spatial record.
    pub async fn apply_spatial_update(
        &self,
        key: &SessionKey,
        update: &SpatialUpdate,
    ) -> KeepsakeResult<Option<SpatialState>> {
        if update.is_empty() {
            return Ok(None);
        }
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(current) = self.store.load_spatial(key).await? else {
                error!(session = %key, "Spatial update for uninitialized session");
                return Err(KeepsakeError::SessionNotInitialized {
                    key: key.to_string(),
                    record: "spatial",
                });
            };
            let expected = current.last_updated;
            let mut next = current;
            next.apply(update, next_stamp(expected));
            if self
                .store
                .compare_and_swap_spatial(key, expected, &next)
                .await?
            {
                debug!(session = %key, attempt, "Spatial state merged");
                return Ok(Some(next));
            }
            debug!(session = %key, attempt, "Spatial state changed underneath, retrying");
        }
        Err(KeepsakeError::Conflict(format!(
            "spatial state for {key} after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    /// Extract state updates from an assistant message and merge them.
    pub async fn observe(&self, key: &SessionKey, message: &str) -> KeepsakeResult<ObservedState> {
        let updates = extract_updates(message);
        let session = match &updates.session {
            Some(update) => self.apply_session_update(key, update).await?,
            None => None,
        };
        let spatial = match &updates.spatial {
            Some(update) => self.apply_spatial_update(key, update).await?,
            None => None,
        };
        Ok(ObservedState {
            updates,
            session,
            spatial,
        })
    }
}

/// A `last_updated` strictly after `previous`, so every successful write is
/// visible to compare-and-swap even when the clock has not advanced.
fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::nanoseconds(1)
    }
}
