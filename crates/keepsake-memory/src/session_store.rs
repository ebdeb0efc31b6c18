//! SQLite store for session and spatial state records.
//!
//! Composite fields are written as JSON from the typed structs and parsed
//! back on read, so a malformed blob surfaces as a serialization error at
//! this boundary rather than leaking into merge logic.

use crate::facts::{parse_timestamp, timestamp};
use chrono::{DateTime, Utc};
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::ids::SessionKey;
use keepsake_types::state::{SessionState, SpatialState, StateStore};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Session/spatial state store backed by SQLite.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Create a new session store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get_session(&self, key: &SessionKey) -> KeepsakeResult<Option<SessionState>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let row = conn
            .query_row(
                "SELECT current_activity, clothing, hair_style, makeup, mood, energy, last_updated
                 FROM session_states WHERE owner_id = ?1 AND companion_id = ?2 AND session_id = ?3",
                key_params(key),
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;

        let Some((current_activity, clothing, hair_style, makeup, mood, energy, updated)) = row
        else {
            return Ok(None);
        };
        Ok(Some(SessionState {
            current_activity,
            clothing: from_json(&clothing)?,
            hair_style,
            makeup,
            mood,
            energy: from_json(&energy)?,
            last_updated: parse_timestamp(&updated).map_err(KeepsakeError::Serialization)?,
        }))
    }

    pub fn put_session_if_absent(
        &self,
        key: &SessionKey,
        state: &SessionState,
    ) -> KeepsakeResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO session_states
                 (owner_id, companion_id, session_id, current_activity, clothing, hair_style, makeup, mood, energy, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    key.owner_id.as_str(),
                    key.companion_id.as_str(),
                    key.session_id.as_str(),
                    state.current_activity,
                    to_json(&state.clothing)?,
                    state.hair_style,
                    state.makeup,
                    state.mood,
                    to_json(&state.energy)?,
                    timestamp(state.last_updated),
                ],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(inserted == 1)
    }

    /// Replace the record iff its stored `last_updated` equals `expected`.
    pub fn swap_session(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SessionState,
    ) -> KeepsakeResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE session_states
                 SET current_activity = ?4, clothing = ?5, hair_style = ?6, makeup = ?7,
                     mood = ?8, energy = ?9, last_updated = ?10
                 WHERE owner_id = ?1 AND companion_id = ?2 AND session_id = ?3 AND last_updated = ?11",
                rusqlite::params![
                    key.owner_id.as_str(),
                    key.companion_id.as_str(),
                    key.session_id.as_str(),
                    state.current_activity,
                    to_json(&state.clothing)?,
                    state.hair_style,
                    state.makeup,
                    state.mood,
                    to_json(&state.energy)?,
                    timestamp(state.last_updated),
                    timestamp(expected),
                ],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(changed == 1)
    }

    pub fn get_spatial(&self, key: &SessionKey) -> KeepsakeResult<Option<SpatialState>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let row = conn
            .query_row(
                "SELECT body_position, proximity, last_updated
                 FROM spatial_states WHERE owner_id = ?1 AND companion_id = ?2 AND session_id = ?3",
                key_params(key),
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;

        let Some((body_position, proximity, updated)) = row else {
            return Ok(None);
        };
        Ok(Some(SpatialState {
            body_position: from_json(&body_position)?,
            proximity: from_json(&proximity)?,
            last_updated: parse_timestamp(&updated).map_err(KeepsakeError::Serialization)?,
        }))
    }

    pub fn put_spatial_if_absent(
        &self,
        key: &SessionKey,
        state: &SpatialState,
    ) -> KeepsakeResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO spatial_states
                 (owner_id, companion_id, session_id, body_position, proximity, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    key.owner_id.as_str(),
                    key.companion_id.as_str(),
                    key.session_id.as_str(),
                    to_json(&state.body_position)?,
                    to_json(&state.proximity)?,
                    timestamp(state.last_updated),
                ],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(inserted == 1)
    }

    pub fn swap_spatial(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SpatialState,
    ) -> KeepsakeResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KeepsakeError::Internal(e.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE spatial_states SET body_position = ?4, proximity = ?5, last_updated = ?6
                 WHERE owner_id = ?1 AND companion_id = ?2 AND session_id = ?3 AND last_updated = ?7",
                rusqlite::params![
                    key.owner_id.as_str(),
                    key.companion_id.as_str(),
                    key.session_id.as_str(),
                    to_json(&state.body_position)?,
                    to_json(&state.proximity)?,
                    timestamp(state.last_updated),
                    timestamp(expected),
                ],
            )
            .map_err(|e| KeepsakeError::Memory(e.to_string()))?;
        Ok(changed == 1)
    }

    async fn blocking<T, F>(&self, f: F) -> KeepsakeResult<T>
    where
        F: FnOnce(&SessionStore) -> KeepsakeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| KeepsakeError::Internal(format!("spawn_blocking join failed: {e}")))?
    }
}

fn key_params(key: &SessionKey) -> [&str; 3] {
    [
        key.owner_id.as_str(),
        key.companion_id.as_str(),
        key.session_id.as_str(),
    ]
}

fn to_json<T: Serialize>(value: &T) -> KeepsakeResult<String> {
    serde_json::to_string(value).map_err(|e| KeepsakeError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> KeepsakeResult<T> {
    serde_json::from_str(text).map_err(|e| KeepsakeError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl StateStore for SessionStore {
    async fn insert_session_if_absent(
        &self,
        key: &SessionKey,
        state: &SessionState,
    ) -> KeepsakeResult<SessionState> {
        let key = key.clone();
        let state = state.clone();
        self.blocking(move |s| {
            s.put_session_if_absent(&key, &state)?;
            s.get_session(&key)?.ok_or_else(|| {
                KeepsakeError::Memory(format!("session {key} vanished after insert"))
            })
        })
        .await
    }

    async fn load_session(&self, key: &SessionKey) -> KeepsakeResult<Option<SessionState>> {
        let key = key.clone();
        self.blocking(move |s| s.get_session(&key)).await
    }

    async fn compare_and_swap_session(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SessionState,
    ) -> KeepsakeResult<bool> {
        let key = key.clone();
        let state = state.clone();
        self.blocking(move |s| s.swap_session(&key, expected, &state))
            .await
    }

    async fn insert_spatial_if_absent(
        &self,
        key: &SessionKey,
        state: &SpatialState,
    ) -> KeepsakeResult<SpatialState> {
        let key = key.clone();
        let state = state.clone();
        self.blocking(move |s| {
            s.put_spatial_if_absent(&key, &state)?;
            s.get_spatial(&key)?.ok_or_else(|| {
                KeepsakeError::Memory(format!("spatial state {key} vanished after insert"))
            })
        })
        .await
    }

    async fn load_spatial(&self, key: &SessionKey) -> KeepsakeResult<Option<SpatialState>> {
        let key = key.clone();
        self.blocking(move |s| s.get_spatial(&key)).await
    }

    async fn compare_and_swap_spatial(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SpatialState,
    ) -> KeepsakeResult<bool> {
        let key = key.clone();
        let state = state.clone();
        self.blocking(move |s| s.swap_spatial(&key, expected, &state))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::run_migrations;
    use chrono::Duration;
    use keepsake_types::state::Distance;

    fn setup() -> SessionStore {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        SessionStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_session_roundtrip() {
        let store = setup();
        let key = SessionKey::new("u1", "c1", "s1");
        assert!(store.get_session(&key).unwrap().is_none());
        let state = SessionState::baseline(Utc::now());
        assert!(store.put_session_if_absent(&key, &state).unwrap());
        assert_eq!(store.get_session(&key).unwrap(), Some(state));
    }

    #[test]
    fn test_second_insert_is_ignored() {
        let store = setup();
        let key = SessionKey::new("u1", "c1", "s1");
        let first = SessionState::baseline(Utc::now());
        let mut second = first.clone();
        second.mood = "grumpy".to_string();
        assert!(store.put_session_if_absent(&key, &first).unwrap());
        assert!(!store.put_session_if_absent(&key, &second).unwrap());
        assert_eq!(store.get_session(&key).unwrap().unwrap().mood, first.mood);
    }

    #[test]
    fn test_swap_rejects_stale_expectation() {
        let store = setup();
        let key = SessionKey::new("u1", "c1", "s1");
        let t0 = Utc::now();
        let mut state = SpatialState::baseline(t0);
        store.put_spatial_if_absent(&key, &state).unwrap();

        state.proximity.distance_to_user = Distance::Close;
        state.last_updated = t0 + Duration::seconds(1);
        assert!(store.swap_spatial(&key, t0, &state).unwrap());

        // A writer still holding t0 loses.
        let mut stale = SpatialState::baseline(t0);
        stale.last_updated = t0 + Duration::seconds(2);
        assert!(!store.swap_spatial(&key, t0, &stale).unwrap());
        let stored = store.get_spatial(&key).unwrap().unwrap();
        assert_eq!(stored.proximity.distance_to_user, Distance::Close);
    }

    #[test]
    fn test_malformed_blob_is_serialization_error() {
        let store = setup();
        let key = SessionKey::new("u1", "c1", "s1");
        store
            .put_spatial_if_absent(&key, &SpatialState::baseline(Utc::now()))
            .unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE spatial_states SET body_position = '{\"oops\": 1}'", [])
            .unwrap();
        let err = store.get_spatial(&key).unwrap_err();
        assert!(matches!(err, KeepsakeError::Serialization(_)));
    }
}
