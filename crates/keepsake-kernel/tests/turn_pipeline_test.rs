//! Turn pipeline integration tests.
//!
//! Drives `CompanionMemory` the way a chat orchestrator would, against the
//! real SQLite stores and against stores that fail or stall, to check that
//! memory problems never reach message delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keepsake_kernel::CompanionMemory;
use keepsake_memory::decay::DecayEngine;
use keepsake_memory::MemorySubstrate;
use keepsake_types::config::MemoryConfig;
use keepsake_types::context::ContextSection;
use keepsake_types::error::{KeepsakeError, KeepsakeResult};
use keepsake_types::ids::{CompanionId, FactId, OwnerId, SessionKey};
use keepsake_types::memory::{
    Clarity, ContextLimits, FactCategory, FactContext, FactKind, MemoryFact, MemoryFactDraft,
    MemoryStore,
};
use keepsake_types::state::{Facing, SessionState, SpatialState, StateStore};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fake stores
// ---------------------------------------------------------------------------

/// Every call fails.
struct BrokenStore;

#[async_trait]
impl MemoryStore for BrokenStore {
    async fn insert(&self, _drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }

    async fn query_context(
        &self,
        _owner_id: &OwnerId,
        _companion_id: &CompanionId,
        _limits: ContextLimits,
    ) -> KeepsakeResult<FactContext> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }

    async fn list_triggers(&self) -> KeepsakeResult<Vec<MemoryFact>> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }

    async fn update_clarity(
        &self,
        _id: FactId,
        _clarity: Clarity,
        _last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }

    async fn mark_accessed(&self, _ids: &[FactId], _at: DateTime<Utc>) -> KeepsakeResult<()> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }

    async fn delete(&self, _id: FactId) -> KeepsakeResult<()> {
        Err(KeepsakeError::Memory("disk on fire".into()))
    }
}

/// Every call takes longer than any sane turn budget.
struct StalledStore;

#[async_trait]
impl MemoryStore for StalledStore {
    async fn insert(&self, _drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn query_context(
        &self,
        _owner_id: &OwnerId,
        _companion_id: &CompanionId,
        _limits: ContextLimits,
    ) -> KeepsakeResult<FactContext> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(FactContext::default())
    }

    async fn list_triggers(&self) -> KeepsakeResult<Vec<MemoryFact>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn update_clarity(
        &self,
        _id: FactId,
        _clarity: Clarity,
        _last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()> {
        Ok(())
    }

    async fn mark_accessed(&self, _ids: &[FactId], _at: DateTime<Utc>) -> KeepsakeResult<()> {
        Ok(())
    }

    async fn delete(&self, _id: FactId) -> KeepsakeResult<()> {
        Ok(())
    }
}

/// In-memory triggers where writes to one chosen fact always fail.
struct FlakyRowStore {
    facts: Mutex<Vec<MemoryFact>>,
    poisoned: FactId,
}

#[async_trait]
impl MemoryStore for FlakyRowStore {
    async fn insert(&self, drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>> {
        let mut facts = self.facts.lock().unwrap();
        let mut ids = Vec::new();
        for draft in drafts {
            let fact = draft.into_fact();
            ids.push(fact.id);
            facts.push(fact);
        }
        Ok(ids)
    }

    async fn query_context(
        &self,
        _owner_id: &OwnerId,
        _companion_id: &CompanionId,
        _limits: ContextLimits,
    ) -> KeepsakeResult<FactContext> {
        Ok(FactContext::default())
    }

    async fn list_triggers(&self) -> KeepsakeResult<Vec<MemoryFact>> {
        Ok(self.facts.lock().unwrap().clone())
    }

    async fn update_clarity(
        &self,
        id: FactId,
        clarity: Clarity,
        _last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()> {
        if id == self.poisoned {
            return Err(KeepsakeError::Memory("row locked".into()));
        }
        let mut facts = self.facts.lock().unwrap();
        if let Some(f) = facts.iter_mut().find(|f| f.id == id) {
            f.clarity = clarity;
        }
        Ok(())
    }

    async fn mark_accessed(&self, _ids: &[FactId], _at: DateTime<Utc>) -> KeepsakeResult<()> {
        Ok(())
    }

    async fn delete(&self, id: FactId) -> KeepsakeResult<()> {
        if id == self.poisoned {
            return Err(KeepsakeError::Memory("row locked".into()));
        }
        self.facts.lock().unwrap().retain(|f| f.id != id);
        Ok(())
    }
}

/// Every state call takes longer than any sane turn budget.
struct StalledStateStore;

#[async_trait]
impl StateStore for StalledStateStore {
    async fn insert_session_if_absent(
        &self,
        _key: &SessionKey,
        state: &SessionState,
    ) -> KeepsakeResult<SessionState> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(state.clone())
    }

    async fn load_session(&self, _key: &SessionKey) -> KeepsakeResult<Option<SessionState>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn compare_and_swap_session(
        &self,
        _key: &SessionKey,
        _expected: DateTime<Utc>,
        _state: &SessionState,
    ) -> KeepsakeResult<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }

    async fn insert_spatial_if_absent(
        &self,
        _key: &SessionKey,
        state: &SpatialState,
    ) -> KeepsakeResult<SpatialState> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(state.clone())
    }

    async fn load_spatial(&self, _key: &SessionKey) -> KeepsakeResult<Option<SpatialState>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn compare_and_swap_spatial(
        &self,
        _key: &SessionKey,
        _expected: DateTime<Utc>,
        _state: &SpatialState,
    ) -> KeepsakeResult<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
}

/// A real state store whose spatial swaps never come back in time.
struct SlowSpatialSwap {
    inner: Arc<dyn StateStore>,
}

#[async_trait]
impl StateStore for SlowSpatialSwap {
    async fn insert_session_if_absent(
        &self,
        key: &SessionKey,
        state: &SessionState,
    ) -> KeepsakeResult<SessionState> {
        self.inner.insert_session_if_absent(key, state).await
    }

    async fn load_session(&self, key: &SessionKey) -> KeepsakeResult<Option<SessionState>> {
        self.inner.load_session(key).await
    }

    async fn compare_and_swap_session(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SessionState,
    ) -> KeepsakeResult<bool> {
        self.inner.compare_and_swap_session(key, expected, state).await
    }

    async fn insert_spatial_if_absent(
        &self,
        key: &SessionKey,
        state: &SpatialState,
    ) -> KeepsakeResult<SpatialState> {
        self.inner.insert_spatial_if_absent(key, state).await
    }

    async fn load_spatial(&self, key: &SessionKey) -> KeepsakeResult<Option<SpatialState>> {
        self.inner.load_spatial(key).await
    }

    async fn compare_and_swap_spatial(
        &self,
        _key: &SessionKey,
        _expected: DateTime<Utc>,
        _state: &SpatialState,
    ) -> KeepsakeResult<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
}

fn trigger_aged(days: i64) -> MemoryFact {
    let created = Utc::now() - ChronoDuration::days(days);
    MemoryFactDraft {
        owner_id: "u1".into(),
        companion_id: "c1".into(),
        content: format!("trigger from {days} days ago"),
        kind: FactKind::Trigger,
        category: FactCategory::Situational,
        clarity: Clarity::FULL,
        created_at: created,
        last_accessed: created,
        tags: BTreeSet::new(),
    }
    .into_fact()
}

fn key() -> SessionKey {
    SessionKey::new("u1", "c1", "s1")
}

fn lines(bundle: &keepsake_types::context::ContextBundle, section: ContextSection) -> Vec<String> {
    bundle.section(section).map(String::from).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_turn_pipeline_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let memory = CompanionMemory::boot(config.clone()).unwrap();

    memory.start_session(&key()).await.unwrap();
    memory
        .remember_user_message(&key().owner_id, &key().companion_id, "I'm a nurse and I live in Austin")
        .await;
    memory
        .remember_user_message(&key().owner_id, &key().companion_id, "I'm so stressed about work")
        .await;
    memory
        .observe_reply(&key(), "I'm sitting on the couch with my feet on the floor")
        .await
        .unwrap();

    let bundle = memory.context_for_turn(&key()).await;
    assert_eq!(
        lines(&bundle, ContextSection::Anchor),
        vec!["I'm a nurse".to_string(), "I live in Austin".to_string()]
    );
    assert_eq!(
        lines(&bundle, ContextSection::Trigger),
        vec!["I'm so stressed".to_string()]
    );
    let spatial = lines(&bundle, ContextSection::Spatial);
    assert!(spatial.contains(&"Body: sitting on the couch".to_string()));
    assert!(spatial.contains(&"Left foot: on the floor".to_string()));
    assert!(spatial.contains(&"Right foot: on the floor".to_string()));
    assert!(spatial.contains(&"Left hand: resting in my lap".to_string()));

    let sections: Vec<ContextSection> = bundle.lines().iter().map(|l| l.section).collect();
    let mut sorted = sections.clone();
    sorted.sort();
    assert_eq!(sections, sorted);

    // A second process sees the same memory.
    drop(memory);
    let reopened = CompanionMemory::boot(config).unwrap();
    let again = reopened.context_for_turn(&key()).await;
    assert_eq!(again.lines(), bundle.lines());
}

#[tokio::test]
async fn test_broken_fact_store_degrades_to_state_only() {
    let substrate = MemorySubstrate::open_in_memory().unwrap();
    let memory = CompanionMemory::with_stores(
        MemoryConfig::default(),
        Arc::new(BrokenStore),
        substrate.sessions(),
    );

    let stored = memory
        .remember_user_message(&key().owner_id, &key().companion_id, "My name is Sam")
        .await;
    assert_eq!(stored, 0);

    let empty = memory.context_for_turn(&key()).await;
    assert!(empty.is_empty());

    memory.start_session(&key()).await.unwrap();
    let bundle = memory.context_for_turn(&key()).await;
    assert!(lines(&bundle, ContextSection::Anchor).is_empty());
    assert!(!lines(&bundle, ContextSection::Session).is_empty());
    assert!(!lines(&bundle, ContextSection::Spatial).is_empty());

    assert!(memory.decay_now().await.is_err());
}

#[tokio::test]
async fn test_stalled_fact_store_is_skipped_within_budget() {
    let substrate = MemorySubstrate::open_in_memory().unwrap();
    let config = MemoryConfig {
        store_timeout_ms: 50,
        ..Default::default()
    };
    let memory = CompanionMemory::with_stores(config, Arc::new(StalledStore), substrate.sessions());

    let started = std::time::Instant::now();
    let stored = memory
        .remember_user_message(&key().owner_id, &key().companion_id, "I'm from Oslo")
        .await;
    let bundle = memory.context_for_turn(&key()).await;
    assert_eq!(stored, 0);
    assert!(bundle.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_decay_batch_continues_past_failing_row() {
    let poisoned = trigger_aged(130);
    let healthy_old = trigger_aged(125);
    let healthy_mid = trigger_aged(45);
    let store = Arc::new(FlakyRowStore {
        poisoned: poisoned.id,
        facts: Mutex::new(vec![poisoned.clone(), healthy_old.clone(), healthy_mid.clone()]),
    });

    let report = DecayEngine::new(store.clone()).decay_all().await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.updated, 1);

    let remaining = store.facts.lock().unwrap().clone();
    assert!(remaining.iter().any(|f| f.id == poisoned.id));
    assert!(!remaining.iter().any(|f| f.id == healthy_old.id));
    let mid = remaining.iter().find(|f| f.id == healthy_mid.id).unwrap();
    assert_eq!(mid.clarity.value(), 70);
}

#[tokio::test]
async fn test_faded_trigger_surfaces_with_qualifier() {
    let substrate = MemorySubstrate::open_in_memory().unwrap();
    let facts = substrate.facts();
    let created = Utc::now() - ChronoDuration::days(70);
    facts
        .insert(vec![MemoryFactDraft {
            owner_id: "u1".into(),
            companion_id: "c1".into(),
            content: "I'm going to the dentist".to_string(),
            kind: FactKind::Trigger,
            category: FactCategory::Situational,
            clarity: Clarity::FULL,
            created_at: created,
            last_accessed: created,
            tags: BTreeSet::new(),
        }])
        .await
        .unwrap();
    let memory = CompanionMemory::with_stores(MemoryConfig::default(), facts, substrate.sessions());

    memory.decay_now().await.unwrap();
    let bundle = memory.context_for_turn(&key()).await;
    assert_eq!(
        lines(&bundle, ContextSection::Trigger),
        vec!["(I believe) I'm going to the dentist".to_string()]
    );
    assert_eq!(
        lines(&bundle, ContextSection::Recent),
        vec!["I'm going to the dentist".to_string()]
    );
}

#[tokio::test]
async fn test_stalled_state_store_is_skipped_within_budget() {
    let substrate = MemorySubstrate::open_in_memory().unwrap();
    let config = MemoryConfig {
        store_timeout_ms: 50,
        ..Default::default()
    };
    let memory =
        CompanionMemory::with_stores(config, substrate.facts(), Arc::new(StalledStateStore));

    let started = std::time::Instant::now();
    let (session, spatial) = memory.start_session(&key()).await.unwrap();
    let baseline = SessionState::baseline(Utc::now());
    assert_eq!(session.mood, baseline.mood);
    assert_eq!(session.clothing, baseline.clothing);
    assert_eq!(
        spatial.body_position,
        SpatialState::baseline(Utc::now()).body_position
    );

    let observed = memory.observe_reply(&key(), "I'm feeling happy").await.unwrap();
    assert!(observed.updates.session.is_some());
    assert!(observed.session.is_none());

    assert_eq!(memory.session_snapshot(&key()).await, (None, None));
    assert!(memory.context_for_turn(&key()).await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_observe_reports_only_records_that_landed() {
    let substrate = MemorySubstrate::open_in_memory().unwrap();
    let config = MemoryConfig {
        store_timeout_ms: 100,
        ..Default::default()
    };
    let states = Arc::new(SlowSpatialSwap {
        inner: substrate.sessions(),
    });
    let memory = CompanionMemory::with_stores(config, substrate.facts(), states);
    memory.start_session(&key()).await.unwrap();

    let observed = memory
        .observe_reply(&key(), "I'm feeling playful! I turn away and hide a smile.")
        .await
        .unwrap();
    assert!(observed.updates.spatial.is_some());
    assert_eq!(observed.session.unwrap().mood, "playful");
    assert!(observed.spatial.is_none());

    let (session, spatial) = memory.session_snapshot(&key()).await;
    assert_eq!(session.unwrap().mood, "playful");
    assert_eq!(spatial.unwrap().proximity.facing, Facing::Toward);
}
