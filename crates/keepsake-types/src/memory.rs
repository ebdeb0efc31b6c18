//! Memory fact types: kinds, categories, clarity, drafts, and the MemoryStore trait.

use crate::error::KeepsakeResult;
use crate::ids::{CompanionId, FactId, OwnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a fact is permanent or fades with age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// Durable fact about the user. Never decays.
    Anchor,
    /// Situational fact. Clarity decays with age until the row is deleted.
    Trigger,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Anchor => "anchor",
            FactKind::Trigger => "trigger",
        }
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anchor" => Ok(FactKind::Anchor),
            "trigger" => Ok(FactKind::Trigger),
            other => Err(format!("unknown fact kind '{other}'")),
        }
    }
}

/// What a fact is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    /// Name, occupation, origin, nicknames.
    Personal,
    /// Likes and dislikes.
    Preferences,
    /// Relationship status, family and friends.
    Relationship,
    /// How the user feels right now.
    Emotional,
    /// Plans, health, and other passing circumstances.
    Situational,
}

impl FactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Personal => "personal",
            FactCategory::Preferences => "preferences",
            FactCategory::Relationship => "relationship",
            FactCategory::Emotional => "emotional",
            FactCategory::Situational => "situational",
        }
    }
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(FactCategory::Personal),
            "preferences" => Ok(FactCategory::Preferences),
            "relationship" => Ok(FactCategory::Relationship),
            "emotional" => Ok(FactCategory::Emotional),
            "situational" => Ok(FactCategory::Situational),
            other => Err(format!("unknown fact category '{other}'")),
        }
    }
}

/// Confidence/strength of a memory, 0 to 100 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clarity(u8);

impl Clarity {
    /// Full strength. Every anchor and every fresh trigger.
    pub const FULL: Clarity = Clarity(100);
    /// Exhausted. A trigger at this clarity is deleted.
    pub const ZERO: Clarity = Clarity(0);

    /// Build a clarity value, saturating at 100.
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Clarity {
    fn default() -> Self {
        Self::FULL
    }
}

impl std::fmt::Display for Clarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fact produced by the extractor that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFactDraft {
    pub owner_id: OwnerId,
    pub companion_id: CompanionId,
    /// The full matched span from the source message.
    pub content: String,
    pub kind: FactKind,
    pub category: FactCategory,
    pub clarity: Clarity,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Keywords from the fixed vocabulary found in the content.
    pub tags: BTreeSet<String>,
}

impl MemoryFactDraft {
    /// Assign a fresh id, turning the draft into a storable fact.
    pub fn into_fact(self) -> MemoryFact {
        MemoryFact {
            id: FactId::new(),
            owner_id: self.owner_id,
            companion_id: self.companion_id,
            content: self.content,
            kind: self.kind,
            category: self.category,
            clarity: self.clarity,
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            tags: self.tags,
        }
    }
}

/// A remembered fact ("nugget"). `content` is never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: FactId,
    pub owner_id: OwnerId,
    pub companion_id: CompanionId,
    pub content: String,
    pub kind: FactKind,
    pub category: FactCategory,
    pub clarity: Clarity,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

impl MemoryFact {
    pub fn is_anchor(&self) -> bool {
        self.kind == FactKind::Anchor
    }
}

/// Thresholds applied when partitioning facts for a context read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLimits {
    /// Triggers at or below this clarity are too faded to surface.
    pub trigger_floor: u8,
    /// How many facts the `recent` list holds.
    pub recent_limit: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            trigger_floor: 20,
            recent_limit: 10,
        }
    }
}

/// The facts for one owner/companion pair, partitioned for context assembly.
///
/// All three lists preserve the store order: `last_accessed` descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactContext {
    /// Every anchor.
    pub anchors: Vec<MemoryFact>,
    /// Triggers whose clarity is above the floor.
    pub triggers: Vec<MemoryFact>,
    /// The most recently accessed facts regardless of kind or clarity.
    pub recent: Vec<MemoryFact>,
}

impl FactContext {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty() && self.triggers.is_empty() && self.recent.is_empty()
    }
}

/// Report from a decay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Trigger facts examined.
    pub scanned: u64,
    /// Triggers whose clarity changed.
    pub updated: u64,
    /// Exhausted triggers physically removed.
    pub deleted: u64,
    /// Rows skipped because the store rejected the write.
    pub failed: u64,
    /// How long the pass took.
    pub duration_ms: u64,
}

/// Persistence boundary for memory facts.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append facts. No uniqueness constraint beyond the generated id.
    async fn insert(&self, drafts: Vec<MemoryFactDraft>) -> KeepsakeResult<Vec<FactId>>;

    /// Fetch and partition every fact for the owner/companion pair.
    async fn query_context(
        &self,
        owner_id: &OwnerId,
        companion_id: &CompanionId,
        limits: ContextLimits,
    ) -> KeepsakeResult<FactContext>;

    /// Every trigger fact across all owners, for the decay pass.
    async fn list_triggers(&self) -> KeepsakeResult<Vec<MemoryFact>>;

    /// Overwrite a fact's clarity and last-accessed stamp.
    async fn update_clarity(
        &self,
        id: FactId,
        clarity: Clarity,
        last_accessed: DateTime<Utc>,
    ) -> KeepsakeResult<()>;

    /// Stamp `last_accessed` on the given facts.
    async fn mark_accessed(&self, ids: &[FactId], at: DateTime<Utc>) -> KeepsakeResult<()>;

    /// Physically delete a fact.
    async fn delete(&self, id: FactId) -> KeepsakeResult<()>;
}
