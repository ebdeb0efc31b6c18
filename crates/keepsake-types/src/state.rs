//! Session-scoped persona state: conversational attributes, body position,
//! partial updates, and the StateStore trait.
//!
//! Both records are created once per session with baseline defaults and
//! afterwards only merged field by field. A field absent from an update is
//! left untouched.

use crate::error::KeepsakeResult;
use crate::ids::SessionKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How much energy the persona claims to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Energy {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Energy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Energy::Low => write!(f, "low"),
            Energy::Medium => write!(f, "medium"),
            Energy::High => write!(f, "high"),
        }
    }
}

/// What the persona is wearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clothing {
    pub top: String,
    pub bottom: String,
    pub underwear: String,
    pub accessories: BTreeSet<String>,
    pub shoes: String,
}

/// Persona-side conversational attributes for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_activity: String,
    pub clothing: Clothing,
    pub hair_style: String,
    pub makeup: String,
    pub mood: String,
    pub energy: Energy,
    pub last_updated: DateTime<Utc>,
}

impl SessionState {
    /// The state every session starts in.
    pub fn baseline(now: DateTime<Utc>) -> Self {
        Self {
            current_activity: "chatting with you".to_string(),
            clothing: Clothing {
                top: "a soft casual t-shirt".to_string(),
                bottom: "comfortable jeans".to_string(),
                underwear: "simple cotton basics".to_string(),
                accessories: BTreeSet::new(),
                shoes: "barefoot".to_string(),
            },
            hair_style: "loose and natural".to_string(),
            makeup: "light, natural makeup".to_string(),
            mood: "happy and engaged".to_string(),
            energy: Energy::Medium,
            last_updated: now,
        }
    }

    /// Merge a partial update. Returns true if any field was present.
    pub fn apply(&mut self, update: &SessionUpdate, now: DateTime<Utc>) -> bool {
        if update.is_empty() {
            return false;
        }
        merge(&mut self.current_activity, &update.current_activity);
        merge(&mut self.hair_style, &update.hair_style);
        merge(&mut self.makeup, &update.makeup);
        merge(&mut self.mood, &update.mood);
        merge(&mut self.energy, &update.energy);
        let clothing = &update.clothing;
        merge(&mut self.clothing.top, &clothing.top);
        merge(&mut self.clothing.bottom, &clothing.bottom);
        merge(&mut self.clothing.underwear, &clothing.underwear);
        merge(&mut self.clothing.accessories, &clothing.accessories);
        merge(&mut self.clothing.shoes, &clothing.shoes);
        self.last_updated = now;
        true
    }
}

/// Partial clothing update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClothingUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underwear: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessories: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoes: Option<String>,
}

impl ClothingUpdate {
    pub fn is_empty(&self) -> bool {
        self.top.is_none()
            && self.bottom.is_none()
            && self.underwear.is_none()
            && self.accessories.is_none()
            && self.shoes.is_none()
    }
}

/// Partial session update extracted from one assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<String>,
    #[serde(default, skip_serializing_if = "ClothingUpdate::is_empty")]
    pub clothing: ClothingUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hair_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub makeup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<Energy>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_activity.is_none()
            && self.clothing.is_empty()
            && self.hair_style.is_none()
            && self.makeup.is_none()
            && self.mood.is_none()
            && self.energy.is_none()
    }
}

/// How far the persona is from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Close,
    Medium,
    Far,
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Distance::Close => write!(f, "close"),
            Distance::Medium => write!(f, "medium"),
            Distance::Far => write!(f, "far"),
        }
    }
}

/// Which way the persona is facing relative to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Toward,
    Away,
    Side,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Toward => write!(f, "toward you"),
            Facing::Away => write!(f, "away from you"),
            Facing::Side => write!(f, "sideways"),
        }
    }
}

/// Free-text pose description per body part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPosition {
    pub whole_body: String,
    pub left_foot: String,
    pub right_foot: String,
    pub left_hand: String,
    pub right_hand: String,
    pub head: String,
    pub torso: String,
}

/// Where the persona is relative to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proximity {
    pub distance_to_user: Distance,
    pub touching: BTreeSet<String>,
    pub facing: Facing,
}

/// Persona-side physical pose and proximity for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialState {
    pub body_position: BodyPosition,
    pub proximity: Proximity,
    pub last_updated: DateTime<Utc>,
}

impl SpatialState {
    /// Seated, relaxed, medium distance, facing the user.
    pub fn baseline(now: DateTime<Utc>) -> Self {
        Self {
            body_position: BodyPosition {
                whole_body: "sitting comfortably".to_string(),
                left_foot: "resting on the floor".to_string(),
                right_foot: "resting on the floor".to_string(),
                left_hand: "resting in my lap".to_string(),
                right_hand: "resting in my lap".to_string(),
                head: "upright, looking at you".to_string(),
                torso: "relaxed and upright".to_string(),
            },
            proximity: Proximity {
                distance_to_user: Distance::Medium,
                touching: BTreeSet::new(),
                facing: Facing::Toward,
            },
            last_updated: now,
        }
    }

    /// Merge a partial update. Returns true if any field was present.
    pub fn apply(&mut self, update: &SpatialUpdate, now: DateTime<Utc>) -> bool {
        if update.is_empty() {
            return false;
        }
        let body = &update.body_position;
        merge(&mut self.body_position.whole_body, &body.whole_body);
        merge(&mut self.body_position.left_foot, &body.left_foot);
        merge(&mut self.body_position.right_foot, &body.right_foot);
        merge(&mut self.body_position.left_hand, &body.left_hand);
        merge(&mut self.body_position.right_hand, &body.right_hand);
        merge(&mut self.body_position.head, &body.head);
        merge(&mut self.body_position.torso, &body.torso);
        let prox = &update.proximity;
        merge(&mut self.proximity.distance_to_user, &prox.distance_to_user);
        merge(&mut self.proximity.touching, &prox.touching);
        merge(&mut self.proximity.facing, &prox.facing);
        self.last_updated = now;
        true
    }
}

/// Partial update to [`BodyPosition`]. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPositionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whole_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_foot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_foot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_hand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_hand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torso: Option<String>,
}

impl BodyPositionUpdate {
    pub fn is_empty(&self) -> bool {
        self.whole_body.is_none()
            && self.left_foot.is_none()
            && self.right_foot.is_none()
            && self.left_hand.is_none()
            && self.right_hand.is_none()
            && self.head.is_none()
            && self.torso.is_none()
    }
}

/// Partial update to [`Proximity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_to_user: Option<Distance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touching: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facing: Option<Facing>,
}

impl ProximityUpdate {
    pub fn is_empty(&self) -> bool {
        self.distance_to_user.is_none() && self.touching.is_none() && self.facing.is_none()
    }
}

/// Partial spatial update extracted from one assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialUpdate {
    #[serde(default, skip_serializing_if = "BodyPositionUpdate::is_empty")]
    pub body_position: BodyPositionUpdate,
    #[serde(default, skip_serializing_if = "ProximityUpdate::is_empty")]
    pub proximity: ProximityUpdate,
}

impl SpatialUpdate {
    pub fn is_empty(&self) -> bool {
        self.body_position.is_empty() && self.proximity.is_empty()
    }
}

/// Last-write-wins for a single field.
fn merge<T: Clone>(field: &mut T, update: &Option<T>) {
    if let Some(value) = update {
        *field = value.clone();
    }
}

/// Persistence boundary for session and spatial records.
///
/// Writes are compare-and-swap against the stored `last_updated` so a
/// concurrent writer's field-level merge is never silently overwritten.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert the record unless one already exists; returns the stored record.
    async fn insert_session_if_absent(
        &self,
        key: &SessionKey,
        state: &SessionState,
    ) -> KeepsakeResult<SessionState>;

    async fn load_session(&self, key: &SessionKey) -> KeepsakeResult<Option<SessionState>>;

    /// Replace the record only if its `last_updated` still equals `expected`.
    /// Returns false when another writer got there first.
    async fn compare_and_swap_session(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SessionState,
    ) -> KeepsakeResult<bool>;

    async fn insert_spatial_if_absent(
        &self,
        key: &SessionKey,
        state: &SpatialState,
    ) -> KeepsakeResult<SpatialState>;

    async fn load_spatial(&self, key: &SessionKey) -> KeepsakeResult<Option<SpatialState>>;

    async fn compare_and_swap_spatial(
        &self,
        key: &SessionKey,
        expected: DateTime<Utc>,
        state: &SpatialState,
    ) -> KeepsakeResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_mood_only_update_leaves_other_fields() {
        let t0 = Utc::now();
        let mut state = SessionState::baseline(t0);
        let before = state.clone();
        let update = SessionUpdate {
            mood: Some("curious".to_string()),
            ..Default::default()
        };
        let t1 = t0 + Duration::seconds(5);
        assert!(state.apply(&update, t1));
        assert_eq!(state.mood, "curious");
        assert_eq!(state.current_activity, before.current_activity);
        assert_eq!(state.clothing, before.clothing);
        assert_eq!(state.hair_style, before.hair_style);
        assert_eq!(state.energy, before.energy);
        assert_eq!(state.last_updated, t1);
    }

    #[test]
    fn test_empty_update_is_a_noop() {
        let t0 = Utc::now();
        let mut state = SpatialState::baseline(t0);
        assert!(!state.apply(&SpatialUpdate::default(), t0 + Duration::seconds(1)));
        assert_eq!(state.last_updated, t0);
    }

    #[test]
    fn test_spatial_update_touches_only_named_parts() {
        let t0 = Utc::now();
        let mut state = SpatialState::baseline(t0);
        let update = SpatialUpdate {
            body_position: BodyPositionUpdate {
                left_hand: Some("on your shoulder".to_string()),
                ..Default::default()
            },
            proximity: ProximityUpdate {
                distance_to_user: Some(Distance::Close),
                ..Default::default()
            },
        };
        state.apply(&update, t0);
        assert_eq!(state.body_position.left_hand, "on your shoulder");
        assert_eq!(state.body_position.right_hand, "resting in my lap");
        assert_eq!(state.proximity.distance_to_user, Distance::Close);
        assert_eq!(state.proximity.facing, Facing::Toward);
    }

    #[test]
    fn test_baseline_defaults() {
        let now = Utc::now();
        let session = SessionState::baseline(now);
        assert_eq!(session.mood, "happy and engaged");
        assert_eq!(session.energy, Energy::Medium);
        let spatial = SpatialState::baseline(now);
        assert_eq!(spatial.proximity.distance_to_user, Distance::Medium);
        assert!(spatial.body_position.whole_body.contains("sitting"));
    }

    #[test]
    fn test_update_serializes_only_present_fields() {
        let update = SessionUpdate {
            mood: Some("curious".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "mood": "curious" }));
    }
}
