//! Context assembly: anchors, live triggers, recent history, then persona state.

use chrono::Utc;
use keepsake_types::context::{ContextBundle, ContextSection};
use keepsake_types::error::KeepsakeResult;
use keepsake_types::ids::{CompanionId, FactId, OwnerId};
use keepsake_types::memory::{Clarity, ContextLimits, FactContext, MemoryStore};
use keepsake_types::state::{SessionState, SpatialState};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hedge to put in front of a trigger, if any.
///
/// Above 80 the fact is stated plainly; above 60 it is "(I think)";
/// anything lower that still surfaces is "(I believe)".
pub fn confidence_qualifier(clarity: Clarity) -> Option<&'static str> {
    match clarity.value() {
        81..=u8::MAX => None,
        61..=80 => Some("(I think)"),
        _ => Some("(I believe)"),
    }
}

/// Builds the per-turn [`ContextBundle`].
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn MemoryStore>,
    limits: ContextLimits,
    recent_in_context: usize,
    note_access: bool,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            limits: ContextLimits::default(),
            recent_in_context: 5,
            note_access: false,
        }
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_recent_in_context(mut self, count: usize) -> Self {
        self.recent_in_context = count;
        self
    }

    /// Stamp `last_accessed` on every fact that makes it into a bundle.
    pub fn with_note_access(mut self, enabled: bool) -> Self {
        self.note_access = enabled;
        self
    }

    /// Read the store and build the bundle for one owner/companion pair.
    pub async fn assemble(
        &self,
        owner_id: &OwnerId,
        companion_id: &CompanionId,
        session: Option<&SessionState>,
        spatial: Option<&SpatialState>,
    ) -> KeepsakeResult<ContextBundle> {
        let facts = self
            .store
            .query_context(owner_id, companion_id, self.limits)
            .await?;
        let bundle = self.render(&facts, session, spatial);

        if self.note_access {
            let ids = self.surfaced_ids(&facts);
            if !ids.is_empty() {
                if let Err(e) = self.store.mark_accessed(&ids, Utc::now()).await {
                    warn!(owner = %owner_id, error = %e, "Failed to note fact access");
                }
            }
        }

        debug!(
            owner = %owner_id,
            companion = %companion_id,
            lines = bundle.len(),
            "Assembled context"
        );
        Ok(bundle)
    }

    /// Render already-fetched facts and state. Pure.
    pub fn render(
        &self,
        facts: &FactContext,
        session: Option<&SessionState>,
        spatial: Option<&SpatialState>,
    ) -> ContextBundle {
        let mut bundle = ContextBundle::new();

        for anchor in &facts.anchors {
            bundle.push(ContextSection::Anchor, anchor.content.clone());
        }

        for trigger in facts
            .triggers
            .iter()
            .filter(|t| t.clarity.value() > self.limits.trigger_floor)
        {
            let line = match confidence_qualifier(trigger.clarity) {
                Some(q) => format!("{q} {}", trigger.content),
                None => trigger.content.clone(),
            };
            bundle.push(ContextSection::Trigger, line);
        }

        for fact in facts.recent.iter().take(self.recent_in_context) {
            bundle.push(ContextSection::Recent, fact.content.clone());
        }

        if let Some(state) = session {
            render_session(&mut bundle, state);
        }
        if let Some(state) = spatial {
            render_spatial(&mut bundle, state);
        }
        bundle
    }

    fn surfaced_ids(&self, facts: &FactContext) -> Vec<FactId> {
        let mut seen = HashSet::new();
        facts
            .anchors
            .iter()
            .chain(facts.triggers.iter())
            .chain(facts.recent.iter().take(self.recent_in_context))
            .filter(|f| seen.insert(f.id))
            .map(|f| f.id)
            .collect()
    }
}

fn render_session(bundle: &mut ContextBundle, state: &SessionState) {
    let s = ContextSection::Session;
    bundle.push(s, format!("Activity: {}", state.current_activity));
    bundle.push(s, format!("Wearing on top: {}", state.clothing.top));
    bundle.push(s, format!("Wearing on bottom: {}", state.clothing.bottom));
    bundle.push(s, format!("Hair: {}", state.hair_style));
    bundle.push(s, format!("Mood: {}", state.mood));
    bundle.push(s, format!("Energy: {}", state.energy));
}

fn render_spatial(bundle: &mut ContextBundle, state: &SpatialState) {
    let s = ContextSection::Spatial;
    let body = &state.body_position;
    bundle.push(s, format!("Body: {}", body.whole_body));
    bundle.push(s, format!("Left hand: {}", body.left_hand));
    bundle.push(s, format!("Right hand: {}", body.right_hand));
    bundle.push(s, format!("Left foot: {}", body.left_foot));
    bundle.push(s, format!("Right foot: {}", body.right_foot));
    bundle.push(s, format!("Head: {}", body.head));
    bundle.push(s, format!("Torso: {}", body.torso));
    bundle.push(
        s,
        format!("Distance to you: {}", state.proximity.distance_to_user),
    );
    if !state.proximity.touching.is_empty() {
        let touching: Vec<&str> = state.proximity.touching.iter().map(String::as_str).collect();
        bundle.push(s, format!("Touching: {}", touching.join(", ")));
    }
    bundle.push(s, format!("Facing: {}", state.proximity.facing));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactStore;
    use crate::migration::run_migrations;
    use chrono::{DateTime, Duration};
    use keepsake_types::memory::{FactCategory, FactKind, MemoryFact, MemoryFactDraft};
    use rusqlite::Connection;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn setup() -> (FactStore, ContextAssembler) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let store = FactStore::new(Arc::new(Mutex::new(conn)));
        let assembler = ContextAssembler::new(Arc::new(store.clone()));
        (store, assembler)
    }

    fn fact(content: &str, kind: FactKind, clarity: u8, accessed: DateTime<Utc>) -> MemoryFact {
        draft(content, kind, clarity, accessed).into_fact()
    }

    fn draft(content: &str, kind: FactKind, clarity: u8, accessed: DateTime<Utc>) -> MemoryFactDraft {
        MemoryFactDraft {
            owner_id: "u1".into(),
            companion_id: "c1".into(),
            content: content.to_string(),
            kind,
            category: FactCategory::Personal,
            clarity: Clarity::new(clarity),
            created_at: accessed,
            last_accessed: accessed,
            tags: BTreeSet::new(),
        }
    }

    #[test]
    fn test_qualifier_boundaries() {
        assert_eq!(confidence_qualifier(Clarity::new(100)), None);
        assert_eq!(confidence_qualifier(Clarity::new(81)), None);
        assert_eq!(confidence_qualifier(Clarity::new(80)), Some("(I think)"));
        assert_eq!(confidence_qualifier(Clarity::new(61)), Some("(I think)"));
        assert_eq!(confidence_qualifier(Clarity::new(60)), Some("(I believe)"));
        assert_eq!(confidence_qualifier(Clarity::new(21)), Some("(I believe)"));
    }

    #[test]
    fn test_trigger_rendering_and_floor() {
        let (_, assembler) = setup();
        let now = Utc::now();
        let ctx = FactContext {
            anchors: vec![],
            triggers: vec![
                fact("t81", FactKind::Trigger, 81, now),
                fact("t80", FactKind::Trigger, 80, now),
                fact("t60", FactKind::Trigger, 60, now),
                fact("t21", FactKind::Trigger, 21, now),
                fact("t20", FactKind::Trigger, 20, now),
            ],
            recent: vec![],
        };
        let bundle = assembler.render(&ctx, None, None);
        let lines: Vec<_> = bundle.section(ContextSection::Trigger).collect();
        assert_eq!(
            lines,
            vec!["t81", "(I think) t80", "(I believe) t60", "(I believe) t21"]
        );
    }

    #[test]
    fn test_section_order_is_fixed() {
        let (_, assembler) = setup();
        let now = Utc::now();
        // Input lists deliberately arrive recent-first.
        let ctx = FactContext {
            recent: vec![fact("recent", FactKind::Trigger, 10, now)],
            triggers: vec![fact("trigger", FactKind::Trigger, 90, now)],
            anchors: vec![fact("anchor", FactKind::Anchor, 100, now)],
        };
        let session = SessionState::baseline(now);
        let spatial = SpatialState::baseline(now);
        let bundle = assembler.render(&ctx, Some(&session), Some(&spatial));
        let sections: Vec<_> = bundle.lines().iter().map(|l| l.section).collect();
        let mut sorted = sections.clone();
        sorted.sort();
        assert_eq!(sections, sorted);
        assert_eq!(bundle.lines()[0].text, "anchor");
        assert_eq!(bundle.lines()[1].text, "trigger");
        assert_eq!(bundle.lines()[2].text, "recent");
    }

    #[test]
    fn test_recent_capped_at_five() {
        let (_, assembler) = setup();
        let now = Utc::now();
        let recent = (0..10)
            .map(|i| fact(&format!("r{i}"), FactKind::Anchor, 100, now))
            .collect();
        let ctx = FactContext {
            recent,
            ..Default::default()
        };
        let bundle = assembler.render(&ctx, None, None);
        assert_eq!(bundle.section(ContextSection::Recent).count(), 5);
    }

    #[test]
    fn test_state_lines() {
        let (_, assembler) = setup();
        let now = Utc::now();
        let mut spatial = SpatialState::baseline(now);
        spatial.proximity.touching.insert("your hand".to_string());
        let bundle = assembler.render(
            &FactContext::default(),
            Some(&SessionState::baseline(now)),
            Some(&spatial),
        );
        let session: Vec<_> = bundle.section(ContextSection::Session).collect();
        assert!(session.contains(&"Mood: happy and engaged"));
        assert!(session.contains(&"Energy: medium"));
        let spatial_lines: Vec<_> = bundle.section(ContextSection::Spatial).collect();
        assert!(spatial_lines.contains(&"Distance to you: medium"));
        assert!(spatial_lines.contains(&"Touching: your hand"));
        assert!(spatial_lines.contains(&"Facing: toward you"));
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_bundle() {
        let (_, assembler) = setup();
        let bundle = assembler
            .assemble(&"u1".into(), &"c1".into(), None, None)
            .await
            .unwrap();
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_assemble_reads_store() {
        let (store, assembler) = setup();
        let now = Utc::now();
        store
            .insert_drafts(vec![
                draft("I'm a nurse", FactKind::Anchor, 100, now - Duration::days(200)),
                draft("I'm stressed", FactKind::Trigger, 70, now),
            ])
            .unwrap();
        let bundle = assembler
            .assemble(&"u1".into(), &"c1".into(), None, None)
            .await
            .unwrap();
        assert_eq!(
            bundle.section(ContextSection::Anchor).collect::<Vec<_>>(),
            vec!["I'm a nurse"]
        );
        assert_eq!(
            bundle.section(ContextSection::Trigger).collect::<Vec<_>>(),
            vec!["(I think) I'm stressed"]
        );
        assert_eq!(bundle.section(ContextSection::Recent).count(), 2);
    }

    #[tokio::test]
    async fn test_note_access_stamps_surfaced_facts() {
        let (store, assembler) = setup();
        let assembler = assembler.with_note_access(true);
        let old = Utc::now() - Duration::days(3);
        store
            .insert_drafts(vec![draft("I'm a nurse", FactKind::Anchor, 100, old)])
            .unwrap();
        assembler
            .assemble(&"u1".into(), &"c1".into(), None, None)
            .await
            .unwrap();
        let facts = store.facts_for(&"u1".into(), &"c1".into()).unwrap();
        assert!(facts[0].last_accessed > old);
        assert_eq!(facts[0].content, "I'm a nurse");
    }
}
