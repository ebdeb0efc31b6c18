//! Extraction of persona state updates from assistant-authored text.
//!
//! [`STATE_RULES`] is evaluated top to bottom against the whole message.
//! Every rule that matches writes its field into a partial update; when two
//! rules write the same field, the later rule in the table wins. Fields no
//! rule touched stay `None` so the merge leaves them alone.

use keepsake_types::state::{Distance, Energy, Facing, SessionUpdate, SpatialUpdate};
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// What a matching rule writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    /// Group 1: a clothing list, routed item by item.
    Wearing,
    /// Group 1: activity phrase.
    Activity,
    /// Group 1: mood word.
    Mood,
    EnergyLow,
    EnergyHigh,
    /// Group 1: hair description.
    Hair,
    /// Group 1: whole-body pose.
    WholeBody,
    /// Group 1: optional `left`/`right`; group 2: pose. No side means both.
    Feet,
    /// Same layout as `Feet`.
    Hands,
    /// Group 1: head pose.
    Head,
    /// Group 1: torso pose.
    Torso,
    Distance(Distance),
    /// Group 1 of every match: a body part of the user.
    Touching,
    Facing(Facing),
}

/// One declarative state rule.
#[derive(Debug, Clone, Copy)]
pub struct StateRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub target: StateTarget,
}

/// The ordered state rule table.
pub const STATE_RULES: &[StateRule] = &[
    StateRule {
        name: "wearing",
        pattern: r"(?i)\b(?:i'm|i’m|i am) (?:now |currently |still )?wearing\s+([^.!?;]+)",
        target: StateTarget::Wearing,
    },
    StateRule {
        name: "changed_into",
        pattern: r"(?i)\bi (?:just )?(?:put on|changed into|slipped into|threw on)\s+([^.!?;]+)",
        target: StateTarget::Wearing,
    },
    StateRule {
        name: "activity",
        pattern: r"(?i)\b(?:i'm|i’m|i am) (?:just |currently |still )?((?:reading|cooking|watching|working|relaxing|playing|writing|drawing|painting|studying|listening|baking|cleaning|walking|stretching|gaming|knitting|singing|dancing)\b[^.!?;,]*)",
        target: StateTarget::Activity,
    },
    StateRule {
        name: "mood",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am) (?:feeling |so |really |a little |a bit )?|i feel (?:so |really |a little |a bit )?)(happy|sad|excited|nervous|relaxed|calm|curious|playful|bored|content|cheerful|shy|flirty|giddy|grumpy|cozy|thoughtful|sleepy|tired)\b",
        target: StateTarget::Mood,
    },
    StateRule {
        name: "energy_low",
        pattern: r"(?i)\b(?:i'm|i’m|i am|i feel) (?:so |really |a little |a bit |pretty )?(?:tired|exhausted|sleepy|drained|worn out)\b",
        target: StateTarget::EnergyLow,
    },
    StateRule {
        name: "energy_high",
        pattern: r"(?i)\b(?:i'm|i’m|i am|i feel) (?:so |really |super )?(?:energetic|hyper|wide awake|full of energy|pumped)\b",
        target: StateTarget::EnergyHigh,
    },
    StateRule {
        name: "hair_is",
        pattern: r"(?i)\bmy hair(?: is now| is|'s)?\s+((?:in|up|down|loose|tied|braided|pulled|wet|messy|curled|straight)\b[^.!?;,]*)",
        target: StateTarget::Hair,
    },
    StateRule {
        name: "hair_styled",
        pattern: r"(?i)\bi (?:put|tied|pulled|braided|twisted) my hair\s+([^.!?;,]+)",
        target: StateTarget::Hair,
    },
    StateRule {
        name: "whole_body",
        pattern: r"(?i)\b(?:i'm|i’m|i am) (?:now |just |still )?((?:sitting|standing|lying|laying|kneeling|leaning|lounging|crouching|curled up|sprawled|perched)\b[^.!?;,]*)",
        target: StateTarget::WholeBody,
    },
    StateRule {
        name: "feet",
        pattern: r"(?i)\bmy (left |right )?(?:foot|feet)(?: is| are|'s)?\s+([^.!?;,]+)",
        target: StateTarget::Feet,
    },
    StateRule {
        name: "hands",
        pattern: r"(?i)\bmy (left |right )?hands?(?: is| are|'s)?\s+([^.!?;,]+)",
        target: StateTarget::Hands,
    },
    StateRule {
        name: "hands_placed",
        pattern: r"(?i)\bi (?:put|rest|place|lay|keep) my (left |right )?hands?\s+([^.!?;,]+)",
        target: StateTarget::Hands,
    },
    StateRule {
        name: "head",
        pattern: r"(?i)\bmy head(?: is|'s)?\s+([^.!?;,]+)",
        target: StateTarget::Head,
    },
    StateRule {
        name: "head_moved",
        pattern: r"(?i)\bi ((?:tilt|rest|lean|lay) my head\b[^.!?;,]*)",
        target: StateTarget::Head,
    },
    StateRule {
        name: "torso",
        pattern: r"(?i)\bmy (?:back|body|chest|torso|shoulders)(?: is| are|'s)?\s+([^.!?;,]+)",
        target: StateTarget::Torso,
    },
    StateRule {
        name: "distance_medium",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am) (?:a few feet|a couple of feet|an arm's length) (?:away )?from you|(?:i'm|i’m|i am) (?:sitting |standing )?across from you)\b",
        target: StateTarget::Distance(Distance::Medium),
    },
    StateRule {
        name: "distance_far",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am) (?:across the room|far from you|far away|on the other side of the room)|i (?:step|move|walk) (?:back|away) from you)\b",
        target: StateTarget::Distance(Distance::Far),
    },
    StateRule {
        name: "distance_close",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am|i move|i scoot|i lean|i snuggle|i cuddle) (?:right |closer |up )?(?:close to|closer to|next to|beside|against|into) you|(?:i'm|i’m|i am) (?:snuggled|cuddled|curled) up (?:with|against|next to) you)\b",
        target: StateTarget::Distance(Distance::Close),
    },
    StateRule {
        name: "touching",
        pattern: r"(?i)\b(?:touching|holding|on|against|stroking) your (hands?|shoulders?|arms?|knees?|legs?|cheek|face|chest|back|hair|neck|waist)\b",
        target: StateTarget::Touching,
    },
    StateRule {
        name: "facing_toward",
        pattern: r"(?i)\bi (?:turn|look|face|lean) (?:back )?(?:towards?|at|to face) you\b",
        target: StateTarget::Facing(Facing::Toward),
    },
    StateRule {
        name: "facing_away",
        pattern: r"(?i)\bi (?:turn|look) away\b",
        target: StateTarget::Facing(Facing::Away),
    },
    StateRule {
        name: "facing_side",
        pattern: r"(?i)\bi turn (?:to the side|sideways)\b",
        target: StateTarget::Facing(Facing::Side),
    },
];

/// Partial updates found in one assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialUpdate>,
}

impl ExtractedUpdates {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.spatial.is_none()
    }
}

const SHOE_WORDS: &[&str] = &[
    "shoes", "sneakers", "heels", "boots", "sandals", "slippers", "flats", "socks",
];
const BOTTOM_WORDS: &[&str] = &[
    "jeans", "pants", "skirt", "shorts", "leggings", "trousers", "sweatpants", "joggers",
];
const UNDERWEAR_WORDS: &[&str] = &[
    "bra", "panties", "lingerie", "underwear", "boxers", "briefs",
];
const ACCESSORY_WORDS: &[&str] = &[
    "necklace", "earrings", "bracelet", "ring", "watch", "hat", "cap", "scarf", "glasses",
    "sunglasses", "headband", "choker", "anklet",
];
const MAKEUP_WORDS: &[&str] = &[
    "lipstick", "mascara", "eyeliner", "makeup", "blush", "eyeshadow", "gloss", "polish",
];

/// Phrase boundaries: a pose or activity ends where another clause begins.
const CLAUSE_BREAK: &str = r"(?i) (?:with|while|but|because|and) ";

fn compiled_rules() -> &'static [(StateRule, Regex)] {
    static RULES: OnceLock<Vec<(StateRule, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        STATE_RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("state rule pattern is valid");
                (*rule, re)
            })
            .collect()
    })
}

/// Scan an assistant message for first-person state statements.
pub fn extract_updates(message: &str) -> ExtractedUpdates {
    let mut session = SessionUpdate::default();
    let mut spatial = SpatialUpdate::default();

    for (rule, re) in compiled_rules() {
        if rule.target == StateTarget::Touching {
            let touching: BTreeSet<String> = re
                .captures_iter(message)
                .filter_map(|c| c.get(1))
                .map(|m| format!("your {}", m.as_str().to_lowercase()))
                .collect();
            if !touching.is_empty() {
                spatial.proximity.touching = Some(touching);
            }
            continue;
        }
        if let Some(caps) = re.captures(message) {
            apply_rule(rule.target, &caps, &mut session, &mut spatial);
        }
    }

    ExtractedUpdates {
        session: (!session.is_empty()).then_some(session),
        spatial: (!spatial.is_empty()).then_some(spatial),
    }
}

/// Names of the state rules that match a message, in table order.
pub fn matching_state_rules(message: &str) -> Vec<&'static str> {
    compiled_rules()
        .iter()
        .filter(|(_, re)| re.is_match(message))
        .map(|(rule, _)| rule.name)
        .collect()
}

fn apply_rule(
    target: StateTarget,
    caps: &Captures<'_>,
    session: &mut SessionUpdate,
    spatial: &mut SpatialUpdate,
) {
    let group = |i: usize| caps.get(i).map(|m| m.as_str());
    let phrase = |i: usize| group(i).map(clip).filter(|p| !p.is_empty());
    let body = &mut spatial.body_position;

    match target {
        StateTarget::Wearing => {
            if let Some(list) = group(1) {
                route_clothing(list, session);
            }
        }
        StateTarget::Activity => set(&mut session.current_activity, phrase(1)),
        StateTarget::Mood => set(&mut session.mood, group(1).map(str::to_lowercase)),
        StateTarget::EnergyLow => session.energy = Some(Energy::Low),
        StateTarget::EnergyHigh => session.energy = Some(Energy::High),
        StateTarget::Hair => set(&mut session.hair_style, phrase(1)),
        StateTarget::WholeBody => set(&mut body.whole_body, phrase(1)),
        StateTarget::Feet => {
            if let Some(pose) = phrase(2) {
                let (left, right) = (&mut body.left_foot, &mut body.right_foot);
                place_pair(group(1), pose, left, right);
            }
        }
        StateTarget::Hands => {
            if let Some(pose) = phrase(2) {
                let (left, right) = (&mut body.left_hand, &mut body.right_hand);
                place_pair(group(1), pose, left, right);
            }
        }
        StateTarget::Head => set(&mut body.head, phrase(1)),
        StateTarget::Torso => set(&mut body.torso, phrase(1)),
        StateTarget::Distance(d) => spatial.proximity.distance_to_user = Some(d),
        StateTarget::Facing(f) => spatial.proximity.facing = Some(f),
        StateTarget::Touching => {}
    }
}

fn set(field: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *field = value;
    }
}

/// A phrase naming a side updates that side; a generic phrase updates both.
fn place_pair(side: Option<&str>, pose: String, left: &mut Option<String>, right: &mut Option<String>) {
    match side.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("left") => *left = Some(pose),
        Some("right") => *right = Some(pose),
        _ => {
            *left = Some(pose.clone());
            *right = Some(pose);
        }
    }
}

/// Cut a captured phrase at the first clause break.
fn clip(phrase: &str) -> String {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    let re = BREAK.get_or_init(|| Regex::new(CLAUSE_BREAK).expect("clause break pattern is valid"));
    let end = re.find(phrase).map_or(phrase.len(), |m| m.start());
    phrase[..end].trim().to_string()
}

/// Route each item of a clothing list to the field it belongs to.
fn route_clothing(list: &str, session: &mut SessionUpdate) {
    let list = list
        .split(" with my hair")
        .next()
        .unwrap_or(list)
        .replace(" and ", ", ");
    let mut accessories = BTreeSet::new();
    for item in list.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let words: Vec<String> = item
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect();
        let has = |vocab: &[&str]| words.iter().any(|w| vocab.contains(&w.as_str()));
        let item = item.to_string();
        if has(MAKEUP_WORDS) {
            session.makeup = Some(item);
        } else if has(SHOE_WORDS) {
            session.clothing.shoes = Some(item);
        } else if has(UNDERWEAR_WORDS) {
            session.clothing.underwear = Some(item);
        } else if has(BOTTOM_WORDS) {
            session.clothing.bottom = Some(item);
        } else if has(ACCESSORY_WORDS) {
            accessories.insert(item);
        } else {
            session.clothing.top = Some(item);
        }
    }
    if !accessories.is_empty() {
        session.clothing.accessories = Some(accessories);
    }
}
