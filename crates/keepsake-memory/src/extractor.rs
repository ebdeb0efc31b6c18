//! Pattern extraction of remembered facts from user messages.
//!
//! Each entry in [`FACT_RULES`] is tried against the whole message, in table
//! order. A rule that matches emits one draft whose content is the full
//! matched span. Several rules may fire on the same message and nothing is
//! deduplicated, either across drafts or against what is already stored.

use chrono::{DateTime, Utc};
use keepsake_types::ids::{CompanionId, OwnerId};
use keepsake_types::memory::{Clarity, FactCategory, FactKind, MemoryFactDraft};
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// One declarative extraction rule.
#[derive(Debug, Clone, Copy)]
pub struct FactRule {
    /// Stable name, used in logs and tests.
    pub name: &'static str,
    pub pattern: &'static str,
    pub category: FactCategory,
    pub kind: FactKind,
    /// A match whose last word is one of these is discarded.
    pub reject_last_word: &'static [&'static str],
}

/// Words that fill the noun slot of "I'm a ..." without naming anything.
const DEGREE_FILLERS: &[&str] = &[
    "bit", "little", "lot", "tad", "few", "couple", "mess", "wreck", "touch", "total",
];

/// The ordered rule table. Anchors first, then triggers.
pub const FACT_RULES: &[FactRule] = &[
    FactRule {
        name: "name",
        pattern: r"(?i)\b(?:my name is|my name's|i'm called|i’m called|i am called)\s+[a-z][\w'-]*",
        category: FactCategory::Personal,
        kind: FactKind::Anchor,
        reject_last_word: &[],
    },
    FactRule {
        name: "occupation",
        pattern: r"(?i)\b(?:(?:i work as|i'm|i’m|i am)\s+an?\s+[a-z][\w-]*|i work (?:at|for)\s+[a-z][\w&'-]*)",
        category: FactCategory::Personal,
        kind: FactKind::Anchor,
        reject_last_word: DEGREE_FILLERS,
    },
    FactRule {
        name: "origin",
        pattern: r"(?i)\b(?:i live in|i'm from|i’m from|i am from|i grew up in|i was born in|i moved to)\s+[a-z][\w'-]*",
        category: FactCategory::Personal,
        kind: FactKind::Anchor,
        reject_last_word: &[],
    },
    FactRule {
        name: "relationship_status",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am)\s+(?:single|married|engaged|divorced|widowed|separated|in a relationship|seeing someone|dating someone)|i have an?\s+(?:boyfriend|girlfriend|wife|husband|partner|fiance|fiancee))\b",
        category: FactCategory::Relationship,
        kind: FactKind::Anchor,
        reject_last_word: &[],
    },
    FactRule {
        name: "preference",
        pattern: r"(?i)\b(?:i (?:really |absolutely )?(?:love|like|enjoy|adore|hate|prefer|can't stand)\s+(?:to\s+)?[a-z][\w'-]*|my fav(?:ou)?rite\s+[a-z]+\s+is\s+[a-z][\w'-]*)",
        category: FactCategory::Preferences,
        kind: FactKind::Anchor,
        reject_last_word: &[],
    },
    FactRule {
        name: "nickname",
        pattern: r"(?i)\b(?:call me|my nickname is|my friends call me|people call me|everyone calls me)\s+[a-z][\w'-]*",
        category: FactCategory::Personal,
        kind: FactKind::Anchor,
        reject_last_word: &[],
    },
    FactRule {
        name: "emotional_state",
        pattern: r"(?i)\b(?:i'm|i’m|i am|i feel|i'm feeling|i’m feeling|i am feeling|feeling)\s+(?:so\s+|really\s+|very\s+|kind of\s+|a bit\s+|a little\s+|pretty\s+)?(?:happy|sad|angry|upset|anxious|stressed|excited|lonely|depressed|nervous|worried|bored|frustrated|overwhelmed|scared|down)\b",
        category: FactCategory::Emotional,
        kind: FactKind::Trigger,
        reject_last_word: &[],
    },
    FactRule {
        name: "plan",
        pattern: r"(?i)\b(?:i'm going to|i’m going to|i am going to|i'm gonna|i’m gonna|i have to|i need to|i plan to|i'm planning to|i’m planning to)(?:\s+[\w'-]+){1,3}",
        category: FactCategory::Situational,
        kind: FactKind::Trigger,
        reject_last_word: &[],
    },
    FactRule {
        name: "health",
        pattern: r"(?i)\b(?:(?:i'm|i’m|i am|i feel|feeling)\s+(?:so\s+|really\s+|very\s+|kind of\s+|a bit\s+|a little\s+|pretty\s+)?(?:tired|sick|exhausted|sleepy|ill|unwell|hurt|injured|drained|worn out)|i have (?:a |an )?(?:headache|cold|flu|fever|migraine|cough|sore throat)|i (?:didn't|did not|couldn't|could not) sleep)\b",
        category: FactCategory::Situational,
        kind: FactKind::Trigger,
        reject_last_word: &[],
    },
    FactRule {
        name: "family_friends",
        pattern: r"(?i)\bmy (?:mom|mum|mother|dad|father|parents|sister|brother|son|daughter|kids|children|grandma|grandmother|grandpa|grandfather|cousin|aunt|uncle|family|best friend|friends?|roommate|coworker|boss)\b(?:\s+[\w'-]+){0,4}",
        category: FactCategory::Relationship,
        kind: FactKind::Trigger,
        reject_last_word: &[],
    },
];

/// Keywords a fact can be tagged with.
pub const TAG_VOCABULARY: &[&str] = &[
    "work", "job", "boss", "nurse", "teacher", "student", "school", "family", "mom", "dad",
    "sister", "brother", "friend", "friends", "partner", "married", "single", "love", "music",
    "food", "coffee", "travel", "gym", "health", "sleep", "tired", "sick", "pet", "dog", "cat",
    "home", "movie", "movies", "game", "games", "book", "books", "weekend", "birthday", "happy",
    "sad", "stressed", "anxious", "lonely", "excited",
];

fn compiled_rules() -> &'static [(FactRule, Regex)] {
    static RULES: OnceLock<Vec<(FactRule, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        FACT_RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("fact rule pattern is valid");
                (*rule, re)
            })
            .collect()
    })
}

/// Extract draft facts from a user message, timestamped now.
pub fn extract(
    message: &str,
    owner_id: &OwnerId,
    companion_id: &CompanionId,
) -> Vec<MemoryFactDraft> {
    extract_at(message, owner_id, companion_id, Utc::now())
}

/// Extract draft facts from a user message with an explicit timestamp.
pub fn extract_at(
    message: &str,
    owner_id: &OwnerId,
    companion_id: &CompanionId,
    now: DateTime<Utc>,
) -> Vec<MemoryFactDraft> {
    compiled_rules()
        .iter()
        .filter_map(|(rule, re)| {
            let content = accepted_match(rule, re, message)?.trim().to_string();
            Some(MemoryFactDraft {
                owner_id: owner_id.clone(),
                companion_id: companion_id.clone(),
                tags: tags_for(&content),
                content,
                kind: rule.kind,
                category: rule.category,
                clarity: Clarity::FULL,
                created_at: now,
                last_accessed: now,
            })
        })
        .collect()
}

/// Names of the rules that match a message, in table order.
pub fn matching_rules(message: &str) -> Vec<&'static str> {
    compiled_rules()
        .iter()
        .filter(|(rule, re)| accepted_match(rule, re, message).is_some())
        .map(|(rule, _)| rule.name)
        .collect()
}

/// First match of a rule whose last word the rule does not reject.
fn accepted_match<'m>(rule: &FactRule, re: &Regex, message: &'m str) -> Option<&'m str> {
    re.find_iter(message).map(|m| m.as_str()).find(|span| {
        let last = span.rsplit(|c: char| c.is_whitespace()).next().unwrap_or(span);
        !rule
            .reject_last_word
            .iter()
            .any(|w| last.eq_ignore_ascii_case(w))
    })
}

/// Vocabulary words that appear as whole words in the lowercased content.
pub fn tags_for(content: &str) -> BTreeSet<String> {
    let lowered = content.to_lowercase();
    let words: BTreeSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    TAG_VOCABULARY
        .iter()
        .filter(|kw| words.contains(**kw))
        .map(|kw| kw.to_string())
        .collect()
}
