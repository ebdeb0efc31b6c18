//! Trigger decay.
//!
//! A trigger's clarity is a pure function of its age, so running a pass any
//! number of times at the same instant leaves every row as the first pass
//! left it. Anchors are never read or written here.

use chrono::{DateTime, Utc};
use keepsake_types::error::KeepsakeResult;
use keepsake_types::memory::{Clarity, DecayReport, FactKind, MemoryStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Age brackets: (minimum whole days since creation, clarity).
/// Checked from the oldest bracket down.
const DECAY_SCHEDULE: &[(i64, u8)] = &[
    (120, 0),
    (90, 30),
    (60, 50),
    (35, 70),
    (21, 80),
    (7, 90),
    (0, 100),
];

/// Clarity a trigger should have at the given age in whole days.
///
/// Negative ages (clock skew) count as brand new.
pub fn clarity_for_age(days: i64) -> Clarity {
    DECAY_SCHEDULE
        .iter()
        .find(|(min_days, _)| days >= *min_days)
        .map(|(_, clarity)| Clarity::new(*clarity))
        .unwrap_or(Clarity::FULL)
}

/// Whole days between creation and `now`.
pub fn days_since(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days().max(0)
}

/// Batch decay over every trigger in the store.
#[derive(Clone)]
pub struct DecayEngine {
    store: Arc<dyn MemoryStore>,
}

impl DecayEngine {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    /// Run a decay pass as of now.
    pub async fn decay_all(&self) -> KeepsakeResult<DecayReport> {
        self.decay_all_at(Utc::now()).await
    }

    /// Run a decay pass as of `now`.
    ///
    /// Only listing the triggers can fail the pass. A row that cannot be
    /// updated or deleted is logged and counted, and the pass moves on.
    pub async fn decay_all_at(&self, now: DateTime<Utc>) -> KeepsakeResult<DecayReport> {
        let start = std::time::Instant::now();
        let triggers = self.store.list_triggers().await?;
        let mut report = DecayReport::default();

        for fact in triggers {
            if fact.kind != FactKind::Trigger {
                continue;
            }
            report.scanned += 1;
            let target = clarity_for_age(days_since(fact.created_at, now));

            if target == Clarity::ZERO {
                match self.store.delete(fact.id).await {
                    Ok(()) => {
                        debug!(fact = %fact.id, "Deleted exhausted trigger");
                        report.deleted += 1;
                    }
                    Err(e) => {
                        warn!(fact = %fact.id, error = %e, "Failed to delete exhausted trigger");
                        report.failed += 1;
                    }
                }
                continue;
            }

            if target == fact.clarity {
                continue;
            }
            match self
                .store
                .update_clarity(fact.id, target, fact.last_accessed)
                .await
            {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(fact = %fact.id, error = %e, "Failed to decay trigger");
                    report.failed += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            scanned = report.scanned,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            "Decay pass complete"
        );
        Ok(report)
    }
}
