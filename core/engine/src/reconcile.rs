use questlog_schemas::{
    AbandonSignal, LifeChangeSignals, PauseSignal, ProgressSignal, Quest, QuestId, UserId,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lifecycle::QuestLifecycle;
use crate::store::QuestStore;

/// Confidence score for extracted signals (0.0 to 1.0)
#[derive(Debug, Clone, Copy)]
pub struct Confidence(f32);

impl Confidence {
    pub fn new(score: f32) -> Self {
        Self(score.clamp(0.0, 1.0))
    }

    pub fn score(&self) -> f32 {
        self.0
    }

    /// Hard cutoff, not a weighting factor: sub-threshold signals are
    /// skipped entirely
    pub fn is_confident(&self) -> bool {
        self.0 >= 0.7
    }
}

/// Outcome of one attempted signal application
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub quest_id: Option<QuestId>,
    pub signal_title: String,
    pub applied: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifeChangeOutcome {
    pub abandoned: Vec<ReconciliationResult>,
    pub paused: Vec<ReconciliationResult>,
}

/// Applies untrusted, conversation-derived signals to canonical quests.
///
/// Signals are clamped at the boundary, gated on confidence, and fuzzy-matched
/// against the user's active quests. All mutation goes through the ordinary
/// lifecycle manager - reconciliation has no privileged write path, so the
/// usual guards and history emission apply. Per-signal failures are captured
/// into the result list; one bad signal never aborts the batch.
pub struct ReconciliationEngine {
    lifecycle: QuestLifecycle,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self {
            lifecycle: QuestLifecycle::new(),
        }
    }

    /// Apply a batch of progress signals against the user's active quests.
    ///
    /// The active-quest snapshot is taken once at batch start; a signal
    /// mutating a quest mid-batch does not refresh the match surface.
    pub fn reconcile_progress(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        signals: &[ProgressSignal],
    ) -> Result<Vec<ReconciliationResult>> {
        let active = store.list_quests_by_status(user_id, questlog_schemas::QuestStatus::Active)?;

        let results = signals
            .iter()
            .map(|signal| {
                self.apply_signal(
                    &active,
                    &signal.quest_title,
                    signal.confidence,
                    |quest_id| {
                        let progress = signal.progress.min(100);
                        self.lifecycle
                            .update_progress(store, user_id, quest_id, progress)
                            .map(|_| format!("progress updated to {}%", progress))
                    },
                )
            })
            .collect();

        Ok(results)
    }

    /// Apply abandon and pause signals. Both lists are matched against the
    /// same snapshot taken at batch start, so a quest abandoned by an earlier
    /// signal can still be matched (and rejected by the lifecycle guard) by a
    /// later one.
    pub fn reconcile_life_changes(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        signals: &LifeChangeSignals,
    ) -> Result<LifeChangeOutcome> {
        let active = store.list_quests_by_status(user_id, questlog_schemas::QuestStatus::Active)?;

        let abandoned = signals
            .abandon
            .iter()
            .map(|signal| self.apply_abandon(store, user_id, &active, signal))
            .collect();

        let paused = signals
            .pause
            .iter()
            .map(|signal| self.apply_pause(store, user_id, &active, signal))
            .collect();

        Ok(LifeChangeOutcome { abandoned, paused })
    }

    fn apply_abandon(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        active: &[Quest],
        signal: &AbandonSignal,
    ) -> ReconciliationResult {
        self.apply_signal(active, &signal.quest_title, signal.confidence, |quest_id| {
            self.lifecycle
                .abandon(store, user_id, quest_id, Some(signal.reason.clone()))
                .map(|_| "quest abandoned".to_string())
        })
    }

    fn apply_pause(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        active: &[Quest],
        signal: &PauseSignal,
    ) -> ReconciliationResult {
        self.apply_signal(active, &signal.quest_title, signal.confidence, |quest_id| {
            self.lifecycle
                .pause(store, user_id, quest_id, Some(signal.reason.clone()))
                .map(|_| "quest paused".to_string())
        })
    }

    /// Shared per-signal path: confidence gate, fuzzy title match, then the
    /// supplied lifecycle call. Errors from the call are captured into the
    /// result rather than propagated.
    fn apply_signal(
        &self,
        active: &[Quest],
        signal_title: &str,
        confidence: f32,
        apply: impl FnOnce(&QuestId) -> crate::error::Result<String>,
    ) -> ReconciliationResult {
        let confidence = Confidence::new(confidence);

        if signal_title.trim().is_empty() {
            return ReconciliationResult {
                quest_id: None,
                signal_title: signal_title.to_string(),
                applied: false,
                reason: "signal has an empty quest title".to_string(),
            };
        }

        if !confidence.is_confident() {
            debug!(
                "Skipping signal '{}': confidence {:.2} below threshold",
                signal_title,
                confidence.score()
            );
            return ReconciliationResult {
                quest_id: None,
                signal_title: signal_title.to_string(),
                applied: false,
                reason: format!("confidence {:.2} below threshold", confidence.score()),
            };
        }

        let Some(quest) = find_match(active, signal_title) else {
            return ReconciliationResult {
                quest_id: None,
                signal_title: signal_title.to_string(),
                applied: false,
                reason: "no matching active quest".to_string(),
            };
        };

        match apply(&quest.id) {
            Ok(reason) => {
                debug!("Signal '{}' applied to quest {}", signal_title, quest.id);
                ReconciliationResult {
                    quest_id: Some(quest.id.clone()),
                    signal_title: signal_title.to_string(),
                    applied: true,
                    reason,
                }
            }
            Err(e) => {
                warn!(
                    "Signal '{}' matched quest {} but was not applied: {}",
                    signal_title, quest.id, e
                );
                ReconciliationResult {
                    quest_id: Some(quest.id.clone()),
                    signal_title: signal_title.to_string(),
                    applied: false,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Case-insensitive bidirectional substring containment, first match in
/// iteration order. Deliberately simple and order-dependent; kept as-is for
/// compatibility with existing behavior even though unrelated quests sharing
/// a common word can false-positive.
fn find_match<'a>(active: &'a [Quest], signal_title: &str) -> Option<&'a Quest> {
    let needle = signal_title.to_lowercase();

    active.iter().find(|quest| {
        let title = quest.title.to_lowercase();
        title.contains(&needle) || needle.contains(&title)
    })
}
