use chrono::Utc;
use questlog_schemas::{
    generate_milestone_id, generate_quest_id, CreateQuestInput, HistoryEventType, Milestone,
    MilestoneId, Quest, QuestHistory, QuestId, QuestSource, QuestStatus, UserId,
};
use tracing::{debug, info};

use crate::error::{QuestError, Result};
use crate::store::{NewQuestEvent, QuestStore};

/// Composite priority score used to rank quests on boards.
///
/// Weighted dimensions discounted by difficulty (default 5), rounded to two
/// decimals. Never persisted - recomputed on every read so it cannot go stale.
pub fn quest_score(quest: &Quest) -> f64 {
    let composite = 0.4 * quest.priority as f64
        + 0.3 * quest.importance as f64
        + 0.3 * quest.impact as f64;
    let difficulty = quest.difficulty.unwrap_or(5) as f64;
    let score = composite / (1.0 + 0.1 * difficulty);
    (score * 100.0).round() / 100.0
}

/// Enforces the quest state machine and derives a history event from every
/// mutation. All writes go through `QuestStore::save_quest_with_events`, so
/// the quest row and its audit event land in one transaction.
pub struct QuestLifecycle;

impl Default for QuestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestLifecycle {
    pub fn new() -> Self {
        Self
    }

    /// Create a quest. Initial status is active; emits `created`.
    pub fn create_quest(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        input: CreateQuestInput,
    ) -> Result<Quest> {
        if input.title.trim().is_empty() {
            return Err(QuestError::InvalidArgument("title must not be empty".into()));
        }
        validate_dimension("priority", input.priority)?;
        validate_dimension("importance", input.importance)?;
        validate_dimension("impact", input.impact)?;
        if let Some(difficulty) = input.difficulty {
            validate_dimension("difficulty", difficulty)?;
        }

        let id = generate_quest_id();

        if let Some(ref parent_id) = input.parent_quest_id {
            if store.find_quest(user_id, parent_id)?.is_none() {
                return Err(QuestError::InvalidArgument(format!(
                    "parent quest '{}' not found",
                    parent_id
                )));
            }
            // Parent/child must stay a tree; reject any assignment whose
            // ancestor chain already contains this quest
            if store.is_in_ancestry(user_id, &id, parent_id)? {
                return Err(QuestError::InvalidArgument(
                    "parent assignment would create a cycle".into(),
                ));
            }
        }

        let now = Utc::now().to_rfc3339();
        let milestones: Vec<Milestone> = input
            .milestones
            .iter()
            .map(|description| Milestone {
                id: generate_milestone_id(),
                description: description.clone(),
                achieved: false,
                achieved_date: None,
                target_date: None,
            })
            .collect();

        let quest = Quest {
            id,
            user_id: user_id.clone(),
            title: input.title.trim().to_string(),
            description: input.description,
            quest_type: input.quest_type,
            priority: input.priority,
            importance: input.importance,
            impact: input.impact,
            difficulty: input.difficulty,
            status: QuestStatus::Active,
            progress_percentage: 0,
            category: input.category,
            parent_quest_id: input.parent_quest_id,
            quest_chain_id: input.quest_chain_id,
            related_goal_id: input.related_goal_id,
            milestones,
            started_at: None,
            completed_at: None,
            abandoned_at: None,
            estimated_completion_date: input.estimated_completion_date,
            actual_completion_date: None,
            last_activity_at: now.clone(),
            created_at: now,
            source: input.source.unwrap_or(QuestSource::Manual),
        };

        store.save_quest_with_events(&quest, &[NewQuestEvent::new(HistoryEventType::Created)])?;

        info!("Created quest {} ('{}')", quest.id, quest.title);
        Ok(quest)
    }

    /// Start or resume a quest. Allowed from active and paused; the first
    /// ever start stamps `started_at` and emits `started`, any later start
    /// emits `resumed`.
    pub fn start(&self, store: &QuestStore, user_id: &UserId, quest_id: &QuestId) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        match quest.status {
            QuestStatus::Active | QuestStatus::Paused => {}
            other => {
                return Err(QuestError::InvalidTransition(format!(
                    "cannot start quest in status '{}'",
                    other.as_str()
                )))
            }
        }

        let now = Utc::now().to_rfc3339();
        let event_type = if quest.started_at.is_none() {
            quest.started_at = Some(now.clone());
            HistoryEventType::Started
        } else {
            HistoryEventType::Resumed
        };

        quest.status = QuestStatus::Active;
        quest.last_activity_at = now;

        store.save_quest_with_events(&quest, &[NewQuestEvent::new(event_type)])?;

        debug!("Quest {} {}", quest.id, event_type.as_str());
        Ok(quest)
    }

    /// Pause an active quest. Any other status is an invalid transition.
    pub fn pause(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        note: Option<String>,
    ) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if quest.status != QuestStatus::Active {
            return Err(QuestError::InvalidTransition(format!(
                "cannot pause quest in status '{}'",
                quest.status.as_str()
            )));
        }

        quest.status = QuestStatus::Paused;
        quest.last_activity_at = Utc::now().to_rfc3339();

        let mut event = NewQuestEvent::new(HistoryEventType::Paused);
        if let Some(note) = note {
            event = event.with_note(note);
        }
        store.save_quest_with_events(&quest, &[event])?;

        debug!("Quest {} paused", quest.id);
        Ok(quest)
    }

    /// Complete a quest: progress snaps to 100, `completed_at` is stamped.
    /// Re-completing an already-completed quest is a success overwrite.
    pub fn complete(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        notes: Option<String>,
    ) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if matches!(quest.status, QuestStatus::Abandoned | QuestStatus::Archived) {
            return Err(QuestError::InvalidTransition(format!(
                "cannot complete quest in status '{}'",
                quest.status.as_str()
            )));
        }

        let before = quest.progress_percentage;
        let now = Utc::now().to_rfc3339();

        quest.status = QuestStatus::Completed;
        quest.progress_percentage = 100;
        quest.completed_at = Some(now.clone());
        quest.actual_completion_date = Some(now.clone());
        quest.abandoned_at = None;
        quest.last_activity_at = now;

        let mut event = NewQuestEvent::new(HistoryEventType::Completed).with_progress(before, 100);
        if let Some(notes) = notes {
            event = event.with_note(notes);
        }
        store.save_quest_with_events(&quest, &[event])?;

        info!("Quest {} completed", quest.id);
        Ok(quest)
    }

    /// Abandon a quest. Progress is left where it was - abandonment is not
    /// failure-to-zero.
    pub fn abandon(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        reason: Option<String>,
    ) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if matches!(quest.status, QuestStatus::Completed | QuestStatus::Archived) {
            return Err(QuestError::InvalidTransition(format!(
                "cannot abandon quest in status '{}'",
                quest.status.as_str()
            )));
        }

        let now = Utc::now().to_rfc3339();
        quest.status = QuestStatus::Abandoned;
        quest.abandoned_at = Some(now.clone());
        quest.completed_at = None;
        quest.last_activity_at = now;

        let mut event = NewQuestEvent::new(HistoryEventType::Abandoned);
        if let Some(reason) = reason {
            event = event.with_note(reason);
        }
        store.save_quest_with_events(&quest, &[event])?;

        info!("Quest {} abandoned", quest.id);
        Ok(quest)
    }

    /// Record a progress update with a before/after snapshot.
    ///
    /// Reaching 100 applies the completion effects in the same transaction,
    /// since a quest may only sit at 100% when it is completed.
    pub fn update_progress(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        percent: u8,
    ) -> Result<Quest> {
        if percent > 100 {
            return Err(QuestError::InvalidArgument(format!(
                "progress must be between 0 and 100, got {}",
                percent
            )));
        }

        let mut quest = store.get_quest(user_id, quest_id)?;

        if matches!(quest.status, QuestStatus::Completed | QuestStatus::Archived) {
            return Err(QuestError::InvalidTransition(format!(
                "cannot update progress of quest in status '{}'",
                quest.status.as_str()
            )));
        }

        let before = quest.progress_percentage;
        let now = Utc::now().to_rfc3339();
        quest.progress_percentage = percent;
        quest.last_activity_at = now.clone();

        if percent == 100 {
            quest.status = QuestStatus::Completed;
            quest.completed_at = Some(now.clone());
            quest.actual_completion_date = Some(now);
            quest.abandoned_at = None;

            store.save_quest_with_events(
                &quest,
                &[
                    NewQuestEvent::new(HistoryEventType::ProgressUpdate)
                        .with_progress(before, percent),
                    NewQuestEvent::new(HistoryEventType::Completed).with_progress(before, 100),
                ],
            )?;

            info!("Quest {} reached 100% and completed", quest.id);
        } else {
            store.save_quest_with_events(
                &quest,
                &[NewQuestEvent::new(HistoryEventType::ProgressUpdate)
                    .with_progress(before, percent)],
            )?;

            debug!("Quest {} progress {} -> {}", quest.id, before, percent);
        }

        Ok(quest)
    }

    /// Mark a milestone achieved. Re-achieving is a no-op; no duplicate
    /// history event is written.
    pub fn achieve_milestone(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        milestone_id: &MilestoneId,
    ) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if quest.status == QuestStatus::Archived {
            return Err(QuestError::InvalidTransition(
                "cannot update milestones of an archived quest".into(),
            ));
        }

        let milestone = quest
            .milestones
            .iter_mut()
            .find(|m| m.id == *milestone_id)
            .ok_or(QuestError::NotFound)?;

        if milestone.achieved {
            return Ok(quest);
        }

        let now = Utc::now().to_rfc3339();
        milestone.achieved = true;
        milestone.achieved_date = Some(now.clone());
        let description = milestone.description.clone();

        quest.last_activity_at = now;

        store.save_quest_with_events(
            &quest,
            &[NewQuestEvent::new(HistoryEventType::MilestoneAchieved).with_note(description)],
        )?;

        debug!("Quest {} milestone {} achieved", quest.id, milestone_id);
        Ok(quest)
    }

    /// Append a reflection note to the quest's history. No status change.
    pub fn reflect(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
        note: String,
    ) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if quest.status == QuestStatus::Archived {
            return Err(QuestError::InvalidTransition(
                "cannot reflect on an archived quest".into(),
            ));
        }

        quest.last_activity_at = Utc::now().to_rfc3339();

        store.save_quest_with_events(
            &quest,
            &[NewQuestEvent::new(HistoryEventType::Reflected).with_note(note)],
        )?;

        Ok(quest)
    }

    /// Soft-retire a quest. Archived is terminal; no further transitions.
    pub fn archive(&self, store: &QuestStore, user_id: &UserId, quest_id: &QuestId) -> Result<Quest> {
        let mut quest = store.get_quest(user_id, quest_id)?;

        if quest.status == QuestStatus::Archived {
            return Err(QuestError::InvalidTransition("quest is already archived".into()));
        }

        quest.status = QuestStatus::Archived;
        quest.last_activity_at = Utc::now().to_rfc3339();

        store.save_quest_with_events(&quest, &[NewQuestEvent::new(HistoryEventType::Archived)])?;

        info!("Quest {} archived", quest.id);
        Ok(quest)
    }

    /// Explicit user-initiated hard removal of a quest and its history.
    pub fn delete(&self, store: &QuestStore, user_id: &UserId, quest_id: &QuestId) -> Result<()> {
        store.delete_quest(user_id, quest_id)
    }

    /// Audit log for a quest, oldest event first.
    pub fn history(
        &self,
        store: &QuestStore,
        user_id: &UserId,
        quest_id: &QuestId,
    ) -> Result<Vec<QuestHistory>> {
        // Ownership check before exposing the log
        store.get_quest(user_id, quest_id)?;
        store.quest_history(quest_id)
    }
}

fn validate_dimension(name: &str, value: u8) -> Result<()> {
    if !(1..=10).contains(&value) {
        return Err(QuestError::InvalidArgument(format!(
            "{} must be between 1 and 10, got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use questlog_schemas::{generate_user_id, QuestType};

    fn setup() -> (QuestStore, QuestLifecycle, UserId) {
        let store = QuestStore::open_in_memory().unwrap();
        (store, QuestLifecycle::new(), generate_user_id())
    }

    fn quest_input(title: &str) -> CreateQuestInput {
        CreateQuestInput {
            title: title.to_string(),
            description: None,
            quest_type: QuestType::Main,
            priority: 5,
            importance: 5,
            impact: 5,
            difficulty: None,
            category: None,
            parent_quest_id: None,
            quest_chain_id: None,
            related_goal_id: None,
            milestones: vec![],
            estimated_completion_date: None,
            source: None,
        }
    }

    #[test]
    fn test_create_quest_emits_created() {
        let (store, lifecycle, user) = setup();

        let mut input = quest_input("Learn guitar");
        input.milestones = vec!["Open chords".into(), "Barre chords".into()];
        let quest = lifecycle.create_quest(&store, &user, input).unwrap();

        assert_eq!(quest.status, QuestStatus::Active);
        assert_eq!(quest.progress_percentage, 0);
        assert_eq!(quest.milestones.len(), 2);
        assert!(!quest.milestones[0].achieved);

        let history = store.quest_history(&quest.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, HistoryEventType::Created);
    }

    #[test]
    fn test_create_quest_rejects_bad_dimensions() {
        let (store, lifecycle, user) = setup();

        let mut input = quest_input("Bad quest");
        input.priority = 11;
        assert!(matches!(
            lifecycle.create_quest(&store, &user, input),
            Err(QuestError::InvalidArgument(_))
        ));

        let mut input = quest_input("Bad quest");
        input.importance = 0;
        assert!(matches!(
            lifecycle.create_quest(&store, &user, input),
            Err(QuestError::InvalidArgument(_))
        ));

        assert!(matches!(
            lifecycle.create_quest(&store, &user, quest_input("   ")),
            Err(QuestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_quest_requires_existing_parent() {
        let (store, lifecycle, user) = setup();

        let mut input = quest_input("Orphan");
        input.parent_quest_id = Some(generate_quest_id());

        assert!(matches!(
            lifecycle.create_quest(&store, &user, input),
            Err(QuestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_start_then_resume_events() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Run a 10k"))
            .unwrap();

        let started = lifecycle.start(&store, &user, &quest.id).unwrap();
        assert!(started.started_at.is_some());

        lifecycle.pause(&store, &user, &quest.id, None).unwrap();
        let resumed = lifecycle.start(&store, &user, &quest.id).unwrap();
        assert_eq!(resumed.status, QuestStatus::Active);
        // started_at is stamped once
        assert_eq!(resumed.started_at, started.started_at);

        let events: Vec<_> = store
            .quest_history(&quest.id)
            .unwrap()
            .into_iter()
            .map(|h| h.event_type)
            .collect();
        assert_eq!(
            events,
            vec![
                HistoryEventType::Created,
                HistoryEventType::Started,
                HistoryEventType::Paused,
                HistoryEventType::Resumed,
            ]
        );
    }

    #[test]
    fn test_pause_guard() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Meditate daily"))
            .unwrap();

        let paused = lifecycle.pause(&store, &user, &quest.id, None).unwrap();
        assert_eq!(paused.status, QuestStatus::Paused);

        // Pausing a non-active quest is rejected and writes nothing
        let before = store.quest_history(&quest.id).unwrap().len();
        assert!(matches!(
            lifecycle.pause(&store, &user, &quest.id, None),
            Err(QuestError::InvalidTransition(_))
        ));
        assert_eq!(store.quest_history(&quest.id).unwrap().len(), before);

        let paused_events = store
            .quest_history(&quest.id)
            .unwrap()
            .into_iter()
            .filter(|h| h.event_type == HistoryEventType::Paused)
            .count();
        assert_eq!(paused_events, 1);
    }

    #[test]
    fn test_complete_sets_invariants() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Ship the app"))
            .unwrap();

        lifecycle
            .update_progress(&store, &user, &quest.id, 60)
            .unwrap();
        let completed = lifecycle
            .complete(&store, &user, &quest.id, Some("Shipped v1".into()))
            .unwrap();

        assert_eq!(completed.status, QuestStatus::Completed);
        assert_eq!(completed.progress_percentage, 100);
        assert!(completed.completed_at.is_some());
        assert!(completed.abandoned_at.is_none());

        let history = store.quest_history(&quest.id).unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.event_type, HistoryEventType::Completed);
        assert_eq!(last.progress_before, Some(60));
        assert_eq!(last.progress_after, Some(100));
        assert_eq!(last.note.as_deref(), Some("Shipped v1"));
    }

    #[test]
    fn test_complete_is_idempotent() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Finish thesis"))
            .unwrap();

        let first = lifecycle.complete(&store, &user, &quest.id, None).unwrap();
        let second = lifecycle.complete(&store, &user, &quest.id, None).unwrap();

        assert_eq!(second.status, QuestStatus::Completed);
        assert_eq!(second.progress_percentage, 100);
        assert!(second.completed_at.is_some());
        assert!(second.abandoned_at.is_none());
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn test_abandon_keeps_progress() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Learn to juggle"))
            .unwrap();

        lifecycle
            .update_progress(&store, &user, &quest.id, 35)
            .unwrap();
        let abandoned = lifecycle
            .abandon(&store, &user, &quest.id, Some("lost interest".into()))
            .unwrap();

        assert_eq!(abandoned.status, QuestStatus::Abandoned);
        assert_eq!(abandoned.progress_percentage, 35);
        assert!(abandoned.abandoned_at.is_some());
        assert!(abandoned.completed_at.is_none());

        // Completed and abandoned are mutually exclusive endpoints
        assert!(matches!(
            lifecycle.complete(&store, &user, &quest.id, None),
            Err(QuestError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_update_progress_rejects_out_of_range() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Paint the fence"))
            .unwrap();

        let events_before = store.quest_history(&quest.id).unwrap().len();
        assert!(matches!(
            lifecycle.update_progress(&store, &user, &quest.id, 150),
            Err(QuestError::InvalidArgument(_))
        ));

        let unchanged = store.get_quest(&user, &quest.id).unwrap();
        assert_eq!(unchanged.progress_percentage, 0);
        assert_eq!(store.quest_history(&quest.id).unwrap().len(), events_before);
    }

    #[test]
    fn test_update_progress_to_100_completes() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Read War and Peace"))
            .unwrap();

        let done = lifecycle
            .update_progress(&store, &user, &quest.id, 100)
            .unwrap();

        assert_eq!(done.status, QuestStatus::Completed);
        assert!(done.completed_at.is_some());

        let events: Vec<_> = store
            .quest_history(&quest.id)
            .unwrap()
            .into_iter()
            .map(|h| h.event_type)
            .collect();
        assert_eq!(
            events,
            vec![
                HistoryEventType::Created,
                HistoryEventType::ProgressUpdate,
                HistoryEventType::Completed,
            ]
        );
    }

    #[test]
    fn test_achieve_milestone() {
        let (store, lifecycle, user) = setup();

        let mut input = quest_input("Get fit");
        input.milestones = vec!["First gym session".into()];
        let quest = lifecycle.create_quest(&store, &user, input).unwrap();
        let milestone_id = quest.milestones[0].id.clone();

        let updated = lifecycle
            .achieve_milestone(&store, &user, &quest.id, &milestone_id)
            .unwrap();
        assert!(updated.milestones[0].achieved);
        assert!(updated.milestones[0].achieved_date.is_some());

        // Re-achieving is a no-op: no second milestone event
        lifecycle
            .achieve_milestone(&store, &user, &quest.id, &milestone_id)
            .unwrap();
        let milestone_events = store
            .quest_history(&quest.id)
            .unwrap()
            .into_iter()
            .filter(|h| h.event_type == HistoryEventType::MilestoneAchieved)
            .count();
        assert_eq!(milestone_events, 1);

        // Unknown milestone id
        assert!(matches!(
            lifecycle.achieve_milestone(&store, &user, &quest.id, &generate_milestone_id()),
            Err(QuestError::NotFound)
        ));
    }

    #[test]
    fn test_archive_is_terminal() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Old ambition"))
            .unwrap();

        let archived = lifecycle.archive(&store, &user, &quest.id).unwrap();
        assert_eq!(archived.status, QuestStatus::Archived);

        assert!(matches!(
            lifecycle.start(&store, &user, &quest.id),
            Err(QuestError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.complete(&store, &user, &quest.id, None),
            Err(QuestError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.update_progress(&store, &user, &quest.id, 10),
            Err(QuestError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.archive(&store, &user, &quest.id),
            Err(QuestError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_not_found_for_wrong_owner() {
        let (store, lifecycle, user) = setup();
        let quest = lifecycle
            .create_quest(&store, &user, quest_input("Mine alone"))
            .unwrap();

        let stranger = generate_user_id();
        assert!(matches!(
            lifecycle.start(&store, &stranger, &quest.id),
            Err(QuestError::NotFound)
        ));
    }

    #[test]
    fn test_quest_score_formula() {
        let (store, lifecycle, user) = setup();

        let mut input = quest_input("Scored quest");
        input.priority = 8;
        input.importance = 6;
        input.impact = 7;
        input.difficulty = Some(5);
        let quest = lifecycle.create_quest(&store, &user, input).unwrap();

        assert!((quest_score(&quest) - 4.73).abs() < 1e-9);

        // Difficulty defaults to 5 when absent
        let mut input = quest_input("Unsized quest");
        input.priority = 8;
        input.importance = 6;
        input.impact = 7;
        let quest = lifecycle.create_quest(&store, &user, input).unwrap();
        assert!((quest_score(&quest) - 4.73).abs() < 1e-9);
    }
}
