use chrono::{DateTime, Duration, Utc};
use questlog_schemas::{Quest, QuestStatus, QuestType, UserId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;
use crate::lifecycle::quest_score;
use crate::store::QuestStore;

const TIMELINE_DAYS: i64 = 30;

/// Ranked quest views. Assembled from live quests on every read, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QuestBoard {
    pub main: Vec<Quest>,
    pub side: Vec<Quest>,
    pub daily: Vec<Quest>,
    pub completed: Vec<Quest>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityDay {
    pub date: String, // YYYY-MM-DD
    pub created: usize,
    pub completed: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestAnalytics {
    pub total_quests: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub completion_rate: f64,
    pub average_priority: f64,
    pub average_importance: f64,
    pub average_impact: f64,
    pub average_completion_hours: Option<f64>,
    pub activity_timeline: Vec<ActivityDay>,
}

/// Assembles score-ranked boards and aggregate analytics from a quest
/// snapshot.
pub struct BoardAssembler;

impl Default for BoardAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Fetch one snapshot and assemble the four board views
    pub fn board_for(&self, store: &QuestStore, user_id: &UserId) -> Result<QuestBoard> {
        let quests = store.list_quests(user_id)?;
        let board = self.assemble(&quests);

        debug!(
            "Assembled board for user {}: {} main, {} side, {} daily, {} completed",
            user_id,
            board.main.len(),
            board.side.len(),
            board.daily.len(),
            board.completed.len()
        );
        Ok(board)
    }

    pub fn assemble(&self, quests: &[Quest]) -> QuestBoard {
        let open = |quest: &&Quest| {
            !matches!(quest.status, QuestStatus::Completed | QuestStatus::Archived)
        };

        let mut main: Vec<Quest> = quests
            .iter()
            .filter(|q| q.quest_type == QuestType::Main)
            .filter(open)
            .cloned()
            .collect();
        main.sort_by(compare_score_desc);

        let mut side: Vec<Quest> = quests
            .iter()
            .filter(|q| q.quest_type == QuestType::Side)
            .filter(open)
            .cloned()
            .collect();
        side.sort_by(compare_side);

        let mut daily: Vec<Quest> = quests
            .iter()
            .filter(|q| q.quest_type == QuestType::Daily)
            .filter(open)
            .cloned()
            .collect();
        daily.sort_by(compare_daily);

        let mut completed: Vec<Quest> = quests
            .iter()
            .filter(|q| q.status == QuestStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(compare_completed_desc);

        QuestBoard {
            main,
            side,
            daily,
            completed,
            total_count: quests.len(),
        }
    }

    /// Fetch one snapshot and compute analytics against the current clock
    pub fn analytics_for(&self, store: &QuestStore, user_id: &UserId) -> Result<QuestAnalytics> {
        let quests = store.list_quests(user_id)?;
        Ok(self.analytics(&quests, Utc::now()))
    }

    /// Aggregate analytics over a quest snapshot. `now` anchors the 30-day
    /// activity timeline so the computation is testable with a fixed clock.
    pub fn analytics(&self, quests: &[Quest], now: DateTime<Utc>) -> QuestAnalytics {
        let total = quests.len();

        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for quest in quests {
            *by_type.entry(quest.quest_type.as_str().to_string()).or_default() += 1;
            *by_status.entry(quest.status.as_str().to_string()).or_default() += 1;
        }

        let completed_count = quests
            .iter()
            .filter(|q| q.status == QuestStatus::Completed)
            .count();
        let completion_rate = if total > 0 {
            round2(completed_count as f64 / total as f64)
        } else {
            0.0
        };

        let average = |field: fn(&Quest) -> u8| {
            if total > 0 {
                round2(quests.iter().map(|q| field(q) as f64).sum::<f64>() / total as f64)
            } else {
                0.0
            }
        };
        let average_priority = average(|q| q.priority);
        let average_importance = average(|q| q.importance);
        let average_impact = average(|q| q.impact);

        let durations: Vec<f64> = quests
            .iter()
            .filter_map(|q| {
                let started = parse_rfc3339(q.started_at.as_deref()?)?;
                let completed = parse_rfc3339(q.completed_at.as_deref()?)?;
                Some((completed - started).num_seconds() as f64 / 3600.0)
            })
            .collect();
        let average_completion_hours = if durations.is_empty() {
            None
        } else {
            Some(round2(durations.iter().sum::<f64>() / durations.len() as f64))
        };

        QuestAnalytics {
            total_quests: total,
            by_type,
            by_status,
            completion_rate,
            average_priority,
            average_importance,
            average_impact,
            average_completion_hours,
            activity_timeline: activity_timeline(quests, now),
        }
    }
}

/// Daily created/completed/abandoned counts over the trailing window,
/// oldest day first, bucketed by exact calendar date
fn activity_timeline(quests: &[Quest], now: DateTime<Utc>) -> Vec<ActivityDay> {
    let date_of = |timestamp: Option<&str>| {
        timestamp
            .and_then(parse_rfc3339)
            .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
    };

    let stamps: Vec<(Option<String>, Option<String>, Option<String>)> = quests
        .iter()
        .map(|q| {
            (
                date_of(Some(q.created_at.as_str())),
                date_of(q.completed_at.as_deref()),
                date_of(q.abandoned_at.as_deref()),
            )
        })
        .collect();

    (0..TIMELINE_DAYS)
        .rev()
        .map(|offset| {
            let day = (now - Duration::days(offset))
                .date_naive()
                .format("%Y-%m-%d")
                .to_string();

            let count = |pick: fn(&(Option<String>, Option<String>, Option<String>)) -> &Option<String>| {
                stamps
                    .iter()
                    .filter(|stamp| pick(stamp).as_deref() == Some(day.as_str()))
                    .count()
            };

            ActivityDay {
                created: count(|s| &s.0),
                completed: count(|s| &s.1),
                abandoned: count(|s| &s.2),
                date: day,
            }
        })
        .collect()
}

fn compare_score_desc(a: &Quest, b: &Quest) -> Ordering {
    quest_score(b)
        .partial_cmp(&quest_score(a))
        .unwrap_or(Ordering::Equal)
}

/// Side quests group by category (lexicographic, uncategorized last), then
/// rank by score
fn compare_side(a: &Quest, b: &Quest) -> Ordering {
    let category = |q: &Quest| {
        q.category
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    };

    match (category(a), category(b)) {
        (Some(ca), Some(cb)) => ca.cmp(&cb).then_with(|| compare_score_desc(a, b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => compare_score_desc(a, b),
    }
}

/// Daily quests run soonest-due first; undated quests sink to the bottom
fn compare_daily(a: &Quest, b: &Quest) -> Ordering {
    match (&a.estimated_completion_date, &b.estimated_completion_date) {
        (Some(da), Some(db)) => da.cmp(db),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_completed_desc(a: &Quest, b: &Quest) -> Ordering {
    match (&a.completed_at, &b.completed_at) {
        (Some(ca), Some(cb)) => cb.cmp(ca),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use questlog_schemas::{generate_quest_id, generate_user_id, QuestSource};

    fn quest(title: &str, quest_type: QuestType) -> Quest {
        let now = Utc::now().to_rfc3339();
        Quest {
            id: generate_quest_id(),
            user_id: generate_user_id(),
            title: title.to_string(),
            description: None,
            quest_type,
            priority: 5,
            importance: 5,
            impact: 5,
            difficulty: None,
            status: QuestStatus::Active,
            progress_percentage: 0,
            category: None,
            parent_quest_id: None,
            quest_chain_id: None,
            related_goal_id: None,
            milestones: vec![],
            started_at: None,
            completed_at: None,
            abandoned_at: None,
            estimated_completion_date: None,
            actual_completion_date: None,
            last_activity_at: now.clone(),
            created_at: now,
            source: QuestSource::Manual,
        }
    }

    #[test]
    fn test_main_board_ranked_by_score() {
        let mut low = quest("Low", QuestType::Main);
        low.priority = 2;
        low.importance = 2;
        low.impact = 2;
        let mut high = quest("High", QuestType::Main);
        high.priority = 9;
        high.importance = 9;
        high.impact = 9;

        let board = BoardAssembler::new().assemble(&[low, high]);

        assert_eq!(board.main.len(), 2);
        assert_eq!(board.main[0].title, "High");
        assert_eq!(board.main[1].title, "Low");
    }

    #[test]
    fn test_main_board_excludes_completed_and_archived() {
        let active = quest("Open", QuestType::Main);
        let mut done = quest("Done", QuestType::Main);
        done.status = QuestStatus::Completed;
        done.progress_percentage = 100;
        done.completed_at = Some(Utc::now().to_rfc3339());
        let mut shelved = quest("Shelved", QuestType::Main);
        shelved.status = QuestStatus::Archived;

        let board = BoardAssembler::new().assemble(&[active, done.clone(), shelved]);

        assert_eq!(board.main.len(), 1);
        assert_eq!(board.main[0].title, "Open");
        assert_eq!(board.completed.len(), 1);
        assert_eq!(board.completed[0].id, done.id);
        assert_eq!(board.total_count, 3);
    }

    #[test]
    fn test_side_board_category_ordering() {
        let mut art = quest("Sketch daily", QuestType::Side);
        art.category = Some("art".to_string());
        let mut music = quest("Practice piano", QuestType::Side);
        music.category = Some("music".to_string());
        let uncategorized = quest("Tidy garage", QuestType::Side);

        let board = BoardAssembler::new().assemble(&[uncategorized, music, art]);

        let titles: Vec<&str> = board.side.iter().map(|q| q.title.as_str()).collect();
        assert_eq!(titles, vec!["Sketch daily", "Practice piano", "Tidy garage"]);
    }

    #[test]
    fn test_daily_board_due_date_ordering() {
        let mut later = quest("Water plants", QuestType::Daily);
        later.estimated_completion_date = Some("2025-12-10T00:00:00Z".to_string());
        let mut sooner = quest("Morning run", QuestType::Daily);
        sooner.estimated_completion_date = Some("2025-12-01T00:00:00Z".to_string());
        let undated = quest("Stretch", QuestType::Daily);

        let board = BoardAssembler::new().assemble(&[undated, later, sooner]);

        let titles: Vec<&str> = board.daily.iter().map(|q| q.title.as_str()).collect();
        assert_eq!(titles, vec!["Morning run", "Water plants", "Stretch"]);
    }

    #[test]
    fn test_completed_board_newest_first() {
        let mut older = quest("Older win", QuestType::Main);
        older.status = QuestStatus::Completed;
        older.completed_at = Some("2025-10-01T10:00:00Z".to_string());
        let mut newer = quest("Newer win", QuestType::Side);
        newer.status = QuestStatus::Completed;
        newer.completed_at = Some("2025-11-01T10:00:00Z".to_string());

        let board = BoardAssembler::new().assemble(&[older, newer]);

        assert_eq!(board.completed[0].title, "Newer win");
        assert_eq!(board.completed[1].title, "Older win");
    }

    #[test]
    fn test_analytics_counts_and_rates() {
        let mut done = quest("Done", QuestType::Main);
        done.status = QuestStatus::Completed;
        done.started_at = Some("2025-11-01T00:00:00Z".to_string());
        done.completed_at = Some("2025-11-01T12:00:00Z".to_string());
        let open = quest("Open", QuestType::Side);

        let analytics =
            BoardAssembler::new().analytics(&[done, open], Utc::now());

        assert_eq!(analytics.total_quests, 2);
        assert_eq!(analytics.by_type.get("main"), Some(&1));
        assert_eq!(analytics.by_type.get("side"), Some(&1));
        assert_eq!(analytics.by_status.get("completed"), Some(&1));
        assert!((analytics.completion_rate - 0.5).abs() < 1e-9);
        assert_eq!(analytics.average_completion_hours, Some(12.0));
    }

    #[test]
    fn test_analytics_empty_set() {
        let analytics = BoardAssembler::new().analytics(&[], Utc::now());

        assert_eq!(analytics.total_quests, 0);
        assert!((analytics.completion_rate).abs() < 1e-9);
        assert!(analytics.average_completion_hours.is_none());
        assert_eq!(analytics.activity_timeline.len(), 30);
    }

    #[test]
    fn test_activity_timeline_buckets() {
        let now = DateTime::parse_from_rfc3339("2025-11-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut created_today = quest("Fresh", QuestType::Main);
        created_today.created_at = "2025-11-15T08:00:00Z".to_string();
        let mut finished_yesterday = quest("Wrapped", QuestType::Main);
        finished_yesterday.created_at = "2025-11-01T08:00:00Z".to_string();
        finished_yesterday.status = QuestStatus::Completed;
        finished_yesterday.completed_at = Some("2025-11-14T20:00:00Z".to_string());
        let mut dropped_long_ago = quest("Forgotten", QuestType::Side);
        dropped_long_ago.created_at = "2025-01-01T08:00:00Z".to_string();
        dropped_long_ago.abandoned_at = Some("2025-02-01T08:00:00Z".to_string());

        let analytics = BoardAssembler::new().analytics(
            &[created_today, finished_yesterday, dropped_long_ago],
            now,
        );

        let timeline = &analytics.activity_timeline;
        assert_eq!(timeline.len(), 30);
        // Oldest day first, today last
        assert_eq!(timeline.last().unwrap().date, "2025-11-15");
        assert_eq!(timeline.last().unwrap().created, 1);

        let yesterday = timeline.iter().find(|d| d.date == "2025-11-14").unwrap();
        assert_eq!(yesterday.completed, 1);
        assert_eq!(yesterday.created, 0);

        // Events outside the window are not bucketed
        let total_abandoned: usize = timeline.iter().map(|d| d.abandoned).sum();
        assert_eq!(total_abandoned, 0);
    }
}
