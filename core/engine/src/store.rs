use chrono::Utc;
use questlog_schemas::{
    ChainId, HistoryEventType, Milestone, Quest, QuestHistory, QuestId, QuestSource, QuestStatus,
    QuestType, UserId,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{QuestError, Result};

const QUEST_COLUMNS: &str = "id, user_id, title, description, quest_type, priority, importance, \
     impact, difficulty, status, progress_percentage, category, parent_quest_id, quest_chain_id, \
     related_goal_id, milestones, started_at, completed_at, abandoned_at, \
     estimated_completion_date, actual_completion_date, last_activity_at, created_at, source";

/// A history event about to be appended alongside a quest write.
#[derive(Debug, Clone)]
pub struct NewQuestEvent {
    pub event_type: HistoryEventType,
    pub progress_before: Option<u8>,
    pub progress_after: Option<u8>,
    pub note: Option<String>,
}

impl NewQuestEvent {
    pub fn new(event_type: HistoryEventType) -> Self {
        Self {
            event_type,
            progress_before: None,
            progress_after: None,
            note: None,
        }
    }

    pub fn with_progress(mut self, before: u8, after: u8) -> Self {
        self.progress_before = Some(before);
        self.progress_after = Some(after);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

pub struct QuestStore {
    conn: Connection,
}

impl QuestStore {
    /// Initialize the store with its schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Quest store initialized");
        Ok(store)
    }

    /// In-memory store, used by tests and throwaway tooling
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        // Quests table (canonical records, upserted by the lifecycle manager)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS quests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                quest_type TEXT NOT NULL,
                priority INTEGER NOT NULL,
                importance INTEGER NOT NULL,
                impact INTEGER NOT NULL,
                difficulty INTEGER,
                status TEXT NOT NULL,
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                category TEXT,
                parent_quest_id TEXT,
                quest_chain_id TEXT,
                related_goal_id TEXT,
                milestones TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                abandoned_at TEXT,
                estimated_completion_date TEXT,
                actual_completion_date TEXT,
                last_activity_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                source TEXT NOT NULL
            )",
            [],
        )?;

        // Quest history table (append-only audit log)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS quest_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                quest_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                progress_before INTEGER,
                progress_after INTEGER,
                note TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (quest_id) REFERENCES quests(id)
            )",
            [],
        )?;

        // Indexes for performance
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_quests_user ON quests(user_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_quests_user_status ON quests(user_id, status)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_quests_parent ON quests(parent_quest_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_quests_chain ON quests(quest_chain_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_quest ON quest_history(quest_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_created ON quest_history(created_at DESC)",
            [],
        )?;

        debug!("Quest store schema initialized");
        Ok(())
    }

    fn row_to_quest(&self, row: &Row) -> rusqlite::Result<Quest> {
        let milestones_json: String = row.get(15)?;
        let milestones: Vec<Milestone> =
            serde_json::from_str(&milestones_json).map_err(json_error)?;

        let quest_type_raw: String = row.get(4)?;
        let status_raw: String = row.get(9)?;
        let source_raw: String = row.get(23)?;

        Ok(Quest {
            id: QuestId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            title: row.get(2)?,
            description: row.get(3)?,
            quest_type: parse_quest_type(&quest_type_raw),
            priority: row.get::<_, i64>(5)? as u8,
            importance: row.get::<_, i64>(6)? as u8,
            impact: row.get::<_, i64>(7)? as u8,
            difficulty: row.get::<_, Option<i64>>(8)?.map(|d| d as u8),
            status: parse_status(&status_raw),
            progress_percentage: row.get::<_, i64>(10)? as u8,
            category: row.get(11)?,
            parent_quest_id: row.get::<_, Option<String>>(12)?.map(QuestId),
            quest_chain_id: row.get::<_, Option<String>>(13)?.map(ChainId),
            related_goal_id: row.get(14)?,
            milestones,
            started_at: row.get(16)?,
            completed_at: row.get(17)?,
            abandoned_at: row.get(18)?,
            estimated_completion_date: row.get(19)?,
            actual_completion_date: row.get(20)?,
            last_activity_at: row.get(21)?,
            created_at: row.get(22)?,
            source: parse_source(&source_raw),
        })
    }

    fn row_to_history(&self, row: &Row) -> rusqlite::Result<QuestHistory> {
        let event_raw: String = row.get(2)?;

        Ok(QuestHistory {
            id: row.get(0)?,
            quest_id: QuestId(row.get(1)?),
            event_type: parse_event_type(&event_raw),
            progress_before: row.get::<_, Option<i64>>(3)?.map(|p| p as u8),
            progress_after: row.get::<_, Option<i64>>(4)?.map(|p| p as u8),
            note: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn upsert_quest_inner(conn: &Connection, quest: &Quest) -> Result<()> {
        let milestones_json = serde_json::to_string(&quest.milestones).map_err(json_error)?;

        conn.execute(
            "INSERT INTO quests (id, user_id, title, description, quest_type, priority,
                                importance, impact, difficulty, status, progress_percentage,
                                category, parent_quest_id, quest_chain_id, related_goal_id,
                                milestones, started_at, completed_at, abandoned_at,
                                estimated_completion_date, actual_completion_date,
                                last_activity_at, created_at, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                quest_type = excluded.quest_type,
                priority = excluded.priority,
                importance = excluded.importance,
                impact = excluded.impact,
                difficulty = excluded.difficulty,
                status = excluded.status,
                progress_percentage = excluded.progress_percentage,
                category = excluded.category,
                parent_quest_id = excluded.parent_quest_id,
                quest_chain_id = excluded.quest_chain_id,
                related_goal_id = excluded.related_goal_id,
                milestones = excluded.milestones,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                abandoned_at = excluded.abandoned_at,
                estimated_completion_date = excluded.estimated_completion_date,
                actual_completion_date = excluded.actual_completion_date,
                last_activity_at = excluded.last_activity_at,
                source = excluded.source",
            params![
                quest.id.0,
                quest.user_id.0,
                quest.title,
                quest.description,
                quest.quest_type.as_str(),
                quest.priority as i64,
                quest.importance as i64,
                quest.impact as i64,
                quest.difficulty.map(|d| d as i64),
                quest.status.as_str(),
                quest.progress_percentage as i64,
                quest.category,
                quest.parent_quest_id.as_ref().map(|p| p.0.as_str()),
                quest.quest_chain_id.as_ref().map(|c| c.0.as_str()),
                quest.related_goal_id,
                milestones_json,
                quest.started_at,
                quest.completed_at,
                quest.abandoned_at,
                quest.estimated_completion_date,
                quest.actual_completion_date,
                quest.last_activity_at,
                quest.created_at,
                quest.source.as_str(),
            ],
        )?;

        Ok(())
    }

    fn insert_event_inner(
        conn: &Connection,
        quest_id: &QuestId,
        event: &NewQuestEvent,
        created_at: &str,
    ) -> Result<QuestHistory> {
        conn.execute(
            "INSERT INTO quest_history (quest_id, event_type, progress_before, progress_after,
                                        note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                quest_id.0,
                event.event_type.as_str(),
                event.progress_before.map(|p| p as i64),
                event.progress_after.map(|p| p as i64),
                event.note,
                created_at,
            ],
        )?;

        Ok(QuestHistory {
            id: conn.last_insert_rowid(),
            quest_id: quest_id.clone(),
            event_type: event.event_type,
            progress_before: event.progress_before,
            progress_after: event.progress_after,
            note: event.note.clone(),
            created_at: created_at.to_string(),
        })
    }

    /// Write a quest row and its derived history events in one transaction.
    /// Either both land or neither does - no partial state is observable.
    pub fn save_quest_with_events(
        &self,
        quest: &Quest,
        events: &[NewQuestEvent],
    ) -> Result<Vec<QuestHistory>> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        Self::upsert_quest_inner(&tx, quest)?;

        let mut written = Vec::with_capacity(events.len());
        for event in events {
            written.push(Self::insert_event_inner(&tx, &quest.id, event, &now)?);
        }

        tx.commit()?;

        debug!(
            "Saved quest {} with {} history event(s)",
            quest.id,
            written.len()
        );
        Ok(written)
    }

    /// Get a quest by id, scoped to its owner
    pub fn find_quest(&self, user_id: &UserId, quest_id: &QuestId) -> Result<Option<Quest>> {
        let query = format!(
            "SELECT {} FROM quests WHERE id = ?1 AND user_id = ?2",
            QUEST_COLUMNS
        );

        let quest = self
            .conn
            .query_row(&query, params![quest_id.0, user_id.0], |row| {
                self.row_to_quest(row)
            })
            .optional()?;

        Ok(quest)
    }

    /// Get a quest by id, failing with NotFound if it doesn't resolve for this owner
    pub fn get_quest(&self, user_id: &UserId, quest_id: &QuestId) -> Result<Quest> {
        self.find_quest(user_id, quest_id)?.ok_or(QuestError::NotFound)
    }

    /// All quests for a user, oldest first (stable iteration order for
    /// reconciliation and chain building)
    pub fn list_quests(&self, user_id: &UserId) -> Result<Vec<Quest>> {
        let query = format!(
            "SELECT {} FROM quests WHERE user_id = ?1 ORDER BY created_at, id",
            QUEST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;

        let quests = stmt
            .query_map(params![user_id.0], |row| self.row_to_quest(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(quests)
    }

    /// Quests for a user filtered by status, oldest first
    pub fn list_quests_by_status(
        &self,
        user_id: &UserId,
        status: QuestStatus,
    ) -> Result<Vec<Quest>> {
        let query = format!(
            "SELECT {} FROM quests WHERE user_id = ?1 AND status = ?2 ORDER BY created_at, id",
            QUEST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;

        let quests = stmt
            .query_map(params![user_id.0, status.as_str()], |row| {
                self.row_to_quest(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(quests)
    }

    /// Full history for a quest, in append order
    pub fn quest_history(&self, quest_id: &QuestId) -> Result<Vec<QuestHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, quest_id, event_type, progress_before, progress_after, note, created_at
             FROM quest_history
             WHERE quest_id = ?1
             ORDER BY id",
        )?;

        let events = stmt
            .query_map(params![quest_id.0], |row| self.row_to_history(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Walk parent links upward from `start`; true if `candidate` appears in
    /// the ancestor chain (including `start` itself). Used to reject
    /// parent assignments that would turn the tree into a graph.
    pub fn is_in_ancestry(
        &self,
        user_id: &UserId,
        candidate: &QuestId,
        start: &QuestId,
    ) -> Result<bool> {
        let mut cursor = Some(start.clone());
        // Hop bound guards against pre-existing bad data looping forever
        let mut hops = 0usize;

        while let Some(current) = cursor {
            if current == *candidate {
                return Ok(true);
            }
            hops += 1;
            if hops > 1000 {
                return Ok(true);
            }

            cursor = self
                .conn
                .query_row(
                    "SELECT parent_quest_id FROM quests WHERE id = ?1 AND user_id = ?2",
                    params![current.0, user_id.0],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten()
                .map(QuestId);
        }

        Ok(false)
    }

    /// Hard-delete a quest and its history. Explicit user action only;
    /// normal retirement goes through `archived`.
    pub fn delete_quest(&self, user_id: &UserId, quest_id: &QuestId) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM quest_history WHERE quest_id = ?1",
            params![quest_id.0],
        )?;
        let deleted = tx.execute(
            "DELETE FROM quests WHERE id = ?1 AND user_id = ?2",
            params![quest_id.0, user_id.0],
        )?;

        if deleted == 0 {
            return Err(QuestError::NotFound);
        }

        tx.commit()?;

        info!("Deleted quest {} and its history", quest_id);
        Ok(())
    }

    /// Count quests for a user
    pub fn count_quests(&self, user_id: &UserId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quests WHERE user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Count history events across all of a user's quests
    pub fn count_history(&self, user_id: &UserId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quest_history h
             JOIN quests q ON h.quest_id = q.id
             WHERE q.user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn parse_quest_type(raw: &str) -> QuestType {
    match raw.to_lowercase().as_str() {
        "main" => QuestType::Main,
        "side" => QuestType::Side,
        "daily" => QuestType::Daily,
        "achievement" => QuestType::Achievement,
        other => {
            debug!("Unknown quest type '{}', defaulting to Side", other);
            QuestType::Side
        }
    }
}

fn parse_status(raw: &str) -> QuestStatus {
    match raw.to_lowercase().as_str() {
        "active" => QuestStatus::Active,
        "paused" => QuestStatus::Paused,
        "completed" => QuestStatus::Completed,
        "abandoned" => QuestStatus::Abandoned,
        "archived" => QuestStatus::Archived,
        other => {
            debug!("Unknown quest status '{}', defaulting to Active", other);
            QuestStatus::Active
        }
    }
}

fn parse_source(raw: &str) -> QuestSource {
    match raw.to_lowercase().as_str() {
        "manual" => QuestSource::Manual,
        "extracted" => QuestSource::Extracted,
        "suggested" => QuestSource::Suggested,
        "imported" => QuestSource::Imported,
        other => {
            debug!("Unknown quest source '{}', defaulting to Manual", other);
            QuestSource::Manual
        }
    }
}

fn parse_event_type(raw: &str) -> HistoryEventType {
    match raw.to_lowercase().as_str() {
        "created" => HistoryEventType::Created,
        "started" => HistoryEventType::Started,
        "resumed" => HistoryEventType::Resumed,
        "progress_update" => HistoryEventType::ProgressUpdate,
        "milestone_achieved" => HistoryEventType::MilestoneAchieved,
        "paused" => HistoryEventType::Paused,
        "completed" => HistoryEventType::Completed,
        "abandoned" => HistoryEventType::Abandoned,
        "reflected" => HistoryEventType::Reflected,
        "archived" => HistoryEventType::Archived,
        other => {
            debug!("Unknown history event type '{}', defaulting to Reflected", other);
            HistoryEventType::Reflected
        }
    }
}
