use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MilestoneId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl fmt::Display for QuestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Quest Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestType {
    #[serde(rename = "main")]
    Main,
    #[serde(rename = "side")]
    Side,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "achievement")]
    Achievement,
}

impl QuestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestType::Main => "main",
            QuestType::Side => "side",
            QuestType::Daily => "daily",
            QuestType::Achievement => "achievement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "abandoned")]
    Abandoned,
    #[serde(rename = "archived")]
    Archived,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "active",
            QuestStatus::Paused => "paused",
            QuestStatus::Completed => "completed",
            QuestStatus::Abandoned => "abandoned",
            QuestStatus::Archived => "archived",
        }
    }

    /// Terminal for automatic processing; completed/abandoned stay user-editable
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuestStatus::Completed | QuestStatus::Abandoned | QuestStatus::Archived
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestSource {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "extracted")]
    Extracted,
    #[serde(rename = "suggested")]
    Suggested,
    #[serde(rename = "imported")]
    Imported,
}

impl QuestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestSource::Manual => "manual",
            QuestSource::Extracted => "extracted",
            QuestSource::Suggested => "suggested",
            QuestSource::Imported => "imported",
        }
    }
}

// ============================================================================
// Quest Schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub description: String,
    pub achieved: bool,
    pub achieved_date: Option<String>, // RFC3339
    pub target_date: Option<String>,   // RFC3339
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: QuestId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub quest_type: QuestType,
    pub priority: u8,           // 1-10
    pub importance: u8,         // 1-10
    pub impact: u8,             // 1-10
    pub difficulty: Option<u8>, // 1-10, treated as 5 when absent
    pub status: QuestStatus,
    pub progress_percentage: u8, // 0-100
    pub category: Option<String>,
    pub parent_quest_id: Option<QuestId>,
    pub quest_chain_id: Option<ChainId>,
    pub related_goal_id: Option<String>,
    pub milestones: Vec<Milestone>,
    pub started_at: Option<String>,                // RFC3339
    pub completed_at: Option<String>,              // RFC3339
    pub abandoned_at: Option<String>,              // RFC3339
    pub estimated_completion_date: Option<String>, // RFC3339
    pub actual_completion_date: Option<String>,    // RFC3339
    pub last_activity_at: String,                  // RFC3339
    pub created_at: String,                        // RFC3339
    pub source: QuestSource,
}

// ============================================================================
// Quest History Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEventType {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "resumed")]
    Resumed,
    #[serde(rename = "progress_update")]
    ProgressUpdate,
    #[serde(rename = "milestone_achieved")]
    MilestoneAchieved,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "abandoned")]
    Abandoned,
    #[serde(rename = "reflected")]
    Reflected,
    #[serde(rename = "archived")]
    Archived,
}

impl HistoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEventType::Created => "created",
            HistoryEventType::Started => "started",
            HistoryEventType::Resumed => "resumed",
            HistoryEventType::ProgressUpdate => "progress_update",
            HistoryEventType::MilestoneAchieved => "milestone_achieved",
            HistoryEventType::Paused => "paused",
            HistoryEventType::Completed => "completed",
            HistoryEventType::Abandoned => "abandoned",
            HistoryEventType::Reflected => "reflected",
            HistoryEventType::Archived => "archived",
        }
    }
}

/// Append-only audit event. Never mutated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestHistory {
    pub id: i64,
    pub quest_id: QuestId,
    pub event_type: HistoryEventType,
    pub progress_before: Option<u8>,
    pub progress_after: Option<u8>,
    pub note: Option<String>,
    pub created_at: String, // RFC3339
}

// ============================================================================
// Quest Chain Schema (derived, recomputed on demand)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyType {
    #[serde(rename = "blocks")]
    Blocks,
    #[serde(rename = "recommends")]
    Recommends,
    #[serde(rename = "enables")]
    Enables,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Blocks => "blocks",
            DependencyType::Recommends => "recommends",
            DependencyType::Enables => "enables",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDependency {
    pub quest: QuestId,
    pub depends_on: QuestId,
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchingPoint {
    pub quest: QuestId,
    pub branches: Vec<QuestId>,
}

/// Unlocking relationship: a completed quest and the quests it enables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    pub quest: QuestId,
    pub unlocks: Vec<QuestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestChain {
    pub id: ChainId,
    pub name: String,
    pub description: String,
    pub members: Vec<QuestId>,
    pub dependencies: Vec<ChainDependency>,
    pub branching_points: Vec<BranchingPoint>,
    pub consequences: Vec<Consequence>,
    pub storyline_progress: f64, // 0-100
    pub epic_completion: bool,
}

// ============================================================================
// Extracted Signals (untrusted input from the conversation extractor)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSignal {
    pub quest_title: String,
    pub progress: u8, // 0-100, clamped at the boundary
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonSignal {
    pub quest_title: String,
    pub reason: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseSignal {
    pub quest_title: String,
    pub reason: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifeChangeSignals {
    #[serde(default)]
    pub abandon: Vec<AbandonSignal>,
    #[serde(default)]
    pub pause: Vec<PauseSignal>,
}

// ============================================================================
// API Input Types
// ============================================================================

fn default_dimension() -> u8 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quest_type: QuestType,
    #[serde(default = "default_dimension")]
    pub priority: u8,
    #[serde(default = "default_dimension")]
    pub importance: u8,
    #[serde(default = "default_dimension")]
    pub impact: u8,
    #[serde(default)]
    pub difficulty: Option<u8>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parent_quest_id: Option<QuestId>,
    #[serde(default)]
    pub quest_chain_id: Option<ChainId>,
    #[serde(default)]
    pub related_goal_id: Option<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    #[serde(default)]
    pub estimated_completion_date: Option<String>, // RFC3339
    #[serde(default)]
    pub source: Option<QuestSource>,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_quest_id() -> QuestId {
    QuestId(format!("qst_{}", ulid::Ulid::new()))
}

pub fn generate_user_id() -> UserId {
    UserId(format!("usr_{}", ulid::Ulid::new()))
}

pub fn generate_milestone_id() -> MilestoneId {
    MilestoneId(format!("mst_{}", ulid::Ulid::new()))
}

pub fn generate_chain_id() -> ChainId {
    ChainId(format!("chn_{}", ulid::Ulid::new()))
}
