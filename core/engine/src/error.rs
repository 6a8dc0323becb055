use thiserror::Error;

/// Error taxonomy for quest operations.
///
/// Lifecycle operations and board/analytics reads propagate these as hard
/// failures. The reconciliation engine catches them per signal and records
/// the outcome instead of aborting the batch.
#[derive(Debug, Error)]
pub enum QuestError {
    /// The quest id does not resolve for this owner
    #[error("quest not found")]
    NotFound,

    /// A state-machine guard rejected the transition
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Out-of-range or malformed input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Opaque failure from the persistence layer
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, QuestError>;
