use thiserror::Error;

use super::types::{ConversationId, TurnStage};

/// Failures surfaced by the conversation manager.
///
/// Similarity search failures never appear here; the assembler recovers
/// from them.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Rejected before anything was written
    #[error("Validation error: {0}")]
    Validation(String),

    /// Embedding the user text failed; nothing was persisted for the turn
    #[error("Embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    /// Generation failed after the user turn was stored
    #[error("Generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("Persistence failed while {stage}: {source}")]
    Persistence {
        stage: TurnStage,
        #[source]
        source: anyhow::Error,
    },

    /// Store failure outside the turn lifecycle (clear, history, lookups)
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),
}

impl MemoryError {
    pub fn persistence(stage: TurnStage, source: anyhow::Error) -> Self {
        Self::Persistence { stage, source }
    }

    /// Whether the caller may resubmit the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Generation(_))
    }
}

/// Similarity index failures. Both variants degrade to an empty result at
/// `SimilarityIndex::search`; they are kept apart so logs can tell a broken
/// caller from a broken backend.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query vector: {0}")]
    InvalidQuery(String),

    #[error("Similarity backend unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}
