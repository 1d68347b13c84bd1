//! Persistence seams of the memory subsystem.
//!
//! Each method is atomic on its own; nothing here spans several calls.
//! Backends: `database::Repository` (Postgres + pgvector) and
//! `memory::InMemoryStore`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use super::error::SearchError;
use super::types::{Conversation, ConversationId, NewTurn, ScoredTurn, SearchScope, Turn};

/// Append-only, per-conversation log of turns
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a turn. Returns only after the write is durable.
    async fn append(&self, turn: NewTurn) -> Result<Turn>;

    /// The `limit` most recent turns, **newest first**.
    ///
    /// Callers that need chronological order must reverse the result.
    async fn recent_window(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>>;

    /// Up to `limit` turns in chronological order, oldest first
    async fn history(&self, conversation_id: ConversationId, limit: usize) -> Result<Vec<Turn>>;

    /// Remove every turn of the conversation together with the conversation
    /// record, atomically. Returns the number of turns removed; unknown ids
    /// yield 0.
    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<u64>;
}

/// Nearest-neighbour search over stored turn embeddings (cosine distance)
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Turns ascending by distance, ties by `created_at`, truncated to
    /// `top_k` and filtered to `distance < max_distance` when given.
    /// Turns without an embedding never match.
    async fn try_search(
        &self,
        scope: SearchScope,
        query: &[f32],
        top_k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<ScoredTurn>, SearchError>;

    /// Like `try_search`, but a failing index yields an empty result so
    /// callers fall back to recency-only context.
    async fn search(
        &self,
        scope: SearchScope,
        query: &[f32],
        top_k: usize,
        max_distance: Option<f32>,
    ) -> Vec<ScoredTurn> {
        match self.try_search(scope, query, top_k, max_distance).await {
            Ok(hits) => hits,
            Err(SearchError::InvalidQuery(reason)) => {
                error!(
                    ?scope,
                    %reason,
                    "Similarity query rejected, continuing without similar turns"
                );
                Vec::new()
            }
            Err(SearchError::Unavailable(e)) => {
                warn!(
                    ?scope,
                    error = %e,
                    "Similarity index unavailable, continuing without similar turns"
                );
                Vec::new()
            }
        }
    }
}

/// Conversation identity and timestamps
#[async_trait]
pub trait ConversationRegistry: Send + Sync {
    /// Create the conversation if it does not exist. Existing records are
    /// returned untouched.
    async fn ensure(
        &self,
        id: ConversationId,
        user_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<Conversation>;

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Move `updated_at` forward to `at`. Never moves it backwards.
    async fn touch(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()>;

    /// Most recently updated conversations of a user
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>>;
}

/// Everything the manager needs from one backend
pub trait MemoryBackend: MessageStore + SimilarityIndex + ConversationRegistry {}

impl<T> MemoryBackend for T where T: MessageStore + SimilarityIndex + ConversationRegistry {}
