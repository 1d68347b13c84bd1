use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::MemoryError;

/// Turn identifier assigned by the store. Monotonic per backend, used as the
/// tiebreak after `created_at`.
pub type TurnId = i64;

/// Globally unique conversation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConversationId {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| MemoryError::Validation(format!("malformed conversation id: {:?}", s)))
    }
}

impl From<Uuid> for ConversationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => anyhow::bail!("unknown turn role: {}", other),
        }
    }
}

/// One persisted message of a conversation.
///
/// Turns are never updated. `embedding` is `None` until the text has been
/// embedded; such turns are invisible to similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_metadata: Option<serde_json::Value>,
}

impl Turn {
    /// Canonical ordering key within a conversation
    pub fn order_key(&self) -> (DateTime<Utc>, TurnId) {
        (self.created_at, self.id)
    }

    pub fn is_searchable(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// A turn that has not been written yet. The store assigns `id` and
/// `created_at` on append.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub tool_metadata: Option<serde_json::Value>,
}

impl NewTurn {
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role: Role::User,
            content: content.into(),
            embedding: None,
            tool_metadata: None,
        }
    }

    pub fn assistant(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role: Role::Assistant,
            content: content.into(),
            embedding: None,
            tool_metadata: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Conversation record owned by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Similarity hit: a turn plus its cosine distance to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTurn {
    pub turn: Turn,
    pub distance: f32,
}

/// Partition a similarity query runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Conversation(ConversationId),
    Global,
}

impl SearchScope {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Conversation(id) => Some(*id),
            Self::Global => None,
        }
    }
}

/// Stages of a single `process_turn` call, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Registering,
    EmbeddingUser,
    PersistingUser,
    Assembling,
    Generating,
    EmbeddingReply,
    PersistingReply,
    UpdatingTimestamp,
    Done,
}

impl TurnStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registering => "registering",
            Self::EmbeddingUser => "embedding_user",
            Self::PersistingUser => "persisting_user",
            Self::Assembling => "assembling",
            Self::Generating => "generating",
            Self::EmbeddingReply => "embedding_reply",
            Self::PersistingReply => "persisting_reply",
            Self::UpdatingTimestamp => "updating_timestamp",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
