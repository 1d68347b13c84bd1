use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{Conversation, Turn};

/// Message in the OpenAI-compatible chat format sent to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user" or "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub reply: String,
    pub message_id: i64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub conversation_id: String,
    pub deleted_turns: u64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation: Conversation,
    pub messages: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationSummary {
    fn from(c: Conversation) -> Self {
        Self {
            conversation_id: c.id.to_string(),
            title: c.title,
            updated_at: c.updated_at,
        }
    }
}
