use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::FromRow;
use uuid::Uuid;

use crate::memory::{Conversation, ConversationId, PgVectorCodec, ScoredTurn, Turn, VectorCodec};

#[derive(Debug, Clone, FromRow)]
pub struct TurnRow {
    pub id: i64,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub embedding: Option<Vector>,
    pub created_at: DateTime<Utc>,
    pub tool_metadata: Option<serde_json::Value>,
}

impl TryFrom<TurnRow> for Turn {
    type Error = anyhow::Error;

    fn try_from(row: TurnRow) -> Result<Self> {
        Ok(Turn {
            id: row.id,
            conversation_id: ConversationId::from(row.conversation_id),
            role: row.role.parse()?,
            content: row.content,
            embedding: PgVectorCodec::decode(row.embedding.as_ref()),
            created_at: row.created_at,
            tool_metadata: row.tool_metadata,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScoredTurnRow {
    #[sqlx(flatten)]
    pub turn: TurnRow,
    pub distance: f32,
}

impl TryFrom<ScoredTurnRow> for ScoredTurn {
    type Error = anyhow::Error;

    fn try_from(row: ScoredTurnRow) -> Result<Self> {
        Ok(ScoredTurn {
            turn: Turn::try_from(row.turn)?,
            distance: row.distance,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: ConversationId::from(row.id),
            user_id: row.user_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
