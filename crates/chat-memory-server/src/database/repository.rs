use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::models::{ConversationRow, ScoredTurnRow, TurnRow};
use super::DbPool;
use crate::memory::ranking::{effective_cutoff, validate_query};
use crate::memory::{
    Conversation, ConversationId, ConversationRegistry, MessageStore, NewTurn, PgVectorCodec,
    ScoredTurn, SearchError, SearchScope, SimilarityIndex, Turn, VectorCodec,
};

const TURN_COLUMNS: &str =
    "id, conversation_id, role, content, embedding, created_at, tool_metadata";

/// Postgres + pgvector backend for all three memory seams
#[derive(Clone)]
pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for Repository {
    async fn append(&self, turn: NewTurn) -> Result<Turn> {
        let embedding = turn.embedding.as_deref().map(PgVectorCodec::encode);

        // created_at never goes below the conversation's latest turn
        let row = sqlx::query_as::<_, TurnRow>(&format!(
            r#"INSERT INTO conversation_turns
                   (conversation_id, role, content, embedding, created_at, tool_metadata)
               VALUES ($1, $2, $3, $4,
                   GREATEST(
                       clock_timestamp(),
                       (SELECT MAX(created_at) FROM conversation_turns WHERE conversation_id = $1)
                   ),
                   $5)
               RETURNING {}"#,
            TURN_COLUMNS
        ))
        .bind(turn.conversation_id.as_uuid())
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(embedding)
        .bind(&turn.tool_metadata)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!(
            conversation_id = %turn.conversation_id,
            turn_id = row.id,
            role = %turn.role,
            "Appended turn"
        );
        Turn::try_from(row)
    }

    async fn recent_window(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            r#"SELECT {}
               FROM conversation_turns
               WHERE conversation_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
            TURN_COLUMNS
        ))
        .bind(conversation_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn history(&self, conversation_id: ConversationId, limit: usize) -> Result<Vec<Turn>> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            r#"SELECT {}
               FROM conversation_turns
               WHERE conversation_id = $1
               ORDER BY created_at ASC, id ASC
               LIMIT $2"#,
            TURN_COLUMNS
        ))
        .bind(conversation_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<u64> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let deleted = sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = $1")
            .bind(conversation_id.as_uuid())
            .execute(&mut *transaction)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id.as_uuid())
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;
        debug!(%conversation_id, deleted, "Deleted conversation");

        Ok(deleted)
    }
}

#[async_trait]
impl SimilarityIndex for Repository {
    async fn try_search(
        &self,
        scope: SearchScope,
        query: &[f32],
        top_k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<ScoredTurn>, SearchError> {
        validate_query(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Rows of another dimensionality are skipped rather than erroring.
        // Zero vectors give a NaN distance and are skipped too.
        let rows = sqlx::query_as::<_, ScoredTurnRow>(&format!(
            r#"SELECT {}, (embedding <=> $1)::real AS distance
               FROM conversation_turns
               WHERE embedding IS NOT NULL
                 AND vector_dims(embedding) = vector_dims($1)
                 AND (embedding <=> $1) <> 'NaN'::float8
                 AND ($2::uuid IS NULL OR conversation_id = $2)
                 AND ($3::real IS NULL OR (embedding <=> $1) < $3)
               ORDER BY embedding <=> $1, created_at, id
               LIMIT $4"#,
            TURN_COLUMNS
        ))
        .bind(PgVectorCodec::encode(query))
        .bind(scope.conversation_id().map(|id| id.as_uuid()))
        .bind(effective_cutoff(max_distance))
        .bind(top_k as i64)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| SearchError::Unavailable(e.into()))?;

        rows.into_iter()
            .map(ScoredTurn::try_from)
            .collect::<Result<Vec<_>>>()
            .map_err(SearchError::Unavailable)
    }
}

#[async_trait]
impl ConversationRegistry for Repository {
    async fn ensure(
        &self,
        id: ConversationId,
        user_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let inserted = sqlx::query(
            r#"INSERT INTO conversations (id, user_id, title)
               VALUES ($1, $2, $3)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(id.as_uuid())
        .bind(user_id)
        .bind(title)
        .execute(self.pool.get_pool())
        .await?
        .rows_affected();

        if inserted > 0 {
            debug!(conversation_id = %id, "Created conversation");
        }

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", id))
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(Conversation::from))
    }

    async fn touch(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"SELECT id, user_id, title, created_at, updated_at
               FROM conversations
               WHERE user_id = $1
               ORDER BY updated_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }
}
