use crate::memory::{ConversationId, ConversationManager, TurnRequest};
use crate::models::chat::*;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

pub async fn chat_handler(
    State(manager): State<Arc<ConversationManager>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let start_time = Instant::now();

    let conversation_id = request
        .conversation_id
        .as_deref()
        .map(str::parse::<ConversationId>)
        .transpose()?;

    info!(
        "Chat request: conversation={}, message_len={}",
        conversation_id.map(|id| id.to_string()).unwrap_or_else(|| "new".to_string()),
        request.message.len()
    );

    let turn = manager
        .process_turn(TurnRequest {
            conversation_id,
            user_id: request.user_id,
            text: request.message,
        })
        .await?;

    Ok(Json(ChatResponse {
        conversation_id: turn.conversation_id.to_string(),
        reply: turn.reply,
        message_id: turn.reply_turn_id,
        processing_time_ms: start_time.elapsed().as_millis() as u64,
    }))
}

pub async fn clear_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let id: ConversationId = conversation_id.parse()?;
    let deleted_turns = manager.clear_conversation(id).await?;

    Ok(Json(ClearResponse {
        conversation_id: id.to_string(),
        deleted_turns,
    }))
}

pub async fn history_handler(
    State(manager): State<Arc<ConversationManager>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id: ConversationId = conversation_id.parse()?;
    let (conversation, messages) = manager.history(id, query.limit).await?;

    Ok(Json(HistoryResponse {
        conversation,
        messages,
    }))
}

pub async fn list_conversations_handler(
    State(manager): State<Arc<ConversationManager>>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let conversations = manager.conversations_for_user(&query.user_id, limit).await?;

    Ok(Json(conversations.into_iter().map(ConversationSummary::from).collect()))
}
