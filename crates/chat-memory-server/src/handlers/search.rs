use crate::memory::{ConversationId, ConversationManager, SearchScope};
use crate::utils::error::ApiError;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Search every conversation when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub turn_id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub distance: f32,
    pub created_at: DateTime<Utc>,
}

pub async fn search_handler(
    State(manager): State<Arc<ConversationManager>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let scope = match request.conversation_id.as_deref() {
        Some(raw) => SearchScope::Conversation(raw.parse::<ConversationId>()?),
        None => SearchScope::Global,
    };
    let limit = request.limit.unwrap_or(10).min(50);

    info!("Search request ({:?}, limit {})", scope, limit);

    let hits = manager.search(&request.query, scope, limit).await?;

    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| SearchResult {
            turn_id: hit.turn.id,
            conversation_id: hit.turn.conversation_id.to_string(),
            role: hit.turn.role.to_string(),
            content: hit.turn.content,
            distance: hit.distance,
            created_at: hit.turn.created_at,
        })
        .collect();

    Ok(Json(SearchResponse {
        total: results.len(),
        results,
    }))
}
