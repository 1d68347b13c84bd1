use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::database::DbPool;
use crate::memory::ConversationManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conversation_manager: Arc<ConversationManager>,
    /// Absent when running on the in-memory backend
    pub db_pool: Option<DbPool>,
    pub settings: Arc<Settings>,
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Option<DbPool> {
    fn from_ref(state: &AppState) -> Self {
        state.db_pool.clone()
    }
}
