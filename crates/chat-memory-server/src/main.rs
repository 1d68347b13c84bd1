use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use chat_memory_server::config::{Settings, StorageBackend};
use chat_memory_server::database::{DbPool, Repository};
use chat_memory_server::handlers;
use chat_memory_server::memory::{
    ContextAssembler, ConversationManager, InMemoryStore, MemoryBackend,
};
use chat_memory_server::services::{EmbeddingService, LlmService};
use chat_memory_server::state::AppState;
use chat_memory_server::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    info!("🚀 Starting chat memory server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Storage backend
    let (backend, db_pool): (Arc<dyn MemoryBackend>, Option<DbPool>) =
        match settings.database.backend {
            StorageBackend::Postgres => {
                let db_pool = DbPool::new(&settings.database).await?;
                info!("✅ Database connection established");
                let repository: Arc<dyn MemoryBackend> =
                    Arc::new(Repository::new(db_pool.clone()));
                (repository, Some(db_pool))
            }
            StorageBackend::Memory => {
                info!("⚠️  Using in-memory store; conversations are lost on restart");
                let store: Arc<dyn MemoryBackend> = Arc::new(InMemoryStore::new());
                (store, None)
            }
        };

    // Initialize services
    let embedding_service = Arc::new(EmbeddingService::new(settings.embedding.clone()));
    info!(
        dimension = embedding_service.dimension(),
        "✅ Embedding service configured"
    );
    let llm_service = Arc::new(LlmService::new(settings.llm.clone()));

    let conversation_manager = Arc::new(
        ConversationManager::new(
            backend,
            ContextAssembler::new(settings.memory.clone()),
            embedding_service,
            llm_service,
            settings.prompts.system_prompt.clone(),
        )
        .with_generation_attempts(settings.llm.max_retries),
    );
    info!(
        recent_limit = settings.memory.recent_limit,
        similar_limit = settings.memory.similar_limit,
        "✅ Conversation manager ready"
    );

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState {
        conversation_manager,
        db_pool: db_pool.clone(),
        settings: Arc::new(settings),
    };

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pool) = db_pool {
        pool.close().await;
    }
    info!("👋 Server stopped");

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/search", post(handlers::search::search_handler))
        .route("/api/conversations", get(handlers::chat::list_conversations_handler))
        .route(
            "/api/conversations/{id}",
            delete(handlers::chat::clear_conversation_handler),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(handlers::chat::history_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(DefaultBodyLimit::max(1024 * 1024))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
