pub mod embedding_service;
pub mod llm_service;

pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
