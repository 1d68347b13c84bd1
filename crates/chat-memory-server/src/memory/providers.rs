//! External capabilities the manager calls out to. Both are potentially
//! slow network calls and are never awaited while a store guard is held.

use anyhow::Result;

use crate::models::chat::ChatMessage;

/// Text to fixed-width vector. Dimension is fixed for the whole deployment.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Same length and order as `texts`
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Reply generation over an already assembled prompt
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}
