//! Conversational memory: turn storage, similarity recall and the turn
//! lifecycle that ties them to the embedding and generation services.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod in_memory;
pub mod manager;
pub mod providers;
pub mod ranking;
pub mod store;
pub mod types;

pub use assembler::{AssembledContext, ContextAssembler};
pub use codec::{PgVectorCodec, TextVectorCodec, VectorCodec};
pub use error::{MemoryError, SearchError};
pub use in_memory::InMemoryStore;
pub use manager::{ConversationManager, TurnReply, TurnRequest};
pub use providers::{EmbeddingProvider, Generator};
pub use store::{ConversationRegistry, MemoryBackend, MessageStore, SimilarityIndex};
pub use types::{
    Conversation, ConversationId, NewTurn, Role, ScoredTurn, SearchScope, Turn, TurnId, TurnStage,
};
