use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::models::chat::ChatMessage;

use super::assembler::ContextAssembler;
use super::error::MemoryError;
use super::providers::{EmbeddingProvider, Generator};
use super::store::{ConversationRegistry, MemoryBackend, MessageStore, SimilarityIndex};
use super::types::{
    Conversation, ConversationId, NewTurn, Role, ScoredTurn, SearchScope, Turn, TurnId, TurnStage,
};

const TITLE_MAX_CHARS: usize = 60;
const HISTORY_MAX_TURNS: usize = 1_000;

/// Inbound user message
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Absent for a brand new conversation
    pub conversation_id: Option<ConversationId>,
    pub user_id: Option<String>,
    pub text: String,
}

impl TurnRequest {
    pub fn new(conversation_id: Option<ConversationId>, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            user_id: None,
            text: text.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Outcome of a completed turn
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub user_turn_id: TurnId,
    pub reply_turn_id: TurnId,
    /// False when the reply was stored without an embedding
    pub reply_searchable: bool,
}

/// Drives one dialogue turn across the store, the embedding provider and the
/// generator.
///
/// The user turn is stored, with its embedding, before generation starts and
/// is never rolled back. There is no per-conversation lock: concurrent turns
/// on one conversation may see overlapping windows.
pub struct ConversationManager {
    backend: Arc<dyn MemoryBackend>,
    assembler: ContextAssembler,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    system_prompt: String,
    max_generation_attempts: u32,
}

impl ConversationManager {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        assembler: ContextAssembler,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        system_prompt: String,
    ) -> Self {
        Self {
            backend,
            assembler,
            embedding_provider,
            generator,
            system_prompt,
            max_generation_attempts: 1,
        }
    }

    /// Retry generation up to `attempts` times before failing the turn
    pub fn with_generation_attempts(mut self, attempts: u32) -> Self {
        self.max_generation_attempts = attempts.max(1);
        self
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    // ============ TURN LIFECYCLE ============

    #[instrument(skip_all, fields(conversation_id))]
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnReply, MemoryError> {
        let start_time = Instant::now();
        let text = self.validate_text(&request.text)?;

        let conversation_id = request.conversation_id.unwrap_or_default();
        tracing::Span::current()
            .record("conversation_id", tracing::field::display(conversation_id));

        // === REGISTERING ===
        stage(TurnStage::Registering);
        let title = derive_title(text);
        self.backend
            .ensure(conversation_id, request.user_id.as_deref(), Some(&title))
            .await
            .map_err(|e| MemoryError::persistence(TurnStage::Registering, e))?;

        // === EMBEDDING (user) ===
        stage(TurnStage::EmbeddingUser);
        let query_embedding = self
            .embedding_provider
            .embed(text)
            .await
            .map_err(MemoryError::Embedding)?;

        // === PERSISTING (user) ===
        // Stored before generation so the input survives a generator failure
        stage(TurnStage::PersistingUser);
        let user_turn = self
            .backend
            .append(
                NewTurn::user(conversation_id, text)
                    .with_embedding(Some(query_embedding.clone())),
            )
            .await
            .map_err(|e| MemoryError::persistence(TurnStage::PersistingUser, e))?;

        // === ASSEMBLING ===
        stage(TurnStage::Assembling);
        let context = self
            .assembler
            .assemble(self.backend.as_ref(), conversation_id, &query_embedding, Some(user_turn.id))
            .await
            .map_err(|e| MemoryError::persistence(TurnStage::Assembling, e))?;
        let prompt = self.assembler.render(&self.system_prompt, &context, text);

        // === GENERATING ===
        stage(TurnStage::Generating);
        let llm_start = Instant::now();
        let reply = self.generate_with_retry(&prompt).await.map_err(|e| {
            warn!(
                user_turn_id = user_turn.id,
                error = %e,
                "Generation failed, user turn kept"
            );
            MemoryError::Generation(e)
        })?;
        let llm_duration = llm_start.elapsed();

        // === EMBEDDING (reply) ===
        stage(TurnStage::EmbeddingReply);
        let reply_embedding = match self.embedding_provider.embed(&reply).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Reply embedding failed, storing reply without embedding");
                None
            }
        };
        let reply_searchable = reply_embedding.is_some();

        // === PERSISTING (reply) ===
        stage(TurnStage::PersistingReply);
        let reply_turn = self
            .backend
            .append(
                NewTurn::assistant(conversation_id, reply.clone())
                    .with_embedding(reply_embedding),
            )
            .await
            .map_err(|e| {
                error!(
                    user_turn_id = user_turn.id,
                    error = %e,
                    "Reply could not be stored; user turn left without a reply"
                );
                MemoryError::persistence(TurnStage::PersistingReply, e)
            })?;

        // === UPDATING TIMESTAMP ===
        stage(TurnStage::UpdatingTimestamp);
        if let Err(e) = self.backend.touch(conversation_id, reply_turn.created_at).await {
            warn!(error = %e, "Failed to bump conversation timestamp");
        }

        stage(TurnStage::Done);
        info!(
            recent = context.recent.len(),
            similar = context.similar.len(),
            llm_ms = llm_duration.as_millis() as u64,
            total_ms = start_time.elapsed().as_millis() as u64,
            "Turn completed"
        );

        Ok(TurnReply {
            conversation_id,
            reply,
            user_turn_id: user_turn.id,
            reply_turn_id: reply_turn.id,
            reply_searchable,
        })
    }

    /// Delete a conversation and all of its turns. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn clear_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<u64, MemoryError> {
        let deleted = self
            .backend
            .delete_conversation(conversation_id)
            .await
            .map_err(MemoryError::Storage)?;

        info!(deleted, "Conversation cleared");
        Ok(deleted)
    }

    // ============ READ SIDE ============

    pub async fn conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, MemoryError> {
        self.backend
            .get(conversation_id)
            .await
            .map_err(MemoryError::Storage)?
            .ok_or(MemoryError::NotFound(conversation_id))
    }

    /// Conversation record plus its transcript, oldest first
    pub async fn history(
        &self,
        conversation_id: ConversationId,
        limit: Option<usize>,
    ) -> Result<(Conversation, Vec<Turn>), MemoryError> {
        let conversation = self.conversation(conversation_id).await?;
        let limit = limit.unwrap_or(HISTORY_MAX_TURNS).min(HISTORY_MAX_TURNS);

        let turns = self
            .backend
            .history(conversation_id, limit)
            .await
            .map_err(MemoryError::Storage)?;

        Ok((conversation, turns))
    }

    pub async fn conversations_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, MemoryError> {
        self.backend
            .list_for_user(user_id, limit)
            .await
            .map_err(MemoryError::Storage)
    }

    /// Semantic lookup outside a turn. Backend failures come back empty,
    /// like during assembly.
    pub async fn search(
        &self,
        text: &str,
        scope: SearchScope,
        top_k: usize,
    ) -> Result<Vec<ScoredTurn>, MemoryError> {
        let text = self.validate_text(text)?;
        let query = self
            .embedding_provider
            .embed(text)
            .await
            .map_err(MemoryError::Embedding)?;

        Ok(self
            .backend
            .search(scope, &query, top_k, self.assembler.config().distance_cutoff())
            .await)
    }

    // ============ SEEDING ============

    /// Append a transcript to a conversation in order, embedding all turns
    /// with one batch call first. Nothing is written if embedding fails.
    #[instrument(skip(self, turns), fields(count = turns.len()))]
    pub async fn import_turns(
        &self,
        conversation_id: ConversationId,
        user_id: Option<&str>,
        turns: Vec<(Role, String)>,
    ) -> Result<Vec<Turn>, MemoryError> {
        if turns.is_empty() {
            return Ok(Vec::new());
        }
        for (_, content) in &turns {
            self.validate_text(content)?;
        }

        let texts: Vec<String> = turns
            .iter()
            .map(|(_, content)| content.trim().to_string())
            .collect();
        let embeddings = self
            .embedding_provider
            .embed_batch(&texts)
            .await
            .map_err(MemoryError::Embedding)?;

        if embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(anyhow::anyhow!(
                "embed_batch returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        let title = texts
            .iter()
            .zip(turns.iter())
            .find(|(_, (role, _))| *role == Role::User)
            .map(|(text, _)| derive_title(text));

        self.backend
            .ensure(conversation_id, user_id, title.as_deref())
            .await
            .map_err(|e| MemoryError::persistence(TurnStage::Registering, e))?;

        let mut stored = Vec::with_capacity(texts.len());
        for (((role, _), content), embedding) in turns.iter().zip(texts).zip(embeddings) {
            let new_turn = match role {
                Role::User => NewTurn::user(conversation_id, content),
                Role::Assistant => NewTurn::assistant(conversation_id, content),
            };
            let turn = self
                .backend
                .append(new_turn.with_embedding(Some(embedding)))
                .await
                .map_err(MemoryError::Storage)?;
            stored.push(turn);
        }

        if let Some(last) = stored.last() {
            if let Err(e) = self.backend.touch(conversation_id, last.created_at).await {
                warn!(error = %e, "Failed to bump conversation timestamp");
            }
        }

        info!(imported = stored.len(), "Transcript imported");
        Ok(stored)
    }

    // ============ HELPERS ============

    fn validate_text<'a>(&self, text: &'a str) -> Result<&'a str, MemoryError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::Validation("message text is blank".to_string()));
        }

        let max = self.assembler.config().max_message_chars;
        let chars = trimmed.chars().count();
        if chars > max {
            return Err(MemoryError::Validation(format!(
                "message text is {} characters, limit is {}",
                chars, max
            )));
        }
        Ok(trimmed)
    }

    async fn generate_with_retry(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let attempts = self.max_generation_attempts;
        let mut attempt = 1;

        loop {
            match self.generator.generate(messages).await {
                Ok(reply) if !reply.trim().is_empty() => return Ok(reply),
                Ok(_) => {
                    if attempt >= attempts {
                        anyhow::bail!("generator returned an empty reply");
                    }
                    warn!(attempt, "Generator returned an empty reply, retrying");
                }
                Err(e) => {
                    if attempt >= attempts {
                        error!("Generation failed after {} attempts: {}", attempts, e);
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Generation failed, retrying");
                }
            }

            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            attempt += 1;
        }
    }
}

fn stage(stage: TurnStage) {
    debug!(stage = %stage, "Turn stage");
}

/// First line of the opening message, cut to a readable length
fn derive_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    if first_line.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory::in_memory::InMemoryStore;
    use crate::memory::providers::{MockEmbeddingProvider, MockGenerator};

    fn manager_with(
        store: &InMemoryStore,
        embedder: MockEmbeddingProvider,
        generator: MockGenerator,
    ) -> ConversationManager {
        ConversationManager::new(
            Arc::new(store.clone()),
            ContextAssembler::new(MemoryConfig::default()),
            Arc::new(embedder),
            Arc::new(generator),
            "system".to_string(),
        )
    }

    fn constant_embedder() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0, 0.0]));
        embedder
    }

    #[tokio::test]
    async fn test_first_turn_creates_conversation() {
        let store = InMemoryStore::new();
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(|messages| {
                // Only system prompt and the query: nothing to recall yet
                messages.len() == 2 && messages[1] == ChatMessage::user("Hello")
            })
            .times(1)
            .returning(|_| Ok("Hi there".to_string()));

        let manager = manager_with(&store, constant_embedder(), generator);
        let reply = manager.process_turn(TurnRequest::new(None, "Hello")).await.unwrap();

        assert_eq!(reply.reply, "Hi there");
        assert!(reply.reply_searchable);
        assert!(reply.reply_turn_id > reply.user_turn_id);

        let conversation = store.get(reply.conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.title.as_deref(), Some("Hello"));
        assert!(conversation.updated_at >= conversation.created_at);

        let history = store.history(reply.conversation_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Hi there");
    }

    #[tokio::test]
    async fn test_blank_text_has_no_side_effects() {
        let store = InMemoryStore::new();
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().never();
        let mut generator = MockGenerator::new();
        generator.expect_generate().never();

        let manager = manager_with(&store, embedder, generator);
        let err = manager.process_turn(TurnRequest::new(None, "   \n")).await.unwrap_err();

        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_no_turn() {
        let store = InMemoryStore::new();
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(anyhow::anyhow!("embedding server down")));
        let mut generator = MockGenerator::new();
        generator.expect_generate().never();

        let manager = manager_with(&store, embedder, generator);
        let err = manager.process_turn(TurnRequest::new(None, "hello")).await.unwrap_err();

        assert!(matches!(err, MemoryError::Embedding(_)));
        assert!(err.is_retryable());
        assert_eq!(store.turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_keeps_user_turn() {
        let store = InMemoryStore::new();
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("model overloaded")));

        let manager =
            manager_with(&store, constant_embedder(), generator).with_generation_attempts(3);
        let id = ConversationId::new();
        let err = manager
            .process_turn(TurnRequest::new(Some(id), "keep me"))
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::Generation(_)));
        let history = store.history(id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "keep me");
        assert!(history[0].is_searchable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_retry_recovers() {
        let store = InMemoryStore::new();
        let mut generator = MockGenerator::new();
        let mut seq = mockall::Sequence::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("timeout")));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("second try".to_string()));

        let manager =
            manager_with(&store, constant_embedder(), generator).with_generation_attempts(2);
        let reply = manager.process_turn(TurnRequest::new(None, "hi")).await.unwrap();
        assert_eq!(reply.reply, "second try");
    }

    #[tokio::test]
    async fn test_reply_embedding_failure_still_stores_reply() {
        let store = InMemoryStore::new();
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .withf(|text| text.trim() == "question")
            .returning(|_| Ok(vec![0.0, 1.0]));
        embedder
            .expect_embed()
            .withf(|text| text.trim() == "answer")
            .returning(|_| Err(anyhow::anyhow!("rate limited")));
        let mut generator = MockGenerator::new();
        generator.expect_generate().returning(|_| Ok("answer".to_string()));

        let manager = manager_with(&store, embedder, generator);
        let reply = manager.process_turn(TurnRequest::new(None, "question")).await.unwrap();

        assert!(!reply.reply_searchable);
        let history = store.history(reply.conversation_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_searchable());
        assert!(!history[1].is_searchable());
    }

    #[tokio::test]
    async fn test_import_turns_uses_batch_and_keeps_order() {
        let store = InMemoryStore::new();
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed_batch().times(1).returning(|texts| {
            Ok(texts.iter().enumerate().map(|(i, _)| vec![1.0, i as f32]).collect())
        });
        let mut generator = MockGenerator::new();
        generator.expect_generate().never();

        let manager = manager_with(&store, embedder, generator);
        let id = ConversationId::new();
        let stored = manager
            .import_turns(
                id,
                Some("u1"),
                vec![
                    (Role::User, "first question".to_string()),
                    (Role::Assistant, "first answer".to_string()),
                    (Role::User, "second question".to_string()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2].embedding, Some(vec![1.0, 2.0]));

        let (conversation, history) = manager.history(id, None).await.unwrap();
        assert_eq!(conversation.title.as_deref(), Some("first question"));
        assert_eq!(conversation.user_id.as_deref(), Some("u1"));
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first question", "first answer", "second question"]);
    }

    #[tokio::test]
    async fn test_history_of_unknown_conversation() {
        let store = InMemoryStore::new();
        let manager = manager_with(&store, MockEmbeddingProvider::new(), MockGenerator::new());

        let id = ConversationId::new();
        assert!(matches!(
            manager.history(id, None).await,
            Err(MemoryError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("Hello"), "Hello");
        assert_eq!(derive_title("line one\nline two"), "line one");

        let long = "x".repeat(100);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
