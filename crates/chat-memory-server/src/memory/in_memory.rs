use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::codec::{TextVectorCodec, VectorCodec};
use super::error::SearchError;
use super::ranking;
use super::store::{ConversationRegistry, MessageStore, SimilarityIndex};
use super::types::{
    Conversation, ConversationId, NewTurn, Role, ScoredTurn, SearchScope, Turn, TurnId,
};

/// Turn as kept in memory; the embedding sits in its text literal form like
/// it would in a text column.
#[derive(Debug, Clone)]
struct StoredTurn {
    id: TurnId,
    role: Role,
    content: String,
    embedding: Option<String>,
    created_at: DateTime<Utc>,
    tool_metadata: Option<serde_json::Value>,
}

impl StoredTurn {
    fn to_turn(&self, conversation_id: ConversationId) -> Turn {
        Turn {
            id: self.id,
            conversation_id,
            role: self.role,
            content: self.content.clone(),
            embedding: TextVectorCodec::decode(self.embedding.as_ref()),
            created_at: self.created_at,
            tool_metadata: self.tool_metadata.clone(),
        }
    }
}

/// A conversation and its turns live in one map entry, so removing the
/// entry deletes both at once.
#[derive(Debug, Clone)]
struct ConversationEntry {
    record: Conversation,
    turns: Vec<StoredTurn>,
}

/// Process-local backend for development and tests.
///
/// Thread-safe through `DashMap`; shard guards are only held inside
/// synchronous sections and never across an `.await`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    conversations: Arc<DashMap<ConversationId, ConversationEntry>>,
    next_turn_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Initializing in-memory conversation store");
        Self::default()
    }

    /// Number of stored conversations
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Number of stored turns across all conversations
    pub fn turn_count(&self) -> usize {
        self.conversations.iter().map(|e| e.turns.len()).sum()
    }

    fn next_id(&self) -> TurnId {
        self.next_turn_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Chronological copy of a conversation's turns
    fn sorted_turns(&self, conversation_id: ConversationId) -> Vec<Turn> {
        let Some(entry) = self.conversations.get(&conversation_id) else {
            return Vec::new();
        };
        let mut turns: Vec<Turn> = entry.turns.iter().map(|t| t.to_turn(conversation_id)).collect();
        drop(entry);

        turns.sort_by_key(Turn::order_key);
        turns
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(&self, turn: NewTurn) -> Result<Turn> {
        let mut entry = self
            .conversations
            .get_mut(&turn.conversation_id)
            .ok_or_else(|| {
                anyhow::anyhow!("Conversation {} does not exist", turn.conversation_id)
            })?;

        // Keep created_at non-decreasing within the conversation even if the
        // wall clock steps back
        let now = Utc::now();
        let created_at = entry
            .turns
            .last()
            .map(|last| last.created_at.max(now))
            .unwrap_or(now);

        let stored = StoredTurn {
            id: self.next_id(),
            role: turn.role,
            content: turn.content,
            embedding: turn.embedding.as_deref().map(TextVectorCodec::encode),
            created_at,
            tool_metadata: turn.tool_metadata,
        };
        let persisted = stored.to_turn(turn.conversation_id);
        entry.turns.push(stored);

        debug!(
            conversation_id = %turn.conversation_id,
            turn_id = persisted.id,
            role = %persisted.role,
            "Appended turn"
        );
        Ok(persisted)
    }

    async fn recent_window(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>> {
        let mut turns = self.sorted_turns(conversation_id);
        turns.reverse();
        turns.truncate(limit);
        Ok(turns)
    }

    async fn history(&self, conversation_id: ConversationId, limit: usize) -> Result<Vec<Turn>> {
        let mut turns = self.sorted_turns(conversation_id);
        turns.truncate(limit);
        Ok(turns)
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<u64> {
        let removed = self
            .conversations
            .remove(&conversation_id)
            .map(|(_, entry)| entry.turns.len() as u64)
            .unwrap_or(0);

        debug!(%conversation_id, removed, "Deleted conversation");
        Ok(removed)
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryStore {
    async fn try_search(
        &self,
        scope: SearchScope,
        query: &[f32],
        top_k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<ScoredTurn>, SearchError> {
        // Snapshot first so no shard guard outlives this block
        let candidates: Vec<Turn> = match scope {
            SearchScope::Conversation(id) => self.sorted_turns(id),
            SearchScope::Global => self
                .conversations
                .iter()
                .flat_map(|entry| {
                    let id = *entry.key();
                    entry.turns.iter().map(|t| t.to_turn(id)).collect::<Vec<_>>()
                })
                .collect(),
        };

        ranking::rank(&candidates, query, top_k, max_distance)
    }
}

#[async_trait]
impl ConversationRegistry for InMemoryStore {
    async fn ensure(
        &self,
        id: ConversationId,
        user_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let entry = self.conversations.entry(id).or_insert_with(|| {
            let now = Utc::now();
            debug!(conversation_id = %id, "Created conversation");
            ConversationEntry {
                record: Conversation {
                    id,
                    user_id: user_id.map(str::to_string),
                    title: title.map(str::to_string),
                    created_at: now,
                    updated_at: now,
                },
                turns: Vec::new(),
            }
        });
        Ok(entry.record.clone())
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(&id).map(|e| e.record.clone()))
    }

    async fn touch(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.conversations.get_mut(&id) {
            if at > entry.record.updated_at {
                entry.record.updated_at = at;
            }
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|e| e.record.user_id.as_deref() == Some(user_id))
            .map(|e| e.record.clone())
            .collect();

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit);
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_conversation() -> (InMemoryStore, ConversationId) {
        let store = InMemoryStore::new();
        let id = ConversationId::new();
        store.ensure(id, Some("u1"), None).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_append_assigns_ids_and_order() {
        let (store, id) = store_with_conversation().await;

        let a = store.append(NewTurn::user(id, "one")).await.unwrap();
        let b = store.append(NewTurn::assistant(id, "two")).await.unwrap();

        assert!(b.id > a.id);
        assert!(b.created_at >= a.created_at);
        assert_eq!(store.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_append_requires_conversation() {
        let store = InMemoryStore::new();
        let result = store.append(NewTurn::user(ConversationId::new(), "orphan")).await;
        assert!(result.is_err());
        assert_eq!(store.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_recent_window_newest_first() {
        let (store, id) = store_with_conversation().await;
        for i in 0..5 {
            store.append(NewTurn::user(id, format!("m{}", i))).await.unwrap();
        }

        let recent = store.recent_window(id, 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);

        let history = store.history(id, 100).await.unwrap();
        assert_eq!(history.first().unwrap().content, "m0");
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_embedding_survives_storage() {
        let (store, id) = store_with_conversation().await;
        let turn = store
            .append(NewTurn::user(id, "vec").with_embedding(Some(vec![0.25, -0.5])))
            .await
            .unwrap();
        assert_eq!(turn.embedding, Some(vec![0.25, -0.5]));

        let recent = store.recent_window(id, 1).await.unwrap();
        assert_eq!(recent[0].embedding, Some(vec![0.25, -0.5]));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = InMemoryStore::new();
        let id = ConversationId::new();

        let first = store.ensure(id, Some("u1"), Some("title")).await.unwrap();
        let second = store.ensure(id, Some("other"), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_touch_is_monotonic() {
        let (store, id) = store_with_conversation().await;
        let created = store.get(id).await.unwrap().unwrap().updated_at;

        let later = created + chrono::Duration::seconds(10);
        store.touch(id, later).await.unwrap();
        store.touch(id, created).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().updated_at, later);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let (store, id) = store_with_conversation().await;
        store.append(NewTurn::user(id, "a")).await.unwrap();
        store.append(NewTurn::assistant(id, "b")).await.unwrap();

        assert_eq!(store.delete_conversation(id).await.unwrap(), 2);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.recent_window(id, 10).await.unwrap().is_empty());
        assert_eq!(store.delete_conversation(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let store = InMemoryStore::new();
        let a = ConversationId::new();
        let b = ConversationId::new();
        store.ensure(a, None, None).await.unwrap();
        store.ensure(b, None, None).await.unwrap();

        store
            .append(NewTurn::user(a, "a1").with_embedding(Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .append(NewTurn::user(b, "b1").with_embedding(Some(vec![1.0, 0.1])))
            .await
            .unwrap();
        store.append(NewTurn::user(b, "b2")).await.unwrap();

        let local = store
            .try_search(SearchScope::Conversation(a), &[1.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].turn.content, "a1");

        let global = store.try_search(SearchScope::Global, &[1.0, 0.0], 10, None).await.unwrap();
        let contents: Vec<&str> = global.iter().map(|s| s.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn test_search_excludes_zero_vectors() {
        let (store, id) = store_with_conversation().await;
        store
            .append(NewTurn::user(id, "zero").with_embedding(Some(vec![0.0, 0.0])))
            .await
            .unwrap();
        store
            .append(NewTurn::user(id, "unit").with_embedding(Some(vec![1.0, 0.0])))
            .await
            .unwrap();

        let hits = store
            .try_search(SearchScope::Conversation(id), &[1.0, 0.0], 10, Some(1.5))
            .await
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|s| s.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["unit"]);

        let zero_query = store
            .try_search(SearchScope::Conversation(id), &[0.0, 0.0], 10, None)
            .await;
        assert!(matches!(zero_query, Err(SearchError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_list_for_user_orders_by_update() {
        let store = InMemoryStore::new();
        let old = ConversationId::new();
        let new = ConversationId::new();
        store.ensure(old, Some("u1"), None).await.unwrap();
        store.ensure(new, Some("u1"), None).await.unwrap();
        store.ensure(ConversationId::new(), Some("u2"), None).await.unwrap();

        store.touch(new, Utc::now() + chrono::Duration::seconds(60)).await.unwrap();

        let listed = store.list_for_user("u1", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, new);
    }
}
