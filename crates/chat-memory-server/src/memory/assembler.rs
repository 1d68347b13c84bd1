use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

use crate::config::MemoryConfig;
use crate::models::chat::ChatMessage;

use super::store::{MessageStore, SimilarityIndex};
use super::types::{ConversationId, Role, ScoredTurn, SearchScope, Turn, TurnId};

const BACKGROUND_HEADER: &str =
    "Background: earlier parts of this conversation that may be relevant to the new message.";
const HISTORY_HEADER: &str =
    "Immediate history: the most recent messages of this conversation follow.";

/// Context handed to the generator for one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    /// Similarity hits not already in `recent`, ascending by distance
    pub similar: Vec<ScoredTurn>,
    /// Recency window, oldest first
    pub recent: Vec<Turn>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.similar.is_empty() && self.recent.is_empty()
    }

    pub fn similar_turns(&self) -> impl Iterator<Item = &Turn> {
        self.similar.iter().map(|s| &s.turn)
    }
}

/// Merges the recency window with similarity hits. Holds configuration only;
/// every call works on transient data.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: MemoryConfig,
}

impl ContextAssembler {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Build the context for a query in `conversation_id`.
    ///
    /// `anchor` is the turn being answered. It is left out of both blocks
    /// because it is rendered last as the query itself, and the recency
    /// window reaches one turn further back to make up for it.
    pub async fn assemble<S>(
        &self,
        store: &S,
        conversation_id: ConversationId,
        query: &[f32],
        anchor: Option<TurnId>,
    ) -> Result<AssembledContext>
    where
        S: MessageStore + SimilarityIndex + ?Sized,
    {
        let recent = self.recent_block(store, conversation_id, anchor).await?;

        let candidates = if self.config.similar_limit == 0 {
            Vec::new()
        } else {
            store
                .search(
                    SearchScope::Conversation(conversation_id),
                    query,
                    // Hits that turn out to be the anchor are dropped below
                    self.config.similar_limit + usize::from(anchor.is_some()),
                    self.config.distance_cutoff(),
                )
                .await
        };

        let mut seen: HashSet<TurnId> = recent.iter().map(|t| t.id).collect();
        seen.extend(anchor);

        let mut similar: Vec<ScoredTurn> = candidates
            .into_iter()
            .filter(|hit| !seen.contains(&hit.turn.id))
            .collect();
        similar.truncate(self.config.similar_limit);

        debug!(
            %conversation_id,
            recent = recent.len(),
            similar = similar.len(),
            "Context assembled"
        );

        Ok(AssembledContext { similar, recent })
    }

    async fn recent_block<S>(
        &self,
        store: &S,
        conversation_id: ConversationId,
        anchor: Option<TurnId>,
    ) -> Result<Vec<Turn>>
    where
        S: MessageStore + ?Sized,
    {
        let limit = self.config.recent_limit;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let fetch = limit + usize::from(anchor.is_some());
        let mut recent = store.recent_window(conversation_id, fetch).await?;

        if let Some(anchor_id) = anchor {
            recent.retain(|t| t.id != anchor_id);
        }
        recent.truncate(limit);

        // Store hands back newest first
        recent.reverse();
        Ok(recent)
    }

    /// Lay out the prompt: instruction, background block, history block,
    /// then the new query. Empty blocks get no header.
    pub fn render(
        &self,
        base_instruction: &str,
        context: &AssembledContext,
        query: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.recent.len() + 4);

        if !base_instruction.trim().is_empty() {
            messages.push(ChatMessage::system(base_instruction.trim()));
        }

        if !context.similar.is_empty() {
            let lines: Vec<String> = context
                .similar_turns()
                .map(|t| {
                    format!(
                        "- [{}] {}: {}",
                        t.created_at.format("%Y-%m-%d %H:%M"),
                        t.role,
                        t.content.trim()
                    )
                })
                .collect();
            messages.push(ChatMessage::system(format!(
                "{}\n{}",
                BACKGROUND_HEADER,
                lines.join("\n")
            )));
        }

        if !context.recent.is_empty() {
            messages.push(ChatMessage::system(HISTORY_HEADER));
            messages.extend(context.recent.iter().map(|t| match t.role {
                Role::User => ChatMessage::user(t.content.clone()),
                Role::Assistant => ChatMessage::assistant(t.content.clone()),
            }));
        }

        messages.push(ChatMessage::user(query));
        messages
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
