//! In-process chat log implementing [`HistoryBackend`]
//!
//! Keeps one ordered log per conversation. Used by the CLI replay command and
//! by tests that need a well-behaved backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::core::traits::HistoryBackend;
use crate::core::types::{Anchor, ConversationId, Direction, Message, MessageId, Page};

/// Chat log held in memory, ascending by message key per conversation
#[derive(Debug, Default)]
pub struct MemoryBackend {
    logs: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log of a conversation; sorts and drops repeated ids
    pub fn insert_log(&self, conversation: ConversationId, mut messages: Vec<Message>) {
        messages.sort_by_key(Message::key);
        let mut seen = std::collections::HashSet::new();
        messages.retain(|m| seen.insert(m.id));

        self.logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation, messages);
    }

    /// Record a message in its ordered position; returns false for a repeated id
    pub fn append(&self, conversation: &ConversationId, message: Message) -> bool {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(conversation.clone()).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return false;
        }
        let key = message.key();
        let at = log.partition_point(|m| m.key() < key);
        log.insert(at, message);
        true
    }

    /// Load a JSON-lines chat log (one [`Message`] per line) into a conversation
    ///
    /// Blank lines are skipped. Returns the number of messages in the log.
    pub fn load_jsonl(&self, conversation: ConversationId, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chat log {}", path.display()))?;

        let mut messages = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid message", path.display(), index + 1))?;
            messages.push(message);
        }

        tracing::debug!(%conversation, count = messages.len(), "Loaded chat log");
        self.insert_log(conversation.clone(), messages);
        Ok(self.len(&conversation))
    }

    /// Look up a message by id
    pub fn find(&self, conversation: &ConversationId, id: MessageId) -> Option<Message> {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation)?
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn len(&self, conversation: &ConversationId) -> usize {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, conversation: &ConversationId) -> bool {
        self.len(conversation) == 0
    }
}

#[async_trait]
impl HistoryBackend for MemoryBackend {
    async fn fetch(
        &self,
        conversation: &ConversationId,
        direction: Direction,
        anchor: Anchor,
        limit: usize,
    ) -> Result<Page> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        let log = logs.get(conversation).map(Vec::as_slice).unwrap_or(&[]);

        let page = match direction {
            Direction::Older => {
                let end = match anchor {
                    Anchor::Live => log.len(),
                    Anchor::At(key) => log.partition_point(|m| m.key() <= key),
                    Anchor::Beyond(key) => log.partition_point(|m| m.key() < key),
                };
                let start = end.saturating_sub(limit);
                Page::new(log[start..end].to_vec(), start == 0)
            }
            Direction::Newer => {
                let start = match anchor {
                    Anchor::Live => log.len(),
                    Anchor::At(key) => log.partition_point(|m| m.key() < key),
                    Anchor::Beyond(key) => log.partition_point(|m| m.key() <= key),
                };
                let end = start.saturating_add(limit).min(log.len());
                Page::new(log[start..end].to_vec(), end == log.len())
            }
        };
        Ok(page)
    }
}
