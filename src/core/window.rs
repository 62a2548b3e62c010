//! Message Window - ordered, deduplicated message sequence of one conversation
//!
//! Handles:
//! - Seeding from an initial page
//! - Extending either edge with a fetched page (overlap with that edge trimmed)
//! - Rejecting pages that would reorder history or land inside the window
//! - Copy-on-write snapshots for the presentation layer

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::errors::FeedError;
use super::types::{Direction, InitialPage, Message, MessageId, MessageKey, Page};

/// Read-only view of a window at one point in time
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub messages: Arc<Vec<Message>>,
    pub has_older: bool,
    pub has_newer: bool,
    pub revision: u64,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }
}

/// Result of merging one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages added to the window
    pub added: usize,
    /// Messages dropped because their id was already present
    pub trimmed: usize,
    /// The merge cleared the boundary flag for its direction
    pub reached_end: bool,
}

/// Ordered message sequence for exactly one conversation
#[derive(Debug, Clone)]
pub struct MessageWindow {
    messages: Arc<Vec<Message>>,
    keys: HashMap<MessageId, MessageKey>,
    has_older: bool,
    has_newer: bool,
    revision: u64,
}

impl MessageWindow {
    /// Create an empty window; both edges are assumed open until loaded
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Vec::new()),
            keys: HashMap::new(),
            has_older: true,
            has_newer: true,
            revision: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_older(&self) -> bool {
        self.has_older
    }

    pub fn has_newer(&self) -> bool {
        self.has_newer
    }

    pub fn has_more(&self, direction: Direction) -> bool {
        match direction {
            Direction::Older => self.has_older,
            Direction::Newer => self.has_newer,
        }
    }

    /// Incremented on every successful mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn oldest_key(&self) -> Option<MessageKey> {
        self.messages.first().map(Message::key)
    }

    pub fn newest_key(&self) -> Option<MessageKey> {
        self.messages.last().map(Message::key)
    }

    /// Key of the extreme entry on the given edge
    pub fn edge_key(&self, direction: Direction) -> Option<MessageKey> {
        match direction {
            Direction::Older => self.oldest_key(),
            Direction::Newer => self.newest_key(),
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Index of a message, used to keep the scroll position stable after a
    /// front merge
    pub fn position_of(&self, id: MessageId) -> Option<usize> {
        let key = self.keys.get(&id)?;
        self.messages.binary_search_by_key(key, Message::key).ok()
    }

    /// Replace the contents with an initial page
    pub fn initialize(&mut self, page: InitialPage) -> Result<(), FeedError> {
        check_page_order("initial", &page.messages)?;

        self.keys = page.messages.iter().map(|m| (m.id, m.key())).collect();
        self.messages = Arc::new(page.messages);
        self.has_older = !page.reached_oldest;
        self.has_newer = !page.reached_newest;
        self.revision += 1;
        Ok(())
    }

    /// Extend the front with a page of older messages
    ///
    /// `limit` is the requested page size; a page shorter than it, an empty
    /// page, or a boundary page clears `has_older`.
    pub fn merge_older(&mut self, page: Page, limit: usize) -> Result<MergeOutcome, FeedError> {
        self.merge(Direction::Older, page, limit)
    }

    /// Extend the back with a page of newer messages
    pub fn merge_newer(&mut self, page: Page, limit: usize) -> Result<MergeOutcome, FeedError> {
        self.merge(Direction::Newer, page, limit)
    }

    /// Append a message that arrived on the live connection
    ///
    /// Only applies while the window sits at the live edge. Returns whether
    /// the message was added.
    pub fn push_live(&mut self, message: Message) -> Result<bool, FeedError> {
        if self.has_newer || self.keys.contains_key(&message.id) {
            return Ok(false);
        }
        if let Some(newest) = self.newest_key() {
            if message.key() <= newest {
                return Err(FeedError::OrderingViolation {
                    page: "live",
                    reason: format!(
                        "message {} does not follow window end {}",
                        message.key(),
                        newest
                    ),
                });
            }
        }

        self.keys.insert(message.id, message.key());
        Arc::make_mut(&mut self.messages).push(message);
        self.revision += 1;
        Ok(true)
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            messages: Arc::clone(&self.messages),
            has_older: self.has_older,
            has_newer: self.has_newer,
            revision: self.revision,
        }
    }

    fn merge(
        &mut self,
        direction: Direction,
        page: Page,
        limit: usize,
    ) -> Result<MergeOutcome, FeedError> {
        check_page_order(direction.as_str(), &page.messages)?;

        let raw_len = page.messages.len();
        let fresh = self.trim_edge_overlap(direction, page.messages)?;
        let trimmed = raw_len - fresh.len();

        // Remaining entries must sit entirely past the edge they extend
        match direction {
            Direction::Older => {
                if let (Some(last), Some(oldest)) = (fresh.last(), self.oldest_key()) {
                    if last.key() >= oldest {
                        return Err(FeedError::OrderingViolation {
                            page: direction.as_str(),
                            reason: format!(
                                "page ends at {} which does not precede window start {}",
                                last.key(),
                                oldest
                            ),
                        });
                    }
                }
            }
            Direction::Newer => {
                if let (Some(first), Some(newest)) = (fresh.first(), self.newest_key()) {
                    if first.key() <= newest {
                        return Err(FeedError::OrderingViolation {
                            page: direction.as_str(),
                            reason: format!(
                                "page starts at {} which does not follow window end {}",
                                first.key(),
                                newest
                            ),
                        });
                    }
                }
            }
        }

        let reached_end = page.is_boundary || raw_len < limit;
        let added = fresh.len();

        if added > 0 {
            self.keys.extend(fresh.iter().map(|m| (m.id, m.key())));
            let messages = Arc::make_mut(&mut self.messages);
            match direction {
                Direction::Older => {
                    messages.splice(0..0, fresh);
                }
                Direction::Newer => messages.extend(fresh),
            }
        }

        let flag = match direction {
            Direction::Older => &mut self.has_older,
            Direction::Newer => &mut self.has_newer,
        };
        let cleared = reached_end && *flag;
        if reached_end {
            *flag = false;
        }

        if added > 0 || cleared {
            self.revision += 1;
        }

        Ok(MergeOutcome {
            added,
            trimmed,
            reached_end,
        })
    }

    /// Drop the part of a page that repeats the edge it extends
    ///
    /// An older page may end with the window's first entries and a newer page
    /// may start with its last ones. Any other id already in the window means
    /// the backend disagrees with the window about what is adjacent.
    fn trim_edge_overlap(
        &self,
        direction: Direction,
        mut messages: Vec<Message>,
    ) -> Result<Vec<Message>, FeedError> {
        let (overlap, edge) = match direction {
            Direction::Older => {
                let split = messages
                    .iter()
                    .position(|m| self.contains(m.id))
                    .unwrap_or(messages.len());
                let overlap = messages.split_off(split);
                let edge = &self.messages[..overlap.len().min(self.messages.len())];
                (overlap, edge)
            }
            Direction::Newer => {
                let split = messages
                    .iter()
                    .rposition(|m| self.contains(m.id))
                    .map_or(0, |i| i + 1);
                let fresh = messages.split_off(split);
                let overlap = std::mem::replace(&mut messages, fresh);
                let start = self.messages.len().saturating_sub(overlap.len());
                (overlap, &self.messages[start..])
            }
        };

        let matches_edge = overlap.len() == edge.len()
            && overlap
                .iter()
                .zip(edge)
                .all(|(page, window)| page.id == window.id && page.key() == window.key());
        if !matches_edge {
            return Err(FeedError::OrderingViolation {
                page: direction.as_str(),
                reason: format!(
                    "page repeats {} window entries that are not its {} edge",
                    overlap.len(),
                    direction
                ),
            });
        }
        Ok(messages)
    }
}

impl Default for MessageWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// A page must be strictly ascending by key with no repeated id
fn check_page_order(page: &'static str, messages: &[Message]) -> Result<(), FeedError> {
    let mut seen = HashSet::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        if !seen.insert(message.id) {
            return Err(FeedError::OrderingViolation {
                page,
                reason: format!("duplicate id {} within page", message.id),
            });
        }
        if i > 0 && messages[i - 1].key() >= message.key() {
            return Err(FeedError::OrderingViolation {
                page,
                reason: format!(
                    "entry {} does not follow {}",
                    message.key(),
                    messages[i - 1].key()
                ),
            });
        }
    }
    Ok(())
}
