//! Backend contract
//!
//! The chat-log store is injected behind [`HistoryBackend`] so controllers
//! can run against a remote log, the in-memory log, or scripted test pages.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{Anchor, ConversationId, Direction, InitialAnchor, InitialPage, Page};

/// Page-fetch capability of the chat-log backend
///
/// Implementations own their own timeout and retry policy. Returned pages
/// are always ascending by message key, whatever the direction.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Fetch up to `limit` messages past `anchor` in `direction`
    async fn fetch(
        &self,
        conversation: &ConversationId,
        direction: Direction,
        anchor: Anchor,
        limit: usize,
    ) -> Result<Page>;

    /// Fetch the page that seeds a freshly opened window
    ///
    /// The default composes `fetch`: the latest page is one older fetch from
    /// the live edge; a deep link fetches the anchor and older history, then
    /// the newer history strictly after it. A page shorter than requested
    /// marks that end of the history as reached.
    async fn fetch_initial(
        &self,
        conversation: &ConversationId,
        anchor: InitialAnchor,
        limit: usize,
    ) -> Result<InitialPage> {
        match anchor {
            InitialAnchor::Latest => {
                let page = self
                    .fetch(conversation, Direction::Older, Anchor::Live, limit)
                    .await?;
                Ok(InitialPage {
                    reached_oldest: page.is_boundary || page.len() < limit,
                    reached_newest: true,
                    messages: page.messages,
                })
            }
            InitialAnchor::Around(key) => {
                let older_limit = (limit / 2).max(1);
                let newer_limit = limit.saturating_sub(older_limit);

                let older = self
                    .fetch(conversation, Direction::Older, Anchor::At(key), older_limit)
                    .await?;
                // A one-message window is just the anchor; newer history stays open
                let newer = if newer_limit == 0 {
                    Page::default()
                } else {
                    self.fetch(
                        conversation,
                        Direction::Newer,
                        Anchor::Beyond(key),
                        newer_limit,
                    )
                    .await?
                };

                let reached_oldest = older.is_boundary || older.len() < older_limit;
                let reached_newest =
                    newer_limit > 0 && (newer.is_boundary || newer.len() < newer_limit);
                let mut messages = older.messages;
                messages.extend(newer.messages.into_iter().filter(|m| m.key() > key));
                Ok(InitialPage {
                    messages,
                    reached_oldest,
                    reached_newest,
                })
            }
        }
    }
}
