//! Feed Events
//!
//! Sent from the pagination controllers to the presentation layer.

use crate::core::types::{ConversationId, Direction};
use crate::core::window::WindowSnapshot;

/// Events emitted by a feed to the frontend
///
/// These are sent asynchronously via an mpsc channel. Every event names its
/// conversation so one receiver can serve all open views.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The initial page was loaded into the window
    Initialized {
        conversation: ConversationId,
        snapshot: WindowSnapshot,
    },

    /// A page or live message was merged into one edge of the window
    Updated {
        conversation: ConversationId,
        direction: Direction,
        snapshot: WindowSnapshot,
    },

    /// No more history in this direction
    Exhausted {
        conversation: ConversationId,
        direction: Direction,
    },

    /// A fetch failed; `direction` is `None` for the initial load
    FetchFailed {
        conversation: ConversationId,
        direction: Option<Direction>,
        error: String,
        retryable: bool,
    },

    /// The backend returned a page that contradicts the window's ordering
    Anomaly {
        conversation: ConversationId,
        error: String,
    },

    /// The conversation view closed; no further events follow for it
    Closed { conversation: ConversationId },
}

impl FeedEvent {
    pub fn conversation(&self) -> &ConversationId {
        match self {
            Self::Initialized { conversation, .. }
            | Self::Updated { conversation, .. }
            | Self::Exhausted { conversation, .. }
            | Self::FetchFailed { conversation, .. }
            | Self::Anomaly { conversation, .. }
            | Self::Closed { conversation } => conversation,
        }
    }

    /// Snapshot carried by change notifications
    pub fn snapshot(&self) -> Option<&WindowSnapshot> {
        match self {
            Self::Initialized { snapshot, .. } | Self::Updated { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}
