//! Core domain modules
//!
//! Message types, the message window and the backend contract shared by the
//! feed layer and its frontends.

pub mod errors;
pub mod traits;
pub mod types;
pub mod window;

pub use errors::{ConfigError, FeedError};
pub use traits::HistoryBackend;
pub use types::{
    Anchor, ConversationId, Direction, FetchRequest, InitialAnchor, InitialPage, LoadState,
    Message, MessageId, MessageKey, MessageOrigin, Page,
};
pub use window::{MergeOutcome, MessageWindow, WindowSnapshot};
