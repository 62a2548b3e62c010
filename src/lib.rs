//! scrollback: incrementally-loading message feed for chat views
//!
//! This library provides:
//! - A deduplicated, strictly ordered message window per conversation
//! - A pagination controller fetching older and newer history concurrently
//! - A scroll-proximity trigger that prefetches as the view nears an edge
//! - A registry tying feeds to conversation view lifecycle
//! - An in-memory history backend

pub mod backend;
pub mod config;
pub mod core;
pub mod feed;

pub use crate::core::{
    ConversationId, Direction, FeedError, HistoryBackend, Message, WindowSnapshot,
};
pub use config::FeedConfig;
pub use feed::{FeedEvent, FeedRegistry, PaginationController, ProximityTrigger, VisibleRange};
