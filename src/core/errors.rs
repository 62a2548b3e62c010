//! Domain error types
//!
//! Failures of the feed are local to one direction of one conversation.
//! Using thiserror for ergonomic error handling with proper Display implementations.

use thiserror::Error;

use super::types::{ConversationId, Direction};

/// Errors raised by the message window and pagination controller
#[derive(Debug, Error)]
pub enum FeedError {
    /// Backend page contradicts the window's ordering invariants
    #[error("Ordering violation in {page} page: {reason}")]
    OrderingViolation { page: &'static str, reason: String },

    /// Transient backend or network failure, eligible for retry
    #[error("Fetch of {request} history failed: {message}")]
    FetchFailure { request: &'static str, message: String },

    /// A fetch completed after its feed was closed or reloaded
    #[error("Stale fetch completion discarded")]
    StaleCompletion,

    /// A fetch in this direction is already outstanding
    #[error("Already loading {0} history")]
    Busy(Direction),

    /// No more history in this direction
    #[error("No more {0} history")]
    Exhausted(Direction),

    /// Paging requested before the initial load completed
    #[error("Initial load has not completed")]
    NotLoaded,

    /// Feed was closed
    #[error("Feed is closed")]
    Closed,

    /// Registry lookup for a conversation that is not open
    #[error("Conversation not open: {0}")]
    ConversationNotOpen(ConversationId),
}

impl FeedError {
    /// Whether a later trigger may retry the same direction
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailure { .. } | Self::Busy(_))
    }
}

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
