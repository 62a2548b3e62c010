//! Core domain types
//!
//! Messages, conversation identity, ordering keys and the page values
//! exchanged with the history backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Backend-assigned message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Ordering key of a message: timestamp first, identifier breaks ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub timestamp: DateTime<Utc>,
    pub id: MessageId,
}

impl MessageKey {
    pub fn new(timestamp: DateTime<Utc>, id: MessageId) -> Self {
        Self { timestamp, id }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.timestamp.to_rfc3339())
    }
}

/// Where a message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Regular chat line from a user
    User { nick: String },
    /// Server notice or status line
    Server,
    /// Membership or mode event (join, part, quit, topic, ...)
    Event { nick: String, event: String },
}

/// Immutable chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub origin: MessageOrigin,
    pub body: String,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        timestamp: DateTime<Utc>,
        origin: MessageOrigin,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            origin,
            body: body.into(),
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.timestamp, self.id)
    }
}

/// One conversation on one server connection
///
/// A `None` channel is the server-status stream of that connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub server: Uuid,
    pub channel: Option<String>,
}

impl ConversationId {
    pub fn channel(server: Uuid, channel: impl Into<String>) -> Self {
        Self {
            server,
            channel: Some(channel.into()),
        }
    }

    pub fn server_status(server: Uuid) -> Self {
        Self {
            server,
            channel: None,
        }
    }

    pub fn is_server_status(&self) -> bool {
        self.channel.is_none()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}/{}", self.server, channel),
            None => write!(f, "{}/<status>", self.server),
        }
    }
}

/// Temporal direction of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Older,
    Newer,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Older => "older",
            Self::Newer => "newer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starting point of a backend fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The live edge of the conversation
    Live,
    /// Inclusive of the keyed message
    At(MessageKey),
    /// Strictly past the keyed message in the fetch direction.
    /// Backends may still echo the keyed message back.
    Beyond(MessageKey),
}

/// Where the initial window is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialAnchor {
    /// Most recent messages
    #[default]
    Latest,
    /// Messages around a specific message (deep link)
    Around(MessageKey),
}

/// A paging request, built from the window edge at issue time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub direction: Direction,
    pub anchor: Anchor,
    pub limit: usize,
}

/// One page returned by the backend, messages ascending by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// No more history exists past this page in the fetched direction
    pub is_boundary: bool,
}

impl Page {
    pub fn new(messages: Vec<Message>, is_boundary: bool) -> Self {
        Self {
            messages,
            is_boundary,
        }
    }

    pub fn empty_boundary() -> Self {
        Self::new(Vec::new(), true)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Page used to seed a window, with completeness in both directions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialPage {
    pub messages: Vec<Message>,
    pub reached_oldest: bool,
    pub reached_newest: bool,
}

/// Per-direction pagination state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Exhausted,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading",
            Self::Exhausted => "Exhausted",
        }
    }
}
