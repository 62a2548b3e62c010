//! Message feed - keeps a conversation view populated while scrolling
//!
//! ## Architecture
//!
//! - **PaginationController**: per-direction fetch state machine over one window
//! - **ProximityTrigger**: maps visible ranges to paging requests
//! - **FeedRegistry**: one controller per open conversation view
//! - **FeedEvent**: change notifications for the presentation layer

pub mod controller;
pub mod events;
pub mod registry;
pub mod trigger;

pub use controller::{LoadOutcome, PaginationController};
pub use events::FeedEvent;
pub use registry::FeedRegistry;
pub use trigger::{PageRequester, ProximityTrigger, TriggerDecision, VisibleRange};
