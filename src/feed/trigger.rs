//! Scroll-Proximity Trigger
//!
//! Turns the consumer's visible index range into paging requests. The
//! trigger holds no state of its own: repeated calls while a fetch is
//! outstanding are absorbed by the controller's state machine.

use serde::{Deserialize, Serialize};

use crate::config::TriggerConfig;
use crate::core::types::Direction;

use super::controller::PaginationController;

/// Inclusive range of window indices currently on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRange {
    pub first: usize,
    pub last: usize,
}

impl VisibleRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }
}

/// Which edges want more history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerDecision {
    pub older: bool,
    pub newer: bool,
}

impl TriggerDecision {
    pub fn any(&self) -> bool {
        self.older || self.newer
    }
}

/// Something the trigger can ask for more pages
pub trait PageRequester {
    /// Current length of the window the visible range indexes into
    fn window_len(&self) -> usize;

    /// Returns whether a fetch was actually issued
    fn request_more(&self, direction: Direction) -> bool;
}

impl PageRequester for PaginationController {
    fn window_len(&self) -> usize {
        self.len()
    }

    fn request_more(&self, direction: Direction) -> bool {
        PaginationController::request_more(self, direction)
    }
}

/// Requests older/newer pages when the visible range nears either edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityTrigger {
    older_threshold: usize,
    newer_threshold: usize,
}

impl ProximityTrigger {
    /// Same threshold, in items from the edge, for both directions
    pub fn new(threshold: usize) -> Self {
        Self::with_thresholds(threshold, threshold)
    }

    pub fn with_thresholds(older_threshold: usize, newer_threshold: usize) -> Self {
        Self {
            older_threshold,
            newer_threshold,
        }
    }

    pub fn from_config(config: &TriggerConfig) -> Self {
        Self::with_thresholds(
            config.threshold(Direction::Older),
            config.threshold(Direction::Newer),
        )
    }

    pub fn threshold(&self, direction: Direction) -> usize {
        match direction {
            Direction::Older => self.older_threshold,
            Direction::Newer => self.newer_threshold,
        }
    }

    /// Decide which edges are near, given the window length
    ///
    /// An empty window never triggers; the initial load owns that case.
    pub fn evaluate(&self, range: VisibleRange, len: usize) -> TriggerDecision {
        if len == 0 {
            return TriggerDecision::default();
        }
        TriggerDecision {
            older: range.first <= self.older_threshold,
            newer: range.last.saturating_add(self.newer_threshold) >= len,
        }
    }

    /// Evaluate against the requester's current window and issue requests
    ///
    /// Returns the fetches that were actually issued.
    pub fn apply<R: PageRequester + ?Sized>(
        &self,
        requester: &R,
        range: VisibleRange,
    ) -> TriggerDecision {
        let wanted = self.evaluate(range, requester.window_len());
        let issued = TriggerDecision {
            older: wanted.older && requester.request_more(Direction::Older),
            newer: wanted.newer && requester.request_more(Direction::Newer),
        };
        if issued.any() {
            tracing::trace!(?range, ?issued, "Proximity trigger fired");
        }
        issued
    }
}

impl Default for ProximityTrigger {
    fn default() -> Self {
        Self::from_config(&TriggerConfig::default())
    }
}
