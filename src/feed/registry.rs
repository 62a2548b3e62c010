//! Open conversation feeds, one controller per conversation view

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::config::FeedConfig;
use crate::core::errors::FeedError;
use crate::core::traits::HistoryBackend;
use crate::core::types::{ConversationId, InitialAnchor, Message};

use super::controller::PaginationController;
use super::events::FeedEvent;
use super::trigger::{ProximityTrigger, TriggerDecision, VisibleRange};

/// Manages the feeds of open conversation views
pub struct FeedRegistry {
    feeds: DashMap<ConversationId, PaginationController>,
    backend: Arc<dyn HistoryBackend>,
    config: FeedConfig,
    trigger: ProximityTrigger,
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl FeedRegistry {
    pub fn new(
        backend: Arc<dyn HistoryBackend>,
        config: FeedConfig,
        events: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        let trigger = ProximityTrigger::from_config(&config.trigger);
        Self {
            feeds: DashMap::new(),
            backend,
            config,
            trigger,
            events,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// A conversation view opened
    ///
    /// Creates the feed and starts its initial load in the background.
    /// Opening an already open conversation returns the existing feed,
    /// restarting its initial load if that failed. Must be called from within
    /// a tokio runtime.
    pub fn open(
        &self,
        conversation: ConversationId,
        anchor: InitialAnchor,
    ) -> PaginationController {
        if let Some(existing) = self.feeds.get(&conversation).map(|entry| entry.clone()) {
            existing.retry_initial();
            return existing;
        }

        self.feeds
            .entry(conversation.clone())
            .or_insert_with(|| {
                tracing::info!(%conversation, "Opening feed");
                let controller = PaginationController::new(
                    conversation.clone(),
                    Arc::clone(&self.backend),
                    self.config.pagination.clone(),
                    self.events.clone(),
                );
                controller.start_initial(anchor);
                controller
            })
            .clone()
    }

    pub fn get(&self, conversation: &ConversationId) -> Result<PaginationController, FeedError> {
        self.feeds
            .get(conversation)
            .map(|entry| entry.clone())
            .ok_or_else(|| FeedError::ConversationNotOpen(conversation.clone()))
    }

    pub fn is_open(&self, conversation: &ConversationId) -> bool {
        self.feeds.contains_key(conversation)
    }

    /// The view reported a new visible range
    ///
    /// A feed whose initial load failed has nothing to page from; the report
    /// restarts that load instead.
    pub fn report_visible(
        &self,
        conversation: &ConversationId,
        range: VisibleRange,
    ) -> Result<TriggerDecision, FeedError> {
        let controller = self.get(conversation)?;
        if !controller.is_loaded() {
            controller.retry_initial();
            return Ok(TriggerDecision::default());
        }
        Ok(self.trigger.apply(&controller, range))
    }

    /// Route a live message to its feed, if that conversation is open
    pub fn ingest_live(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<bool, FeedError> {
        match self.feeds.get(conversation).map(|entry| entry.clone()) {
            Some(controller) => controller.ingest_live(message),
            None => Ok(false),
        }
    }

    /// A conversation view closed; returns whether it was open
    pub fn close(&self, conversation: &ConversationId) -> bool {
        match self.feeds.remove(conversation) {
            Some((_, controller)) => {
                controller.close();
                true
            }
            None => false,
        }
    }

    /// Close every open feed
    pub fn close_all(&self) {
        for conversation in self.open_conversations() {
            self.close(&conversation);
        }
    }

    pub fn open_conversations(&self) -> Vec<ConversationId> {
        self.feeds.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Drop for FeedRegistry {
    fn drop(&mut self) {
        for entry in self.feeds.iter() {
            entry.value().close();
        }
    }
}
