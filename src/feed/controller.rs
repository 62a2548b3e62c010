//! Pagination Controller - fetch orchestration for one conversation
//!
//! Each direction runs its own state machine (Idle -> Loading -> Idle or
//! Exhausted). The window, both direction states, the load epoch and the
//! closed flag share one mutex that is never held across an `.await`, so
//! older and newer fetches proceed concurrently while merges are serialized.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::PaginationConfig;
use crate::core::errors::FeedError;
use crate::core::traits::HistoryBackend;
use crate::core::types::{
    Anchor, ConversationId, Direction, FetchRequest, InitialAnchor, LoadState, Message, Page,
};
use crate::core::window::{MessageWindow, WindowSnapshot};

use super::events::FeedEvent;

/// Result of one completed paging fetch
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub added: usize,
    pub trimmed: usize,
    /// Direction state after the merge
    pub state: LoadState,
    pub snapshot: WindowSnapshot,
}

/// A fetch issued under a given epoch
#[derive(Debug, Clone)]
struct FetchTicket {
    epoch: u64,
    request: FetchRequest,
}

#[derive(Debug, Default)]
struct DirectionState {
    load: LoadState,
    task: Option<JoinHandle<()>>,
}

impl DirectionState {
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct FeedState {
    window: MessageWindow,
    older: DirectionState,
    newer: DirectionState,
    /// Bumped by every initial load; completions from an older epoch are stale
    epoch: u64,
    /// An initial load of the current epoch is running
    initializing: bool,
    /// Anchor of the most recent initial load, reused when retrying it
    initial_anchor: InitialAnchor,
    loaded: bool,
    closed: bool,
    initial_task: Option<JoinHandle<()>>,
    /// Live messages that arrived while a fetch toward the live edge was in
    /// flight; applied if that fetch lands on the live edge
    pending_live: Vec<Message>,
}

impl FeedState {
    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Older => &mut self.older,
            Direction::Newer => &mut self.newer,
        }
    }

    fn direction(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Older => &self.older,
            Direction::Newer => &self.newer,
        }
    }

    fn abort_all(&mut self) {
        if let Some(task) = self.initial_task.take() {
            task.abort();
        }
        self.older.abort();
        self.newer.abort();
    }
}

struct ControllerInner {
    conversation: ConversationId,
    backend: Arc<dyn HistoryBackend>,
    config: PaginationConfig,
    state: Mutex<FeedState>,
    events: mpsc::UnboundedSender<FeedEvent>,
}

/// Orchestrates history fetches for one conversation and merges them into
/// its window
///
/// Cloning is cheap and every clone drives the same feed. The controller is
/// the only writer of its window; readers get [`WindowSnapshot`]s.
#[derive(Clone)]
pub struct PaginationController {
    inner: Arc<ControllerInner>,
}

impl PaginationController {
    pub fn new(
        conversation: ConversationId,
        backend: Arc<dyn HistoryBackend>,
        config: PaginationConfig,
        events: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                conversation,
                backend,
                config,
                state: Mutex::new(FeedState {
                    window: MessageWindow::new(),
                    older: DirectionState::default(),
                    newer: DirectionState::default(),
                    epoch: 0,
                    initializing: false,
                    initial_anchor: InitialAnchor::default(),
                    loaded: false,
                    closed: false,
                    initial_task: None,
                    pending_live: Vec::new(),
                }),
                events,
            }),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.inner.conversation
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.lock().window.snapshot()
    }

    /// Current window length
    pub fn len(&self) -> usize {
        self.lock().window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().window.is_empty()
    }

    pub fn state(&self, direction: Direction) -> LoadState {
        self.lock().direction(direction).load
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Load the window that the view opens on
    ///
    /// Starts a new epoch: paging fetches still in flight from a previous
    /// load complete as stale and are dropped.
    pub async fn load_initial(&self, anchor: InitialAnchor) -> Result<WindowSnapshot, FeedError> {
        let epoch = {
            let mut state = self.lock();
            if state.closed {
                return Err(FeedError::Closed);
            }
            state.epoch += 1;
            state.initializing = true;
            state.initial_anchor = anchor;
            state.loaded = false;
            state.older.abort();
            state.newer.abort();
            state.older.load = LoadState::Idle;
            state.newer.load = LoadState::Idle;
            state.epoch
        };

        let limit = self.inner.config.initial_page_size;
        tracing::debug!(
            conversation = %self.inner.conversation,
            ?anchor,
            limit,
            "Loading initial window"
        );

        let result = self
            .inner
            .backend
            .fetch_initial(&self.inner.conversation, anchor, limit)
            .await;

        let mut state = self.lock();
        if state.closed || state.epoch != epoch {
            tracing::debug!(conversation = %self.inner.conversation, "Dropping stale initial load");
            return Err(FeedError::StaleCompletion);
        }
        state.initial_task = None;
        state.initializing = false;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                state.pending_live.clear();
                tracing::warn!(
                    conversation = %self.inner.conversation,
                    "Initial load failed: {:#}",
                    e
                );
                self.emit(FeedEvent::FetchFailed {
                    conversation: self.inner.conversation.clone(),
                    direction: None,
                    error: e.to_string(),
                    retryable: true,
                });
                return Err(FeedError::FetchFailure {
                    request: "initial",
                    message: e.to_string(),
                });
            }
        };

        if let Err(violation) = state.window.initialize(page) {
            state.pending_live.clear();
            self.report_anomaly(&violation);
            return Err(violation);
        }

        state.loaded = true;
        self.settle_pending_live(&mut state);
        for direction in [Direction::Older, Direction::Newer] {
            let exhausted = !state.window.has_more(direction);
            state.direction_mut(direction).load = if exhausted {
                LoadState::Exhausted
            } else {
                LoadState::Idle
            };
        }

        let snapshot = state.window.snapshot();
        tracing::debug!(
            conversation = %self.inner.conversation,
            count = snapshot.len(),
            has_older = snapshot.has_older,
            has_newer = snapshot.has_newer,
            "Initial window loaded"
        );
        self.emit(FeedEvent::Initialized {
            conversation: self.inner.conversation.clone(),
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Run [`load_initial`](Self::load_initial) in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_initial(&self, anchor: InitialAnchor) {
        let mut state = self.lock();
        self.spawn_initial(&mut state, anchor);
    }

    /// Restart the initial load if it failed and nothing is loading
    ///
    /// Uses the anchor of the last initial load. Returns whether a load was
    /// started. Must be called from within a tokio runtime.
    pub fn retry_initial(&self) -> bool {
        let mut state = self.lock();
        if state.closed || state.loaded || state.initializing {
            return false;
        }
        let anchor = state.initial_anchor;
        tracing::debug!(
            conversation = %self.inner.conversation,
            ?anchor,
            "Retrying initial load"
        );
        self.spawn_initial(&mut state, anchor)
    }

    /// The task is created under the lock so its handle is stored before it
    /// can complete
    fn spawn_initial(&self, state: &mut FeedState, anchor: InitialAnchor) -> bool {
        if state.closed {
            return false;
        }
        // Claim the load now so a retry racing the spawned task sees it
        state.initializing = true;
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let _ = controller.load_initial(anchor).await;
        });
        if let Some(previous) = state.initial_task.replace(handle) {
            previous.abort();
        }
        true
    }

    /// Ask for more history in `direction` without waiting for it
    ///
    /// Issues a fetch only when the direction is `Idle`; otherwise this is a
    /// no-op. Returns whether a fetch was issued. Must be called from within
    /// a tokio runtime.
    pub fn request_more(&self, direction: Direction) -> bool {
        let mut state = self.lock();
        let ticket = match self.begin_fetch(&mut state, direction) {
            Ok(ticket) => ticket,
            Err(_) => return false,
        };

        // Spawned under the lock: the completion cannot clear the handle
        // before it is stored
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let _ = controller.run_fetch(ticket).await;
        });
        state.direction_mut(direction).task = Some(handle);
        true
    }

    /// Fetch and merge one page in `direction`, waiting for the result
    ///
    /// Follows the same state machine as [`request_more`](Self::request_more);
    /// a call that would be a no-op returns `Busy`, `Exhausted`, `NotLoaded`
    /// or `Closed` instead.
    pub async fn load_more(&self, direction: Direction) -> Result<LoadOutcome, FeedError> {
        let ticket = {
            let mut state = self.lock();
            self.begin_fetch(&mut state, direction)?
        };
        self.run_fetch(ticket).await
    }

    /// Merge a message that arrived on the live connection
    ///
    /// Applies only while the window is at the live edge; returns whether the
    /// message was added. While the initial load or a newer fetch is in
    /// flight the message is held back, since that fetch may have read the
    /// log before the message existed; it is applied if the fetch lands on
    /// the live edge.
    pub fn ingest_live(&self, message: Message) -> Result<bool, FeedError> {
        let mut state = self.lock();
        if state.closed {
            return Err(FeedError::Closed);
        }
        if !state.loaded || state.newer.load == LoadState::Loading {
            if !state.pending_live.iter().any(|m| m.id == message.id) {
                tracing::trace!(
                    conversation = %self.inner.conversation,
                    id = %message.id,
                    "Holding live message until fetch completes"
                );
                state.pending_live.push(message);
            }
            return Ok(false);
        }

        match state.window.push_live(message) {
            Ok(true) => {
                self.emit(FeedEvent::Updated {
                    conversation: self.inner.conversation.clone(),
                    direction: Direction::Newer,
                    snapshot: state.window.snapshot(),
                });
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(violation) => {
                self.report_anomaly(&violation);
                Err(violation)
            }
        }
    }

    /// Close the feed: abort in-flight fetches and drop their results
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.abort_all();
        drop(state);

        tracing::info!(conversation = %self.inner.conversation, "Feed closed");
        self.emit(FeedEvent::Closed {
            conversation: self.inner.conversation.clone(),
        });
    }

    /// Idle -> Loading, with the anchor read from the window edge right now
    fn begin_fetch(
        &self,
        state: &mut FeedState,
        direction: Direction,
    ) -> Result<FetchTicket, FeedError> {
        if state.closed {
            return Err(FeedError::Closed);
        }
        if !state.loaded {
            return Err(FeedError::NotLoaded);
        }

        match state.direction(direction).load {
            LoadState::Loading => return Err(FeedError::Busy(direction)),
            LoadState::Exhausted => return Err(FeedError::Exhausted(direction)),
            LoadState::Idle => {}
        }
        if !state.window.has_more(direction) {
            state.direction_mut(direction).load = LoadState::Exhausted;
            return Err(FeedError::Exhausted(direction));
        }

        let anchor = state
            .window
            .edge_key(direction)
            .map(Anchor::Beyond)
            .unwrap_or(Anchor::Live);
        let request = FetchRequest {
            direction,
            anchor,
            limit: self.inner.config.page_size(direction),
        };
        state.direction_mut(direction).load = LoadState::Loading;

        tracing::debug!(
            conversation = %self.inner.conversation,
            %direction,
            ?anchor,
            limit = request.limit,
            "Fetch issued"
        );
        Ok(FetchTicket {
            epoch: state.epoch,
            request,
        })
    }

    async fn run_fetch(&self, ticket: FetchTicket) -> Result<LoadOutcome, FeedError> {
        let request = &ticket.request;
        let result = self
            .inner
            .backend
            .fetch(
                &self.inner.conversation,
                request.direction,
                request.anchor,
                request.limit,
            )
            .await;
        self.complete_fetch(ticket, result)
    }

    /// Loading -> Idle or Exhausted, merging the page when there is one
    fn complete_fetch(
        &self,
        ticket: FetchTicket,
        result: anyhow::Result<Page>,
    ) -> Result<LoadOutcome, FeedError> {
        let direction = ticket.request.direction;
        let mut state = self.lock();
        if state.closed || state.epoch != ticket.epoch {
            tracing::debug!(
                conversation = %self.inner.conversation,
                %direction,
                "Dropping stale fetch completion"
            );
            return Err(FeedError::StaleCompletion);
        }
        state.direction_mut(direction).task = None;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                state.direction_mut(direction).load = LoadState::Idle;
                if direction == Direction::Newer {
                    state.pending_live.clear();
                }
                tracing::warn!(
                    conversation = %self.inner.conversation,
                    %direction,
                    "Fetch failed, will retry on next trigger: {:#}",
                    e
                );
                self.emit(FeedEvent::FetchFailed {
                    conversation: self.inner.conversation.clone(),
                    direction: Some(direction),
                    error: e.to_string(),
                    retryable: true,
                });
                return Err(FeedError::FetchFailure {
                    request: direction.as_str(),
                    message: e.to_string(),
                });
            }
        };

        let limit = ticket.request.limit;
        let merged = match direction {
            Direction::Older => state.window.merge_older(page, limit),
            Direction::Newer => state.window.merge_newer(page, limit),
        };
        let outcome = match merged {
            Ok(outcome) => outcome,
            Err(violation) => {
                state.direction_mut(direction).load = LoadState::Idle;
                if direction == Direction::Newer {
                    state.pending_live.clear();
                }
                self.report_anomaly(&violation);
                return Err(violation);
            }
        };
        if direction == Direction::Newer {
            self.settle_pending_live(&mut state);
        }

        let exhausted = outcome.reached_end || !state.window.has_more(direction);
        let next = if exhausted {
            LoadState::Exhausted
        } else {
            LoadState::Idle
        };
        state.direction_mut(direction).load = next;

        let snapshot = state.window.snapshot();
        tracing::debug!(
            conversation = %self.inner.conversation,
            %direction,
            added = outcome.added,
            trimmed = outcome.trimmed,
            count = snapshot.len(),
            state = next.as_str(),
            "Fetch merged"
        );
        self.emit(FeedEvent::Updated {
            conversation: self.inner.conversation.clone(),
            direction,
            snapshot: snapshot.clone(),
        });
        if exhausted {
            self.emit(FeedEvent::Exhausted {
                conversation: self.inner.conversation.clone(),
                direction,
            });
        }

        Ok(LoadOutcome {
            added: outcome.added,
            trimmed: outcome.trimmed,
            state: next,
            snapshot,
        })
    }

    /// Apply held live messages if the window now sits at the live edge
    ///
    /// Otherwise they are dropped: later newer fetches read the log after
    /// they arrived and will return them.
    fn settle_pending_live(&self, state: &mut FeedState) {
        let mut pending = std::mem::take(&mut state.pending_live);
        if state.window.has_newer() {
            return;
        }
        pending.sort_by_key(Message::key);
        for message in pending {
            if let Err(violation) = state.window.push_live(message) {
                self.report_anomaly(&violation);
            }
        }
    }

    fn report_anomaly(&self, violation: &FeedError) {
        tracing::warn!(
            conversation = %self.inner.conversation,
            "Backend page rejected: {}",
            violation
        );
        self.emit(FeedEvent::Anomaly {
            conversation: self.inner.conversation.clone(),
            error: violation.to_string(),
        });
    }

    fn emit(&self, event: FeedEvent) {
        let _ = self.inner.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PaginationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationController")
            .field("conversation", &self.inner.conversation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{InitialPage, MessageOrigin};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    fn msg(id: u64) -> Message {
        Message::new(
            id,
            Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
            MessageOrigin::User {
                nick: "bob".to_string(),
            },
            format!("line {}", id),
        )
    }

    fn msgs(ids: &[u64]) -> Vec<Message> {
        ids.iter().copied().map(msg).collect()
    }

    /// Backend replaying scripted pages; fetches block until the gate opens
    struct ScriptedBackend {
        initial: Mutex<Option<InitialPage>>,
        older: Mutex<VecDeque<anyhow::Result<Page>>>,
        newer: Mutex<VecDeque<anyhow::Result<Page>>>,
        requests: Mutex<Vec<FetchRequest>>,
        calls: AtomicUsize,
        gate: Semaphore,
    }

    impl ScriptedBackend {
        fn new(initial: InitialPage) -> Self {
            Self {
                initial: Mutex::new(Some(initial)),
                older: Mutex::new(VecDeque::new()),
                newer: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            }
        }

        /// Fetches wait for `release` from now on
        fn closed_gate(self) -> Self {
            self.gate.forget_permits(Semaphore::MAX_PERMITS);
            self
        }

        fn push(&self, direction: Direction, page: anyhow::Result<Page>) {
            let queue = match direction {
                Direction::Older => &self.older,
                Direction::Newer => &self.newer,
            };
            queue.lock().unwrap().push_back(page);
        }

        fn release(&self, fetches: usize) {
            self.gate.add_permits(fetches);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HistoryBackend for ScriptedBackend {
        async fn fetch(
            &self,
            _conversation: &ConversationId,
            direction: Direction,
            anchor: Anchor,
            limit: usize,
        ) -> anyhow::Result<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(FetchRequest {
                direction,
                anchor,
                limit,
            });
            self.gate.acquire().await?.forget();

            let queue = match direction {
                Direction::Older => &self.older,
                Direction::Newer => &self.newer,
            };
            let next = queue.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Page::empty_boundary()))
        }

        async fn fetch_initial(
            &self,
            _conversation: &ConversationId,
            _anchor: InitialAnchor,
            _limit: usize,
        ) -> anyhow::Result<InitialPage> {
            let initial = self.initial.lock().unwrap().take();
            initial.ok_or_else(|| anyhow::anyhow!("initial page already served"))
        }
    }

    fn initial(ids: &[u64]) -> InitialPage {
        InitialPage {
            messages: msgs(ids),
            reached_oldest: false,
            reached_newest: true,
        }
    }

    fn config(page_size: usize) -> PaginationConfig {
        PaginationConfig {
            older_page_size: page_size,
            newer_page_size: page_size,
            initial_page_size: page_size,
        }
    }

    fn controller(
        backend: Arc<ScriptedBackend>,
        page_size: usize,
    ) -> (PaginationController, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conversation = ConversationId::channel(Uuid::nil(), "#test");
        (
            PaginationController::new(conversation, backend, config(page_size), tx),
            rx,
        )
    }

    fn ids(snapshot: &WindowSnapshot) -> Vec<u64> {
        snapshot.messages.iter().map(|m| m.id.0).collect()
    }

    async fn wait_for_calls(backend: &ScriptedBackend, calls: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while backend.calls() < calls {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("fetch was never issued");
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<FeedEvent>) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_initial_load_seeds_direction_states() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11, 12])));
        let (controller, mut rx) = controller(backend, 3);

        let snapshot = controller.load_initial(InitialAnchor::Latest).await.unwrap();

        assert_eq!(ids(&snapshot), vec![10, 11, 12]);
        assert_eq!(controller.state(Direction::Older), LoadState::Idle);
        assert_eq!(controller.state(Direction::Newer), LoadState::Exhausted);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::Initialized { .. }]
        ));
    }

    #[tokio::test]
    async fn test_older_paging_scenario() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11, 12])));
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9, 10]), false)));
        backend.push(Direction::Older, Ok(Page::empty_boundary()));
        let (controller, _rx) = controller(backend.clone(), 3);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        let first = controller.load_more(Direction::Older).await.unwrap();
        assert_eq!(ids(&first.snapshot), vec![8, 9, 10, 11, 12]);
        assert!(first.snapshot.has_older);
        assert_eq!(first.state, LoadState::Idle);

        let second = controller.load_more(Direction::Older).await.unwrap();
        assert_eq!(ids(&second.snapshot), vec![8, 9, 10, 11, 12]);
        assert!(!second.snapshot.has_older);
        assert_eq!(second.state, LoadState::Exhausted);
        assert_eq!(controller.state(Direction::Older), LoadState::Exhausted);
    }

    #[tokio::test]
    async fn test_anchor_is_read_from_current_edge() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11, 12])));
        backend.push(Direction::Older, Ok(Page::new(msgs(&[7, 8, 9]), false)));
        let (controller, _rx) = controller(backend.clone(), 3);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        controller.load_more(Direction::Older).await.unwrap();
        controller.load_more(Direction::Older).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[0].anchor, Anchor::Beyond(msg(10).key()));
        assert_eq!(requests[1].anchor, Anchor::Beyond(msg(7).key()));
        assert_eq!(requests[1].limit, 3);
    }

    #[tokio::test]
    async fn test_duplicate_request_while_loading_issues_one_fetch() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11, 12])).closed_gate());
        backend.push(Direction::Older, Ok(Page::new(msgs(&[7, 8, 9]), false)));
        let (controller, _rx) = controller(backend.clone(), 3);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        assert!(controller.request_more(Direction::Older));
        assert!(!controller.request_more(Direction::Older));
        wait_for_calls(&backend, 1).await;
        assert!(!controller.request_more(Direction::Older));
        assert!(matches!(
            controller.load_more(Direction::Older).await,
            Err(FeedError::Busy(Direction::Older))
        ));

        backend.release(1);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while controller.state(Direction::Older) == LoadState::Loading {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(ids(&controller.snapshot()), vec![7, 8, 9, 10, 11, 12]);
    }

    #[tokio::test]
    async fn test_exhausted_direction_never_fetches_again() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10])));
        backend.push(Direction::Older, Ok(Page::new(msgs(&[9]), true)));
        let (controller, _rx) = controller(backend.clone(), 3);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        controller.load_more(Direction::Older).await.unwrap();
        assert_eq!(controller.state(Direction::Older), LoadState::Exhausted);

        for _ in 0..5 {
            assert!(!controller.request_more(Direction::Older));
        }
        assert!(matches!(
            controller.load_more(Direction::Older).await,
            Err(FeedError::Exhausted(Direction::Older))
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_to_idle() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11])));
        backend.push(Direction::Older, Err(anyhow::anyhow!("connection reset")));
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9]), false)));
        let (controller, mut rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        let err = controller.load_more(Direction::Older).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(controller.state(Direction::Older), LoadState::Idle);
        assert_eq!(ids(&controller.snapshot()), vec![10, 11]);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::FetchFailed {
                direction: Some(Direction::Older),
                retryable: true,
                ..
            }]
        ));

        let retry = controller.load_more(Direction::Older).await.unwrap();
        assert_eq!(ids(&retry.snapshot), vec![8, 9, 10, 11]);
    }

    #[tokio::test]
    async fn test_ordering_violation_leaves_window_intact() {
        let mut seed = initial(&[10, 11, 12]);
        seed.reached_newest = false;
        let backend = Arc::new(ScriptedBackend::new(seed));
        backend.push(Direction::Newer, Ok(Page::new(msgs(&[9, 13]), false)));
        let (controller, mut rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        let err = controller.load_more(Direction::Newer).await.unwrap_err();
        assert!(matches!(err, FeedError::OrderingViolation { .. }));
        assert_eq!(ids(&controller.snapshot()), vec![10, 11, 12]);
        assert_eq!(controller.state(Direction::Newer), LoadState::Idle);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::Anomaly { .. }]
        ));
    }

    #[tokio::test]
    async fn test_older_and_newer_fetches_run_concurrently() {
        let mut seed = initial(&[10, 11]);
        seed.reached_newest = false;
        let backend = Arc::new(ScriptedBackend::new(seed).closed_gate());
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9]), false)));
        backend.push(Direction::Newer, Ok(Page::new(msgs(&[12, 13]), false)));
        let (controller, _rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        let older = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_more(Direction::Older).await }
        });
        let newer = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_more(Direction::Newer).await }
        });
        wait_for_calls(&backend, 2).await;
        assert_eq!(controller.state(Direction::Older), LoadState::Loading);
        assert_eq!(controller.state(Direction::Newer), LoadState::Loading);

        backend.release(2);
        older.await.unwrap().unwrap();
        newer.await.unwrap().unwrap();

        assert_eq!(ids(&controller.snapshot()), vec![8, 9, 10, 11, 12, 13]);
    }

    #[tokio::test]
    async fn test_completion_after_close_is_dropped() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11])).closed_gate());
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9]), false)));
        let (controller, mut rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        let before = controller.snapshot();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_more(Direction::Older).await }
        });
        wait_for_calls(&backend, 1).await;
        controller.close();
        drain(&mut rx);

        backend.release(1);
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(FeedError::StaleCompletion)));
        let after = controller.snapshot();
        assert_eq!(ids(&after), ids(&before));
        assert_eq!(after.revision, before.revision);
        assert!(drain(&mut rx).is_empty());
        assert!(!controller.request_more(Direction::Older));
    }

    #[tokio::test]
    async fn test_reload_makes_in_flight_fetch_stale() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11])).closed_gate());
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9]), false)));
        let (controller, _rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_more(Direction::Older).await }
        });
        wait_for_calls(&backend, 1).await;

        *backend.initial.lock().unwrap() = Some(initial(&[20, 21]));
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        backend.release(1);

        assert!(matches!(
            pending.await.unwrap(),
            Err(FeedError::StaleCompletion)
        ));
        assert_eq!(ids(&controller.snapshot()), vec![20, 21]);
        assert_eq!(controller.state(Direction::Older), LoadState::Idle);
    }

    #[tokio::test]
    async fn test_paging_before_initial_load_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1])));
        let (controller, _rx) = controller(backend.clone(), 2);

        assert!(!controller.request_more(Direction::Older));
        assert!(matches!(
            controller.load_more(Direction::Older).await,
            Err(FeedError::NotLoaded)
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_initial_failure_is_reported_and_retryable() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1])));
        backend.initial.lock().unwrap().take();
        let (controller, mut rx) = controller(backend.clone(), 2);

        let err = controller
            .load_initial(InitialAnchor::Latest)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(!controller.is_loaded());
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::FetchFailed {
                direction: None,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_ingest_live_at_live_edge() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1, 2])));
        let (controller, mut rx) = controller(backend, 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        assert!(controller.ingest_live(msg(3)).unwrap());
        assert!(!controller.ingest_live(msg(3)).unwrap());
        assert!(controller.ingest_live(msg(0)).is_err());

        assert_eq!(ids(&controller.snapshot()), vec![1, 2, 3]);
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [
                FeedEvent::Updated {
                    direction: Direction::Newer,
                    ..
                },
                FeedEvent::Anomaly { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn test_live_message_during_newer_fetch_reaching_live_edge() {
        let mut seed = initial(&[10, 11]);
        seed.reached_newest = false;
        let backend = Arc::new(ScriptedBackend::new(seed).closed_gate());
        // Read before m13 existed
        backend.push(Direction::Newer, Ok(Page::new(msgs(&[12]), true)));
        let (controller, mut rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        assert!(controller.request_more(Direction::Newer));
        wait_for_calls(&backend, 1).await;
        assert!(!controller.ingest_live(msg(13)).unwrap());
        assert!(!controller.ingest_live(msg(13)).unwrap());

        backend.release(1);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while controller.state(Direction::Newer) == LoadState::Loading {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(ids(&controller.snapshot()), vec![10, 11, 12, 13]);
        assert_eq!(controller.state(Direction::Newer), LoadState::Exhausted);
        match drain(&mut rx).as_slice() {
            [FeedEvent::Updated { snapshot, .. }, FeedEvent::Exhausted { .. }] => {
                assert_eq!(ids(snapshot), vec![10, 11, 12, 13]);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_live_message_left_to_paging_when_fetch_stops_short_of_live_edge() {
        let mut seed = initial(&[10, 11]);
        seed.reached_newest = false;
        let backend = Arc::new(ScriptedBackend::new(seed).closed_gate());
        backend.push(Direction::Newer, Ok(Page::new(msgs(&[12, 13]), false)));
        backend.push(Direction::Newer, Ok(Page::new(msgs(&[14]), true)));
        let (controller, _rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_more(Direction::Newer).await }
        });
        wait_for_calls(&backend, 1).await;
        assert!(!controller.ingest_live(msg(14)).unwrap());
        backend.release(1);
        pending.await.unwrap().unwrap();
        assert_eq!(ids(&controller.snapshot()), vec![10, 11, 12, 13]);

        backend.release(1);
        controller.load_more(Direction::Newer).await.unwrap();
        assert_eq!(ids(&controller.snapshot()), vec![10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn test_live_message_before_initial_load_is_applied_at_live_edge() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1, 2])));
        let (controller, mut rx) = controller(backend, 2);

        assert!(!controller.ingest_live(msg(3)).unwrap());
        let snapshot = controller.load_initial(InitialAnchor::Latest).await.unwrap();

        assert_eq!(ids(&snapshot), vec![1, 2, 3]);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::Initialized { .. }]
        ));
    }

    #[tokio::test]
    async fn test_retry_initial_after_failure() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1])));
        let seed = backend.initial.lock().unwrap().take();
        let (controller, _rx) = controller(backend.clone(), 2);
        assert!(controller.load_initial(InitialAnchor::Latest).await.is_err());

        *backend.initial.lock().unwrap() = seed;
        assert!(controller.retry_initial());
        assert!(!controller.retry_initial());

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !controller.is_loaded() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(ids(&controller.snapshot()), vec![1]);
        assert!(!controller.retry_initial());
    }

    #[tokio::test]
    async fn test_request_more_then_close_drops_result() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[10, 11])).closed_gate());
        backend.push(Direction::Older, Ok(Page::new(msgs(&[8, 9]), false)));
        let (controller, mut rx) = controller(backend.clone(), 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        assert!(controller.request_more(Direction::Older));
        wait_for_calls(&backend, 1).await;
        controller.close();
        backend.release(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(ids(&controller.snapshot()), vec![10, 11]);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [FeedEvent::Closed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_close_emits_once_and_rejects_further_work() {
        let backend = Arc::new(ScriptedBackend::new(initial(&[1])));
        let (controller, mut rx) = controller(backend, 2);
        controller.load_initial(InitialAnchor::Latest).await.unwrap();
        drain(&mut rx);

        controller.close();
        controller.close();

        assert!(controller.is_closed());
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(matches!(
            controller.load_initial(InitialAnchor::Latest).await,
            Err(FeedError::Closed)
        ));
        assert!(matches!(
            controller.ingest_live(msg(5)),
            Err(FeedError::Closed)
        ));
    }
}
