//! Reconnecting stream connector for a single workflow task.
//!
//! [`StreamConnector`] owns at most one live transport and at most one
//! pending reconnect timer. Raw messages are classified (heartbeat,
//! malformed, control, event), events are fanned out to listeners, and the
//! connector decides on its own when to retry, when to give up, and when the
//! remote workflow has reached a state that ends the stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use xrisk_stream::{ConnectorConfig, SseTransport, StreamConnector, TransportConfig};
//!
//! let config = ConnectorConfig::new("https://api.example.com".parse()?);
//! let transport = SseTransport::new(&TransportConfig::default())?;
//! let connector = StreamConnector::new(config, transport)?;
//!
//! let events = connector.on_event(|event| {
//!     println!("{:?}: {:?}", event.status(), event.message());
//! });
//! connector.connect("3f0c…")?;
//! // ...
//! events.unsubscribe();
//! connector.destroy();
//! ```
//!
//! # Delivery
//!
//! Notifications are queued under the state lock and drained in order by
//! one thread at a time, with no lock held while a listener runs. A call
//! from another thread waits for an in-progress delivery to finish, so
//! every notification it produced has been delivered when it returns.
//! Registering a listener goes through the same queue: the replay of the
//! current status or last event lands exactly where the registration was
//! made, and nothing queued earlier reaches the new listener twice.
//!
//! A listener may call back into the connector. Notifications produced by
//! that call, including the replay for a listener registered from inside a
//! callback, are delivered after the current listener returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectorConfig;
use crate::error::Error;
use crate::event::{Frame, WorkflowEvent};
use crate::listener::{DeliveryGate, ListenerSet, Subscription};
use crate::status::ConnectionStatus;
use crate::transport::{Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── StreamConnector ──────────────────────────────────────────────────

/// Manages a reconnecting event stream for one task at a time.
///
/// Cheaply cloneable; all clones share the same connection. Dropping the
/// last clone cancels the background pump and any pending reconnect.
#[derive(Clone)]
pub struct StreamConnector {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    delivery: DeliveryGate,
    event_listeners: Arc<ListenerSet<WorkflowEvent>>,
    status_listeners: Arc<ListenerSet<ConnectionStatus>>,
    event_tx: broadcast::Sender<Arc<WorkflowEvent>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

#[derive(Default)]
struct State {
    status: ConnectionStatus,
    task_id: Option<String>,
    last_event: Option<Arc<WorkflowEvent>>,
    attempts: u32,
    manual_close: bool,
    connection: Option<Connection>,
    reconnect: Option<PendingReconnect>,
    /// Bumped for every opened transport and every scheduled timer.
    generation: u64,
    outbox: VecDeque<Notification>,
}

/// The live transport. Cancelling the token stops its pump task, which
/// drops the transport stream and with it the connection.
struct Connection {
    generation: u64,
    cancel: CancellationToken,
    open: bool,
}

impl Connection {
    fn close(self) {
        self.cancel.cancel();
    }
}

struct PendingReconnect {
    generation: u64,
    cancel: CancellationToken,
}

enum Notification {
    Event(Arc<WorkflowEvent>),
    Status(ConnectionStatus),
    /// A new event listener goes live, replaying the event current at
    /// registration.
    EventListenerReady {
        id: u64,
        replay: Option<Arc<WorkflowEvent>>,
    },
    StatusListenerReady {
        id: u64,
        replay: ConnectionStatus,
    },
}

impl StreamConnector {
    /// Create a connector. Does NOT connect -- call [`connect()`](Self::connect).
    pub fn new(config: ConnectorConfig, transport: impl Transport) -> Result<Self, Error> {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Like [`new`](Self::new) with a shared transport.
    pub fn with_transport(
        config: ConnectorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(State::default()),
                delivery: DeliveryGate::default(),
                event_listeners: ListenerSet::new("event"),
                status_listeners: ListenerSet::new("status"),
                event_tx,
                status_tx,
            }),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Bind to `task_id` and open its stream.
    ///
    /// Returns as soon as the transport is started; the open is observed
    /// through the status moving to [`Connected`](ConnectionStatus::Connected).
    /// A no-op when already connected to the same task. Any previous
    /// transport and pending reconnect are torn down first.
    ///
    /// Fails with [`Error::EmptyTaskId`] or [`Error::NoRuntime`] without
    /// touching connector state.
    pub fn connect(&self, task_id: &str) -> Result<(), Error> {
        if task_id.is_empty() {
            return Err(Error::EmptyTaskId);
        }
        tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        {
            let mut state = self.inner.lock_state();

            if state.task_id.as_deref() == Some(task_id) && state.is_connected() {
                tracing::debug!(task_id, "Already connected to task");
                return Ok(());
            }

            state.teardown();
            self.inner.set_status(&mut state, ConnectionStatus::Disconnected);

            state.task_id = Some(task_id.to_owned());
            state.manual_close = false;
            state.attempts = 0;

            self.inner.open_connection(&mut state);
        }

        self.inner.drain();
        Ok(())
    }

    /// Close the stream and unbind the task. Safe to call repeatedly.
    ///
    /// Cancels any pending reconnect; events from the closed transport that
    /// arrive afterwards are discarded.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.lock_state();
            state.teardown();
            self.inner.set_status(&mut state, ConnectionStatus::Disconnected);
        }
        self.inner.drain();
    }

    /// Disconnect, then drop every listener and the remembered last event.
    pub fn destroy(&self) {
        self.disconnect();
        self.inner.event_listeners.clear();
        self.inner.status_listeners.clear();
        self.inner.lock_state().last_event = None;
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register an event listener.
    ///
    /// If an event was already received, `handler` is called with it before
    /// this returns (after the current listener returns, when called from
    /// inside one).
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        let subscription = {
            let mut state = self.inner.lock_state();
            let (subscription, id) = self.inner.event_listeners.add(handler);
            let replay = state.last_event.clone();
            state
                .outbox
                .push_back(Notification::EventListenerReady { id, replay });
            subscription
        };
        self.inner.drain();
        subscription
    }

    /// Register a status listener. `handler` is called with the current
    /// status before this returns.
    pub fn on_status_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let subscription = {
            let mut state = self.inner.lock_state();
            let (subscription, id) = self.inner.status_listeners.add(handler);
            let replay = state.status;
            state
                .outbox
                .push_back(Notification::StatusListenerReady { id, replay });
            subscription
        };
        self.inner.drain();
        subscription
    }

    /// Async view of accepted workflow events. No replay.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<WorkflowEvent>> {
        self.inner.event_tx.subscribe()
    }

    /// Async view of the connection status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    // ── Accessors ────────────────────────────────────────────────

    /// `true` iff a transport exists, it has signalled open, and the
    /// status is exactly [`Connected`](ConnectionStatus::Connected).
    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_state().status
    }

    pub fn task_id(&self) -> Option<String> {
        self.inner.lock_state().task_id.clone()
    }

    pub fn last_event(&self) -> Option<Arc<WorkflowEvent>> {
        self.inner.lock_state().last_event.clone()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_state().attempts
    }

    /// Whether a reconnect timer is currently pending.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock_state().reconnect.is_some()
    }

    /// True once the connector has stopped on its own: status is `Closed`
    /// or `Error` and no reconnect is scheduled.
    pub fn is_settled(&self) -> bool {
        let state = self.inner.lock_state();
        state.status.is_settled() && state.reconnect.is_none()
    }
}

impl std::fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("StreamConnector")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("status", &state.status)
            .field("task_id", &state.task_id)
            .field("attempts", &state.attempts)
            .finish_non_exhaustive()
    }
}

// ── State helpers ────────────────────────────────────────────────────

impl State {
    fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
            && self.connection.as_ref().is_some_and(|c| c.open)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.cancel.cancel();
        }
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    /// Release the transport and the timer, and unbind the task.
    fn teardown(&mut self) {
        self.manual_close = true;
        self.cancel_reconnect();
        self.close_connection();
        self.task_id = None;
    }

    fn owns_connection(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }
}

// ── State machine ────────────────────────────────────────────────────

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a status transition. Equal statuses are dropped.
    fn set_status(&self, state: &mut State, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        tracing::debug!(from = %state.status, to = %status, "Connection status changed");
        state.status = status;
        self.status_tx.send_replace(status);
        state.outbox.push_back(Notification::Status(status));
    }

    /// Deliver queued notifications in order, outside the state lock.
    ///
    /// Never call with the state lock held: another thread may own the
    /// delivery turn and need that lock to finish.
    fn drain(&self) {
        let Some(_turn) = self.delivery.enter() else {
            return;
        };

        loop {
            let next = self.lock_state().outbox.pop_front();
            match next {
                Some(Notification::Event(event)) => self.event_listeners.notify(&event),
                Some(Notification::Status(status)) => self.status_listeners.notify(&status),
                Some(Notification::EventListenerReady { id, replay }) => {
                    self.event_listeners.activate(id, replay.as_deref());
                }
                Some(Notification::StatusListenerReady { id, replay }) => {
                    self.status_listeners.activate(id, Some(&replay));
                }
                None => break,
            }
        }
    }

    /// Open a transport for the bound task, replacing any existing one.
    fn open_connection(self: &Arc<Self>, state: &mut State) {
        let Some(task_id) = state.task_id.clone() else {
            tracing::debug!("No task bound, skipping connect");
            return;
        };
        if state.manual_close {
            return;
        }

        state.close_connection();

        let status = if state.attempts > 0 {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
        self.set_status(state, status);

        let url = match self.config.stream_url(&task_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, task_id, "Cannot build stream URL");
                self.handle_failure(state);
                return;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();

        tracing::info!(url = %url, task_id, attempt = state.attempts, "Opening event stream");
        let stream = self.transport.open(&url);

        state.connection = Some(Connection {
            generation,
            cancel: cancel.clone(),
            open: false,
        });

        tokio::spawn(pump(Arc::downgrade(self), generation, stream, cancel));
    }

    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        {
            let mut state = self.lock_state();
            if !state.owns_connection(generation) {
                tracing::trace!(generation, "Dropping event from stale transport");
                return;
            }

            match event {
                TransportEvent::Open => {
                    tracing::info!(task_id = state.task_id.as_deref(), "Event stream connected");
                    state.attempts = 0;
                    if let Some(connection) = state.connection.as_mut() {
                        connection.open = true;
                    }
                    self.set_status(&mut state, ConnectionStatus::Connected);
                }
                TransportEvent::Message(raw) => self.handle_message(&mut state, &raw),
                TransportEvent::Failed(err) => {
                    tracing::warn!(
                        error = %err,
                        task_id = state.task_id.as_deref(),
                        "Event stream error"
                    );
                    self.handle_failure(&mut state);
                }
                TransportEvent::Closed if state.status == ConnectionStatus::Closed => {
                    tracing::debug!(
                        task_id = state.task_id.as_deref(),
                        "Event stream ended after close"
                    );
                    state.connection = None;
                }
                TransportEvent::Closed => {
                    tracing::warn!(
                        error = %Error::StreamEnded,
                        task_id = state.task_id.as_deref(),
                        "Event stream error"
                    );
                    self.handle_failure(&mut state);
                }
            }
        }
        self.drain();
    }

    fn handle_message(self: &Arc<Self>, state: &mut State, raw: &str) {
        match Frame::classify(raw) {
            Frame::Heartbeat => tracing::trace!("Heartbeat"),
            Frame::Malformed(reason) => {
                tracing::warn!(error = %reason, "Failed to parse stream message");
            }
            Frame::Connected { task_id } => {
                tracing::debug!(task_id = task_id.as_deref(), "Stream ready");
            }
            Frame::StreamClosed => {
                tracing::info!(task_id = state.task_id.as_deref(), "Stream closed by server");
                self.set_status(state, ConnectionStatus::Closed);

                if self.config.policy.auto_reconnect && !state.manual_close {
                    let resume = state
                        .last_event
                        .as_deref()
                        .is_some_and(WorkflowEvent::allows_resume);
                    if resume {
                        self.schedule_reconnect(state);
                    }
                }
            }
            Frame::Event(event) => {
                let event = Arc::new(event);
                state.last_event = Some(Arc::clone(&event));
                let _ = self.event_tx.send(Arc::clone(&event));
                state.outbox.push_back(Notification::Event(Arc::clone(&event)));

                if event.closes_stream() {
                    tracing::info!(
                        status = event.status().unwrap_or("stream_closed"),
                        task_id = state.task_id.as_deref(),
                        "Workflow reached a closing status, closing stream"
                    );
                    self.set_status(state, ConnectionStatus::Closed);
                    state.close_connection();
                }
            }
        }
    }

    /// Transport failed or ended abruptly.
    fn handle_failure(self: &Arc<Self>, state: &mut State) {
        if state.manual_close {
            return;
        }
        self.set_status(state, ConnectionStatus::Error);
        state.close_connection();

        if self.config.policy.auto_reconnect {
            self.schedule_reconnect(state);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) {
        let Some(task_id) = state.task_id.as_deref() else {
            return;
        };
        if state.manual_close {
            return;
        }

        let max = self.config.policy.max_attempts;
        if state.attempts >= max {
            tracing::error!(max_attempts = max, task_id, "Reconnect limit reached, giving up");
            state.cancel_reconnect();
            self.set_status(state, ConnectionStatus::Error);
            return;
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let delay = self.config.policy.delay_for(attempt);
        tracing::info!(
            attempt,
            max_attempts = max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            task_id,
            "Scheduling reconnect"
        );

        state.cancel_reconnect();
        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.reconnect = Some(PendingReconnect {
            generation,
            cancel: cancel.clone(),
        });

        tokio::spawn(reconnect_after(Arc::downgrade(self), generation, delay, cancel));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.lock_state();
            if state.reconnect.as_ref().map(|r| r.generation) != Some(generation) {
                return;
            }
            state.reconnect = None;

            if state.manual_close || state.task_id.is_none() {
                return;
            }
            tracing::info!(
                task_id = state.task_id.as_deref(),
                attempt = state.attempts,
                "Reconnecting"
            );
            self.open_connection(&mut state);
        }
        self.drain();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_reconnect();
        state.close_connection();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Forward transport events into the state machine until the transport
/// ends or the connection is cancelled.
async fn pump(
    inner: Weak<Inner>,
    generation: u64,
    mut stream: BoxStream<'static, TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => {
                let Some(inner) = inner.upgrade() else { break };
                match next {
                    Some(event) => {
                        let terminal = matches!(
                            event,
                            TransportEvent::Failed(_) | TransportEvent::Closed
                        );
                        inner.on_transport_event(generation, event);
                        if terminal {
                            break;
                        }
                    }
                    None => {
                        inner.on_transport_event(generation, TransportEvent::Closed);
                        break;
                    }
                }
            }
        }
    }
    tracing::trace!(generation, "Stream pump exiting");
}

async fn reconnect_after(
    inner: Weak<Inner>,
    generation: u64,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(delay) => {
            if let Some(inner) = inner.upgrade() {
                inner.fire_reconnect(generation);
            }
        }
    }
}
