//! Connection handler: one transport connection's lifecycle state machine
//!
//! Producers never run lifecycle work themselves. External callers and
//! transport callbacks only validate a transition, move the state to the
//! matching `*_SCHEDULED` state and drop an [`Action`] into a single slot
//! (latest wins). One tokio task per handler consumes the slot and executes
//! actions one at a time.
//!
//! ```text
//!  schedule_*()        transport callbacks
//!       │                     │
//!       └──────┬──────────────┘
//!              ▼
//!      ┌──────────────┐
//!      │ action slot  │  ← watch channel, overwrite on send
//!      └──────┬───────┘
//!             ▼
//!      ┌──────────────┐      ┌───────────┐
//!      │ handler task │ ───► │ Transport │
//!      └──────┬───────┘      └───────────┘
//!             ▼
//!      Parser ──► Market
//! ```
//!
//! Frames bypass the slot: `on_message` calls the parser directly on the
//! transport's thread, which is why market mutations are guarded by the
//! market's own lock.

pub mod metrics;
pub mod parser;
pub mod state;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::HandlerConfig;
use crate::error::{AggregatorError, ConfigError, TransportError};
use crate::market::Market;
use crate::subscription::{Channel, SubscriptionRegistry};

pub use metrics::ConnectionMetrics;
pub use parser::{Parser, Session};
pub use state::{Action, CloseOutcome, ConnectionState};
pub use transport::{ConnectionEvents, Transport};

/// State shared between the handler task, its handles and transport callbacks.
pub(crate) struct Shared {
    config: HandlerConfig,
    market: Arc<Market>,
    state: Mutex<ConnectionState>,
    slot: watch::Sender<Option<Action>>,
    transport: Arc<dyn Transport>,
    parser: Mutex<Box<dyn Parser>>,
    /// Errors that arrived while the parser was busy.
    deferred_errors: Mutex<Vec<TransportError>>,
    registry: Mutex<SubscriptionRegistry>,
    /// Id of the current connect attempt.
    generation: AtomicU64,
    request_counter: AtomicU64,
    metrics: ConnectionMetrics,
    span: Span,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        // the guarded value is a plain enum, always valid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_parser(&self) -> MutexGuard<'_, Box<dyn Parser>> {
        self.parser.lock().unwrap_or_else(|poisoned| {
            warn!("Parser lock poisoned; continuing with current parser state");
            self.parser.clear_poison();
            poisoned.into_inner()
        })
    }

    fn lock_registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| {
            warn!("Subscription registry lock poisoned; recovering");
            self.registry.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Run `f` with the parser locked, then hand it any errors that were
    /// reported while it was busy.
    fn with_parser<R>(&self, f: impl FnOnce(&mut dyn Parser) -> R) -> R {
        let mut parser = self.lock_parser();
        let result = f(&mut **parser);
        self.drain_deferred_errors(&mut **parser);
        result
    }

    fn drain_deferred_errors(&self, parser: &mut dyn Parser) {
        let deferred = std::mem::take(&mut *self.lock_deferred());
        for error in &deferred {
            parser.on_error(error);
        }
    }

    fn lock_deferred(&self) -> MutexGuard<'_, Vec<TransportError>> {
        self.deferred_errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver `error` to the parser without waiting on its lock. If the
    /// parser is busy (possibly on this very thread, inside `send`), the
    /// error is queued for the current holder to pick up.
    fn notify_parser_error(&self, error: &TransportError) {
        self.lock_deferred().push(error.clone());
        match self.parser.try_lock() {
            Ok(mut parser) => self.drain_deferred_errors(&mut **parser),
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("Parser lock poisoned; continuing with current parser state");
                self.parser.clear_poison();
                let mut parser = poisoned.into_inner();
                self.drain_deferred_errors(&mut **parser);
            }
            Err(TryLockError::WouldBlock) => {
                debug!(error = %error, "Parser busy; transport error queued");
            }
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_current(&self, generation: u64, event: &'static str) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            debug!(event, generation, current, "Ignoring event from superseded connection");
            self.metrics.record_stale_event();
            return false;
        }
        true
    }

    /// Apply a scheduling transition: if `allowed(state)`, move to `next`
    /// and put `action` in the slot. Rejections leave everything untouched.
    fn schedule(
        &self,
        event: &'static str,
        allowed: impl FnOnce(&ConnectionState) -> bool,
        next: ConnectionState,
        action: Action,
    ) -> bool {
        let _entered = self.span.enter();
        let mut state = self.lock_state();
        if !allowed(&*state) {
            warn!(event, state = %*state, "Transition rejected");
            self.metrics.record_rejected_transition();
            return false;
        }
        debug!(event, from = %*state, to = %next, "Transition scheduled");
        *state = next;
        self.slot.send_replace(Some(action));
        true
    }

    fn schedule_connect(&self) -> bool {
        self.schedule(
            "connect",
            ConnectionState::can_schedule_connect,
            ConnectionState::ConnectScheduled,
            Action::Connect,
        )
    }

    fn schedule_disconnect(&self) -> bool {
        self.schedule(
            "disconnect",
            ConnectionState::is_live,
            ConnectionState::DisconnectScheduled,
            Action::Disconnect,
        )
    }

    fn schedule_reconnect(&self) -> bool {
        self.schedule(
            "reconnect",
            ConnectionState::can_schedule_reconnect,
            ConnectionState::ReconnectScheduled,
            Action::Reconnect,
        )
    }

    fn schedule_shutdown(&self) -> bool {
        self.schedule(
            "shutdown",
            ConnectionState::can_schedule_shutdown,
            ConnectionState::ShutdownScheduled,
            Action::Shutdown,
        )
    }

    fn schedule_kill(&self) -> bool {
        self.schedule(
            "kill",
            |state| !state.is_terminated(),
            ConnectionState::Terminated,
            Action::Terminate,
        )
    }

    /// Fired by the backoff timer.
    fn reconnect_after_backoff(&self) {
        let _entered = self.span.enter();
        let mut state = self.lock_state();
        if *state != ConnectionState::WaitConnect {
            debug!(state = %*state, "Backoff elapsed after state moved on; not reconnecting");
            return;
        }
        info!("Backoff elapsed; reconnecting");
        self.metrics.record_auto_reconnect();
        *state = ConnectionState::ConnectScheduled;
        self.slot.send_replace(Some(Action::Connect));
    }

    /// Enter WAIT_CONNECT and arm the reconnect timer.
    fn wait_and_reconnect(&self, state: &mut ConnectionState) {
        *state = ConnectionState::WaitConnect;
        self.slot
            .send_replace(Some(Action::Backoff(self.config.reconnect_backoff())));
    }

    // ---- transport callbacks -------------------------------------------

    fn handle_open(&self, generation: u64) {
        let _entered = self.span.enter();
        // generation is bumped under the state lock, so compare under it too
        let mut state = self.lock_state();
        if !self.is_current(generation, "open") {
            return;
        }
        if *state != ConnectionState::Connecting {
            warn!(state = %*state, "Unexpected open event ignored");
            self.metrics.record_rejected_transition();
            return;
        }
        self.metrics.record_opened();
        *state = ConnectionState::Connected;
        info!(url = %self.config.url, generation, "Connected");
        *state = ConnectionState::StartScheduled;
        self.slot.send_replace(Some(Action::Start));
    }

    fn handle_close(&self, generation: u64) {
        let _entered = self.span.enter();
        let mut state = self.lock_state();
        if !self.is_current(generation, "close") {
            return;
        }
        match state.on_transport_closed() {
            CloseOutcome::Disconnected => {
                *state = ConnectionState::Disconnected;
                info!("Disconnected");
            }
            CloseOutcome::Terminated => {
                *state = ConnectionState::Terminated;
                info!("Connection closed for shutdown");
                self.slot.send_replace(Some(Action::Terminate));
            }
            CloseOutcome::Reconnect => {
                if *state != ConnectionState::RecDisconnecting {
                    self.metrics.record_unsolicited_close();
                    warn!(state = %*state, backoff_ms = self.config.reconnect_backoff_ms, "Connection lost; reconnecting after backoff");
                }
                self.wait_and_reconnect(&mut state);
            }
            CloseOutcome::Ignore => {
                debug!(state = %*state, "Close event ignored");
            }
        }
    }

    fn handle_error(&self, generation: u64, error: &TransportError) {
        let _entered = self.span.enter();
        {
            let mut state = self.lock_state();
            if !self.is_current(generation, "error") {
                return;
            }
            self.metrics.record_transport_error();
            warn!(error = %error, "Transport error");
            if state.is_reconnect_eligible() {
                self.metrics.record_unsolicited_close();
                warn!(state = %*state, backoff_ms = self.config.reconnect_backoff_ms, "Fatal transport error; reconnecting after backoff");
                self.wait_and_reconnect(&mut state);
            }
        }
        self.notify_parser_error(error);
    }

    fn handle_message(&self, generation: u64, raw: &str) {
        if !self.is_current(generation, "message") {
            return;
        }
        if self.state().is_terminated() {
            debug!(len = raw.len(), "Frame dropped after termination");
            return;
        }
        self.metrics.record_message_received();
        let _entered = self.span.enter();
        self.with_parser(|parser| {
            let session = Session::new(self);
            parser.on_message(raw, &session);
        });
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        match self.transport.send(text) {
            Ok(()) => {
                self.metrics.record_message_sent();
                Ok(())
            }
            Err(err) => {
                self.metrics.record_send_failure();
                Err(err)
            }
        }
    }

    // ---- actions executed on the handler task --------------------------

    /// Move `from` → `to` only if the state is still `from`.
    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            debug!(expected = %from, state = %*state, "Action superseded");
            return false;
        }
        *state = to;
        true
    }

    fn execute_connect(self: &Arc<Self>) {
        let generation = {
            let mut state = self.lock_state();
            if *state != ConnectionState::ConnectScheduled {
                debug!(state = %*state, "Connect superseded");
                return;
            }
            *state = ConnectionState::Connecting;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        self.metrics.record_connect_attempt();
        info!(url = %self.config.url, generation, "Connecting");
        let events = ConnectionEvents::new(Arc::downgrade(self), generation);
        if !self.transport.connect(&self.config.url, events) {
            warn!(url = %self.config.url, "Connect attempt could not be started");
            self.handle_close(generation);
        }
    }

    fn execute_start(&self) {
        if !self.advance(ConnectionState::StartScheduled, ConnectionState::Running) {
            return;
        }
        info!("Running");

        self.with_parser(|parser| {
            parser.set_market(Arc::clone(&self.market));

            let markets = {
                let mut registry = self.lock_registry();
                registry.inactivate_all();
                registry.markets()
            };
            self.market.clear_order_book();
            for market in markets.iter().filter(|m| m.pair() != self.market.pair()) {
                market.clear_order_book();
            }

            let session = Session::new(self);
            session.subscribe_next(&*parser);
        });
    }

    fn execute_disconnect(&self) {
        if !self.advance(ConnectionState::DisconnectScheduled, ConnectionState::Disconnecting) {
            return;
        }
        info!("Disconnecting");
        if !self.transport.close() {
            self.advance(ConnectionState::Disconnecting, ConnectionState::Disconnected);
            info!("Disconnected");
        }
    }

    fn execute_reconnect(&self) {
        if !self.advance(ConnectionState::ReconnectScheduled, ConnectionState::RecDisconnecting) {
            return;
        }
        info!("Closing connection for reconnect");
        if !self.transport.close() {
            let mut state = self.lock_state();
            if *state == ConnectionState::RecDisconnecting {
                self.wait_and_reconnect(&mut state);
            }
        }
    }

    /// Returns true once the handler has terminated.
    fn execute_shutdown(&self) -> bool {
        if !self.advance(ConnectionState::ShutdownScheduled, ConnectionState::ShuttingDown) {
            return self.state().is_terminated();
        }
        info!("Shutting down");
        if self.transport.close() {
            return self.state().is_terminated();
        }
        self.advance(ConnectionState::ShuttingDown, ConnectionState::Terminated);
        true
    }
}

fn spawn_backoff_timer(shared: &Arc<Shared>, delay: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    tokio::spawn(
        async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.reconnect_after_backoff();
            }
        }
        .instrument(shared.span.clone()),
    )
}

async fn run(shared: Arc<Shared>, mut slot: watch::Receiver<Option<Action>>) {
    let mut backoff: Option<JoinHandle<()>> = None;
    let mut pending: Option<Action> = None;
    info!("Handler started");

    loop {
        let action = match pending.take() {
            Some(action) => action,
            None => {
                if slot.changed().await.is_err() {
                    break;
                }
                match *slot.borrow_and_update() {
                    Some(action) => action,
                    None => continue,
                }
            }
        };
        debug!(action = ?action, state = %shared.state(), "Executing action");

        match action {
            Action::Connect => {
                let delay = shared.config.connect_delay();
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = slot.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            pending = *slot.borrow_and_update();
                            continue;
                        }
                    }
                }
                shared.execute_connect();
            }
            Action::Start => shared.execute_start(),
            Action::Disconnect => {
                if let Some(timer) = backoff.take() {
                    timer.abort();
                }
                shared.execute_disconnect();
            }
            Action::Reconnect => shared.execute_reconnect(),
            Action::Shutdown => {
                if let Some(timer) = backoff.take() {
                    timer.abort();
                }
                if shared.execute_shutdown() {
                    break;
                }
            }
            Action::Terminate => break,
            Action::Backoff(delay) => {
                if let Some(timer) = backoff.take() {
                    timer.abort();
                }
                backoff = Some(spawn_backoff_timer(&shared, delay));
            }
        }
    }

    if let Some(timer) = backoff.take() {
        timer.abort();
    }
    info!(state = %shared.state(), "Handler stopped");
}

/// Cloneable control surface of a running handler.
///
/// Dropping every handle does not stop the handler; schedule a shutdown or
/// a kill.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn market(&self) -> &Arc<Market> {
        &self.shared.market
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.shared.metrics
    }

    pub fn schedule_connect(&self) -> bool {
        self.shared.schedule_connect()
    }

    pub fn schedule_disconnect(&self) -> bool {
        self.shared.schedule_disconnect()
    }

    pub fn schedule_reconnect(&self) -> bool {
        self.shared.schedule_reconnect()
    }

    /// Close the connection, then stop the handler.
    pub fn schedule_shutdown(&self) -> bool {
        self.shared.schedule_shutdown()
    }

    /// Stop the handler at once, without closing the transport.
    pub fn schedule_kill(&self) -> bool {
        self.shared.schedule_kill()
    }

    /// Register `channel` on the handler's market. Takes effect on the next
    /// START.
    pub fn subscribe(&self, channel: Channel) -> bool {
        self.subscribe_market(Arc::clone(&self.shared.market), channel)
    }

    pub fn subscribe_market(&self, market: Arc<Market>, channel: Channel) -> bool {
        self.shared.lock_registry().add_inactive(market, channel)
    }

    /// Read the subscription registry.
    pub fn subscriptions<R>(&self, f: impl FnOnce(&SubscriptionRegistry) -> R) -> R {
        let registry = self.shared.lock_registry();
        f(&registry)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A spawned connection handler task.
#[derive(Debug)]
pub struct ConnectionHandler {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

impl ConnectionHandler {
    /// Validate `config` and start the handler task in DISCONNECTED.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: HandlerConfig,
        market: Arc<Market>,
        parser: Box<dyn Parser>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let span = info_span!("connection", name = %config.name);
        let (slot, rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            config,
            market,
            state: Mutex::new(ConnectionState::Disconnected),
            slot,
            transport,
            parser: Mutex::new(parser),
            deferred_errors: Mutex::new(Vec::new()),
            registry: Mutex::new(SubscriptionRegistry::new()),
            generation: AtomicU64::new(0),
            request_counter: AtomicU64::new(0),
            metrics: ConnectionMetrics::new(),
            span: span.clone(),
        });

        let task = runtime.spawn(run(Arc::clone(&shared), rx).instrument(span));
        Ok(Self {
            handle: ConnectionHandle { shared },
            task,
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the handler task to exit.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(name = %self.handle.name(), error = %err, "Handler task ended abnormally");
        }
    }
}

impl std::ops::Deref for ConnectionHandler {
    type Target = ConnectionHandle;

    fn deref(&self) -> &ConnectionHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::subscription::{Subscription, SubscriptionId};

    struct NullParser;

    impl Parser for NullParser {
        fn set_market(&mut self, _market: Arc<Market>) {}

        fn subscribe_command(&self, _subscription: &Subscription, _request_id: &SubscriptionId) -> Option<String> {
            None
        }

        fn parse_message(&mut self, _raw: &str, _session: &Session<'_>) -> Result<(), ParseError> {
            Ok(())
        }
    }

    struct NullTransport;

    impl Transport for NullTransport {
        fn connect(&self, _url: &str, _events: ConnectionEvents) -> bool {
            false
        }

        fn send(&self, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&self) -> bool {
            false
        }
    }

    fn spawn(config: HandlerConfig) -> Result<ConnectionHandler, AggregatorError> {
        let market = Arc::new(Market::new("BTC", "USD").unwrap());
        ConnectionHandler::spawn(config, market, Box::new(NullParser), Arc::new(NullTransport))
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let err = spawn(HandlerConfig::new("test", "wss://example")).unwrap_err();
        assert!(matches!(err, AggregatorError::Config(ConfigError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_url() {
        let err = spawn(HandlerConfig::new("test", "")).unwrap_err();
        assert!(matches!(err, AggregatorError::Config(ConfigError::EmptyUrl)));
    }

    #[tokio::test]
    async fn test_starts_disconnected_and_kill_stops() {
        let handler = spawn(HandlerConfig::new("test", "wss://example")).unwrap();
        assert_eq!(handler.state(), ConnectionState::Disconnected);
        assert!(!handler.schedule_reconnect());
        assert!(!handler.schedule_disconnect());

        assert!(handler.schedule_kill());
        assert!(!handler.schedule_kill());
        assert_eq!(handler.state(), ConnectionState::Terminated);
        handler.join().await;
    }

    #[tokio::test]
    async fn test_late_open_checked_against_generation_under_lock() {
        let handler = spawn(HandlerConfig::new("test", "wss://example")).unwrap();
        let shared = Arc::clone(&handler.handle.shared);

        let mut state = shared.lock_state();
        *state = ConnectionState::Connecting;
        shared.generation.store(1, Ordering::SeqCst);

        // an open from attempt 1 blocks on the state lock...
        let late = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.handle_open(1))
        };
        std::thread::sleep(Duration::from_millis(50));
        // ...while attempt 2 starts
        shared.generation.store(2, Ordering::SeqCst);
        drop(state);
        late.join().unwrap();

        assert_eq!(shared.state(), ConnectionState::Connecting);
        assert_eq!(shared.metrics.stale_events.load(Ordering::Relaxed), 1);
        assert!(handler.schedule_kill());
    }
}
