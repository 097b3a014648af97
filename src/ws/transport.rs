//! The socket-lifecycle half of the connection: dial, back off, retry.
//!
//! Mirrors the source's `Transport` almost call-for-call, but trades its
//! callback-Deferred chain for a single `tick()` method meant to be awaited
//! as one arm of the owning actor's `tokio::select!`. `tick()` internally
//! runs its own `select!` over whichever of its async resources (backoff
//! timer, in-flight connect attempt, live socket) is relevant to the
//! current state, so the actor never needs to know which.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::event::Event;
use crate::timeout::Timeout;
use crate::ws::protocol::{Connector, Incoming, Protocol, WsStream};

const MAX_RECONNECT_DELAY_SECS: u64 = 10;
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnecting => "disconnecting",
        }
    }
}

/// A lifecycle event the owning [`crate::ws::connection::Connection`] reacts
/// to, or a decoded Pusher event handed up from the live socket.
pub enum TransportPoll {
    Lifecycle(TransportEvent),
    Received(Event),
}

#[derive(Debug, Clone, Copy)]
pub enum TransportEvent {
    StartedConnecting,
    ConnectingIn(Duration),
    Connected,
    Disconnected,
}

fn backoff(attempt_count: u32) -> Duration {
    let pow = attempt_count.min(4); // 2^4 already exceeds the 10s cap
    Duration::from_secs((1u64 << pow).clamp(1, MAX_RECONNECT_DELAY_SECS))
}

/// Polls an `Option<JoinHandle<T>>` without consuming it, resolving to
/// `Pending` forever while `None` — lets it sit in a `select!` arm guarded
/// by `self.pending.is_some()`.
fn poll_pending<T>(
    slot: &mut Option<JoinHandle<T>>,
) -> impl Future<Output = Result<T, tokio::task::JoinError>> + '_ {
    std::future::poll_fn(move |cx: &mut Context<'_>| match slot {
        Some(handle) => Pin::new(handle).poll(cx),
        None => Poll::Pending,
    })
}

async fn next_incoming(protocol: &mut Option<Protocol>) -> Incoming {
    match protocol {
        Some(p) => p.next_incoming().await,
        None => std::future::pending().await,
    }
}

/// Drives the websocket connect/backoff/reconnect state machine. Owns the
/// live [`Protocol`] once connected.
pub struct Transport {
    connector: Arc<dyn Connector>,
    state: TransportState,
    attempt_count: u32,
    running: bool,
    protocol: Option<Protocol>,
    pending: Option<JoinHandle<crate::error::Result<WsStream>>>,
    backoff_timeout: Timeout,
    connect_attempt_timeout: Timeout,
    outbox: VecDeque<TransportEvent>,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: TransportState::Disconnected,
            attempt_count: 0,
            running: false,
            protocol: None,
            pending: None,
            backoff_timeout: Timeout::new(Duration::from_secs(1)),
            connect_attempt_timeout: Timeout::new(CONNECT_ATTEMPT_TIMEOUT),
            outbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Start the transport; begins connecting if currently disconnected.
    pub fn start(&mut self) {
        self.running = true;
        if self.state == TransportState::Disconnected {
            self.connect();
        }
    }

    /// Stop the transport permanently; no reconnect follows.
    pub async fn stop(&mut self) {
        self.running = false;
        self.disconnect_internal().await;
    }

    /// Force a reconnect while staying `running` — the usual trigger is a
    /// keepalive timeout or a recoverable `pusher:error` code.
    pub async fn reconnect(&mut self) {
        self.disconnect_internal().await;
    }

    pub async fn send_event(&mut self, event: &Event) {
        if self.state != TransportState::Connected {
            warn!(name = event.name, "dropping event sent while transport is disconnected");
            return;
        }
        if let Some(protocol) = self.protocol.as_mut() {
            if let Err(e) = protocol.send_event(event).await {
                warn!(error = %e, "failed to send event over websocket");
            }
        }
    }

    /// Wait for the next lifecycle event or received Pusher frame. Meant to
    /// be one arm of the actor's top-level `select!`, called fresh each
    /// loop iteration.
    pub async fn tick(&mut self) -> TransportPoll {
        if let Some(ev) = self.outbox.pop_front() {
            return TransportPoll::Lifecycle(ev);
        }
        loop {
            tokio::select! {
                biased;

                _ = self.backoff_timeout.fire(), if self.backoff_timeout.active() => {
                    self.begin_attempt();
                }

                _ = self.connect_attempt_timeout.fire(), if self.connect_attempt_timeout.active() => {
                    self.disconnect_internal().await;
                }

                result = poll_pending(&mut self.pending), if self.pending.is_some() => {
                    self.pending = None;
                    self.connect_attempt_timeout.stop();
                    match result {
                        Ok(Ok(stream)) => self.on_connected(stream),
                        Ok(Err(e)) => {
                            warn!(error = %e, "websocket connect attempt failed");
                            self.on_failed();
                        }
                        Err(_join_error) => self.on_failed(),
                    }
                }

                incoming = next_incoming(&mut self.protocol), if self.protocol.is_some() => {
                    match incoming {
                        Incoming::Event(event) => return TransportPoll::Received(event),
                        Incoming::Closed { clean, code, reason } => {
                            self.on_lost(clean, code, reason);
                        }
                    }
                }
            }

            if let Some(ev) = self.outbox.pop_front() {
                return TransportPoll::Lifecycle(ev);
            }
        }
    }

    /// Only callable from `Disconnected`. Computes the next backoff wait,
    /// emits `connecting_in` (and `started_connecting` on the very first
    /// attempt), and arms the backoff timer.
    fn connect(&mut self) {
        self.state = TransportState::Connecting;
        let wait = backoff(self.attempt_count);
        if self.attempt_count == 0 {
            self.outbox.push_back(TransportEvent::StartedConnecting);
        }
        self.outbox.push_back(TransportEvent::ConnectingIn(wait));
        self.attempt_count += 1;
        self.backoff_timeout = Timeout::new(wait);
        self.backoff_timeout.start();
    }

    fn begin_attempt(&mut self) {
        self.connect_attempt_timeout.start();
        let connector = self.connector.clone();
        self.pending = Some(tokio::spawn(async move { connector.connect().await }));
    }

    fn on_connected(&mut self, stream: WsStream) {
        self.state = TransportState::Connected;
        self.attempt_count = 0;
        self.protocol = Some(Protocol::new(stream));
        self.outbox.push_back(TransportEvent::Connected);
    }

    fn on_failed(&mut self) {
        let was_disconnecting = self.state == TransportState::Disconnecting;
        self.state = TransportState::Disconnected;
        if !was_disconnecting {
            self.connect();
        }
    }

    fn on_lost(&mut self, clean: bool, code: u16, reason: String) {
        info!(clean, code, reason, "websocket connection lost");
        self.protocol = None;
        let was_disconnecting = self.state == TransportState::Disconnecting;
        self.state = TransportState::Disconnected;
        self.outbox.push_back(TransportEvent::Disconnected);
        if !was_disconnecting {
            self.connect();
        }
    }

    async fn disconnect_internal(&mut self) {
        let old_state = self.state;
        if !matches!(old_state, TransportState::Connected | TransportState::Connecting) {
            // Already at rest; nothing to tear down.
            return;
        }
        self.state = if self.running {
            TransportState::Reconnecting
        } else {
            TransportState::Disconnecting
        };
        match old_state {
            TransportState::Connected => {
                if let Some(protocol) = self.protocol.as_mut() {
                    protocol.disconnect().await;
                }
                // The actual `Disconnected` lifecycle event follows once
                // `tick()` observes the close via `next_incoming`.
            }
            TransportState::Connecting => {
                if let Some(pending) = self.pending.take() {
                    pending.abort();
                    let _ = pending.await;
                }
                self.connect_attempt_timeout.stop();
                self.backoff_timeout.stop();
                self.on_failed();
            }
            _ => unreachable!(),
        }
    }
}
