//! The Pusher connection-level state machine, layered on top of [`Transport`].
//!
//! Mirrors the source's `Connection`: it owns the keepalive timers, reacts
//! to `Transport` lifecycle events, classifies `pusher:error` codes, and is
//! the public event source users `bind`/`bind_all` against. It never talks
//! to the socket directly — every action that needs one comes back out as a
//! [`ConnectionAction`] for the actor to hand to `Transport`.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::emitter::{EventEmitter, Listener, ListenerId};
use crate::event::Event;
use crate::ws::transport::TransportEvent;

const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const PUSHER_ERROR: &str = "pusher:error";
const PING: &str = "pusher:ping";
const PONG: &str = "pusher:pong";

const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);
const UNAVAILABLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Unavailable,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Unavailable => "unavailable",
            Self::Disconnected => "disconnected",
        }
    }
}

/// A channel-tagged event (routed to the channel registry), or a side
/// effect the caller must carry out against the transport.
pub enum EventOutcome {
    Channel(Event),
    Action(ConnectionAction),
}

pub enum ConnectionAction {
    None,
    Reply(Event),
    Reconnect,
    StopFatal { code: u32 },
}

/// Which keepalive timer [`Connection::next_timeout`] resolved on.
pub enum TimeoutFired {
    Activity,
    Pong,
    Unavailable,
}

/// Accepts a numeric or string-encoded `code` field (the server sends
/// numbers, but some proxies coerce the payload to a string).
fn parse_code(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .map(|code| code as u32)
}

/// Description string for known Pusher close/error codes, used only for
/// log context — the numeric ranges are what drive behavior.
fn error_description(code: u32) -> Option<&'static str> {
    match code {
        4000 => Some("application only accepts SSL connections"),
        4001 => Some("application does not exist"),
        4003 => Some("application disabled"),
        4004 => Some("application over connection quota"),
        4005 => Some("path not found"),
        4006 => Some("invalid version string format"),
        4007 => Some("unsupported protocol version"),
        4008 => Some("no protocol version supplied"),
        4009 => Some("connection is unauthorized"),
        4100 => Some("over capacity"),
        4200 => Some("generic reconnect immediately"),
        4201 => Some("pong reply not received in time"),
        4202 => Some("closed after inactivity"),
        4301 => Some("client event rejected due to rate limit"),
        _ => None,
    }
}

pub struct Connection {
    state: ConnectionState,
    socket_id: String,
    activity_timeout: crate::timeout::Timeout,
    pong_timeout: crate::timeout::Timeout,
    unavailable_timeout: crate::timeout::Timeout,
    emitter: EventEmitter,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Initialized,
            socket_id: String::new(),
            activity_timeout: crate::timeout::Timeout::new(DEFAULT_ACTIVITY_TIMEOUT),
            pong_timeout: crate::timeout::Timeout::new(PONG_TIMEOUT),
            unavailable_timeout: crate::timeout::Timeout::new(UNAVAILABLE_TIMEOUT),
            emitter: EventEmitter::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn bind(&mut self, name: impl Into<String>, listener: Listener) -> ListenerId {
        self.emitter.bind(name, listener)
    }

    pub fn unbind(&mut self, name: &str, id: ListenerId) {
        self.emitter.unbind(name, id)
    }

    pub fn bind_all(&mut self, listener: Listener) -> ListenerId {
        self.emitter.bind_all(listener)
    }

    pub fn unbind_all(&mut self, id: ListenerId) {
        self.emitter.unbind_all(id)
    }

    /// Re-emit `event` to every listener bound on this connection, without
    /// running it through connection-state handling. Used by the actor to
    /// forward channel-tagged events to the facade-level listeners too,
    /// mirroring the reference implementation's dual dispatch.
    pub fn emit(&self, event: &Event) {
        self.emitter.emit_event(event);
    }

    /// Whether any keepalive timer is currently armed — lets the actor gate
    /// a single `select!` arm instead of borrowing `self` three times.
    pub fn has_active_timeout(&self) -> bool {
        self.activity_timeout.active() || self.pong_timeout.active() || self.unavailable_timeout.active()
    }

    /// Waits for whichever of the three keepalive timers fires next. A
    /// single `&mut self` borrow, unlike separately `select!`-ing
    /// `activity_timeout_fire()`/`pong_timeout_fire()`/
    /// `unavailable_timeout_fire()` on the same `Connection` — each armed
    /// timer's `fire()` future is distinct storage, so this can `select!`
    /// over all three at once the same way `Transport::tick()` selects over
    /// its own distinct fields.
    pub async fn next_timeout(&mut self) -> TimeoutFired {
        tokio::select! {
            biased;
            _ = self.activity_timeout.fire() => TimeoutFired::Activity,
            _ = self.pong_timeout.fire() => TimeoutFired::Pong,
            _ = self.unavailable_timeout.fire() => TimeoutFired::Unavailable,
        }
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if new_state == self.state {
            return;
        }
        let previous = self.state;
        self.state = new_state;
        info!(from = previous.as_str(), to = new_state.as_str(), "connection state change");
        self.emitter.emit_event(
            &Event::new(new_state.as_str(), serde_json::json!({"previous": previous.as_str()})),
        );
        self.emitter.emit_event(&Event::new(
            "state_change",
            serde_json::json!({"current": new_state.as_str(), "previous": previous.as_str()}),
        ));
    }

    /// React to a [`TransportEvent`] per the connection/transport state
    /// table: starting to connect arms the unavailable timeout, a
    /// completed connect arms the activity timeout, and losing the socket
    /// either re-enters `connecting` (transport still running) or settles
    /// into `disconnected`.
    pub fn on_transport_event(&mut self, event: TransportEvent, transport_running: bool) {
        match event {
            TransportEvent::StartedConnecting => {
                self.set_state(ConnectionState::Connecting);
                self.unavailable_timeout.start();
            }
            TransportEvent::ConnectingIn(delay) => {
                self.emitter
                    .emit_event(&Event::new("connecting_in", serde_json::json!({"delay": delay.as_secs()})));
            }
            TransportEvent::Connected => {
                self.activity_timeout.start();
            }
            TransportEvent::Disconnected => {
                self.activity_timeout.stop();
                self.pong_timeout.stop();
                self.socket_id.clear();
                if transport_running {
                    self.set_state(ConnectionState::Connecting);
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// The unavailable timer only matters while still waiting for the
    /// first successful connect; it's stopped by `connection_established`
    /// otherwise, so this ignores a stray fire outside `Connecting`.
    pub fn on_unavailable_timeout(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.set_state(ConnectionState::Unavailable);
        }
    }

    /// The activity timer firing means no traffic for `activity_timeout`;
    /// reply is a `pusher:ping`, and the pong timer starts waiting for the
    /// matching `pusher:pong`.
    pub fn on_activity_timeout(&mut self) -> Event {
        self.pong_timeout.start();
        Event::bare(PING)
    }

    /// Dispatch a decoded Pusher frame: channel-tagged events are handed
    /// back to the caller for routing to the channel registry; everything
    /// else is a control frame handled here.
    pub fn on_event(&mut self, event: Event) -> EventOutcome {
        let outcome = if event.channel.is_some() {
            EventOutcome::Channel(event)
        } else {
            match event.name.as_str() {
                CONNECTION_ESTABLISHED => {
                    self.handle_connection_established(event);
                    EventOutcome::Action(ConnectionAction::None)
                }
                PUSHER_ERROR => EventOutcome::Action(self.handle_error(event)),
                PING => EventOutcome::Action(ConnectionAction::Reply(Event::bare(PONG))),
                PONG => {
                    self.handle_pong();
                    EventOutcome::Action(ConnectionAction::None)
                }
                other => {
                    warn!(name = other, "unrecognized pusher control event");
                    EventOutcome::Action(ConnectionAction::None)
                }
            }
        };
        self.activity_timeout.reset(None);
        outcome
    }

    fn handle_connection_established(&mut self, event: Event) {
        self.unavailable_timeout.stop();
        if let Some(socket_id) = event.data.get("socket_id").and_then(Value::as_str) {
            self.socket_id = socket_id.to_string();
        }
        match event.data.get("activity_timeout").and_then(Value::as_u64) {
            Some(secs) => self.activity_timeout.reset(Some(Duration::from_secs(secs))),
            None => self.activity_timeout.reset(None),
        }
        info!(socket_id = %self.socket_id, "pusher connection established");
        self.set_state(ConnectionState::Connected);
    }

    fn handle_error(&mut self, event: Event) -> ConnectionAction {
        self.emitter.emit_event(&Event::new("error", event.data.clone()));
        let code = event.data.get("code").and_then(parse_code);
        let Some(code) = code else {
            warn!(data = %event.data, "pusher error with no code");
            return ConnectionAction::None;
        };
        match error_description(code) {
            Some(desc) => warn!(code, desc, "received pusher:error"),
            None => warn!(code, "received pusher:error"),
        }

        if (4000..4100).contains(&code) {
            warn!(code, "connection parameters will not succeed on retry; stopping");
            ConnectionAction::StopFatal { code }
        } else {
            // 4100-4199 and 4200-4299 both precede the server closing the
            // socket itself, which the transport already reconnects from;
            // 4301 and anything else are purely informational.
            ConnectionAction::None
        }
    }

    fn handle_pong(&mut self) {
        self.pong_timeout.stop();
        self.activity_timeout.start();
    }
}
