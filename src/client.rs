//! The public facade: `PusherClient`, its cloneable `PusherHandle`, and the
//! single actor task that owns the transport, connection, and channel
//! registry.
//!
//! Grounded on the source's `PusherService`/`Pusher`: one object owns
//! `self.channels` and dual-dispatches every channel event to both the
//! channel's own listeners and its own global listeners. The actor/handle
//! split (rather than an `Arc<Mutex<_>>`) is the teacher crate's pattern
//! for the same problem — external callers send `Command`s and read
//! `Event`s off a broadcast channel instead of sharing state directly.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::config::PusherConfig;
use crate::emitter::{Listener, ListenerId};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::ws::channel::ChannelRegistry;
use crate::ws::connection::{Connection, ConnectionAction, ConnectionState, EventOutcome, TimeoutFired};
use crate::ws::protocol::{Connector, UrlConnector};
use crate::ws::transport::{Transport, TransportPoll};

const EVENT_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 256;

enum Command {
    Subscribe {
        name: String,
        parse_data_as_json: bool,
        response: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        name: String,
    },
    SendEvent {
        event: Event,
        response: oneshot::Sender<Result<()>>,
    },
    Bind {
        name: String,
        listener: Listener,
        response: oneshot::Sender<ListenerId>,
    },
    BindAll {
        listener: Listener,
        response: oneshot::Sender<ListenerId>,
    },
    Unbind {
        name: String,
        id: ListenerId,
    },
    UnbindAll {
        id: ListenerId,
    },
    ChannelBind {
        channel: String,
        name: String,
        listener: Listener,
        response: oneshot::Sender<Result<ListenerId>>,
    },
    ChannelBindAll {
        channel: String,
        ignore_pusher_events: bool,
        listener: Listener,
        response: oneshot::Sender<Result<ListenerId>>,
    },
}

/// Owns the connection actor. Dropping it stops the actor; call
/// [`PusherClient::handle`] to get a cloneable handle before giving this up.
pub struct PusherClient {
    cmd_tx: mpsc::Sender<Command>,
    update_tx: broadcast::Sender<Event>,
    task: tokio::task::JoinHandle<()>,
}

impl PusherClient {
    /// Connect using the standard `wss://`/`ws://` Pusher endpoint built
    /// from `config`.
    pub fn connect(config: PusherConfig) -> Result<Self> {
        let url = config.endpoint_url()?;
        Ok(Self::connect_with(Arc::new(UrlConnector::new(url))))
    }

    /// Connect through an arbitrary [`Connector`] — the seam tests use to
    /// dial a local loopback server or fail deterministically.
    pub fn connect_with(connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (update_tx, _) = broadcast::channel(EVENT_BUFFER);
        let task_update_tx = update_tx.clone();
        let task = tokio::spawn(run(connector, cmd_rx, task_update_tx));
        Self {
            cmd_tx,
            update_tx,
            task,
        }
    }

    pub fn handle(&self) -> PusherHandle {
        PusherHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Every event the connection or a subscribed channel emits, in the
    /// order observed. An ergonomic addition alongside `bind`/`bind_all`
    /// for callers who'd rather consume a stream than register callbacks.
    pub fn updates(&self) -> broadcast::Receiver<Event> {
        self.update_tx.subscribe()
    }

    /// Stop the connection and wait for the actor task to exit.
    pub async fn disconnect(self) {
        drop(self.cmd_tx);
        let _ = self.task.await;
    }
}

/// A cheaply-cloneable handle to a running [`PusherClient`]'s actor.
#[derive(Clone)]
pub struct PusherHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl PusherHandle {
    pub async fn subscribe(&self, name: impl Into<String>) -> Result<SubscribedChannel> {
        self.subscribe_with(name, false).await
    }

    /// Subscribe with `parse_data_as_json` set, so this channel's `data`
    /// payloads are re-parsed as JSON when they arrive as a JSON string.
    pub async fn subscribe_with(
        &self,
        name: impl Into<String>,
        parse_data_as_json: bool,
    ) -> Result<SubscribedChannel> {
        let name = name.into();
        let (response, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            name: name.clone(),
            parse_data_as_json,
            response,
        })
        .await?;
        rx.await.map_err(channel_closed)??;
        Ok(SubscribedChannel {
            name,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    pub async fn unsubscribe(&self, name: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe { name: name.into() }).await
    }

    /// Send a client event (e.g. `client-typing`) while connected.
    pub async fn send_event(&self, event: Event) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(Command::SendEvent { event, response }).await?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn bind(&self, name: impl Into<String>, listener: Listener) -> Result<ListenerId> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Bind {
            name: name.into(),
            listener,
            response,
        })
        .await?;
        rx.await.map_err(channel_closed)
    }

    pub async fn bind_all(&self, listener: Listener) -> Result<ListenerId> {
        let (response, rx) = oneshot::channel();
        self.send(Command::BindAll { listener, response }).await?;
        rx.await.map_err(channel_closed)
    }

    pub async fn unbind(&self, name: impl Into<String>, id: ListenerId) -> Result<()> {
        self.send(Command::Unbind { name: name.into(), id }).await
    }

    pub async fn unbind_all(&self, id: ListenerId) -> Result<()> {
        self.send(Command::UnbindAll { id }).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::ConnectionError("connection actor has shut down".to_string()))
    }
}

fn channel_closed(_: oneshot::error::RecvError) -> Error {
    Error::ConnectionError("connection actor has shut down".to_string())
}

/// A channel this handle has successfully subscribed to. Binding on it
/// proxies through to the actor's `ChannelRegistry`.
pub struct SubscribedChannel {
    name: String,
    cmd_tx: mpsc::Sender<Command>,
}

impl SubscribedChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn bind(&self, name: impl Into<String>, listener: Listener) -> Result<ListenerId> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ChannelBind {
                channel: self.name.clone(),
                name: name.into(),
                listener,
                response,
            })
            .await
            .map_err(|_| Error::ConnectionError("connection actor has shut down".to_string()))?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn bind_all(&self, ignore_pusher_events: bool, listener: Listener) -> Result<ListenerId> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ChannelBindAll {
                channel: self.name.clone(),
                ignore_pusher_events,
                listener,
                response,
            })
            .await
            .map_err(|_| Error::ConnectionError("connection actor has shut down".to_string()))?;
        rx.await.map_err(channel_closed)?
    }
}

/// The connection actor. Owns `Transport`, `Connection`, and
/// `ChannelRegistry` exclusively; all mutation happens on this task.
async fn run(connector: Arc<dyn Connector>, mut cmd_rx: mpsc::Receiver<Command>, update_tx: broadcast::Sender<Event>) {
    let mut transport = Transport::new(connector);
    let mut connection = Connection::new();
    let mut channels = ChannelRegistry::new();

    let forward = update_tx.clone();
    connection.bind_all(Box::new(move |event: &Event| {
        let _ = forward.send(event.clone());
    }));

    transport.start();

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        transport.stop().await;
                        break;
                    }
                    Some(cmd) => handle_command(cmd, &mut transport, &mut connection, &mut channels).await,
                }
            }

            poll = transport.tick() => {
                match poll {
                    TransportPoll::Lifecycle(event) => {
                        connection.on_transport_event(event, transport.running());
                    }
                    TransportPoll::Received(event) => {
                        // `connection_established` is the only frame that can
                        // move the connection into `Connected`; that's the
                        // moment every registered channel needs (re)subscribing.
                        let was_connected = connection.state() == ConnectionState::Connected;
                        match connection.on_event(event) {
                            EventOutcome::Channel(event) => {
                                connection.emit(&event);
                                channels.dispatch(event);
                            }
                            EventOutcome::Action(ConnectionAction::None) => {}
                            EventOutcome::Action(ConnectionAction::Reply(reply)) => {
                                transport.send_event(&reply).await;
                            }
                            EventOutcome::Action(ConnectionAction::Reconnect) => {
                                transport.reconnect().await;
                            }
                            EventOutcome::Action(ConnectionAction::StopFatal { code }) => {
                                warn!(code, "stopping connection after fatal pusher error");
                                transport.stop().await;
                            }
                        }
                        if !was_connected && connection.state() == ConnectionState::Connected {
                            for subscribe in channels.subscribe_events().collect::<Vec<_>>() {
                                transport.send_event(&subscribe).await;
                            }
                        }
                    }
                }
            }

            fired = connection.next_timeout(), if connection.has_active_timeout() => {
                match fired {
                    TimeoutFired::Activity => {
                        let ping = connection.on_activity_timeout();
                        transport.send_event(&ping).await;
                    }
                    TimeoutFired::Pong => {
                        transport.reconnect().await;
                    }
                    TimeoutFired::Unavailable => {
                        connection.on_unavailable_timeout();
                    }
                }
            }
        }

        if !transport.running() && connection.state() == ConnectionState::Disconnected {
            break;
        }
    }
}

async fn handle_command(
    command: Command,
    transport: &mut Transport,
    connection: &mut Connection,
    channels: &mut ChannelRegistry,
) {
    match command {
        Command::Subscribe { name, parse_data_as_json, response } => {
            let result = channels.subscribe(&name, parse_data_as_json).map(|_| ());
            if result.is_ok() && connection.state() == ConnectionState::Connected {
                if let Some(channel) = channels.get_mut(&name) {
                    let subscribe = channel.subscribe_event();
                    transport.send_event(&subscribe).await;
                }
            }
            let _ = response.send(result);
        }
        Command::Unsubscribe { name } => {
            if let Some(channel) = channels.unsubscribe(&name) {
                transport.send_event(&channel.unsubscribe_event()).await;
            }
        }
        Command::SendEvent { event, response } => {
            let result = if connection.state() == ConnectionState::Connected {
                transport.send_event(&event).await;
                Ok(())
            } else {
                Err(Error::ConnectionError(format!(
                    "attempted to send '{}' while disconnected",
                    event.name
                )))
            };
            let _ = response.send(result);
        }
        Command::Bind { name, listener, response } => {
            let _ = response.send(connection.bind(name, listener));
        }
        Command::BindAll { listener, response } => {
            let _ = response.send(connection.bind_all(listener));
        }
        Command::Unbind { name, id } => connection.unbind(&name, id),
        Command::UnbindAll { id } => connection.unbind_all(id),
        Command::ChannelBind { channel, name, listener, response } => {
            let result = channels
                .get_mut(&channel)
                .map(|c| c.bind(name, listener))
                .ok_or_else(|| Error::ConnectionError(format!("not subscribed to '{channel}'")));
            let _ = response.send(result);
        }
        Command::ChannelBindAll { channel, ignore_pusher_events, listener, response } => {
            let result = channels
                .get_mut(&channel)
                .map(|c| c.bind_all(ignore_pusher_events, listener))
                .ok_or_else(|| Error::ConnectionError(format!("not subscribed to '{channel}'")));
            let _ = response.send(result);
        }
    }
}
