//! Thin WebSocket binding: decode frames into [`Event`]s, frame them back.
//!
//! This is the only place that talks to `tokio-tungstenite` directly. Both
//! production code and the local-loopback tests use the same concrete
//! stream type — production dials a real `wss://` host, tests dial a
//! `ws://127.0.0.1:<port>` test server spun up with `accept_async` — so
//! there's no need to box or generalize over the transport stream.

use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::error::Result;
use crate::event::{self, Event};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What came off the wire: either a decoded Pusher event, or the
/// connection closing (cleanly or otherwise).
pub enum Incoming {
    Event(Event),
    Closed {
        clean: bool,
        code: u16,
        reason: String,
    },
}

/// Dials a WebSocket endpoint and returns the established stream.
///
/// Stands in for the source's endpoint+factory pair: production code uses
/// [`UrlConnector`], tests substitute one that dials a local listener or
/// fails deterministically.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<WsStream>;
}

/// Connects to a fixed URL via `tokio-tungstenite`'s `connect_async`, which
/// picks plain or TLS transport from the URL scheme.
pub struct UrlConnector {
    url: url::Url,
}

impl UrlConnector {
    pub fn new(url: url::Url) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl Connector for UrlConnector {
    async fn connect(&self) -> Result<WsStream> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        Ok(stream)
    }
}

/// Binds a live `WsStream` to the event codec.
pub struct Protocol {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closing: bool,
}

impl Protocol {
    pub fn new(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink,
            stream,
            closing: false,
        }
    }

    /// Frame `event` via the event codec and write it.
    pub async fn send_event(&mut self, event: &Event) -> Result<()> {
        let wire = event::serialize(event)?;
        self.sink.send(Message::Text(wire.into())).await?;
        Ok(())
    }

    /// Wait for the next decoded event or the connection closing. Ping,
    /// pong, and raw-frame messages are consumed transparently — they
    /// aren't Pusher events.
    pub async fn next_incoming(&mut self) -> Incoming {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match event::load(text.as_str()) {
                    Ok(event) => return Incoming::Event(event),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed pusher frame");
                        continue;
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    return Incoming::Closed {
                        clean: false,
                        code: 1003,
                        reason: "binary websocket frame not implemented".to_string(),
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    return Incoming::Closed {
                        clean: true,
                        code,
                        reason,
                    };
                }
                Some(Err(e)) => {
                    return Incoming::Closed {
                        clean: false,
                        code: 1006,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return Incoming::Closed {
                        clean: false,
                        code: 1006,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }

    /// Initiate a graceful close (code 1000). Idempotent.
    pub async fn disconnect(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            warn!(error = %e, "error sending close frame");
        }
    }
}
