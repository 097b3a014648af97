//! An async client for Pusher's WebSocket pub/sub protocol.
//!
//! Handles the connection lifecycle end to end: dialing, exponential
//! backoff, keepalive ping/pong, `pusher:error` classification, and
//! per-channel subscription — the plumbing underneath an application's
//! event handlers rather than a wrapper around Pusher's HTTP API.
//!
//! # Quick Start
//!
//! ```no_run
//! use pusher_rt::{PusherClient, PusherConfig};
//!
//! # async fn run() -> pusher_rt::Result<()> {
//! let client = PusherClient::connect(PusherConfig::new("your-app-key"))?;
//! let handle = client.handle();
//!
//! let channel = handle.subscribe("my-channel").await?;
//! channel
//!     .bind("my-event", Box::new(|event| {
//!         println!("{}: {}", event.name, event.data);
//!     }))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Variables
//!
//! [`PusherConfig::from_env`] reads:
//! - `PUSHER_APP_KEY`: your Pusher app key (required)
//! - `PUSHER_ENCRYPTED`: whether to dial over TLS (default: `true`)
//! - `PUSHER_ENDPOINT`: override the dial target, mainly for tests against a local server

pub mod client;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod timeout;
pub mod ws;

pub use client::{PusherClient, PusherHandle, SubscribedChannel};
pub use config::{PusherConfig, PusherConfigBuilder};
pub use emitter::{EventEmitter, Listener, ListenerId};
pub use error::{Error, Result};
pub use event::Event;
pub use timeout::Timeout;
pub use ws::channel::{Channel, ChannelRegistry};
pub use ws::connection::{Connection, ConnectionState};
pub use ws::protocol::{Connector, Protocol, UrlConnector};
pub use ws::transport::{Transport, TransportState};
