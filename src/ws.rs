//! WebSocket connection machinery: the wire protocol adapter, the
//! reconnecting transport, the Pusher connection state machine, and
//! channels.

pub mod channel;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use channel::{Channel, ChannelRegistry};
pub use connection::{Connection, ConnectionState};
pub use protocol::{Connector, Protocol, UrlConnector};
pub use transport::{Transport, TransportState};
