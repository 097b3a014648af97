//! Error types for the Pusher client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An event was serialized or loaded with no (or an empty) `name`.
    #[error("bad event name: {0}")]
    BadEventName(String),

    /// A channel name failed the Pusher channel-name validation rule.
    #[error("bad channel name: {0}")]
    BadChannelName(String),

    /// An action was attempted while the connection was not in a state
    /// that permits it (e.g. sending while disconnected).
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// A feature the wire protocol allows but this client does not
    /// implement (binary frames, presence/private channels).
    #[error("not implemented: {0}")]
    ProtocolNotImplemented(String),

    /// A `pusher:error` frame was received from the server.
    #[error("pusher error {code}: {message}")]
    PusherError { code: u32, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
