//! Client configuration and endpoint construction.
//!
//! Plays the role the source's `auth.rs`-equivalent config played for the
//! teacher crate: a `new()`/`from_env()`/`builder()` trio. There's no
//! signing key to redact here, so `PusherConfig` derives `Debug` plainly.

use url::Url;

use crate::error::{Error, Result};

const PROTOCOL_VERSION: u32 = 7;
const CLIENT_NAME: &str = "pusher-rt";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_HOST: &str = "ws.pusherapp.com";

/// Connection parameters for a Pusher app: the app key, whether to use
/// TLS, and an optional endpoint override (matching the source's
/// `endpoint_string` constructor argument, used in tests against a local
/// server).
#[derive(Debug, Clone)]
pub struct PusherConfig {
    pub key: String,
    pub encrypted: bool,
    pub endpoint_string: Option<String>,
}

impl PusherConfig {
    /// A TLS-enabled config dialing the standard Pusher endpoint.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            encrypted: true,
            endpoint_string: None,
        }
    }

    /// Read `PUSHER_APP_KEY` (required), `PUSHER_ENCRYPTED` (default true),
    /// and `PUSHER_ENDPOINT` (optional override) from the environment.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("PUSHER_APP_KEY")
            .map_err(|_| Error::MissingEnvVar("PUSHER_APP_KEY".to_string()))?;
        let encrypted = match std::env::var("PUSHER_ENCRYPTED") {
            Ok(v) => v != "false" && v != "0",
            Err(_) => true,
        };
        let endpoint_string = std::env::var("PUSHER_ENDPOINT").ok();
        Ok(Self {
            key,
            encrypted,
            endpoint_string,
        })
    }

    pub fn builder() -> PusherConfigBuilder {
        PusherConfigBuilder::default()
    }

    /// Build the `wss://`/`ws://` URL to dial, including the client name,
    /// client version, and protocol version query parameters Pusher
    /// expects on every connection.
    pub fn endpoint_url(&self) -> Result<Url> {
        if let Some(endpoint) = &self.endpoint_string {
            return Url::parse(endpoint).map_err(Error::from);
        }
        let scheme = if self.encrypted { "wss" } else { "ws" };
        let port = if self.encrypted { 443 } else { 80 };
        let raw = format!(
            "{scheme}://{DEFAULT_HOST}:{port}/app/{key}?client={client}&version={version}&protocol={protocol}",
            key = self.key,
            client = CLIENT_NAME,
            version = CLIENT_VERSION,
            protocol = PROTOCOL_VERSION,
        );
        Url::parse(&raw).map_err(Error::from)
    }
}

#[derive(Default)]
pub struct PusherConfigBuilder {
    key: Option<String>,
    encrypted: Option<bool>,
    endpoint_string: Option<String>,
}

impl PusherConfigBuilder {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = Some(encrypted);
        self
    }

    pub fn endpoint_string(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_string = Some(endpoint.into());
        self
    }

    pub fn build(self) -> Result<PusherConfig> {
        let key = self
            .key
            .ok_or_else(|| Error::Config("key is required".to_string()))?;
        Ok(PusherConfig {
            key,
            encrypted: self.encrypted.unwrap_or(true),
            endpoint_string: self.endpoint_string,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_uses_encrypted_host_and_query_params() {
        let config = PusherConfig::new("abc123");
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some(DEFAULT_HOST));
        assert_eq!(url.path(), "/app/abc123");
        assert!(url.query().unwrap().contains("protocol=7"));
    }

    #[test]
    fn unencrypted_config_uses_plain_scheme() {
        let config = PusherConfig::builder().key("abc123").encrypted(false).build().unwrap();
        assert_eq!(config.endpoint_url().unwrap().scheme(), "ws");
    }

    #[test]
    fn endpoint_override_is_used_verbatim() {
        let config = PusherConfig::builder()
            .key("abc123")
            .endpoint_string("ws://127.0.0.1:9001/app/abc123")
            .build()
            .unwrap();
        assert_eq!(config.endpoint_url().unwrap().as_str(), "ws://127.0.0.1:9001/app/abc123");
    }

    #[test]
    fn builder_requires_a_key() {
        assert!(PusherConfig::builder().build().is_err());
    }
}
