//! Channels: per-name event scopes layered on top of the connection.
//!
//! Grounded on the source's `Channel`/`buildChannel`: a channel validates
//! its own name, rewrites `pusher_internal:subscription_succeeded` to the
//! public `pusher:subscription_succeeded`, and optionally re-parses its
//! `data` payload as JSON. `private-`/`presence-` channels need an auth
//! endpoint this client doesn't implement, so subscribing to one fails
//! fast instead of the source's `NotImplementedError` at construction.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::emitter::{EventEmitter, Listener, ListenerId};
use crate::error::{Error, Result};
use crate::event::Event;

fn is_valid_channel_char(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '-' | '=' | '@' | ',' | '.' | ';')
}

pub fn validate_name(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(is_valid_channel_char) {
        Ok(())
    } else {
        Err(Error::BadChannelName(name.to_string()))
    }
}

enum Kind {
    Public,
    Private,
    Presence,
}

fn classify(name: &str) -> Kind {
    if name.starts_with("presence-") {
        Kind::Presence
    } else if name.starts_with("private-") {
        Kind::Private
    } else {
        Kind::Public
    }
}

pub struct Channel {
    name: String,
    parse_data_as_json: bool,
    emitter: EventEmitter,
}

impl Channel {
    fn new(name: String, parse_data_as_json: bool) -> Result<Self> {
        validate_name(&name)?;
        Ok(Self {
            name,
            parse_data_as_json,
            emitter: EventEmitter::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind(&mut self, name: impl Into<String>, listener: Listener) -> ListenerId {
        self.emitter.bind(name, listener)
    }

    pub fn unbind(&mut self, name: &str, id: ListenerId) {
        self.emitter.unbind(name, id)
    }

    /// Bind a listener to every event on this channel. When
    /// `ignore_pusher_events` is set (the source's default), `pusher:`/
    /// `pusher_internal:` events are filtered out before the listener runs,
    /// without needing the source's hash/eq listener-wrapper trick.
    pub fn bind_all(&mut self, ignore_pusher_events: bool, listener: Listener) -> ListenerId {
        if ignore_pusher_events {
            let wrapped: Listener = Box::new(move |event: &Event| {
                if !(event.name.starts_with("pusher:") || event.name.starts_with("pusher_internal:")) {
                    listener(event);
                }
            });
            self.emitter.bind_all(wrapped)
        } else {
            self.emitter.bind_all(listener)
        }
    }

    pub fn unbind_all(&mut self, id: ListenerId) {
        self.emitter.unbind_all(id)
    }

    pub fn subscribe_event(&self) -> Event {
        Event::new("pusher:subscribe", serde_json::json!({"channel": self.name}))
    }

    pub fn unsubscribe_event(&self) -> Event {
        Event::new("pusher:unsubscribe", serde_json::json!({"channel": self.name}))
    }

    /// Apply channel-local event transforms, then dispatch to bound
    /// listeners.
    pub fn emit_event(&mut self, mut event: Event) {
        if self.parse_data_as_json {
            if let Value::String(encoded) = &event.data {
                match serde_json::from_str(encoded) {
                    Ok(parsed) => event.data = parsed,
                    Err(e) => warn!(channel = self.name, error = %e, "channel data was not valid json"),
                }
            }
        }
        if event.name == "pusher_internal:subscription_succeeded" {
            event.name = "pusher:subscription_succeeded".to_string();
        }
        self.emitter.emit_event(&event);
    }
}

/// Name-keyed registry of subscribed channels, owned by the client facade
/// (matching the reference implementation, where the top-level service —
/// not the connection — holds `self.channels`).
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, or return the already-registered one. Presence
    /// and private channels are rejected: this client has no auth endpoint
    /// to satisfy their subscription handshake.
    pub fn subscribe(&mut self, name: &str, parse_data_as_json: bool) -> Result<&mut Channel> {
        if self.channels.contains_key(name) {
            warn!(channel = name, "already subscribed to channel");
            return Ok(self.channels.get_mut(name).expect("just checked"));
        }
        if matches!(classify(name), Kind::Private | Kind::Presence) {
            return Err(Error::ProtocolNotImplemented(format!(
                "channel '{name}' requires an authenticated subscription, which this client does not implement"
            )));
        }
        let channel = Channel::new(name.to_string(), parse_data_as_json)?;
        self.channels.insert(name.to_string(), channel);
        Ok(self.channels.get_mut(name).expect("just inserted"))
    }

    pub fn unsubscribe(&mut self, name: &str) -> Option<Channel> {
        let channel = self.channels.remove(name);
        if channel.is_none() {
            warn!(channel = name, "attempted to unsubscribe from a channel that wasn't subscribed");
        }
        channel
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    /// Route an incoming channel-tagged event to its channel, if still
    /// subscribed.
    pub fn dispatch(&mut self, event: Event) {
        if let Some(name) = event.channel.clone() {
            if let Some(channel) = self.channels.get_mut(&name) {
                channel.emit_event(event);
            } else {
                warn!(channel = name, "event for an unsubscribed channel");
            }
        }
    }

    /// `pusher:subscribe` frames for every currently-registered channel —
    /// sent whenever the connection (re)establishes.
    pub fn subscribe_events(&self) -> impl Iterator<Item = Event> + '_ {
        self.channels.values().map(Channel::subscribe_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_accept_letters_and_punctuation() {
        assert!(validate_name("room-one").is_ok());
        assert!(validate_name("a_b.c;d=e@f,g").is_ok());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name("room1").is_err()); // digits are not allowed
        assert!(validate_name("room one").is_err());
    }

    #[test]
    fn private_and_presence_channels_are_rejected() {
        let mut registry = ChannelRegistry::new();
        assert!(matches!(
            registry.subscribe("private-room", false),
            Err(Error::ProtocolNotImplemented(_))
        ));
        assert!(matches!(
            registry.subscribe("presence-room", false),
            Err(Error::ProtocolNotImplemented(_))
        ));
    }

    #[test]
    fn subscribing_twice_returns_the_existing_channel() {
        let mut registry = ChannelRegistry::new();
        registry.subscribe("room", false).unwrap();
        assert!(registry.subscribe("room", false).is_ok());
        assert_eq!(registry.subscribe_events().count(), 1);
    }

    #[test]
    fn internal_subscription_succeeded_is_renamed_on_emit() {
        let mut channel = Channel::new("room".to_string(), false).unwrap();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let captured = seen.clone();
        channel.bind_all(
            false,
            Box::new(move |event: &Event| *captured.lock().unwrap() = Some(event.name.clone())),
        );
        channel.emit_event(Event::bare("pusher_internal:subscription_succeeded"));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("pusher:subscription_succeeded"));
    }

    #[test]
    fn bind_all_filters_pusher_events_by_default() {
        let mut channel = Channel::new("room".to_string(), false).unwrap();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = seen.clone();
        channel.bind_all(
            true,
            Box::new(move |event: &Event| captured.lock().unwrap().push(event.name.clone())),
        );
        channel.emit_event(Event::bare("pusher:subscription_succeeded"));
        channel.emit_event(Event::bare("custom-event"));
        assert_eq!(*seen.lock().unwrap(), vec!["custom-event"]);
    }
}
