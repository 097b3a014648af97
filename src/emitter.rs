//! Name-indexed and global event listener registry.
//!
//! Mirrors the reference implementation's `EventEmitter`: every bound
//! listener for an event's name runs, then every global listener, with
//! per-listener faults isolated so one bad listener can't take down the
//! connection. Rust has no closure-identity/equality story, so unlike the
//! source (which unbinds by comparing the listener itself), every `bind*`
//! call here returns an opaque [`ListenerId`] used for unbinding.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::event::Event;

pub type Listener = Box<dyn Fn(&Event) + Send + 'static>;

/// Opaque handle returned by `bind`/`bind_all`, used to `unbind`/`unbind_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ListenerId {
    ListenerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

struct Bound {
    id: ListenerId,
    listener: Listener,
}

/// Dispatches [`Event`]s to listeners bound by name or bound globally.
#[derive(Default)]
pub struct EventEmitter {
    by_name: HashMap<String, Vec<Bound>>,
    global: Vec<Bound>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to a specific event name.
    pub fn bind(&mut self, name: impl Into<String>, listener: Listener) -> ListenerId {
        let id = next_id();
        self.by_name
            .entry(name.into())
            .or_default()
            .push(Bound { id, listener });
        id
    }

    /// Unbind a previously-bound name listener. Warns if not found.
    pub fn unbind(&mut self, name: &str, id: ListenerId) {
        match self.by_name.get_mut(name) {
            Some(listeners) => {
                let before = listeners.len();
                listeners.retain(|b| b.id != id);
                if listeners.len() == before {
                    warn!(event = name, "could not unbind listener: not found");
                }
            }
            None => warn!(event = name, "could not unbind listener: event unknown"),
        }
    }

    /// Bind a listener to every event produced by this emitter.
    pub fn bind_all(&mut self, listener: Listener) -> ListenerId {
        let id = next_id();
        self.global.push(Bound { id, listener });
        id
    }

    /// Unbind a previously-bound global listener. Warns if not found.
    pub fn unbind_all(&mut self, id: ListenerId) {
        let before = self.global.len();
        self.global.retain(|b| b.id != id);
        if self.global.len() == before {
            warn!("could not unbind global listener: not found");
        }
    }

    /// Dispatch `event` to every global listener, then every listener bound
    /// to `event.name`. A listener registered both ways runs twice — by
    /// design, there is no de-duplication.
    pub fn emit_event(&self, event: &Event) {
        for bound in self.global.iter().chain(
            self.by_name
                .get(&event.name)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
        ) {
            invoke(bound, event);
        }
    }
}

/// Runs one listener, isolating any panic.
///
/// The source distinguishes assertion failures (propagated, used by tests)
/// from any other exception (caught and warned about). Rust panics carry no
/// such distinction at the `catch_unwind` boundary, so every listener panic
/// is caught and logged here; tests that need to assert on internal
/// invariants should do so outside of a bound listener.
fn invoke(bound: &Bound, event: &Event) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (bound.listener)(event))) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(
            listener = bound.id.0,
            event = event.name,
            %message,
            "listener panicked, continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let listener: Listener = Box::new(move |event| {
            captured.lock().unwrap().push(event.name.clone());
        });
        (listener, seen)
    }

    #[test]
    fn bound_listener_receives_matching_events_only() {
        let mut emitter = EventEmitter::new();
        let (listener, seen) = recorder();
        emitter.bind("connected", listener);

        emitter.emit_event(&Event::bare("connected"));
        emitter.emit_event(&Event::bare("disconnected"));

        assert_eq!(*seen.lock().unwrap(), vec!["connected"]);
    }

    #[test]
    fn global_listener_receives_every_event() {
        let mut emitter = EventEmitter::new();
        let (listener, seen) = recorder();
        emitter.bind_all(listener);

        emitter.emit_event(&Event::bare("a"));
        emitter.emit_event(&Event::bare("b"));

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn listener_bound_both_ways_runs_twice() {
        let mut emitter = EventEmitter::new();
        let (global, seen) = recorder();
        let (named, _) = {
            let captured = seen.clone();
            (
                Box::new(move |event: &Event| captured.lock().unwrap().push(event.name.clone()))
                    as Listener,
                (),
            )
        };
        emitter.bind_all(global);
        emitter.bind("connected", named);

        emitter.emit_event(&Event::bare("connected"));

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn unbind_removes_listener() {
        let mut emitter = EventEmitter::new();
        let (listener, seen) = recorder();
        let id = emitter.bind("connected", listener);
        emitter.unbind("connected", id);

        emitter.emit_event(&Event::bare("connected"));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unbind_missing_listener_does_not_panic() {
        let mut emitter = EventEmitter::new();
        emitter.unbind("connected", ListenerId(999));
        emitter.unbind_all(ListenerId(999));
    }

    #[test]
    fn one_bad_listener_does_not_stop_others() {
        let mut emitter = EventEmitter::new();
        let (listener, seen) = recorder();
        emitter.bind("connected", Box::new(|_| panic!("boom")));
        emitter.bind("connected", listener);

        emitter.emit_event(&Event::bare("connected"));

        assert_eq!(*seen.lock().unwrap(), vec!["connected"]);
    }

    #[test]
    fn data_is_carried_through_untouched() {
        let mut emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        emitter.bind(
            "foo",
            Box::new(move |event| *captured.lock().unwrap() = Some(event.data.clone())),
        );

        emitter.emit_event(&Event::new("foo", json!({"x": 1})));

        assert_eq!(seen.lock().unwrap().clone(), Some(json!({"x": 1})));
    }
}
