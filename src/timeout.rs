//! One-shot, resettable, cancellable timer.
//!
//! The reference implementation stores a callback and has the reactor
//! invoke it directly when the timer fires. Here, `Timeout` instead exposes
//! an awaitable `fire()`, meant to be used as one arm of a `tokio::select!`
//! in the owning actor — the actor performs the "callback" inline. This
//! keeps the single-threaded cooperative model of the connection actor
//! intact without spawning a task per timer.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

/// A timer that can be started, stopped, and reset, firing at most once per
/// arm.
pub struct Timeout {
    duration: Duration,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
            timed_out: false,
        }
    }

    /// Arm the timer at `now + duration`. A no-op (logged) if already armed.
    pub fn start(&mut self) {
        if self.deadline.is_some() {
            debug!("timeout started while already running");
            return;
        }
        self.timed_out = false;
        self.deadline = Some(Instant::now() + self.duration);
    }

    /// Cancel the timer if armed. Idempotent.
    pub fn stop(&mut self) {
        if self.deadline.take().is_none() {
            info!("cannot stop the timeout since it is not active");
        }
    }

    /// Re-arm to `duration` (or `new_duration` if given) if currently armed;
    /// a no-op (logged) otherwise.
    pub fn reset(&mut self, new_duration: Option<Duration>) {
        if let Some(d) = new_duration {
            self.duration = d;
        }
        if self.deadline.is_some() {
            self.deadline = Some(Instant::now() + self.duration);
        } else {
            info!("cannot reset the timeout since it is not active");
        }
    }

    pub fn active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Resolves once the armed deadline elapses, clearing the arm and
    /// setting `timed_out`. Never resolves while unarmed — safe to await
    /// unconditionally inside a `tokio::select!` loop.
    pub async fn fire(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
                self.timed_out = true;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
