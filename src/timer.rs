//! Cancel-and-restart inactivity timer.
//!
//! Only one sleeper is ever pending per timer. Aborting a tokio task does not
//! retract a message it already sent, so every firing carries the generation it
//! was armed with and consumers must drop firings for which
//! [`RestartableTimer::is_current`] is false.

use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct RestartableTimer {
    duration: Duration,
    generation: u64,
    armed: bool,
    handle: Option<JoinHandle<()>>,
}

impl RestartableTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            generation: 0,
            armed: false,
            handle: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Cancel any pending firing and arm a new one. `on_fire` receives the
    /// generation this arming was given.
    ///
    /// Must be called from within a tokio runtime.
    pub fn restart<F>(&mut self, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.abort_pending();
        self.generation += 1;
        self.armed = true;

        let generation = self.generation;
        let duration = self.duration;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire(generation);
        }));

        generation
    }

    pub fn cancel(&mut self) {
        self.abort_pending();
        self.armed = false;
        // A firing already in flight must not match any future arming either.
        self.generation += 1;
    }

    /// Whether a firing tagged `generation` is the live one. Call [`disarm`]
    /// after acting on it.
    ///
    /// [`disarm`]: RestartableTimer::disarm
    pub fn is_current(&self, generation: u64) -> bool {
        self.armed && generation == self.generation
    }

    pub fn disarm(&mut self) {
        self.armed = false;
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn abort_pending(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RestartableTimer {
    fn drop(&mut self) {
        self.abort_pending();
    }
}
