use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::TransportError;

#[derive(Default)]
struct TimerShared {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation flag shared between a timer and its callback.
///
/// A callback that takes a lock before acting must re-check
/// [`is_cancelled`](Self::is_cancelled) once it holds the lock: the timer
/// may have been cancelled while the callback was waiting.
#[derive(Clone, Default)]
pub struct TimerToken {
    shared: Arc<TimerShared>,
}

impl TimerToken {
    pub fn cancel(&self) {
        *self.shared.cancelled.lock() = true;
        self.shared.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancelled.lock()
    }

    /// Sleep until `deadline` or cancellation. Returns `true` if cancelled.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.shared.cancelled.lock();
        while !*cancelled {
            let wake = &self.shared.wake;
            if wake.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// One-shot countdown on its own thread.
///
/// Fires at most once. Cancelling (or dropping) wakes the thread, which
/// exits without firing. The thread is never joined, so cancelling from
/// inside the callback or while holding locks the callback wants is safe.
pub struct Countdown {
    token: TimerToken,
    deadline: Instant,
}

impl Countdown {
    pub fn start<F>(name: &str, after: Duration, on_fire: F) -> Result<Self, TransportError>
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        let token = TimerToken::default();
        let deadline = Instant::now() + after;
        let thread_token = token.clone();

        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                if !thread_token.wait_until(deadline) {
                    on_fire(thread_token);
                }
            })
            .map_err(|e| spawn_failed(name, e))?;

        Ok(Self { token, deadline })
    }

    /// Time left before firing (zero once due).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Periodic tick on its own thread.
///
/// The callback returns `false` to end the ticker. Dropping cancels it.
pub struct Ticker {
    token: TimerToken,
}

impl Ticker {
    pub fn start<F>(name: &str, period: Duration, mut on_tick: F) -> Result<Self, TransportError>
    where
        F: FnMut(&TimerToken) -> bool + Send + 'static,
    {
        let token = TimerToken::default();
        let thread_token = token.clone();

        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let mut next = Instant::now() + period;
                while !thread_token.wait_until(next) {
                    if !on_tick(&thread_token) {
                        break;
                    }
                    next += period;
                    // Skip missed ticks instead of bursting.
                    let now = Instant::now();
                    if next < now {
                        next = now + period;
                    }
                }
            })
            .map_err(|e| spawn_failed(name, e))?;

        Ok(Self { token })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn spawn_failed(name: &str, e: std::io::Error) -> TransportError {
    TransportError::StreamFailed(format!("failed to spawn {} thread: {}", name, e))
}

/// Accumulates active time across pause/resume.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveClock {
    accumulated: Duration,
    since: Option<Instant>,
}

impl ActiveClock {
    pub fn start(&mut self) {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.since.map(|s| s.elapsed()).unwrap_or_default()
    }
}
