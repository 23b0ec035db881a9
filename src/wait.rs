//! Clock, cancellable waits and retry policy
//!
//! Every pause the orchestrator takes (pacing steps, settle delays, the
//! initial wait, the gate's poll interval) goes through a [`Waiter`], so
//! tests can swap in a [`ManualClock`] and Ctrl-C can cut a wait short.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when a wait was interrupted by the operator
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Wait cancelled by operator")]
pub struct Cancelled;

/// Source of sleeps
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct ManualClock {
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// A clock paired with a cancellation token
#[derive(Clone)]
pub struct Waiter {
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        Self { clock, cancel }
    }

    /// Real-time waiter that is never cancelled
    pub fn realtime() -> Self {
        Self::new(Arc::new(TokioClock), CancellationToken::new())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn wait(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = self.clock.sleep(duration) => Ok(()),
        }
    }
}

/// How the completion gate repeats its polling passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between passes
    pub interval: Duration,
    /// Maximum number of passes; `None` waits until every fleet converges
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether another pass may run after `attempts` passes
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(90))
    }
}
