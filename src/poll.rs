//! Interval polling with a timeout-with-minimum-ticks guard.
//!
//! [`Poll`] repeats an async fetch on a fixed interval and hands each result
//! to the consumer. It deliberately carries no "stop on condition" logic:
//! the consumer applies its own predicate and emission bound, typically
//! "stop after the first value matching P" or "stop after N matches".
//!
//! # Timeout semantics
//!
//! The first tick fires immediately; the tick counter `n` starts at 1 on the
//! first emission. Before fetching tick `n`'s value the guard is evaluated:
//! the poll fails with [`PollError::Timeout`] iff
//!
//! ```text
//! n * interval > timeout  &&  n >= run_at_least
//! ```
//!
//! The `run_at_least` floor exists so that a long first real check is not
//! aborted by a `timeout` that is small relative to `interval`. With
//! interval 1000 ms, timeout 3000 ms and run_at_least 2, the poll fails at
//! tick 4 (t = 4000 ms), not tick 3.
//!
//! # Cancellation
//!
//! Besides the timeout guard, a poll can be stopped from outside through a
//! [`CancellationToken`] ([`Poll::with_cancel`]), checked at every tick
//! boundary. This makes a poll whose consumer never stops it cancellable
//! without changing the timeout contract.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Interval, timeout and minimum-tick floor for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between ticks (the first tick fires immediately).
    pub interval: Duration,

    /// Logical time budget; compared against `n * interval`, not wall time.
    pub timeout: Duration,

    /// Minimum number of ticks before the timeout guard may trip.
    pub run_at_least: u32,
}

impl PollSettings {
    pub const fn new(interval: Duration, timeout: Duration, run_at_least: u32) -> Self {
        PollSettings {
            interval,
            timeout,
            run_at_least,
        }
    }
}

impl Default for PollSettings {
    /// 10 s interval, 2 min timeout, at least 2 ticks.
    fn default() -> Self {
        PollSettings::new(Duration::from_secs(10), Duration::from_secs(120), 2)
    }
}

/// One emitted poll observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus<T> {
    /// Logical time passed: `n * interval` for the n-th emission.
    pub time_passed: Duration,

    /// The fetched value.
    pub value: T,
}

/// Why a poll stopped without the consumer asking it to.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The timeout guard tripped.
    #[error("timeout while polling: {elapsed:?} exceeded timeout of {timeout:?}")]
    Timeout { elapsed: Duration, timeout: Duration },

    /// The cancellation token was triggered.
    #[error("poll cancelled")]
    Cancelled,

    /// The fetch itself failed; polling stops on the first fetch error.
    #[error("poll fetch failed: {0}")]
    Fetch(E),
}

/// An in-progress poll. Create with [`poll`], consume with
/// [`next`](Poll::next).
pub struct Poll<F> {
    settings: PollSettings,
    ticker: Interval,
    ticks: u32,
    cancel: CancellationToken,
    fetch: F,
}

/// Starts a poll of `fetch` with the given settings.
///
/// Nothing happens until the first call to [`Poll::next`].
pub fn poll<T, E, F, Fut>(settings: PollSettings, fetch: F) -> Poll<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug_assert!(!settings.interval.is_zero(), "poll interval must be non-zero");

    let mut ticker = tokio::time::interval(settings.interval);
    // A late tick shifts the schedule rather than bursting to catch up;
    // logical time (n * interval) is what the timeout guard measures.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    Poll {
        settings,
        ticker,
        ticks: 0,
        cancel: CancellationToken::new(),
        fetch,
    }
}

impl<F> Poll<F> {
    /// Attaches a cancellation token, checked at every tick boundary.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of ticks taken so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Waits for the next tick and fetches one observation.
    pub async fn next<T, E, Fut>(&mut self) -> Result<PollStatus<T>, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
            _ = self.ticker.tick() => {}
        }

        self.ticks += 1;
        let elapsed = self.settings.interval * self.ticks;

        if elapsed > self.settings.timeout && self.ticks >= self.settings.run_at_least {
            return Err(PollError::Timeout {
                elapsed,
                timeout: self.settings.timeout,
            });
        }

        let value = (self.fetch)().await.map_err(PollError::Fetch)?;
        Ok(PollStatus {
            time_passed: elapsed,
            value,
        })
    }
}
