//! Exponential backoff used for connection retries.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Default base delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Default maximum delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Default duration of healthy connectivity that resets backoff state.
pub const DEFAULT_BACKOFF_RESET: Duration = Duration::from_secs(30);
/// Default window after the first failure during which retries continue.
pub const DEFAULT_BACKOFF_DEADLINE: Duration = Duration::from_secs(120);

/// Capped, jittered exponential backoff policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub reset_after: Duration,
    pub deadline: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            reset_after: DEFAULT_BACKOFF_RESET,
            deadline: DEFAULT_BACKOFF_DEADLINE,
        }
    }
}

/// Tracks consecutive connection failures and produces jittered delays.
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
    failure_since: Option<Instant>,
    connected_since: Option<Instant>,
    rng: StdRng,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.base,
            failure_since: None,
            connected_since: None,
            rng: StdRng::from_entropy(),
            policy,
        }
    }

    /// Record that the connection came up, closing the failure window.
    pub fn record_connected(&mut self, now: Instant) {
        self.connected_since = Some(now);
        self.failure_since = None;
    }

    /// Record that the connection went down; the delay only drops back to
    /// `base` if the connection stayed healthy for `reset_after`.
    pub fn record_lost(&mut self, now: Instant) {
        if let Some(since) = self.connected_since.take()
            && now.duration_since(since) >= self.policy.reset_after
        {
            self.current = self.policy.base;
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Delay before the next attempt, or `None` once the deadline has passed.
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        let start = *self.failure_since.get_or_insert(now);
        if now.duration_since(start) >= self.policy.deadline {
            return None;
        }
        if now != start {
            self.current = self.current.saturating_mul(2).min(self.policy.cap);
        }

        const MIN_DELAY_MS: u64 = 10;
        let max_ms = u64::try_from(self.current.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = match max_ms {
            0 => MIN_DELAY_MS,
            1..=MIN_DELAY_MS => max_ms,
            _ => self.rng.gen_range(MIN_DELAY_MS..=max_ms),
        };
        Some(Duration::from_millis(delay_ms))
    }
}
