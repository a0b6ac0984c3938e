//! Admission control against the remote API's published rate limits.
//!
//! Per-minute request and token counters live in a tumbling 60-second window
//! anchored to the last reset, not a true sliding window: a burst right at a
//! window boundary can exceed the nominal rate by up to 2x. That is the
//! accepted approximation of the upstream limits, exercised in the tests
//! below rather than "fixed".

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use tracing::{info, warn};

/// Requests per minute allowed by the API tier.
pub const RATE_LIMIT_RPM: u32 = 10;
/// Tokens per minute allowed by the API tier.
pub const RATE_LIMIT_TPM: u64 = 4_000_000;
/// Requests per calendar day. No recovery path other than date rollover.
pub const RATE_LIMIT_RPD: u32 = 1_500;

/// Wall-clock source, injectable so admission logic is testable
/// deterministically.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub requests_per_day: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: RATE_LIMIT_RPM,
            tokens_per_minute: RATE_LIMIT_TPM,
            requests_per_day: RATE_LIMIT_RPD,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed,
    /// Admitted after suspending for the given number of seconds.
    AllowedAfterDelay(f64),
    /// Terminal for the calling operation; no retry.
    Rejected(String),
}

/// Tumbling per-minute and calendar-day usage counters.
///
/// Owned exclusively by the pipeline; all mutation goes through [`admit`]
/// (or the synchronous pieces it is built from). State is process-wide and
/// not persisted across restarts.
///
/// [`admit`]: QuotaTracker::admit
pub struct QuotaTracker<C: Clock = SystemClock> {
    limits: QuotaLimits,
    clock: C,
    requests: u32,
    tokens: u64,
    window_start: DateTime<Local>,
    daily_requests: u32,
    day: NaiveDate,
    // Per-batch attempt counts within the current minute window, recorded
    // before the cap checks so rejected attempts appear too. Observability
    // only, never consulted for enforcement.
    batches: HashMap<String, u32>,
}

impl QuotaTracker<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(QuotaLimits::default(), SystemClock)
    }

    pub fn with_limits(limits: QuotaLimits) -> Self {
        Self::with_clock(limits, SystemClock)
    }
}

impl Default for QuotaTracker<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> QuotaTracker<C> {
    pub fn with_clock(limits: QuotaLimits, clock: C) -> Self {
        let now = clock.now();
        info!("Rate limiter initialized");
        Self {
            limits,
            requests: 0,
            tokens: 0,
            window_start: now,
            daily_requests: 0,
            day: now.date_naive(),
            batches: HashMap::new(),
            clock,
        }
    }

    /// Admit one unit of work, suspending over per-minute caps and rejecting
    /// only on the daily cap.
    ///
    /// Each per-minute cap triggers at most one wait; after the wait the
    /// minute window is reset unconditionally and the check moves on, so
    /// even a request whose token estimate exceeds a whole window's cap is
    /// admitted after a single delay.
    pub async fn admit(&mut self, estimated_tokens: u64, batch_id: Option<&str>) -> Decision {
        let now = self.clock.now();
        self.roll_windows(now);

        if let Some(id) = batch_id {
            *self.batches.entry(id.to_string()).or_insert(0) += 1;
        }

        let mut waited = 0.0f64;
        if self.requests >= self.limits.requests_per_minute {
            waited += self.wait_out_window().await;
        }
        if self.tokens + estimated_tokens >= self.limits.tokens_per_minute {
            waited += self.wait_out_window().await;
        }
        if self.daily_requests >= self.limits.requests_per_day {
            warn!(
                daily = self.daily_requests,
                limit = self.limits.requests_per_day,
                "daily request limit exceeded"
            );
            return Decision::Rejected(format!(
                "Daily limit exceeded: {} requests per day",
                self.limits.requests_per_day
            ));
        }

        self.commit(estimated_tokens);
        if waited > 0.0 {
            Decision::AllowedAfterDelay(waited)
        } else {
            Decision::Allowed
        }
    }

    /// Sleep out the remainder of the current minute window, then reset it.
    async fn wait_out_window(&mut self) -> f64 {
        let now = self.clock.now();
        let elapsed = (now - self.window_start).num_milliseconds() as f64 / 1000.0;
        let secs = (60.0 - elapsed).max(0.0);
        info!(wait_secs = secs, "per-minute quota reached, waiting for window reset");
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        self.reset_window(self.clock.now());
        secs
    }

    /// Roll the minute window and the calendar-day counter forward if their
    /// boundaries have been crossed.
    fn roll_windows(&mut self, now: DateTime<Local>) {
        if (now - self.window_start).num_seconds() >= 60 {
            info!(
                requests = self.requests,
                tokens = self.tokens,
                "rate limit window reset"
            );
            self.reset_window(now);
        }
        if now.date_naive() != self.day {
            info!(requests = self.daily_requests, "daily limit reset");
            self.daily_requests = 0;
            self.day = now.date_naive();
        }
    }

    fn reset_window(&mut self, now: DateTime<Local>) {
        self.requests = 0;
        self.tokens = 0;
        self.window_start = now;
        self.batches.clear();
    }

    fn commit(&mut self, estimated_tokens: u64) {
        self.requests += 1;
        self.tokens += estimated_tokens;
        self.daily_requests += 1;
        info!(
            minute_requests = self.requests,
            minute_tokens = self.tokens,
            daily_requests = self.daily_requests,
            "API request admitted"
        );
    }

    /// Requests admitted in the current minute window.
    pub fn minute_requests(&self) -> u32 {
        self.requests
    }

    /// Tokens admitted in the current minute window.
    pub fn minute_tokens(&self) -> u64 {
        self.tokens
    }

    /// Requests admitted on the current calendar day.
    pub fn daily_requests(&self) -> u32 {
        self.daily_requests
    }

    /// Admission attempts a given batch has made in the current minute
    /// window, rejected ones included.
    pub fn batch_requests(&self, batch_id: &str) -> u32 {
        self.batches.get(batch_id).copied().unwrap_or(0)
    }
}
