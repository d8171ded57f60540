//! Request-rate budget for the upstream generation provider.
//!
//! A [`RateLimiter`] is shared by every task that calls the provider. Blocking
//! acquirers queue on a FIFO turnstile and then sleep until the budget can
//! cover their cost; permits are consumed in the same critical section that
//! grants them, so a cancelled or timed-out `acquire` never strands permits.

mod budget;

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{MAX_DURATION, RateLimitConfig};
use crate::error::{RagError, Result};
use budget::Budget;

/// Lowest effective limit a load factor can push the limiter down to, unless
/// the base limit is already smaller.
pub const MIN_ADAPTIVE_LIMIT: u32 = 10;

/// How permits are accounted over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Rolling log of grant timestamps. At most `limit` permits are granted in
    /// any interval of length `window`.
    #[default]
    SlidingWindow,
    /// Bucket of `limit` tokens refilling at `limit / window`. O(1) bookkeeping,
    /// but allows a full bucket to be spent right before a refill, so an
    /// interval of length `window` may see up to `2 * limit` permits.
    TokenBucket,
}

impl RateLimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding_window" => Ok(Self::SlidingWindow),
            "token_bucket" => Ok(Self::TokenBucket),
            other => Err(RagError::invalid(format!(
                "unknown rate limit strategy '{other}' (expected sliding_window or token_bucket)"
            ))),
        }
    }
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimiterStats {
    pub strategy: RateLimitStrategy,
    /// Effective permits per window.
    pub limit: u32,
    /// Configured permits per window, before the load factor.
    pub base_limit: u32,
    pub load_factor: f64,
    pub window: Duration,
    /// Successful acquisitions.
    pub grants: u64,
    /// Permits consumed across all grants.
    pub permits_granted: u64,
    /// `try_acquire` calls that returned `false`.
    pub rejected: u64,
    /// `acquire_with_timeout` calls that expired.
    pub timeouts: u64,
    /// Permits grantable right now.
    pub available: u32,
}

#[derive(Debug, Default)]
struct Counters {
    grants: u64,
    permits_granted: u64,
    rejected: u64,
    timeouts: u64,
}

#[derive(Debug)]
struct State {
    budget: Budget,
    /// Effective limit: `base_limit` scaled by `load_factor`.
    limit: u32,
    load_factor: f64,
    counters: Counters,
}

/// Shared request-rate budget.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use quill_rag::{RateLimiter, RateLimitStrategy};
///
/// let limiter = RateLimiter::new(60, Duration::from_secs(60), RateLimitStrategy::SlidingWindow)?;
/// limiter.acquire(1).await?;
/// // call the provider
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    base_limit: u32,
    window: Duration,
    strategy: RateLimitStrategy,
    state: Mutex<State>,
    turnstile: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    /// Create a limiter granting at most `limit` permits per `window`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `limit` is zero, or if `window` is zero
    /// or longer than [`MAX_DURATION`].
    pub fn new(limit: u32, window: Duration, strategy: RateLimitStrategy) -> Result<Self> {
        if limit == 0 {
            return Err(RagError::invalid("rate limit must be at least 1"));
        }
        if window.is_zero() {
            return Err(RagError::invalid("rate window must be greater than zero"));
        }
        if window > MAX_DURATION {
            return Err(RagError::invalid(format!(
                "rate window {window:?} exceeds {MAX_DURATION:?}"
            )));
        }
        Ok(Self {
            base_limit: limit,
            window,
            strategy,
            state: Mutex::new(State {
                budget: Budget::new(strategy, limit, Instant::now()),
                limit,
                load_factor: 1.0,
                counters: Counters::default(),
            }),
            turnstile: tokio::sync::Mutex::new(()),
        })
    }

    /// Create a limiter from a [`RateLimitConfig`].
    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.limit, config.window, config.strategy)
    }

    /// Effective permits per window, after the load factor.
    pub fn limit(&self) -> u32 {
        self.lock().limit
    }

    /// Permits per window the limiter was created with.
    pub fn base_limit(&self) -> u32 {
        self.base_limit
    }

    pub fn load_factor(&self) -> f64 {
        self.lock().load_factor
    }

    /// Scale the limit to `factor` times the base limit, returning the new
    /// effective limit.
    ///
    /// The result is rounded down and never drops below
    /// [`MIN_ADAPTIVE_LIMIT`] (or the base limit, if that is smaller). The new
    /// limit applies to the next grant, including to waiters already queued:
    /// a waiter whose cost exceeds a lowered limit is granted the whole new
    /// limit instead. Permits already granted inside the window still count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `factor` is not a positive finite number.
    pub fn set_load_factor(&self, factor: f64) -> Result<u32> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(RagError::invalid(format!(
                "load factor must be a positive number (got {factor})"
            )));
        }
        let floor = self.base_limit.min(MIN_ADAPTIVE_LIMIT);
        // `as` saturates at u32::MAX.
        let effective = ((f64::from(self.base_limit) * factor).floor() as u32).max(floor);
        let mut state = self.lock();
        state.limit = effective;
        state.load_factor = factor;
        drop(state);
        info!(factor, base_limit = self.base_limit, limit = effective, "updated rate load factor");
        Ok(effective)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    /// Wait until `cost` permits are available, then consume them.
    ///
    /// Waiters are served in arrival order. Dropping the returned future
    /// before it completes consumes nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `cost` is zero or exceeds both the base
    /// and the effective limit.
    pub async fn acquire(&self, cost: u32) -> Result<()> {
        self.check_cost(cost)?;
        let _turn = self.turnstile.lock().await;
        loop {
            let wait = {
                let mut state = self.lock();
                match self.take(&mut state, cost) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };
            trace!(cost, wait_ms = wait.as_millis() as u64, "waiting for rate budget");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume `cost` permits if they are available right now.
    ///
    /// Returns `false` without consuming anything when the budget cannot
    /// cover `cost` or when blocking acquirers are already queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `cost` is zero or exceeds both the base
    /// and the effective limit.
    pub fn try_acquire(&self, cost: u32) -> Result<bool> {
        self.check_cost(cost)?;
        let granted = match self.turnstile.try_lock() {
            Ok(_turn) => {
                let mut state = self.lock();
                let granted = self.take(&mut state, cost).is_ok();
                if !granted {
                    state.counters.rejected += 1;
                }
                granted
            }
            Err(_) => {
                self.lock().counters.rejected += 1;
                false
            }
        };
        if !granted {
            debug!(cost, "rate budget exhausted, rejecting");
        }
        Ok(granted)
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitTimeout` if the permits were not granted in time, or
    /// `InvalidArgument` for an out-of-range `cost`.
    pub async fn acquire_with_timeout(&self, cost: u32, timeout: Duration) -> Result<()> {
        self.check_cost(cost)?;
        match tokio::time::timeout(timeout, self.acquire(cost)).await {
            Ok(result) => result,
            Err(_) => {
                self.lock().counters.timeouts += 1;
                warn!(cost, timeout_ms = timeout.as_millis() as u64, "rate limit wait timed out");
                Err(RagError::RateLimitTimeout { waited: timeout })
            }
        }
    }

    /// Permits grantable right now.
    pub fn available(&self) -> u32 {
        let mut state = self.lock();
        let limit = state.limit;
        state.budget.available(limit, self.window, Instant::now())
    }

    /// Snapshot of the limiter counters.
    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.lock();
        let limit = state.limit;
        let available = state.budget.available(limit, self.window, Instant::now());
        RateLimiterStats {
            strategy: self.strategy,
            limit,
            base_limit: self.base_limit,
            load_factor: state.load_factor,
            window: self.window,
            grants: state.counters.grants,
            permits_granted: state.counters.permits_granted,
            rejected: state.counters.rejected,
            timeouts: state.counters.timeouts,
            available,
        }
    }

    fn take(&self, state: &mut State, cost: u32) -> std::result::Result<(), Duration> {
        // The limit may have been lowered since `cost` was checked.
        let cost = cost.min(state.limit);
        state.budget.try_take(cost, state.limit, self.window, Instant::now())?;
        state.counters.grants += 1;
        state.counters.permits_granted += u64::from(cost);
        debug!(cost, strategy = %self.strategy, "granted rate permits");
        Ok(())
    }

    fn check_cost(&self, cost: u32) -> Result<()> {
        let ceiling = self.base_limit.max(self.limit());
        if cost == 0 || cost > ceiling {
            return Err(RagError::invalid(format!(
                "cost must be between 1 and {ceiling} (got {cost})"
            )));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
