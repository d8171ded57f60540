//! Permit accounting for the two limiter strategies.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::rate_limit::RateLimitStrategy;

/// Mutable budget state. Every method takes `now` so callers decide the clock.
#[derive(Debug)]
pub(crate) enum Budget {
    /// Rolling log of grants; a grant at `at` counts until `window` has elapsed.
    SlidingWindow { log: VecDeque<(Instant, u32)>, in_window: u32 },
    /// Continuously refilling bucket holding at most `limit` tokens.
    TokenBucket { tokens: f64, refilled_at: Instant },
}

impl Budget {
    pub fn new(strategy: RateLimitStrategy, limit: u32, now: Instant) -> Self {
        match strategy {
            RateLimitStrategy::SlidingWindow => {
                Self::SlidingWindow { log: VecDeque::new(), in_window: 0 }
            }
            RateLimitStrategy::TokenBucket => {
                Self::TokenBucket { tokens: f64::from(limit), refilled_at: now }
            }
        }
    }

    /// Consume `cost` permits, or report how long until they could be available.
    pub fn try_take(
        &mut self,
        cost: u32,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        self.advance(limit, window, now);
        match self {
            Self::SlidingWindow { log, in_window } => {
                if *in_window + cost <= limit {
                    log.push_back((now, cost));
                    *in_window += cost;
                    return Ok(());
                }
                // Wait until enough of the oldest grants have aged out.
                let needed = *in_window + cost - limit;
                let mut freed = 0;
                for &(at, n) in log.iter() {
                    freed += n;
                    if freed >= needed {
                        return Err(window.saturating_sub(now.saturating_duration_since(at)));
                    }
                }
                Err(window)
            }
            Self::TokenBucket { tokens, .. } => {
                let cost = f64::from(cost);
                if *tokens >= cost {
                    *tokens -= cost;
                    return Ok(());
                }
                let per_sec = refill_rate(limit, window);
                let wait =
                    Duration::try_from_secs_f64((cost - *tokens) / per_sec).unwrap_or(window);
                // Round up so the retry does not land a hair short of the refill.
                Err(wait.saturating_add(Duration::from_micros(1)))
            }
        }
    }

    /// Permits that could be granted right now.
    pub fn available(&mut self, limit: u32, window: Duration, now: Instant) -> u32 {
        self.advance(limit, window, now);
        match self {
            Self::SlidingWindow { in_window, .. } => limit.saturating_sub(*in_window),
            Self::TokenBucket { tokens, .. } => tokens.floor() as u32,
        }
    }

    fn advance(&mut self, limit: u32, window: Duration, now: Instant) {
        match self {
            Self::SlidingWindow { log, in_window } => {
                while let Some(&(at, n)) = log.front() {
                    if now.saturating_duration_since(at) < window {
                        break;
                    }
                    log.pop_front();
                    *in_window -= n;
                }
            }
            Self::TokenBucket { tokens, refilled_at } => {
                let elapsed = now.saturating_duration_since(*refilled_at).as_secs_f64();
                *tokens = (*tokens + elapsed * refill_rate(limit, window)).min(f64::from(limit));
                *refilled_at = now;
            }
        }
    }
}

fn refill_rate(limit: u32, window: Duration) -> f64 {
    f64::from(limit) / window.as_secs_f64()
}
