//! Rate limiting for outbound messages.
//!
//! Direct messages and channel replies each get an independent sliding
//! one-minute window so a burst of command replies cannot starve scheduled
//! nudges, and neither can push the bot past the platform's limits.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiting error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Rate limit exceeded; must wait before sending.
    #[error("rate limit exceeded; retry after {retry_after_secs}s")]
    Exceeded {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },
}

/// Sliding-window limiter. A limit of zero disables limiting.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages_per_minute: u32,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_messages_per_minute: u32) -> Self {
        Self {
            max_messages_per_minute,
            window: VecDeque::new(),
        }
    }

    /// Try to record one send now.
    pub fn try_send(&mut self) -> Result<(), RateLimitError> {
        self.try_send_at(Instant::now())
    }

    /// Try to record one send at `now`.
    pub fn try_send_at(&mut self, now: Instant) -> Result<(), RateLimitError> {
        if self.max_messages_per_minute == 0 {
            return Ok(());
        }

        while let Some(&first) = self.window.front() {
            if now.duration_since(first) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.max_messages_per_minute as usize
            && let Some(&oldest) = self.window.front()
        {
            let remaining = WINDOW.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError::Exceeded {
                retry_after_secs: remaining.as_secs().saturating_add(1),
            });
        }

        self.window.push_back(now);
        Ok(())
    }

    /// Messages still allowed in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max_messages_per_minute
            .saturating_sub(self.window.len() as u32)
    }
}

/// Rate limit configuration (messages per minute, `0` = unlimited).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Scheduled nudges and other direct messages.
    pub direct_per_minute: u32,
    /// Command replies posted in the originating channel.
    pub replies_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            direct_per_minute: 20,
            replies_per_minute: 30,
        }
    }
}

/// Which outbound path a message takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundRoute {
    Direct,
    Reply,
}

/// Per-route limiters.
#[derive(Debug)]
pub struct OutboundRateLimiters {
    direct: RateLimiter,
    reply: RateLimiter,
}

impl OutboundRateLimiters {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            direct: RateLimiter::new(config.direct_per_minute),
            reply: RateLimiter::new(config.replies_per_minute),
        }
    }

    pub fn try_send(&mut self, route: OutboundRoute) -> Result<(), RateLimitError> {
        self.limiter_mut(route).try_send()
    }

    #[must_use]
    pub fn remaining(&self, route: OutboundRoute) -> u32 {
        match route {
            OutboundRoute::Direct => self.direct.remaining(),
            OutboundRoute::Reply => self.reply.remaining(),
        }
    }

    fn limiter_mut(&mut self, route: OutboundRoute) -> &mut RateLimiter {
        match route {
            OutboundRoute::Direct => &mut self.direct,
            OutboundRoute::Reply => &mut self.reply,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn rate_limiter_allows_within_limit() {
        let mut limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.try_send().is_ok());
        }
    }

    #[test]
    fn rate_limiter_blocks_exceeding_limit() {
        let mut limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.try_send().is_ok());
        }

        match limiter.try_send() {
            Err(RateLimitError::Exceeded { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 61);
            }
            Ok(()) => unreachable!("expected rate limit exceeded"),
        }
    }

    #[test]
    fn rate_limiter_window_slides() {
        let mut limiter = RateLimiter::new(2);
        let start = Instant::now();

        assert!(limiter.try_send_at(start).is_ok());
        assert!(limiter.try_send_at(start + Duration::from_secs(1)).is_ok());
        assert!(limiter.try_send_at(start + Duration::from_secs(2)).is_err());

        assert!(limiter.try_send_at(start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let mut limiter = RateLimiter::new(0);
        for _ in 0..500 {
            assert!(limiter.try_send().is_ok());
        }
    }

    #[test]
    fn routes_are_isolated() {
        let mut limiters = OutboundRateLimiters::new(&RateLimitConfig {
            direct_per_minute: 1,
            replies_per_minute: 2,
        });

        assert!(limiters.try_send(OutboundRoute::Direct).is_ok());
        assert!(limiters.try_send(OutboundRoute::Direct).is_err());

        assert!(limiters.try_send(OutboundRoute::Reply).is_ok());
        assert_eq!(limiters.remaining(OutboundRoute::Reply), 1);
        assert!(limiters.try_send(OutboundRoute::Reply).is_ok());
        assert!(limiters.try_send(OutboundRoute::Reply).is_err());
    }
}
