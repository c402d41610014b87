//! Sliding-window rate limiting for join-family requests.
//!
//! Each peer carries its own bucket; the hub consults it before
//! `pair-device-join` and `join-public-room`.

use std::time::{Duration, Instant};

/// Per-peer sliding-window attempt bucket.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum attempts allowed within the window.
    max_attempts: u32,
    /// Duration of the sliding window.
    window: Duration,
    /// Timestamps of attempts still inside the window.
    attempts: Vec<Instant>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: Vec::new(),
        }
    }

    /// Check whether the bound is exceeded, recording the attempt if not.
    ///
    /// Returns `true` when the peer is rate-limited.
    pub fn limit_reached(&mut self) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.attempts
            .retain(|t| now.duration_since(*t) <= window);

        if self.attempts.len() as u32 >= self.max_attempts {
            return true;
        }
        self.attempts.push(now);
        false
    }
}
