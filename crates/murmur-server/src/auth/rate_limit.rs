//! Sliding-window rate limiter for login attempts.
//!
//! Each client IP keeps the timestamps of its recent attempts; attempts older
//! than the window fall off the front.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Per-IP attempt limiter.
#[derive(Debug)]
pub struct LoginRateLimiter {
    max_attempts: u32,
    window: Duration,
    attempts: HashMap<IpAddr, VecDeque<Instant>>,
}

impl LoginRateLimiter {
    /// `max_attempts` per `window_secs` per IP. Zero disables limiting.
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
            attempts: HashMap::new(),
        }
    }

    /// Record an attempt from `ip` if it is within budget.
    ///
    /// Returns `true` if allowed, `false` if rate-limited.
    pub fn check_and_record(&mut self, ip: IpAddr) -> bool {
        self.check_and_record_at(ip, Instant::now())
    }

    fn check_and_record_at(&mut self, ip: IpAddr, now: Instant) -> bool {
        if self.max_attempts == 0 {
            return true;
        }
        let window = self.window;
        let recent = self.attempts.entry(ip).or_default();
        while recent
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            recent.pop_front();
        }
        if recent.len() as u32 >= self.max_attempts {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Drop IPs with no attempts left in the window.
    pub fn gc(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.attempts.retain(|_, recent| {
            recent.retain(|t| now.duration_since(*t) < window);
            !recent.is_empty()
        });
    }

    /// Number of IPs currently tracked.
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}
