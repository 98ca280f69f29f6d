//! Authentication attempt rate limiting.
//!
//! A rolling-window bucket per peer identifier (mobile public key or
//! device ID) plus a global cap that bounds total crypto work across all
//! peers. Buckets outlive sessions so reconnecting does not reset them.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::types::{DoorLinkError, Result};

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum finished auth attempts per peer within the window.
    pub max_attempts_per_peer: usize,
    /// Rolling window length.
    pub window: Duration,
    /// Maximum finished auth attempts across all peers within the window.
    pub global_max_attempts: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_peer: 5,
            window: Duration::from_secs(60),
            global_max_attempts: 32,
        }
    }
}

/// Rolling-window attempt tracker.
pub struct RateLimiter {
    config: RateLimitConfig,
    per_peer: HashMap<Vec<u8>, VecDeque<Instant>>,
    global: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            per_peer: HashMap::new(),
            global: VecDeque::new(),
        }
    }

    /// Creates a limiter with default limits.
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.window;
        let expired = |t: &Instant| now.duration_since(*t) >= window;

        while self.global.front().map_or(false, expired) {
            self.global.pop_front();
        }
        self.per_peer.retain(|_, attempts| {
            while attempts.front().map_or(false, expired) {
                attempts.pop_front();
            }
            !attempts.is_empty()
        });
    }

    /// Check whether a peer may start an auth attempt.
    ///
    /// Consulted before any expensive crypto; does not record anything.
    pub fn check(&mut self, peer: &[u8], now: Instant) -> Result<()> {
        self.prune(now);

        if self.global.len() >= self.config.global_max_attempts {
            log::warn!("Global auth attempt cap reached");
            return Err(DoorLinkError::RateLimited);
        }

        let used = self.per_peer.get(peer).map_or(0, VecDeque::len);
        if used >= self.config.max_attempts_per_peer {
            log::warn!("Peer auth attempt cap reached");
            return Err(DoorLinkError::RateLimited);
        }

        Ok(())
    }

    /// Record a finished auth attempt, regardless of its outcome.
    ///
    /// Cancelled in-flight attempts count too.
    pub fn record(&mut self, peer: &[u8], now: Instant) {
        self.prune(now);
        self.global.push_back(now);
        self.per_peer
            .entry(peer.to_vec())
            .or_default()
            .push_back(now);
    }

    /// Current attempt count for a peer within the window.
    pub fn attempts(&mut self, peer: &[u8], now: Instant) -> usize {
        self.prune(now);
        self.per_peer.get(peer).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_peer: usize, global: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_attempts_per_peer: per_peer,
            window: Duration::from_secs(60),
            global_max_attempts: global,
        })
    }

    #[test]
    fn test_per_peer_cap() {
        let now = Instant::now();
        let mut limiter = limiter(2, 100);
        let peer = b"peer-a";

        limiter.check(peer, now).unwrap();
        limiter.record(peer, now);
        limiter.check(peer, now).unwrap();
        limiter.record(peer, now);

        assert!(matches!(
            limiter.check(peer, now),
            Err(DoorLinkError::RateLimited)
        ));

        // A different peer is unaffected.
        limiter.check(b"peer-b", now).unwrap();
    }

    #[test]
    fn test_window_rolls_off() {
        let now = Instant::now();
        let mut limiter = limiter(1, 100);
        let peer = b"peer-a";

        limiter.record(peer, now);
        assert!(limiter.check(peer, now).is_err());

        let later = now + Duration::from_secs(61);
        limiter.check(peer, later).unwrap();
        assert_eq!(limiter.attempts(peer, later), 0);
    }

    #[test]
    fn test_global_cap_spans_peers() {
        let now = Instant::now();
        let mut limiter = limiter(10, 3);

        limiter.record(b"a", now);
        limiter.record(b"b", now);
        limiter.record(b"c", now);

        assert!(matches!(
            limiter.check(b"d", now),
            Err(DoorLinkError::RateLimited)
        ));
    }

    #[test]
    fn test_failed_attempts_count() {
        // The caller records every finished attempt; from the limiter's
        // point of view there is no distinction by outcome.
        let now = Instant::now();
        let mut limiter = limiter(3, 100);
        let peer = b"peer-a";

        for _ in 0..3 {
            limiter.record(peer, now);
        }
        assert_eq!(limiter.attempts(peer, now), 3);
        assert!(limiter.check(peer, now).is_err());
    }

    #[test]
    fn test_attempts_survive_across_checks() {
        let now = Instant::now();
        let mut limiter = RateLimiter::with_defaults();
        let peer = b"peer-a";

        limiter.record(peer, now);
        limiter.check(peer, now).unwrap();
        assert_eq!(limiter.attempts(peer, now), 1);
    }
}
