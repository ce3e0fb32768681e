//! Per-source admission control.
//!
//! One token bucket per normalized source address. The address map is kept
//! bounded lazily: when an unseen source arrives and the map already holds
//! more than `capacity` entries, every entry idle for longer than
//! `idle_timeout` is evicted before the new one is inserted. No timer task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default refill rate (tokens per second).
pub const DEFAULT_RATE: f64 = 1.0;

/// Default bucket size.
pub const DEFAULT_BURST: u32 = 5;

/// Default number of tracked sources before housekeeping kicks in.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default idle time after which a source may be evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

fn default_rate() -> f64 {
    DEFAULT_RATE
}

fn default_burst() -> u32 {
    DEFAULT_BURST
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Maximum tokens a bucket can hold.
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Tracked sources above which idle entries are evicted on insert.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Idle time after which a source is eligible for eviction.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            capacity: DEFAULT_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, rate: f64, burst: u32) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(burst));
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct SourceState {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Token-bucket admission gate keyed by source address.
pub struct RateLimiter {
    config: RateLimitConfig,
    sources: Mutex<HashMap<String, SourceState>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked", &self.tracked())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request from `source` is admitted.
    pub fn admit(&self, source: &str) -> bool {
        self.admit_at(source, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, source: &str, now: Instant) -> bool {
        let key = normalize_source(source);
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);

        if !sources.contains_key(&key) && sources.len() > self.config.capacity {
            let before = sources.len();
            let idle = self.config.idle_timeout;
            sources.retain(|_, state| now.saturating_duration_since(state.last_seen) <= idle);
            let evicted = before - sources.len();
            if evicted > 0 {
                tracing::debug!(evicted, tracked = sources.len(), "Evicted idle sources");
            }
        }

        let state = sources.entry(key).or_insert_with(|| SourceState {
            bucket: TokenBucket::full(self.config.burst, now),
            last_seen: now,
        });
        state.last_seen = state.last_seen.max(now);
        state
            .bucket
            .try_acquire(now, self.config.rate, self.config.burst)
    }

    /// Number of sources currently tracked.
    pub fn tracked(&self) -> usize {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether `source` currently has an entry.
    pub fn is_tracked(&self, source: &str) -> bool {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&normalize_source(source))
    }
}

/// Strip the port from a `host:port` source address.
///
/// `"10.0.0.1:5000"` and `"[::1]:5000"` normalize to their IP; anything that
/// does not look like an address with a port is returned unchanged.
pub fn normalize_source(source: &str) -> String {
    if let Ok(addr) = source.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    match source.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && !host.contains(':')
                && !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            host.to_owned()
        }
        _ => source.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_burst_then_steady_rate() {
        let limiter = limiter(DEFAULT_CAPACITY);
        let t0 = Instant::now();

        for _ in 0..DEFAULT_BURST {
            assert!(limiter.admit_at("10.0.0.1:4000", t0));
        }
        assert!(!limiter.admit_at("10.0.0.1:4001", t0));
        assert!(!limiter.admit_at("10.0.0.1:4002", t0 + Duration::from_millis(500)));

        // One token per second afterwards.
        let t1 = t0 + Duration::from_secs(1);
        assert!(limiter.admit_at("10.0.0.1:4003", t1));
        assert!(!limiter.admit_at("10.0.0.1:4004", t1));
        assert!(limiter.admit_at("10.0.0.1:4005", t1 + Duration::from_secs(1)));
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = limiter(DEFAULT_CAPACITY);
        let now = Instant::now();
        for _ in 0..DEFAULT_BURST {
            assert!(limiter.admit_at("10.0.0.1:1", now));
        }
        assert!(!limiter.admit_at("10.0.0.1:2", now));
        assert!(limiter.admit_at("10.0.0.2:1", now));
    }

    #[test]
    fn test_bucket_does_not_exceed_burst_after_long_idle() {
        let limiter = limiter(DEFAULT_CAPACITY);
        let t0 = Instant::now();
        assert!(limiter.admit_at("src", t0));

        let later = t0 + Duration::from_secs(3600);
        for _ in 0..DEFAULT_BURST {
            assert!(limiter.admit_at("src", later));
        }
        assert!(!limiter.admit_at("src", later));
    }

    #[test]
    fn test_idle_sources_evicted_when_over_capacity() {
        let limiter = limiter(3);
        let t0 = Instant::now();
        for src in ["a", "b", "c", "d"] {
            limiter.admit_at(src, t0);
        }
        assert_eq!(limiter.tracked(), 4);

        // "d" stays active, the rest go idle.
        let later = t0 + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(60);
        limiter.admit_at("d", later);
        limiter.admit_at("e", later);

        assert_eq!(limiter.tracked(), 2);
        assert!(limiter.is_tracked("d"));
        assert!(limiter.is_tracked("e"));
        assert!(!limiter.is_tracked("a"));
    }

    #[test]
    fn test_recent_sources_never_evicted() {
        let limiter = limiter(2);
        let t0 = Instant::now();
        for src in ["a", "b", "c"] {
            limiter.admit_at(src, t0);
        }
        limiter.admit_at("d", t0 + Duration::from_secs(60));
        assert_eq!(limiter.tracked(), 4);
    }

    #[test]
    fn test_no_housekeeping_at_or_below_capacity() {
        let limiter = limiter(3);
        let t0 = Instant::now();
        for src in ["a", "b", "c"] {
            limiter.admit_at(src, t0);
        }
        limiter.admit_at("d", t0 + DEFAULT_IDLE_TIMEOUT * 2);
        assert_eq!(limiter.tracked(), 4);
    }

    #[test]
    fn test_normalize_source() {
        assert_eq!(normalize_source("192.168.1.10:53211"), "192.168.1.10");
        assert_eq!(normalize_source("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(normalize_source("2001:db8::1"), "2001:db8::1");
        assert_eq!(normalize_source("proxy.local:8080"), "proxy.local");
        assert_eq!(normalize_source("unknown"), "unknown");
    }
}
