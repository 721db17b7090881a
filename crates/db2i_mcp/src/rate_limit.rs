//! Fixed-window request rate limiter.
//!
//! Keys are derived from proxy headers before the socket address so a
//! fronting proxy does not collapse all clients into one bucket.

use db2i_protocol::{McpError, McpResult, RateLimitConfig};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    development: bool,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, development: bool) -> Self {
        Self {
            config,
            development,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `key`.
    pub fn check(&self, key: &str) -> McpResult<()> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> McpResult<()> {
        if !self.config.enabled || (self.development && self.config.skip_in_dev) {
            return Ok(());
        }

        let window = Duration::from_millis(self.config.window_ms);
        let mut buckets = self.buckets.lock().expect("rate limit lock");

        // Opportunistic pruning keeps the map bounded.
        if buckets.len() > 4096 {
            buckets.retain(|_, b| now.duration_since(b.window_start) < window);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count += 1;
        if bucket.count > self.config.max_requests {
            let elapsed = now.duration_since(bucket.window_start);
            let wait = window.saturating_sub(elapsed).as_secs().max(1);
            return Err(McpError::rate_limited("Too many requests").with_details(json!({
                "limit": self.config.max_requests,
                "windowMs": self.config.window_ms,
                "waitTimeSeconds": wait,
                "key": key,
            })));
        }
        Ok(())
    }
}

/// Client key: first `X-Forwarded-For` entry, else `X-Real-IP`, else the
/// socket remote address, else a shared fallback bucket.
pub fn client_key(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote: Option<SocketAddr>,
) -> String {
    if let Some(value) = forwarded_for {
        if let Some(first) = value.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(value) = real_ip {
        let value = value.trim();
        if !value.is_empty() {
            return value.to_string();
        }
    }
    match remote {
        Some(addr) => addr.ip().to_string(),
        None => "unknown_ip".to_string(),
    }
}
