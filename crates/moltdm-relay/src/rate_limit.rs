//! Per-identity rate limiting.
//!
//! Approximate fixed-window counter: up to `limit` requests per identity
//! per minute. State is in-memory only; loss across restarts is accepted.

use std::{
    collections::HashMap,
    sync::Mutex,
};

/// Window length for the request counter.
const WINDOW_MS: u64 = 60 * 1000;

/// Fixed-window request counter keyed by identity.
pub struct RateLimiter {
    limit: u32,
    windows: Mutex<HashMap<String, Window>>,
}

struct Window {
    started_ms: u64,
    count: u32,
}

impl RateLimiter {
    /// Allow `limit` requests per identity per minute.
    pub fn new(limit: u32) -> Self {
        Self { limit, windows: Mutex::new(HashMap::new()) }
    }

    /// Record a request; `false` means the caller is over the limit.
    #[allow(clippy::expect_used)]
    pub fn check(&self, id: &str, now_ms: u64) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");

        let window = windows
            .entry(id.to_string())
            .or_insert(Window { started_ms: now_ms, count: 0 });

        if now_ms.saturating_sub(window.started_ms) >= WINDOW_MS {
            window.started_ms = now_ms;
            window.count = 0;
        }

        window.count += 1;
        window.count <= self.limit
    }
}
