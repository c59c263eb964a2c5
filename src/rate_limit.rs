//! Fixed-window in-memory rate limiter, keyed by mapping id.
//!
//! Single-process only; mappings without a configured window are unlimited.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::RateLimitSpec;

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start: u64,
    count: u32,
    limit: u32,
    window_seconds: u64,
}

/// In-memory fixed-window rate limiter
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Record one request against the key's window. Returns false when the
    /// window's limit is exhausted. Keys follow the mapping's configured
    /// spec; a missing spec means unlimited.
    pub fn allow(&self, key: &str, spec: Option<RateLimitSpec>) -> bool {
        let Some(spec) = spec else {
            return true;
        };
        let now = Self::now();

        let mut windows = match self.windows.write() {
            Ok(guard) => guard,
            // A poisoned limiter fails open; it must never take down traffic.
            Err(_) => return true,
        };
        let window = windows.entry(key.to_string()).or_insert(Window {
            window_start: now,
            count: 0,
            limit: spec.limit,
            window_seconds: spec.window_seconds,
        });

        // Pick up config changes and reset elapsed windows.
        window.limit = spec.limit;
        window.window_seconds = spec.window_seconds;
        if now.saturating_sub(window.window_start) >= window.window_seconds {
            window.window_start = now;
            window.count = 0;
        }

        if window.count < window.limit {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop a key's window (used when a mapping is removed)
    pub fn forget(&self, key: &str) {
        if let Ok(mut windows) = self.windows.write() {
            windows.remove(key);
        }
    }
}
