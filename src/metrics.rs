//! Process-wide counters surfaced by the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters for the runtime surface
#[derive(Debug, Default)]
pub struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    deploys: AtomicU64,
    undeploys: AtomicU64,
}

/// Point-in-time counter snapshot
#[derive(Debug, Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub deploys: u64,
    pub undeploys: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_deploys(&self) {
        self.deploys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_undeploys(&self) {
        self.undeploys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            deploys: self.deploys.load(Ordering::Relaxed),
            undeploys: self.undeploys.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let c = Counters::new();
        c.incr_requests();
        c.incr_requests();
        c.incr_errors();
        let snap = c.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.deploys, 0);
    }
}
