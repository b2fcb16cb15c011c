//! Per-request metrics accumulator.
//!
//! One accumulator exists per request tree and is shared across child
//! chains, so counts survive a rewrite.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use tracing::warn;

/// Default cap for counted operations per request.
pub const DEFAULT_OP_LIMIT: u64 = 100;

/// Single canonical counter for capped operations.
#[derive(Debug)]
pub struct OpCounter {
    count: AtomicU64,
    limit: u64,
    warned: AtomicBool,
}

impl OpCounter {
    /// Create a counter with the given cap.
    pub fn new(limit: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            limit,
            warned: AtomicBool::new(false),
        }
    }

    /// Count one operation; returns false once the cap is exceeded.
    pub fn increment(&self, operation: &str) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= self.limit {
            return true;
        }
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Operation cap of {} exceeded (last operation: {})",
                self.limit, operation
            );
        }
        false
    }

    /// Operations counted so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Counts invoked functions, timed origin fetches and capped operations.
#[derive(Debug)]
pub struct MetricsAccumulator {
    functions_invoked: AtomicU64,
    origin_fetches: AtomicU64,
    origin_fetch_retries: AtomicU64,
    origin_fetch_millis: AtomicU64,
    ops: OpCounter,
}

impl Default for MetricsAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_OP_LIMIT)
    }
}

impl MetricsAccumulator {
    /// Create an accumulator with the given operation cap.
    pub fn new(op_limit: u64) -> Self {
        Self {
            functions_invoked: AtomicU64::new(0),
            origin_fetches: AtomicU64::new(0),
            origin_fetch_retries: AtomicU64::new(0),
            origin_fetch_millis: AtomicU64::new(0),
            ops: OpCounter::new(op_limit),
        }
    }

    /// Count one function invocation.
    pub fn record_invocation(&self) {
        self.functions_invoked.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a timed origin fetch and how many retries it needed.
    pub fn record_origin_fetch(&self, elapsed: Duration, retries: u64) {
        self.origin_fetches.fetch_add(1, Ordering::SeqCst);
        self.origin_fetch_retries.fetch_add(retries, Ordering::SeqCst);
        self.origin_fetch_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    /// Count one capped operation; returns false once over the cap.
    pub fn track_operation(&self, operation: &str) -> bool {
        self.ops.increment(operation)
    }

    /// Functions invoked so far.
    pub fn functions_invoked(&self) -> u64 {
        self.functions_invoked.load(Ordering::SeqCst)
    }

    /// Origin fetches issued so far.
    pub fn origin_fetches(&self) -> u64 {
        self.origin_fetches.load(Ordering::SeqCst)
    }

    /// Retries spent across all origin fetches.
    pub fn origin_fetch_retries(&self) -> u64 {
        self.origin_fetch_retries.load(Ordering::SeqCst)
    }

    /// Write the accumulated counts as response headers.
    ///
    /// Exposed as a capability; wiring it into the response path is a
    /// deployment-specific decision.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let pairs = [
            ("x-edge-fn-invocations", self.functions_invoked()),
            ("x-edge-fn-origin-fetches", self.origin_fetches()),
            (
                "x-edge-fn-origin-millis",
                self.origin_fetch_millis.load(Ordering::SeqCst),
            ),
            ("x-edge-fn-ops", self.ops.count()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
                headers.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_counter_caps() {
        let counter = OpCounter::new(2);
        assert!(counter.increment("a"));
        assert!(counter.increment("b"));
        assert!(!counter.increment("c"));
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn accumulator_counts_survive_sharing() {
        let metrics = std::sync::Arc::new(MetricsAccumulator::default());
        let child = std::sync::Arc::clone(&metrics);

        metrics.record_invocation();
        child.record_invocation();
        child.record_origin_fetch(Duration::from_millis(12), 2);

        assert_eq!(metrics.functions_invoked(), 2);
        assert_eq!(metrics.origin_fetches(), 1);
        assert_eq!(metrics.origin_fetch_retries(), 2);
    }

    #[test]
    fn write_headers_reports_counts() {
        let metrics = MetricsAccumulator::default();
        metrics.record_invocation();

        let mut headers = HeaderMap::new();
        metrics.write_headers(&mut headers);
        assert_eq!(headers.get("x-edge-fn-invocations").unwrap(), "1");
        assert_eq!(headers.get("x-edge-fn-origin-fetches").unwrap(), "0");
    }
}
