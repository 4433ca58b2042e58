//! Metrics collection for the legacy Kafka client

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Client metrics collector
#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Producer metrics
    pub requests_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,

    // Consumer metrics
    pub fetches: AtomicU64,
    pub empty_fetches: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub fetch_latency_sum: AtomicU64,
    pub messages_consumed: AtomicU64,
    pub bytes_consumed: AtomicU64,

    // Offset bookkeeping
    pub offsets_committed: AtomicU64,
    pub offsets_resynced: AtomicU64,

    // Connection metrics
    pub connections_created: AtomicU64,
    pub connections_failed: AtomicU64,
}

impl ClientMetrics {
    /// Record a frame fully written to a broker
    pub fn record_send(&self, byte_count: u64) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a send error
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fetch response header received
    pub fn record_fetch(&self, empty: bool, latency: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_fetches.fetch_add(1, Ordering::Relaxed);
        }
        self.fetch_latency_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed fetch
    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a drained message set
    pub fn record_consume(&self, message_count: u64, byte_count: u64) {
        self.messages_consumed
            .fetch_add(message_count, Ordering::Relaxed);
        self.bytes_consumed.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a cursor offset persisted to the offset store
    pub fn record_commit(&self) {
        self.offsets_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cursor reset to the earliest available offset
    pub fn record_resync(&self) {
        self.offsets_resynced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful connection
    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed connection
    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average fetch latency in microseconds
    pub fn average_fetch_latency_us(&self) -> f64 {
        let sum = self.fetch_latency_sum.load(Ordering::Relaxed);
        let count = self.fetches.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            empty_fetches: self.empty_fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            average_fetch_latency_us: self.average_fetch_latency_us(),
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            offsets_committed: self.offsets_committed.load(Ordering::Relaxed),
            offsets_resynced: self.offsets_resynced.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub fetches: u64,
    pub empty_fetches: u64,
    pub fetch_errors: u64,
    pub average_fetch_latency_us: f64,
    pub messages_consumed: u64,
    pub bytes_consumed: u64,
    pub offsets_committed: u64,
    pub offsets_resynced: u64,
    pub connections_created: u64,
    pub connections_failed: u64,
}

/// Timing helper for measuring operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(self) -> Duration {
        self.start.elapsed()
    }
}

/// Global metrics instance
static GLOBAL_METRICS: once_cell::sync::Lazy<Arc<ClientMetrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(ClientMetrics::default()));

/// Get the global metrics instance
pub fn global_metrics() -> Arc<ClientMetrics> {
    GLOBAL_METRICS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_latency_average() {
        let metrics = ClientMetrics::default();
        assert_eq!(metrics.average_fetch_latency_us(), 0.0);

        metrics.record_fetch(false, Duration::from_micros(100));
        metrics.record_fetch(true, Duration::from_micros(300));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fetches, 2);
        assert_eq!(snapshot.empty_fetches, 1);
        assert_eq!(snapshot.average_fetch_latency_us, 200.0);
    }

    #[test]
    fn test_send_and_consume_counters() {
        let metrics = ClientMetrics::default();
        metrics.record_send(64);
        metrics.record_send(36);
        metrics.record_consume(3, 60);
        metrics.record_commit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_sent, 2);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.messages_consumed, 3);
        assert_eq!(snapshot.bytes_consumed, 60);
        assert_eq!(snapshot.offsets_committed, 1);
    }
}
