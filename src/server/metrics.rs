//! Server metrics collection.
//!
//! All counters are atomics safe to update from any number of concurrent
//! sessions. The active-connection counter is the source for the periodic
//! telemetry report and is expected to drain back to zero once every
//! session has completed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server metrics collector.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// Total connections accepted
    total_connections: AtomicU64,
    /// Sessions currently inside their handler
    active_connections: AtomicU64,
    /// Credential mismatches
    auth_failures: AtomicU64,
    /// Malformed or timed-out handshakes, including unsupported commands
    handshake_errors: AtomicU64,
    /// Outbound connections that could not be established
    dial_failures: AtomicU64,
    /// Bytes relayed client to destination
    bytes_up: AtomicU64,
    /// Bytes relayed destination to client
    bytes_down: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            handshake_errors: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Increment total and active connections.
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connections.
    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment auth failure count.
    pub fn increment_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment handshake error count.
    pub fn increment_handshake_errors(&self) {
        self.handshake_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment dial failure count.
    pub fn increment_dial_failures(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes to the client-to-destination counter.
    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes to the destination-to-client counter.
    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get total connections.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get active connections.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get auth failures.
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Get handshake errors.
    pub fn handshake_errors(&self) -> u64 {
        self.handshake_errors.load(Ordering::Relaxed)
    }

    /// Get dial failures.
    pub fn dial_failures(&self) -> u64 {
        self.dial_failures.load(Ordering::Relaxed)
    }

    /// Get bytes relayed client to destination.
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Get bytes relayed destination to client.
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_connections: self.total_connections(),
            active_connections: self.active_connections(),
            auth_failures: self.auth_failures(),
            handshake_errors: self.handshake_errors(),
            dial_failures: self.dial_failures(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
        }
    }

    /// Format metrics as a simple text report.
    pub fn format_report(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"socksd Metrics
==============
Uptime: {} seconds

Connections:
  Total:  {}
  Active: {}

Traffic:
  Up:   {} bytes
  Down: {} bytes

Errors:
  Auth Failures:    {}
  Handshake Errors: {}
  Dial Failures:    {}
"#,
            snapshot.uptime_secs,
            snapshot.total_connections,
            snapshot.active_connections,
            snapshot.bytes_up,
            snapshot.bytes_down,
            snapshot.auth_failures,
            snapshot.handshake_errors,
            snapshot.dial_failures,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Seconds since server start.
    pub uptime_secs: u64,
    /// Total connections accepted.
    pub total_connections: u64,
    /// Sessions currently in flight.
    pub active_connections: u64,
    /// Credential mismatches.
    pub auth_failures: u64,
    /// Malformed or timed-out handshakes.
    pub handshake_errors: u64,
    /// Failed outbound dials.
    pub dial_failures: u64,
    /// Bytes relayed client to destination.
    pub bytes_up: u64,
    /// Bytes relayed destination to client.
    pub bytes_down: u64,
}

impl MetricsSnapshot {
    /// Fraction of accepted connections that failed authentication.
    pub fn auth_failure_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.auth_failures as f64 / self.total_connections as f64
        }
    }

    /// Total relayed bytes in both directions.
    pub fn bytes_total(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}
