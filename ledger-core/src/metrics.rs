//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transfers_received_total` - Transfers admitted
//! - `ledger_transfers_committed_total` - Transfers committed
//! - `ledger_transfers_aborted_total` - Transfers aborted (all causes)
//! - `ledger_limit_rejections_total` - Reservations rejected by a net debit cap
//! - `ledger_transfers_expired_total` - Transfers aborted by the expiry sweep
//! - `ledger_windows_rotated_total` - Settlement window closures
//! - `ledger_operation_duration_seconds` - Histogram of command latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transfers admitted
    pub transfers_received: IntCounter,

    /// Transfers committed
    pub transfers_committed: IntCounter,

    /// Transfers aborted, any cause
    pub transfers_aborted: IntCounter,

    /// Reservations rejected by a net debit cap
    pub limit_rejections: IntCounter,

    /// Transfers aborted by the expiry sweep
    pub transfers_expired: IntCounter,

    /// Settlement window closures
    pub windows_rotated: IntCounter,

    /// Command latency histogram
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_received = IntCounter::new(
            "ledger_transfers_received_total",
            "Transfers admitted",
        )?;
        registry.register(Box::new(transfers_received.clone()))?;

        let transfers_committed = IntCounter::new(
            "ledger_transfers_committed_total",
            "Transfers committed",
        )?;
        registry.register(Box::new(transfers_committed.clone()))?;

        let transfers_aborted = IntCounter::new(
            "ledger_transfers_aborted_total",
            "Transfers aborted (all causes)",
        )?;
        registry.register(Box::new(transfers_aborted.clone()))?;

        let limit_rejections = IntCounter::new(
            "ledger_limit_rejections_total",
            "Reservations rejected by a net debit cap",
        )?;
        registry.register(Box::new(limit_rejections.clone()))?;

        let transfers_expired = IntCounter::new(
            "ledger_transfers_expired_total",
            "Transfers aborted by the expiry sweep",
        )?;
        registry.register(Box::new(transfers_expired.clone()))?;

        let windows_rotated = IntCounter::new(
            "ledger_windows_rotated_total",
            "Settlement window closures",
        )?;
        registry.register(Box::new(windows_rotated.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of command latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            transfers_received,
            transfers_committed,
            transfers_aborted,
            limit_rejections,
            transfers_expired,
            windows_rotated,
            operation_duration,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
