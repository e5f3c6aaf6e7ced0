//! # Metrics
//!
//! Prometheus metrics for monitoring the integrator.
//!
//! ## Metrics Exposed
//!
//! - `storage_integrator_dispatch_cycles_total` - Total number of dispatch cycles
//! - `storage_integrator_dispatch_errors_total` - Total number of dispatch cycles ending Blocked
//! - `storage_integrator_dispatch_duration_seconds` - Duration of dispatch cycles
//! - `storage_integrator_relations_published_total` - Total number of relation bags rewritten
//! - `storage_integrator_relation_writes_skipped_total` - Total number of writes skipped as unchanged
//! - `storage_integrator_relations_connected` - Current number of connected consumers
//! - `storage_integrator_status` - Current status (1 on the active state's label)

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntGauge, IntGaugeVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static DISPATCH_CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storage_integrator_dispatch_cycles_total",
        "Total number of dispatch cycles",
    )
    .expect("Failed to create DISPATCH_CYCLES_TOTAL metric - this should never happen")
});

static DISPATCH_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storage_integrator_dispatch_errors_total",
        "Total number of dispatch cycles that ended Blocked",
    )
    .expect("Failed to create DISPATCH_ERRORS_TOTAL metric - this should never happen")
});

static DISPATCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "storage_integrator_dispatch_duration_seconds",
            "Duration of dispatch cycles in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("Failed to create DISPATCH_DURATION metric - this should never happen")
});

static RELATIONS_PUBLISHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storage_integrator_relations_published_total",
        "Total number of relation bags rewritten with new content",
    )
    .expect("Failed to create RELATIONS_PUBLISHED_TOTAL metric - this should never happen")
});

static RELATION_WRITES_SKIPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storage_integrator_relation_writes_skipped_total",
        "Total number of relation writes skipped because the bag content was unchanged",
    )
    .expect("Failed to create RELATION_WRITES_SKIPPED_TOTAL metric - this should never happen")
});

static RELATIONS_CONNECTED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "storage_integrator_relations_connected",
        "Current number of connected consumer applications",
    )
    .expect("Failed to create RELATIONS_CONNECTED metric - this should never happen")
});

static STATUS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "storage_integrator_status",
            "Current integrator status (1 on the label matching the active state)",
        ),
        &["state"],
    )
    .expect("Failed to create STATUS metric - this should never happen")
});

const STATUS_STATES: &[&str] = &["active", "blocked", "waiting"];

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(DISPATCH_CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(RELATIONS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELATION_WRITES_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELATIONS_CONNECTED.clone()))?;
    REGISTRY.register(Box::new(STATUS.clone()))?;

    Ok(())
}

pub fn increment_dispatch_cycles() {
    DISPATCH_CYCLES_TOTAL.inc();
}

pub fn increment_dispatch_errors() {
    DISPATCH_ERRORS_TOTAL.inc();
}

pub fn observe_dispatch_duration(duration: f64) {
    DISPATCH_DURATION.observe(duration);
}

pub fn increment_relations_published() {
    RELATIONS_PUBLISHED_TOTAL.inc();
}

pub fn increment_relation_writes_skipped() {
    RELATION_WRITES_SKIPPED_TOTAL.inc();
}

pub fn set_relations_connected(count: i64) {
    RELATIONS_CONNECTED.set(count);
}

/// Set the status gauge: 1 for the given state, 0 for the others.
pub fn set_status(state: &str) {
    for known in STATUS_STATES.iter().copied() {
        STATUS
            .with_label_values(&[known])
            .set(i64::from(known == state));
    }
}
