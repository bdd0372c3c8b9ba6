//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Numbering (allocations, optimistic-lock conflicts)
//! - Scheduler (claims, lost claims, transitions)
//! - Tax authority calls (attempts by outcome, latency)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Numbering Metrics
// =============================================================================

/// Fiscal numbers issued, by document type.
pub static NUMBERS_ALLOCATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_numbers_allocated_total",
            "Total fiscal numbers allocated",
        ),
        &["document_type"],
    )
    .unwrap()
});

/// Version conflicts observed while allocating.
pub static ALLOCATION_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "courier_allocation_conflicts_total",
        "Optimistic version conflicts during number allocation",
    )
    .unwrap()
});

// =============================================================================
// Scheduler Metrics
// =============================================================================

/// Documents claimed by a worker.
pub static DOCUMENTS_CLAIMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("courier_documents_claimed_total", "Documents claimed for delivery").unwrap()
});

/// Claims that could not be released because another owner took over.
pub static CLAIMS_LOST: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "courier_claims_lost_total",
        "Claims lost before the outcome was recorded",
    )
    .unwrap()
});

/// Recorded transitions by resulting status.
pub static DOCUMENT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_document_transitions_total",
            "Document status transitions recorded",
        ),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Tax Authority Metrics
// =============================================================================

/// Calls to the tax authority by operation and outcome.
pub static DELIVERY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "courier_delivery_attempts_total",
            "Total calls to the tax authority",
        ),
        &["operation", "outcome"], // outcome: "accepted", "rejected", "ticket", "pending", "retryable", "fatal"
    )
    .unwrap()
});

/// Duration of calls to the tax authority.
pub static DELIVERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "courier_delivery_duration_seconds",
            "Duration of tax authority calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Numbering
        Box::new(NUMBERS_ALLOCATED.clone()),
        Box::new(ALLOCATION_CONFLICTS.clone()),
        // Scheduler
        Box::new(DOCUMENTS_CLAIMED.clone()),
        Box::new(CLAIMS_LOST.clone()),
        Box::new(DOCUMENT_TRANSITIONS.clone()),
        // Tax authority
        Box::new(DELIVERY_ATTEMPTS.clone()),
        Box::new(DELIVERY_DURATION.clone()),
    ]
}
