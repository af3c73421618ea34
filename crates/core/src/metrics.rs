//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Jobs (conversions by backend and result, durations, queue occupancy)
//! - Remote service (rate-limit rejections and strikes, instance probes)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// =============================================================================
// Jobs
// =============================================================================

/// Conversions finished, by backend and result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vert_conversions_total", "Total conversions finished"),
        &["backend", "result"], // result: "done", "error", "cancelled"
    )
    .unwrap()
});

/// Conversion duration in seconds.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "vert_conversion_duration_seconds",
            "Duration of a single job conversion",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        &["backend"],
    )
    .unwrap()
});

/// Jobs currently holding a queue slot.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("vert_jobs_in_flight", "Jobs currently converting").unwrap()
});

// =============================================================================
// Remote service
// =============================================================================

/// Remote jobs refused because the input hash is blocked.
pub static RATE_LIMIT_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vert_rate_limit_rejections_total",
        "Remote conversions refused by the blocklist",
    )
    .unwrap()
});

/// Strikes recorded against input hashes.
pub static RATE_LIMIT_STRIKES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vert_rate_limit_strikes_total",
        "Remote job failures recorded as strikes",
    )
    .unwrap()
});

/// Instance reachability probes by result.
pub static INSTANCE_PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vert_instance_probes_total", "Instance reachability probes"),
        &["result"], // "reachable", "unreachable"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        // Remote service
        Box::new(RATE_LIMIT_REJECTIONS.clone()),
        Box::new(RATE_LIMIT_STRIKES.clone()),
        Box::new(INSTANCE_PROBES.clone()),
    ]
}

/// Registers every core metric in `registry`.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

/// Encodes `registry` in the Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();

        CONVERSIONS_TOTAL.with_label_values(&["ffmpeg", "done"]).inc();
        RATE_LIMIT_STRIKES.inc();

        let output = encode_metrics(&registry).unwrap();
        assert!(output.contains("vert_conversions_total"));
        assert!(output.contains("vert_rate_limit_strikes_total"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        assert!(register_metrics(&registry).is_err());
    }
}
