//! Metrics collection for observability

use crate::governance::models::Diagnostic;
use crate::telemetry::{keys, TelemetryRecord};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry,
};
use serde_json::Value;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<GovernanceMetrics>> =
    Lazy::new(|| Arc::new(GovernanceMetrics::new().expect("Failed to initialize metrics")));

const TOKEN_BUCKETS: &[f64] = &[
    250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 12000.0, 16000.0, 32000.0,
];

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25];

/// Metrics collector
pub struct GovernanceMetrics {
    registry: Registry,

    pub responses_total: IntCounterVec,
    pub estimated_tokens: Histogram,
    pub response_bytes: Histogram,
    pub latency_seconds: Histogram,

    pub hard_cap_violations: IntCounter,
    pub boundary_fallbacks: IntCounter,
    pub unconfigured_types: IntCounterVec,
    pub cursor_rejections: IntCounterVec,
    pub cursor_restarts: IntCounter,
}

impl GovernanceMetrics {
    /// Create a collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let responses_total = register_int_counter_vec_with_registry!(
            Opts::new("governed_responses_total", "Governed responses by strategy"),
            &["strategy"],
            registry
        )?;

        let estimated_tokens = register_histogram_with_registry!(
            HistogramOpts::new(
                "governed_estimated_tokens",
                "Estimated tokens of delivered responses"
            )
            .buckets(TOKEN_BUCKETS.to_vec()),
            registry
        )?;

        let response_bytes = register_histogram_with_registry!(
            HistogramOpts::new(
                "governed_response_bytes",
                "Serialized size of delivered responses"
            )
            .buckets(prometheus::exponential_buckets(256.0, 2.0, 12)?),
            registry
        )?;

        let latency_seconds = register_histogram_with_registry!(
            HistogramOpts::new("governed_latency_seconds", "Time spent governing a response")
                .buckets(LATENCY_BUCKETS.to_vec()),
            registry
        )?;

        let hard_cap_violations = register_int_counter_with_registry!(
            Opts::new("hard_cap_violations_total", "Responses delivered over the hard cap"),
            registry
        )?;

        let boundary_fallbacks = register_int_counter_with_registry!(
            Opts::new(
                "chunk_boundary_fallbacks_total",
                "Chunks hard-split without a semantic boundary"
            ),
            registry
        )?;

        let unconfigured_types = register_int_counter_vec_with_registry!(
            Opts::new(
                "unconfigured_types_total",
                "Summaries built without a field profile"
            ),
            &["type_name"],
            registry
        )?;

        let cursor_rejections = register_int_counter_vec_with_registry!(
            Opts::new("cursor_rejections_total", "Rejected cursors by reason"),
            &["reason"],
            registry
        )?;

        let cursor_restarts = register_int_counter_with_registry!(
            Opts::new("cursor_restarts_total", "Expired cursors restarted from the beginning"),
            registry
        )?;

        Ok(Self {
            registry,
            responses_total,
            estimated_tokens,
            response_bytes,
            latency_seconds,
            hard_cap_violations,
            boundary_fallbacks,
            unconfigured_types,
            cursor_rejections,
            cursor_restarts,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one governed request
    pub fn observe(&self, record: &TelemetryRecord) {
        self.responses_total
            .with_label_values(&[record.strategy().as_str()])
            .inc();
        self.estimated_tokens.observe(record.estimated_tokens as f64);
        self.response_bytes.observe(record.response_bytes as f64);
        self.latency_seconds
            .observe(record.latency_ms as f64 / 1000.0);

        for diagnostic in &record.diagnostics {
            match diagnostic {
                Diagnostic::HardCapViolation { .. } => self.hard_cap_violations.inc(),
                Diagnostic::BoundaryFallback { .. } => self.boundary_fallbacks.inc(),
                Diagnostic::UnconfiguredType { type_name } => self
                    .unconfigured_types
                    .with_label_values(&[type_name.as_str()])
                    .inc(),
                Diagnostic::CursorExpired => self.cursor_restarts.inc(),
            }
        }

        if let Some(Value::String(reason)) = record.optimization_metadata.get(keys::CURSOR_REJECTION) {
            self.cursor_rejections
                .with_label_values(&[reason.as_str()])
                .inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}
