//! Telemetry sinks

use super::record::TelemetryRecord;
use crate::metrics::{GovernanceMetrics, METRICS};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for telemetry records
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), TelemetryError>;

    fn name(&self) -> &'static str;
}

/// Emits one structured log event per record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let metadata = serde_json::to_string(&record.optimization_metadata)?;
        let diagnostics: Vec<&str> = record.diagnostics.iter().map(|d| d.label()).collect();

        if record.has_hard_cap_violation() {
            error!(
                target: "governance::telemetry",
                request_id = %record.request_id,
                endpoint = %record.endpoint,
                strategy = %record.strategy(),
                estimated_tokens = record.estimated_tokens,
                response_bytes = record.response_bytes,
                diagnostics = ?diagnostics,
                metadata = %metadata,
                "Governed response over hard cap"
            );
        } else {
            info!(
                target: "governance::telemetry",
                request_id = %record.request_id,
                endpoint = %record.endpoint,
                strategy = %record.strategy(),
                estimated_tokens = record.estimated_tokens,
                response_bytes = record.response_bytes,
                item_count = record.item_count,
                latency_ms = record.latency_ms,
                diagnostics = ?diagnostics,
                metadata = %metadata,
                "Governed response"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Feeds Prometheus counters and histograms
#[derive(Clone)]
pub struct PrometheusSink {
    metrics: Arc<GovernanceMetrics>,
}

impl PrometheusSink {
    pub fn new(metrics: Arc<GovernanceMetrics>) -> Self {
        Self { metrics }
    }

    /// Sink backed by the process-wide registry
    pub fn global() -> Self {
        Self::new(METRICS.clone())
    }
}

#[async_trait]
impl TelemetrySink for PrometheusSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.metrics.observe(record);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.records
            .lock()
            .map_err(|_| TelemetryError::Unavailable("memory sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
