//! Fire-and-forget telemetry pipeline
//!
//! `TelemetryRecorder::record` never waits: records go into a bounded channel
//! and are dropped (with a log line) when it is full or closed. A
//! `TelemetryWorker` drains the channel into the configured sinks.

use super::record::TelemetryRecord;
use super::sinks::TelemetrySink;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle used on the request path
#[derive(Clone, Debug)]
pub struct TelemetryRecorder {
    tx: Option<mpsc::Sender<TelemetryRecord>>,
}

impl TelemetryRecorder {
    /// Create a recorder and the worker that must be run to drain it
    pub fn channel(capacity: usize) -> (Self, TelemetryWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx: Some(tx) },
            TelemetryWorker {
                rx,
                sinks: Vec::new(),
            },
        )
    }

    /// Create a recorder and spawn its worker on the current tokio runtime
    pub fn spawn(sinks: Vec<Arc<dyn TelemetrySink>>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (recorder, mut worker) = Self::channel(capacity);
        worker.sinks = sinks;
        let handle = tokio::spawn(worker.run());
        (recorder, handle)
    }

    /// Recorder that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a record without blocking. Failures are logged and swallowed.
    pub fn record(&self, record: TelemetryRecord) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                warn!(
                    "Telemetry queue full; dropped record {} for {}",
                    record.request_id, record.endpoint
                );
            }
            Err(TrySendError::Closed(record)) => {
                debug!(
                    "Telemetry worker stopped; dropped record {} for {}",
                    record.request_id, record.endpoint
                );
            }
        }
    }
}

/// Drains queued records into sinks
pub struct TelemetryWorker {
    rx: mpsc::Receiver<TelemetryRecord>,
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl TelemetryWorker {
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run until every recorder handle is dropped
    pub async fn run(mut self) {
        while let Some(record) = self.rx.recv().await {
            for sink in &self.sinks {
                if let Err(e) = sink.write(&record).await {
                    warn!("Telemetry sink '{}' failed: {}", sink.name(), e);
                }
            }
        }
        debug!("Telemetry worker finished");
    }
}
