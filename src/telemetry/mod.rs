//! Telemetry for governance decisions
//!
//! One `TelemetryRecord` is produced per governed request and handed to a
//! `TelemetryRecorder`, which never blocks the response path.

pub mod record;
pub mod recorder;
pub mod sinks;

pub use record::{keys, TelemetryRecord};
pub use recorder::{TelemetryRecorder, TelemetryWorker};
pub use sinks::{MemorySink, PrometheusSink, TelemetryError, TelemetrySink, TracingSink};
