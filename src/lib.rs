//! Response governor
//!
//! Keeps API responses inside a client's token budget. Oversized lists are
//! paginated with signed cursors, oversized objects are summarized to their
//! essential fields and oversized text is chunked at semantic boundaries.
//! Every decision is reported through telemetry.

pub mod api;
pub mod config;
pub mod error;
pub mod governance;
pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use config::GovernorConfig;
pub use error::{CursorRejection, GovernanceError, Result};
pub use governance::ResponseGovernor;

/// Common imports
pub mod prelude {
    pub use crate::config::{FieldProfile, GovernorConfig};
    pub use crate::error::{CursorRejection, GovernanceError, Result};
    pub use crate::governance::{
        ContentKind, Diagnostic, GovernParams, GovernedResponse, ListQuery, OrderKey,
        ResponseBody, ResponseGovernor, Strategy,
    };
    pub use crate::telemetry::{TelemetryRecord, TelemetryRecorder};
}
