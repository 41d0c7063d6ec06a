//! axum adapter for response governance
//!
//! Handlers extract `Query<GovernParams>`, run the `ResponseGovernor` and return
//! the `GovernedResponse` (or `GovernanceError`) directly; both implement
//! `IntoResponse`.

pub mod handlers;

pub use handlers::{metrics_handler, ApiError, DIAGNOSTICS_HEADER, REQUEST_ID_HEADER};

use axum::{routing::get, Router};

/// Routes owned by the governance layer
pub fn build_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
