//! HTTP mapping for governed responses and governance errors

use crate::error::GovernanceError;
use crate::governance::GovernedResponse;
use crate::metrics::METRICS;
use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Comma-separated diagnostic labels of a governed response
pub const DIAGNOSTICS_HEADER: &str = "x-governance-diagnostics";

/// Request id of a governed response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// API error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Governance error: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        // Server-side details stay in the logs
        let message = if self.is_client_error() {
            self.to_string()
        } else {
            "Internal governance error".to_string()
        };

        (status, Json(ApiError::new(self.error_code(), message))).into_response()
    }
}

impl IntoResponse for GovernedResponse {
    fn into_response(self) -> Response {
        let request_id = self.request_id.to_string();
        let labels: Vec<&str> = self.diagnostics.iter().map(|d| d.label()).collect();

        let mut response = Json(self.body).into_response();
        let headers = response.headers_mut();

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        if !labels.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&labels.join(",")) {
                headers.insert(HeaderName::from_static(DIAGNOSTICS_HEADER), value);
            }
        }
        response
    }
}

/// Prometheus metrics endpoint
///
/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}
