//! Error types for response governance

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Why a pagination or chunk cursor was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorRejection {
    #[error("malformed encoding")]
    Malformed,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("unsupported cursor version")]
    UnsupportedVersion,

    #[error("negative offset")]
    NegativeOffset,

    #[error("cursor was issued for a different query")]
    QueryMismatch,

    #[error("cursor does not point at a known position")]
    UnknownPosition,
}

impl CursorRejection {
    /// Stable label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::SignatureMismatch => "signature_mismatch",
            Self::UnsupportedVersion => "unsupported_version",
            Self::NegativeOffset => "negative_offset",
            Self::QueryMismatch => "query_mismatch",
            Self::UnknownPosition => "unknown_position",
        }
    }
}

/// Governance errors
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Invalid cursor: {0}")]
    InvalidCursor(CursorRejection),

    #[error("Cursor expired: issued {age_secs}s ago, ttl is {ttl_secs}s; restart from the first page")]
    ExpiredCursor { age_secs: i64, ttl_secs: u64 },

    #[error("Configuration invalid: {0}")]
    Configuration(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl GovernanceError {
    /// True when the caller sent something we refuse, as opposed to a server fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidCursor(_) | Self::ExpiredCursor { .. })
    }

    /// Machine-readable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::ExpiredCursor { .. } => "EXPIRED_CURSOR",
            _ => "INTERNAL_ERROR",
        }
    }
}
