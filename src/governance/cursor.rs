//! Signed, self-describing pagination cursors
//!
//! A cursor is `base64url(payload || HMAC-SHA256(payload))` where the payload is
//! compact JSON carrying the offset, the issue time, the sort order and a
//! fingerprint of the filters it was issued for. Nothing is stored server side;
//! the signature and the TTL are checked on every use and any failure rejects the
//! cursor as a whole.

use crate::config::GovernorConfig;
use crate::error::{CursorRejection, GovernanceError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Current payload version
pub const CURSOR_VERSION: u8 = 1;

/// Default cursor lifetime
pub const DEFAULT_CURSOR_TTL: Duration = Duration::from_secs(600);

/// HMAC-SHA256 output length
const SIGNATURE_LEN: usize = 32;

/// Longest token accepted before any decoding work
const MAX_TOKEN_LEN: usize = 4096;

/// Bytes of SHA-256 kept in a filter fingerprint
const FINGERPRINT_BYTES: usize = 16;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Sort column and direction a cursor is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderKey {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.column, self.direction.as_str())
    }
}

/// Fingerprint of a filter set, independent of insertion order
///
/// Keys and values are length-prefixed so no two distinct filter sets hash the
/// same input.
pub fn filter_fingerprint(filters: &BTreeMap<String, String>) -> String {
    let parts: Vec<&[u8]> = filters
        .iter()
        .flat_map(|(key, value)| [key.as_bytes(), value.as_bytes()])
        .collect();
    content_fingerprint(&parts)
}

/// Fingerprint of arbitrary bytes (used to bind chunk cursors to their text)
pub fn content_fingerprint(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(&hasher.finalize()[..FINGERPRINT_BYTES])
}

/// Order and filters of a list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub order_key: OrderKey,
    pub filters: BTreeMap<String, String>,
}

impl ListQuery {
    pub fn new(order_key: OrderKey) -> Self {
        Self {
            order_key,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn fingerprint(&self) -> String {
        filter_fingerprint(&self.filters)
    }
}

/// Decoded cursor contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPayload {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "o")]
    pub offset: i64,
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "k")]
    pub order_key: String,
    #[serde(rename = "f")]
    pub filter_fingerprint: String,
}

/// Encodes, signs and verifies cursors
#[derive(Clone)]
pub struct CursorCodec {
    /// First key signs; every key verifies
    keys: Arc<Vec<SecretVec<u8>>>,
    ttl: Duration,
}

impl fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCodec")
            .field("keys", &self.keys.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CursorCodec {
    /// Create a codec signing with `secret`
    pub fn new(secret: &SecretString, ttl: Duration) -> Result<Self> {
        Self::with_rotation(secret, &[], ttl)
    }

    /// Create a codec signing with `secret` and still accepting `previous` keys
    pub fn with_rotation(
        secret: &SecretString,
        previous: &[SecretString],
        ttl: Duration,
    ) -> Result<Self> {
        let mut keys = Vec::with_capacity(previous.len() + 1);
        for key in std::iter::once(secret).chain(previous) {
            let bytes = key.expose_secret().as_bytes();
            if bytes.is_empty() {
                return Err(GovernanceError::Configuration(
                    "cursor secret must not be empty".to_string(),
                ));
            }
            keys.push(SecretVec::new(bytes.to_vec()));
        }
        Ok(Self {
            keys: Arc::new(keys),
            ttl,
        })
    }

    /// Create a codec with a random per-process key
    pub fn ephemeral(ttl: Duration) -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            keys: Arc::new(vec![SecretVec::new(key)]),
            ttl,
        }
    }

    /// Build from configuration, falling back to an ephemeral key
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        match &config.cursor_secret {
            Some(secret) => {
                Self::with_rotation(secret, &config.previous_cursor_secrets, config.cursor_ttl())
            }
            None => {
                warn!("No cursor_secret configured; cursors will not survive a restart");
                Ok(Self::ephemeral(config.cursor_ttl()))
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a cursor for `offset` now
    pub fn encode(&self, offset: usize, order_key: &OrderKey, fingerprint: &str) -> Result<String> {
        self.encode_at(offset, order_key, fingerprint, Utc::now())
    }

    /// Issue a cursor as if created at `created_at`
    pub fn encode_at(
        &self,
        offset: usize,
        order_key: &OrderKey,
        fingerprint: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String> {
        let offset = i64::try_from(offset).map_err(|_| {
            GovernanceError::Configuration(format!("offset {} does not fit a cursor", offset))
        })?;
        self.seal(&CursorPayload {
            version: CURSOR_VERSION,
            offset,
            created_at,
            order_key: order_key.to_string(),
            filter_fingerprint: fingerprint.to_string(),
        })
    }

    /// Sign and encode an arbitrary payload
    pub fn seal(&self, payload: &CursorPayload) -> Result<String> {
        let mut bytes = serde_json::to_vec(payload)?;
        let signature = self.sign(&bytes)?;
        bytes.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Verify a cursor and return its offset
    pub fn decode(&self, token: &str, order_key: &OrderKey, fingerprint: &str) -> Result<usize> {
        self.decode_at(token, order_key, fingerprint, Utc::now())
    }

    /// Verify a cursor against the clock value `now`
    pub fn decode_at(
        &self,
        token: &str,
        order_key: &OrderKey,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let payload = self.open(token).map_err(|reason| {
            debug!("Rejected cursor: {}", reason);
            GovernanceError::InvalidCursor(reason)
        })?;

        if payload.order_key != order_key.to_string() || payload.filter_fingerprint != fingerprint {
            debug!(
                "Rejected cursor issued for {} / {}",
                payload.order_key, payload.filter_fingerprint
            );
            return Err(GovernanceError::InvalidCursor(CursorRejection::QueryMismatch));
        }

        let age = now.signed_duration_since(payload.created_at);
        let ttl_secs = self.ttl.as_secs();
        if age.num_milliseconds() > self.ttl.as_millis() as i64 {
            return Err(GovernanceError::ExpiredCursor {
                age_secs: age.num_seconds(),
                ttl_secs,
            });
        }

        usize::try_from(payload.offset)
            .map_err(|_| GovernanceError::InvalidCursor(CursorRejection::NegativeOffset))
    }

    /// Verify encoding, signature and version; no query or TTL checks
    fn open(&self, token: &str) -> std::result::Result<CursorPayload, CursorRejection> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(CursorRejection::Malformed);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorRejection::Malformed)?;
        if bytes.len() <= SIGNATURE_LEN {
            return Err(CursorRejection::Malformed);
        }

        let (payload, signature) = bytes.split_at(bytes.len() - SIGNATURE_LEN);
        if !self.verify(payload, signature) {
            return Err(CursorRejection::SignatureMismatch);
        }

        let payload: CursorPayload =
            serde_json::from_slice(payload).map_err(|_| CursorRejection::Malformed)?;
        if payload.version != CURSOR_VERSION {
            return Err(CursorRejection::UnsupportedVersion);
        }
        if payload.offset < 0 {
            return Err(CursorRejection::NegativeOffset);
        }
        Ok(payload)
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let key = self.keys.first().ok_or_else(|| {
            GovernanceError::Configuration("cursor codec has no signing key".to_string())
        })?;
        let mut mac = HmacSha256::new_from_slice(key.expose_secret())
            .map_err(|e| GovernanceError::Configuration(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Constant-time check against every accepted key
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        self.keys.iter().any(|key| {
            HmacSha256::new_from_slice(key.expose_secret())
                .map(|mut mac| {
                    mac.update(payload);
                    mac.verify_slice(signature).is_ok()
                })
                .unwrap_or(false)
        })
    }
}
