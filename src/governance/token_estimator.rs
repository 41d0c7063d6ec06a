//! Token estimation for response budgeting
//!
//! Estimates deliberately err high: an under-estimate lets a response slip past
//! the client's real context budget, an over-estimate only paginates early.

use crate::config::EstimatorKind;
use crate::error::{GovernanceError, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Characters per token for the heuristic estimator
pub const CHARS_PER_TOKEN: usize = 4;

/// Safety margin applied on top of every raw estimate, in percent
pub const SAFETY_MARGIN_PERCENT: usize = 20;

/// Apply the safety margin, rounding up
fn with_margin(raw_tokens: usize) -> usize {
    (raw_tokens * (100 + SAFETY_MARGIN_PERCENT)).div_ceil(100)
}

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }

    /// Estimate a JSON value by its compact wire form
    fn estimate_json(&self, value: &Value) -> usize {
        self.estimate(&value.to_string())
    }
}

/// Estimate any serializable value by its compact JSON form
pub fn estimate_serialized<E, T>(estimator: &E, value: &T) -> Result<usize>
where
    E: TokenEstimator + ?Sized,
    T: Serialize + ?Sized,
{
    let wire = serde_json::to_string(value)?;
    Ok(estimator.estimate(&wire))
}

/// Character-count estimator: `ceil(chars / 4 * 1.2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHeuristicEstimator;

impl TokenEstimator for CharHeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        // chars * 1.2 / 4 == chars * 3 / 10
        (chars * (100 + SAFETY_MARGIN_PERCENT)).div_ceil(100 * CHARS_PER_TOKEN)
    }
}

/// Tiktoken-based token estimator using cl100k_base, with the same safety margin
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| {
            GovernanceError::Configuration(format!("failed to load cl100k_base: {}", e))
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        with_margin(self.bpe.encode_with_special_tokens(text).len())
    }
}

/// Build the estimator selected in configuration
pub fn build_estimator(kind: EstimatorKind) -> Result<Arc<dyn TokenEstimator>> {
    Ok(match kind {
        EstimatorKind::Heuristic => Arc::new(CharHeuristicEstimator),
        EstimatorKind::Cl100k => Arc::new(TiktokenEstimator::new()?),
    })
}
