//! Token budget evaluation
//!
//! A candidate response is estimated once and compared against two limits:
//! - threshold (soft): above it the response is mitigated
//! - hard cap: a mitigated response above it is a governance failure, delivered but flagged

use super::models::{CandidateShape, Strategy};
use super::token_estimator::{estimate_serialized, TokenEstimator};
use crate::config::GovernorConfig;
use crate::error::{GovernanceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Token budget configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    pub threshold: usize,
    pub hard_cap: usize,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            threshold: 4000,
            hard_cap: 12000,
        }
    }
}

impl TokenBudgetConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 || self.hard_cap < self.threshold {
            return Err(GovernanceError::Configuration(format!(
                "token budget requires hard_cap >= threshold > 0 (threshold={}, hard_cap={})",
                self.threshold, self.hard_cap
            )));
        }
        Ok(())
    }
}

impl From<&GovernorConfig> for TokenBudgetConfig {
    fn from(config: &GovernorConfig) -> Self {
        Self {
            threshold: config.token_threshold,
            hard_cap: config.token_hard_cap,
        }
    }
}

/// Budget state of one candidate response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudget {
    pub threshold: usize,
    pub hard_cap: usize,
    pub estimated_tokens: usize,
}

impl TokenBudget {
    pub fn new(estimated_tokens: usize, config: TokenBudgetConfig) -> Self {
        Self {
            threshold: config.threshold,
            hard_cap: config.hard_cap,
            estimated_tokens,
        }
    }

    /// Fraction of the threshold used, clamped to [0, 1]
    pub fn budget_used(&self) -> f64 {
        if self.threshold == 0 {
            return 1.0;
        }
        (self.estimated_tokens as f64 / self.threshold as f64).min(1.0)
    }

    /// True when the response is over the soft limit
    pub fn summary_mode(&self) -> bool {
        self.estimated_tokens > self.threshold
    }

    pub fn exceeds_hard_cap(&self) -> bool {
        self.estimated_tokens > self.hard_cap
    }

    /// Pick the mitigation for a candidate of the given shape
    pub fn select_strategy(&self, shape: CandidateShape) -> Strategy {
        if !self.summary_mode() {
            return Strategy::PassThrough;
        }
        match shape {
            CandidateShape::List => Strategy::Paginate,
            CandidateShape::Object => Strategy::Summarize,
            CandidateShape::Text => Strategy::Chunk,
            CandidateShape::Scalar => Strategy::PassThrough,
        }
    }
}

/// Estimates candidates and produces their budget
#[derive(Clone)]
pub struct TokenBudgetEvaluator {
    config: TokenBudgetConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenBudgetEvaluator {
    pub fn new(config: TokenBudgetConfig, estimator: Arc<dyn TokenEstimator>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, estimator })
    }

    /// Evaluate raw candidate text
    pub fn evaluate(&self, candidate: &str) -> TokenBudget {
        TokenBudget::new(self.estimator.estimate(candidate), self.config)
    }

    /// Evaluate a JSON candidate by its compact wire form
    pub fn evaluate_json(&self, candidate: &Value) -> TokenBudget {
        TokenBudget::new(self.estimator.estimate_json(candidate), self.config)
    }

    /// Evaluate any serializable candidate
    pub fn evaluate_serialized<T: Serialize + ?Sized>(&self, candidate: &T) -> Result<TokenBudget> {
        let tokens = estimate_serialized(self.estimator.as_ref(), candidate)?;
        Ok(TokenBudget::new(tokens, self.config))
    }

    pub fn config(&self) -> TokenBudgetConfig {
        self.config
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }
}
