//! Deterministic estimator returning preconfigured signals.
//!
//! Used in tests and for replaying externally produced estimates.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::SentimentEstimator;
use crate::types::{Market, PredictorError, SentimentSignal};

#[derive(Debug, Clone, Default)]
pub struct FixedEstimator {
    default: Option<SentimentSignal>,
    by_slug: HashMap<String, SentimentSignal>,
    failing: HashSet<String>,
}

impl FixedEstimator {
    /// Return `signal` for every market without a specific entry.
    pub fn new(signal: SentimentSignal) -> Self {
        Self {
            default: Some(signal),
            ..Default::default()
        }
    }

    /// Only markets registered with [`FixedEstimator::with_market`] get a signal.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_market(mut self, slug: &str, signal: SentimentSignal) -> Self {
        self.by_slug.insert(slug.to_string(), signal);
        self
    }

    /// Make estimation for `slug` fail with a transient error.
    pub fn with_failure(mut self, slug: &str) -> Self {
        self.failing.insert(slug.to_string());
        self
    }
}

#[async_trait]
impl SentimentEstimator for FixedEstimator {
    async fn estimate(&self, market: &Market) -> Result<SentimentSignal, PredictorError> {
        if self.failing.contains(&market.slug) {
            return Err(PredictorError::Transient(format!(
                "sentiment source unavailable for {}",
                market.slug
            )));
        }
        self.by_slug
            .get(&market.slug)
            .copied()
            .or(self.default)
            .ok_or_else(|| {
                PredictorError::Transient(format!("no signal configured for {}", market.slug))
            })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(p: f64) -> SentimentSignal {
        SentimentSignal {
            probability: p,
            confidence: 0.8,
            source_count: 3,
        }
    }

    #[tokio::test]
    async fn test_specific_signal_overrides_default() {
        let est = FixedEstimator::new(signal(0.5)).with_market("a", signal(0.9));
        assert_eq!(est.estimate(&Market::sample("a")).await.unwrap().probability, 0.9);
        assert_eq!(est.estimate(&Market::sample("b")).await.unwrap().probability, 0.5);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let est = FixedEstimator::new(signal(0.5)).with_failure("bad");
        let err = est.estimate(&Market::sample("bad")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_has_no_default() {
        let est = FixedEstimator::empty().with_market("a", signal(0.7));
        assert!(est.estimate(&Market::sample("a")).await.is_ok());
        assert!(est.estimate(&Market::sample("z")).await.is_err());
    }
}
