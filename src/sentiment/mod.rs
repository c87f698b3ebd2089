//! Probability estimation capability.
//!
//! Defines the `SentimentEstimator` trait consumed by the heartbeat and two
//! implementations: a deterministic fixed-signal stub and a prior-based
//! heuristic. A real news/social-media estimator plugs in at construction.

pub mod fixed;
pub mod prior;

use async_trait::async_trait;

use crate::types::{Market, PredictorError, SentimentSignal};

pub use fixed::FixedEstimator;
pub use prior::{PriorConfig, PriorEstimator};

/// Abstraction over probability estimators.
///
/// Implementors turn a market into a P(Yes) estimate with a confidence and
/// the number of sources consulted. Network-backed implementations should
/// report retryable failures as [`PredictorError::Transient`].
#[async_trait]
pub trait SentimentEstimator: Send + Sync {
    async fn estimate(&self, market: &Market) -> Result<SentimentSignal, PredictorError>;

    /// Estimator identifier for logging.
    fn name(&self) -> &str;
}
