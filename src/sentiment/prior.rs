//! Prior-based heuristic estimator.
//!
//! Starts from a base rate, applies per-category bias corrections and
//! sharpens markets that are about to close. It consults no external
//! sources, so its confidence is fixed and its source count is zero.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::SentimentEstimator;
use crate::types::{Market, PredictorError, SentimentSignal};

#[derive(Debug, Clone)]
pub struct PriorConfig {
    pub base_rate: f64,
    /// Additive correction per category slug.
    pub category_adjustments: HashMap<String, f64>,
    /// Markets closing within this window get pushed away from 0.5.
    pub near_term_days: i64,
    pub near_term_push: f64,
    pub confidence: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        let category_adjustments = [
            ("politics", 0.0),
            ("crypto-tech", -0.05), // crowds overestimate crypto outcomes
            ("sports", 0.0),
            ("pop-culture", 0.05), // hype tends to be underpriced
            ("economy", 0.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            base_rate: 0.5,
            category_adjustments,
            near_term_days: 7,
            near_term_push: 0.05,
            confidence: 0.5,
        }
    }
}

pub struct PriorEstimator {
    config: PriorConfig,
}

impl PriorEstimator {
    pub fn new(config: PriorConfig) -> Self {
        Self { config }
    }

    /// Deterministic estimate as of `now`.
    pub fn probability_at(&self, market: &Market, now: DateTime<Utc>) -> f64 {
        let cfg = &self.config;
        let mut p = cfg.base_rate;

        p += cfg
            .category_adjustments
            .get(&market.category.to_lowercase())
            .copied()
            .unwrap_or(0.0);

        if market.end_date - now < Duration::days(cfg.near_term_days) {
            if p > 0.5 {
                p = (p + cfg.near_term_push).min(0.95);
            } else if p < 0.5 {
                p = (p - cfg.near_term_push).max(0.05);
            }
        }

        p.clamp(0.01, 0.99)
    }
}

impl Default for PriorEstimator {
    fn default() -> Self {
        Self::new(PriorConfig::default())
    }
}

#[async_trait]
impl SentimentEstimator for PriorEstimator {
    async fn estimate(&self, market: &Market) -> Result<SentimentSignal, PredictorError> {
        let probability = self.probability_at(market, Utc::now());
        debug!(
            market = %market.slug,
            category = %market.category,
            probability = format!("{:.1}%", probability * 100.0),
            "Prior estimate"
        );
        Ok(SentimentSignal {
            probability,
            confidence: self.config.confidence,
            source_count: 0,
        })
    }

    fn name(&self) -> &str {
        "prior"
    }
}
