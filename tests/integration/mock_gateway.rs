//! In-memory market gateway for integration testing.
//!
//! Serves a fixed market list, stores submitted forecasts and can be told
//! to fail specific calls, all without a network.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use market_predictor::gateway::{MarketGateway, PredictionSubmission};
use market_predictor::types::*;

pub struct InMemoryGateway {
    markets: Vec<Market>,
    forecasts: Mutex<Vec<Forecast>>,
    failing_details: HashSet<String>,
    /// Transient failures to return before submissions start succeeding.
    submit_failures: AtomicU32,
    submit_calls: AtomicU32,
    reject_token: bool,
}

impl InMemoryGateway {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets,
            forecasts: Mutex::new(Vec::new()),
            failing_details: HashSet::new(),
            submit_failures: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            reject_token: false,
        }
    }

    /// `GET /markets/{slug}` fails with a 503 for this slug.
    pub fn failing_detail(mut self, slug: &str) -> Self {
        self.failing_details.insert(slug.to_string());
        self
    }

    pub fn failing_submissions(self, count: u32) -> Self {
        self.submit_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Submissions fail as if the token were revoked; reads still succeed.
    pub fn revoked(mut self) -> Self {
        self.reject_token = true;
        self
    }

    pub fn forecasts(&self) -> Vec<Forecast> {
        self.forecasts.lock().unwrap().clone()
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

/// An open market ending in two weeks.
pub fn market(slug: &str, category: &str, avg_probability: Option<f64>) -> Market {
    Market {
        slug: slug.to_string(),
        title: format!("Will {slug} happen?"),
        description: String::new(),
        category: category.to_string(),
        outcomes: vec!["Yes".to_string(), "No".to_string()],
        end_date: Utc::now() + Duration::days(14),
        resolved_outcome: None,
        agent_count: 4,
        avg_probability,
    }
}

#[async_trait]
impl MarketGateway for InMemoryGateway {
    async fn register_agent(&self, name: &str) -> Result<RegisteredAgent, PredictorError> {
        Ok(RegisteredAgent {
            agent_id: format!("agent-{name}"),
            name: name.to_string(),
            token: SecretString::new("in-memory-token".to_string()),
        })
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>, PredictorError> {
        Ok(self.markets.clone())
    }

    async fn market_detail(&self, slug: &str) -> Result<MarketDetail, PredictorError> {
        if self.failing_details.contains(slug) {
            return Err(PredictorError::Transient("503 Service Unavailable".into()));
        }
        let market = self
            .markets
            .iter()
            .find(|m| m.slug == slug)
            .cloned()
            .ok_or_else(|| PredictorError::MarketNotFound(slug.to_string()))?;
        Ok(MarketDetail {
            market,
            recent_predictions: Vec::new(),
        })
    }

    async fn submit_prediction(
        &self,
        submission: &PredictionSubmission,
    ) -> Result<Forecast, PredictorError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_token {
            return Err(PredictorError::Authentication("token revoked".into()));
        }
        let pending = self.submit_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.submit_failures.store(pending - 1, Ordering::SeqCst);
            return Err(PredictorError::Transient("502 Bad Gateway".into()));
        }

        let forecast = Forecast {
            id: format!("f-{}", submission.slug),
            agent_id: Some("agent-test".into()),
            slug: submission.slug.clone(),
            p_yes: submission.p_yes,
            rationale: submission.rationale.clone(),
            updated_at: Utc::now(),
        };
        let mut forecasts = self.forecasts.lock().unwrap();
        forecasts.retain(|f| f.slug != submission.slug);
        forecasts.push(forecast.clone());
        Ok(forecast)
    }

    async fn list_predictions(&self) -> Result<Vec<Forecast>, PredictorError> {
        Ok(self.forecasts())
    }

    async fn leaderboard(&self) -> Result<Vec<AgentScoreRecord>, PredictorError> {
        Ok(Vec::new())
    }

    async fn update_profile(
        &self,
        evm_address: Option<String>,
    ) -> Result<AgentProfile, PredictorError> {
        Ok(AgentProfile {
            id: "agent-test".into(),
            name: "test".into(),
            evm_address,
        })
    }
}
