//! Remote market API.
//!
//! Defines the `MarketGateway` trait consumed by the executor and the
//! heartbeat, and the reqwest-backed `HttpGateway` implementation of the
//! forecasting service's REST contract.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    AgentProfile, AgentScoreRecord, Forecast, Market, MarketDetail, PredictorError, RegisteredAgent,
};

pub use http::HttpGateway;

/// Header carrying the agent's bearer token on authenticated calls.
pub const AUTH_HEADER: &str = "X-Agent-Token";

/// Body of `POST /predictions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSubmission {
    pub slug: String,
    pub p_yes: f64,
    pub rationale: String,
}

/// Abstraction over the remote market service.
///
/// Every method performs at most one request and reports failures through
/// the classified [`PredictorError`] taxonomy; retries are the caller's
/// concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// `POST /agents/register`. Unauthenticated.
    async fn register_agent(&self, name: &str) -> Result<RegisteredAgent, PredictorError>;

    /// `GET /markets/top`.
    async fn fetch_markets(&self) -> Result<Vec<Market>, PredictorError>;

    /// `GET /markets/{slug}`.
    async fn market_detail(&self, slug: &str) -> Result<MarketDetail, PredictorError>;

    /// `POST /predictions`. Upserts the agent's forecast on the market.
    async fn submit_prediction(
        &self,
        submission: &PredictionSubmission,
    ) -> Result<Forecast, PredictorError>;

    /// `GET /predictions`: the calling agent's history.
    async fn list_predictions(&self) -> Result<Vec<Forecast>, PredictorError>;

    /// `GET /leaderboard`.
    async fn leaderboard(&self) -> Result<Vec<AgentScoreRecord>, PredictorError>;

    /// `PATCH /agents/profile`. `None` removes the payout address.
    async fn update_profile(
        &self,
        evm_address: Option<String>,
    ) -> Result<AgentProfile, PredictorError>;
}
