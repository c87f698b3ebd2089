//! HTTP client for the forecasting service REST API.
//!
//! Base URL: https://clawdpredict.com/api
//! Auth: `X-Agent-Token: {token}` on every call except registration.
//!
//! Status codes are mapped onto the error taxonomy here so the executor
//! only ever sees classified outcomes: 400 validation, 401 authentication,
//! 404 not found, 409 closed (or name taken on registration), 429 and 5xx
//! transient. Network-level failures are transient as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{MarketGateway, PredictionSubmission, AUTH_HEADER};
use crate::types::{
    AgentProfile, AgentScoreRecord, Forecast, Market, MarketDetail, PredictorError,
    RegisteredAgent, Violation,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://clawdpredict.com/api";
const GATEWAY_NAME: &str = "clawdpredict";
const USER_AGENT: &str = concat!("market-predictor/", env!("CARGO_PKG_VERSION"));

/// Longest error body carried into an error message.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// List endpoints answer either with a bare array or with an envelope
/// object (`{"markets": [...]}`, `{"agents": [...]}`, `{"predictions": [...]}`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "markets", alias = "agents", alias = "predictions")]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) | Listing::Wrapped { items } => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    agent_id: String,
    agent_token: String,
    #[serde(default)]
    name: String,
}

/// Forecast record as echoed by `POST /predictions`. Only the id is
/// guaranteed; everything else falls back to what was submitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default, alias = "marketSlug")]
    slug: Option<String>,
    #[serde(default)]
    p_yes: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default, alias = "createdAt")]
    updated_at: Option<DateTime<Utc>>,
}

impl SubmittedRecord {
    fn into_forecast(self, submission: &PredictionSubmission) -> Forecast {
        Forecast {
            id: self.id.unwrap_or_default(),
            agent_id: self.agent_id,
            slug: self.slug.unwrap_or_else(|| submission.slug.clone()),
            p_yes: self.p_yes.unwrap_or(submission.p_yes),
            rationale: self
                .rationale
                .unwrap_or_else(|| submission.rationale.clone()),
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Map a non-success status onto the error taxonomy.
///
/// `subject` names what the request was about (a market slug, an agent
/// name) and ends up in not-found / conflict errors.
pub fn classify_status(status: StatusCode, body: &str, subject: &str) -> PredictorError {
    let message = error_message(body);
    match status.as_u16() {
        400 => PredictorError::Validation(vec![Violation::Server { message }]),
        401 | 403 => PredictorError::Authentication(message),
        404 => PredictorError::MarketNotFound(subject.to_string()),
        409 => PredictorError::MarketClosed(subject.to_string()),
        429 => PredictorError::Transient(format!("rate limited: {message}")),
        s if s >= 500 => PredictorError::Transient(format!("HTTP {status}: {message}")),
        s => PredictorError::Api { status: s, message },
    }
}

/// Pull `error`/`message` out of a JSON error body, else the raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    let text = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or_else(|| body.trim().to_string());
    text.chars().take(MAX_ERROR_BODY).collect()
}

fn network_error(err: reqwest::Error) -> PredictorError {
    PredictorError::Transient(format!("request failed: {err}"))
}

/// Check an EVM payout address: `0x` followed by 40 hex characters.
pub fn validate_evm_address(address: &str) -> Result<(), PredictorError> {
    let valid = address
        .strip_prefix("0x")
        .map(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(PredictorError::Validation(vec![Violation::InvalidEvmAddress {
            address: address.to_string(),
        }]))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// reqwest-backed [`MarketGateway`].
pub struct HttpGateway {
    http: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpGateway {
    /// `token` may be absent for registration-only use; authenticated calls
    /// then fail with [`PredictorError::Authentication`] without touching
    /// the network.
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, PredictorError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PredictorError::Config(format!("failed to build HTTP client: {e}")))?;

        if token.is_none() {
            warn!("No agent token provided; authenticated calls will fail");
        }

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, PredictorError> {
        let token = self.token.as_ref().ok_or_else(|| {
            PredictorError::Authentication("no agent token configured".to_string())
        })?;
        Ok(request.header(AUTH_HEADER, token.expose_secret().as_str()))
    }

    /// Send, and turn any non-success status into a classified error.
    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response, PredictorError> {
        let resp = request.send().await.map_err(network_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        debug!(status = %status, subject, body = %body, "Request rejected");
        Err(classify_status(status, &body, subject))
    }

    async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, PredictorError> {
        let status = resp.status().as_u16();
        resp.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                PredictorError::Api {
                    status,
                    message: format!("failed to parse {what}: {e}"),
                }
            } else {
                network_error(e)
            }
        })
    }
}

#[async_trait]
impl MarketGateway for HttpGateway {
    async fn register_agent(&self, name: &str) -> Result<RegisteredAgent, PredictorError> {
        let request = self
            .http
            .post(self.url("/agents/register"))
            .json(&serde_json::json!({ "name": name }));

        let resp = match self.send(request, name).await {
            Ok(resp) => resp,
            Err(PredictorError::MarketClosed(_)) => {
                return Err(PredictorError::NameTaken(name.to_string()))
            }
            Err(e) => return Err(e),
        };

        let body: RegisterResponse = Self::decode(resp, "registration response").await?;
        info!(agent_id = %body.agent_id, name, "Agent registered");

        Ok(RegisteredAgent {
            agent_id: body.agent_id,
            name: if body.name.is_empty() {
                name.to_string()
            } else {
                body.name
            },
            token: SecretString::new(body.agent_token),
        })
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>, PredictorError> {
        let url = self.url("/markets/top");
        debug!(url = %url, "Fetching markets");

        let resp = self.send(self.authed(self.http.get(&url))?, "markets/top").await?;
        let markets = Self::decode::<Listing<Market>>(resp, "market listing")
            .await?
            .into_vec();

        info!(count = markets.len(), gateway = GATEWAY_NAME, "Fetched markets");
        Ok(markets)
    }

    async fn market_detail(&self, slug: &str) -> Result<MarketDetail, PredictorError> {
        let url = self.url(&format!("/markets/{}", urlencoding::encode(slug)));
        debug!(url = %url, "Fetching market detail");

        let resp = self.send(self.authed(self.http.get(&url))?, slug).await?;
        Self::decode(resp, "market detail").await
    }

    async fn submit_prediction(
        &self,
        submission: &PredictionSubmission,
    ) -> Result<Forecast, PredictorError> {
        let request = self.authed(self.http.post(self.url("/predictions")).json(submission))?;
        let resp = self.send(request, &submission.slug).await?;

        let record: SubmittedRecord = Self::decode(resp, "prediction record").await?;
        Ok(record.into_forecast(submission))
    }

    async fn list_predictions(&self) -> Result<Vec<Forecast>, PredictorError> {
        let resp = self
            .send(self.authed(self.http.get(self.url("/predictions")))?, "predictions")
            .await?;
        Ok(Self::decode::<Listing<Forecast>>(resp, "prediction history")
            .await?
            .into_vec())
    }

    async fn leaderboard(&self) -> Result<Vec<AgentScoreRecord>, PredictorError> {
        // Public, but sending the token is harmless when we have one.
        let mut request = self.http.get(self.url("/leaderboard"));
        if let Some(token) = &self.token {
            request = request.header(AUTH_HEADER, token.expose_secret().as_str());
        }
        let resp = self.send(request, "leaderboard").await?;
        Ok(Self::decode::<Listing<AgentScoreRecord>>(resp, "leaderboard")
            .await?
            .into_vec())
    }

    async fn update_profile(
        &self,
        evm_address: Option<String>,
    ) -> Result<AgentProfile, PredictorError> {
        if let Some(address) = &evm_address {
            validate_evm_address(address)?;
        }

        let request = self.authed(
            self.http
                .patch(self.url("/agents/profile"))
                .json(&serde_json::json!({ "evmAddress": evm_address })),
        )?;
        let resp = self.send(request, "agents/profile").await?;
        let profile: AgentProfile = Self::decode(resp, "agent profile").await?;

        info!(
            evm_address = evm_address.as_deref().unwrap_or("removed"),
            "EVM address updated"
        );
        Ok(profile)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
