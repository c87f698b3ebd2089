//! Shared types for the forecasting agent.
//!
//! These types form the data model used across all modules: markets and
//! forecasts as the remote API returns them, the sentiment signal produced
//! by estimators, leaderboard records, and the error taxonomy every
//! side-effecting operation reports through.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A binary prediction market as listed by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_outcomes")]
    pub outcomes: Vec<String>,
    pub end_date: DateTime<Utc>,
    /// Set exactly once, when the market resolves.
    #[serde(default)]
    pub resolved_outcome: Option<Outcome>,
    #[serde(default)]
    pub agent_count: u32,
    /// Mean of the agents' current forecasts; the market-implied P(Yes).
    #[serde(default)]
    pub avg_probability: Option<f64>,
}

fn default_category() -> String {
    "unknown".to_string()
}

fn default_outcomes() -> Vec<String> {
    vec!["Yes".to_string(), "No".to_string()]
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.category, self.title, self.slug)?;
        if let Some(outcome) = self.resolved_outcome {
            write!(f, " resolved {outcome}")?;
        }
        Ok(())
    }
}

impl Market {
    pub fn is_resolved(&self) -> bool {
        self.resolved_outcome.is_some()
    }

    /// Open for forecasts: unresolved and not past its end date.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_resolved() && self.end_date > now
    }

    /// Helper to build a test market with sensible defaults.
    #[cfg(test)]
    pub fn sample(slug: &str) -> Self {
        Market {
            slug: slug.to_string(),
            title: format!("Will {slug} happen?"),
            description: String::new(),
            category: "politics".to_string(),
            outcomes: default_outcomes(),
            end_date: Utc::now() + chrono::Duration::days(30),
            resolved_outcome: None,
            agent_count: 3,
            avg_probability: Some(0.5),
        }
    }
}

/// Market detail: the listing fields plus the most recent forecasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetail {
    #[serde(flatten)]
    pub market: Market,
    #[serde(default)]
    pub recent_predictions: Vec<Forecast>,
}

/// Resolved outcome of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(alias = "YES", alias = "yes")]
    Yes,
    #[serde(alias = "NO", alias = "no")]
    No,
}

impl Outcome {
    /// 1.0 for Yes, 0.0 for No.
    pub fn indicator(&self) -> f64 {
        match self {
            Outcome::Yes => 1.0,
            Outcome::No => 0.0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "Yes"),
            Outcome::No => write!(f, "No"),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasts & agents
// ---------------------------------------------------------------------------

/// A forecast ("prediction") owned by one agent on one market.
///
/// At most one live forecast exists per (agent, market); a resubmission
/// overwrites the previous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(alias = "marketSlug")]
    pub slug: String,
    pub p_yes: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default = "now", alias = "createdAt")]
    pub updated_at: DateTime<Utc>,
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

impl fmt::Display for Forecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} P(Yes)={:.1}% [{}]",
            self.slug,
            self.p_yes * 100.0,
            if self.id.is_empty() { "-" } else { &self.id },
        )
    }
}

/// Credentials returned once by `POST /agents/register`.
///
/// The token cannot be recovered later, so callers must persist it.
pub struct RegisteredAgent {
    pub agent_id: String,
    pub name: String,
    pub token: SecretString,
}

impl fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Public agent profile returned by `PATCH /agents/profile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    #[serde(default, alias = "agentId")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub evm_address: Option<String>,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentScoreRecord {
    #[serde(alias = "id")]
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    pub brier_score: f64,
    #[serde(default)]
    pub total_predictions: usize,
    #[serde(default)]
    pub resolved_predictions: usize,
    #[serde(default)]
    pub accuracy: f64,
    /// Assigned only when a ranking is produced.
    #[serde(default)]
    pub rank: Option<usize>,
}

impl fmt::Display for AgentScoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rank = self.rank.map(|r| format!("#{r}")).unwrap_or_else(|| "-".into());
        write!(
            f,
            "{rank:>4} {} brier={:.4} acc={:.0}% ({}/{} resolved)",
            if self.name.is_empty() { &self.agent_id } else { &self.name },
            self.brier_score,
            self.accuracy * 100.0,
            self.resolved_predictions,
            self.total_predictions,
        )
    }
}

// ---------------------------------------------------------------------------
// Sentiment signal
// ---------------------------------------------------------------------------

/// Probability signal produced by a sentiment estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentSignal {
    /// Estimated P(Yes), 0.0–1.0.
    pub probability: f64,
    /// Self-reported confidence, 0.0–1.0.
    pub confidence: f64,
    /// Number of external sources the estimate was built from.
    pub source_count: u32,
}

impl fmt::Display for SentimentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P={:.1}% conf={:.0}% sources={}",
            self.probability * 100.0,
            self.confidence * 100.0,
            self.source_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A single guardrail check that failed.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Violation {
    #[error("probability {p_yes} outside [{min}, {max}]")]
    ProbabilityOutOfRange { p_yes: f64, min: f64, max: f64 },

    #[error("rationale has {length} characters, minimum is {min}")]
    RationaleTooShort { length: usize, min: usize },

    #[error("rationale has {length} characters, maximum is {max}")]
    RationaleTooLong { length: usize, max: usize },

    #[error("confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("sentiment analysis required but no signal attached")]
    MissingSentiment,

    #[error("daily prediction limit ({limit}) reached")]
    DailyBudgetExhausted { limit: usize },

    #[error("market slug is empty")]
    EmptySlug,

    #[error("{address:?} is not a 0x-prefixed 40 hex character address")]
    InvalidEvmAddress { address: String },

    #[error("rejected by server: {message}")]
    Server { message: String },
}

/// Domain-specific error taxonomy.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PredictorError {
    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("market closed: {0}")]
    MarketClosed(String),

    #[error("invalid numeric input: {0}")]
    Domain(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("submission failed after {attempts} attempts: {last_error}")]
    SubmissionFailed { attempts: u32, last_error: String },

    #[error("agent name already taken: {0}")]
    NameTaken(String),

    #[error("unexpected API response {status}: {message}")]
    Api { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("heartbeat already running")]
    AlreadyRunning,

    #[error("heartbeat stopped")]
    Stopped,
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PredictorError {
    /// Every later call would fail the same way; the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PredictorError::Authentication(_))
    }

    /// Worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PredictorError::Transient(_))
    }

    /// Expected per-market outcome: skip the market and carry on.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            PredictorError::MarketNotFound(_) | PredictorError::MarketClosed(_)
        )
    }

    /// Guardrail violations carried by a validation error.
    pub fn violations(&self) -> &[Violation] {
        match self {
            PredictorError::Validation(v) => v,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
