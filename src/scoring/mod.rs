//! Calibration scoring and leaderboard ranking.
//!
//! Scores are recomputed from scratch on every request: each agent's Brier
//! score is the mean of `(pYes - outcome)^2` over its forecasts on resolved
//! markets. Only agents with at least one resolved forecast are ranked,
//! ascending by Brier score, ties going to the agent with more forecasts.

use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::types::{AgentProfile, AgentScoreRecord, Forecast, Market, PredictorError};

/// Brier score of always answering 0.5. Reported for agents with nothing
/// resolved yet; such agents are never ranked.
pub const UNINFORMED_BRIER: f64 = 0.25;

// ---------------------------------------------------------------------------
// Forecast book
// ---------------------------------------------------------------------------

/// Live forecasts, at most one per (agent, market).
#[derive(Debug, Default)]
pub struct ForecastBook {
    /// agent id → market slug → forecast
    forecasts: BTreeMap<String, BTreeMap<String, Forecast>>,
    names: HashMap<String, String>,
}

impl ForecastBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_agent_name(&mut self, agent_id: &str, name: &str) {
        self.names.insert(agent_id.to_string(), name.to_string());
    }

    /// Insert or overwrite the agent's forecast on that market.
    ///
    /// An older forecast never replaces a newer one. Returns whether an
    /// existing forecast was replaced.
    pub fn upsert(&mut self, forecast: Forecast) -> Result<bool, PredictorError> {
        let agent_id = forecast
            .agent_id
            .clone()
            .ok_or_else(|| PredictorError::Domain(format!("forecast {} has no agent id", forecast.id)))?;
        if !(0.0..=1.0).contains(&forecast.p_yes) {
            return Err(PredictorError::Domain(format!(
                "pYes must be within [0, 1], got {}",
                forecast.p_yes
            )));
        }

        let by_market = self.forecasts.entry(agent_id).or_default();
        let replaced = match by_market.get(&forecast.slug) {
            Some(existing) if existing.updated_at > forecast.updated_at => return Ok(false),
            Some(_) => true,
            None => false,
        };
        by_market.insert(forecast.slug.clone(), forecast);
        Ok(replaced)
    }

    pub fn len(&self) -> usize {
        self.forecasts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forecast(&self, agent_id: &str, slug: &str) -> Option<&Forecast> {
        self.forecasts.get(agent_id)?.get(slug)
    }

    /// Score every agent in the book, unranked.
    pub fn score(&self, markets: &HashMap<String, Market>) -> Vec<AgentScoreRecord> {
        self.forecasts
            .iter()
            .map(|(agent_id, by_market)| {
                let name = self.names.get(agent_id).cloned().unwrap_or_default();
                score_agent(agent_id, &name, by_market.values(), markets)
            })
            .collect()
    }

    /// Score and rank.
    pub fn leaderboard(&self, markets: &HashMap<String, Market>) -> Vec<AgentScoreRecord> {
        rank(self.score(markets))
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one agent's forecasts against whatever markets have resolved.
///
/// Forecasts on unknown or unresolved markets count towards
/// `total_predictions` only.
pub fn score_agent<'a>(
    agent_id: &str,
    name: &str,
    forecasts: impl IntoIterator<Item = &'a Forecast>,
    markets: &HashMap<String, Market>,
) -> AgentScoreRecord {
    let mut total = 0usize;
    let mut resolved = 0usize;
    let mut squared_error = 0.0;
    let mut correct = 0usize;

    for forecast in forecasts {
        total += 1;
        let Some(outcome) = markets.get(&forecast.slug).and_then(|m| m.resolved_outcome) else {
            continue;
        };
        resolved += 1;
        let indicator = outcome.indicator();
        squared_error += (forecast.p_yes - indicator).powi(2);
        if (forecast.p_yes >= 0.5) == (indicator == 1.0) {
            correct += 1;
        }
    }

    let (brier_score, accuracy) = if resolved == 0 {
        (UNINFORMED_BRIER, 0.0)
    } else {
        (
            squared_error / resolved as f64,
            correct as f64 / resolved as f64,
        )
    };

    AgentScoreRecord {
        agent_id: agent_id.to_string(),
        name: name.to_string(),
        brier_score,
        total_predictions: total,
        resolved_predictions: resolved,
        accuracy,
        rank: None,
    }
}

/// Keep agents with resolved forecasts, order them and assign ranks 1..N.
///
/// Order: Brier ascending, then more total forecasts first, then agent id
/// so equal records always come out the same way.
pub fn rank(records: Vec<AgentScoreRecord>) -> Vec<AgentScoreRecord> {
    let mut ranked: Vec<_> = records
        .into_iter()
        .filter(|r| r.total_predictions > 0 && r.resolved_predictions > 0)
        .collect();

    ranked.sort_by(|a, b| {
        a.brier_score
            .partial_cmp(&b.brier_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.total_predictions.cmp(&a.total_predictions))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });

    for (i, record) in ranked.iter_mut().enumerate() {
        record.rank = Some(i + 1);
    }
    debug!(ranked = ranked.len(), "Leaderboard computed");
    ranked
}

// ---------------------------------------------------------------------------
// Offline dataset
// ---------------------------------------------------------------------------

/// A JSON dump of markets, forecasts and (optionally) agent names, as
/// consumed by the `score` command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringDataset {
    pub markets: Vec<Market>,
    #[serde(alias = "predictions")]
    pub forecasts: Vec<Forecast>,
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

impl ScoringDataset {
    pub fn leaderboard(self) -> Result<Vec<AgentScoreRecord>, PredictorError> {
        let mut book = ForecastBook::new();
        for agent in &self.agents {
            book.set_agent_name(&agent.id, &agent.name);
        }
        for forecast in self.forecasts {
            book.upsert(forecast)?;
        }
        let markets: HashMap<_, _> = self
            .markets
            .into_iter()
            .map(|m| (m.slug.clone(), m))
            .collect();
        Ok(book.leaderboard(&markets))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
