//! Expected-value and Kelly sizing for binary markets.
//!
//! Buying YES at price `q` (the market-implied probability) pays `1 - q`
//! per unit on YES and loses `q` on NO. With estimated win probability
//! `p` the edge is `p - q`, the per-unit expected value is `(p - q) / q`
//! and the full-Kelly fraction is `(p - q) / (1 - q)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::PredictorError;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Which side (if any) the estimate favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    FavorYes,
    FavorNo,
    NoAction,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::FavorYes => write!(f, "favor-yes"),
            Recommendation::FavorNo => write!(f, "favor-no"),
            Recommendation::NoAction => write!(f, "no-action"),
        }
    }
}

/// EV/Kelly computation for one market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvResult {
    pub p_win: f64,
    pub market_odds: f64,
    pub stake: f64,
    /// `p_win - market_odds`; positive means YES is underpriced.
    pub edge: f64,
    /// Expected profit of staking `stake` on YES.
    pub expected_value: f64,
    /// Full-Kelly fraction for buying YES, clamped to [0, 1].
    pub kelly_fraction: f64,
    /// Full-Kelly fraction for buying NO at `1 - market_odds`, clamped to [0, 1].
    pub kelly_fraction_no: f64,
    pub recommendation: Recommendation,
}

impl EvResult {
    /// Kelly fraction on the recommended side (0 for no-action).
    pub fn recommended_fraction(&self) -> f64 {
        match self.recommendation {
            Recommendation::FavorYes => self.kelly_fraction,
            Recommendation::FavorNo => self.kelly_fraction_no,
            Recommendation::NoAction => 0.0,
        }
    }
}

impl fmt::Display for EvResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | est={:.1}% mkt={:.1}% edge={:+.1}% | kelly={:.1}% | EV={:+.2} on {:.2}",
            self.recommendation,
            self.p_win * 100.0,
            self.market_odds * 100.0,
            self.edge * 100.0,
            self.recommended_fraction() * 100.0,
            self.expected_value,
            self.stake,
        )
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Compute edge, expected value, Kelly fractions and a recommendation.
///
/// `min_edge` is the symmetric dead zone around zero edge inside which no
/// side is recommended. Inputs that would divide by zero or produce NaN
/// are rejected with [`PredictorError::Domain`].
pub fn calculate_ev(
    p_win: f64,
    market_odds: f64,
    stake: f64,
    min_edge: f64,
) -> Result<EvResult, PredictorError> {
    if !p_win.is_finite() || !(0.0..=1.0).contains(&p_win) {
        return Err(PredictorError::Domain(format!(
            "p_win must be within [0, 1], got {p_win}"
        )));
    }
    if !market_odds.is_finite() || market_odds <= 0.0 || market_odds >= 1.0 {
        return Err(PredictorError::Domain(format!(
            "market_odds must be within (0, 1), got {market_odds}"
        )));
    }
    if !stake.is_finite() || stake <= 0.0 {
        return Err(PredictorError::Domain(format!(
            "stake must be positive, got {stake}"
        )));
    }
    if !min_edge.is_finite() || min_edge < 0.0 {
        return Err(PredictorError::Domain(format!(
            "min_edge must be non-negative, got {min_edge}"
        )));
    }

    let edge = p_win - market_odds;
    let expected_value = stake * (edge / market_odds);

    // Mirror image for NO: price 1 - q, win probability 1 - p, edge -edge.
    let market_odds_no = 1.0 - market_odds;
    let kelly_fraction = (edge / market_odds_no).clamp(0.0, 1.0);
    let kelly_fraction_no = (-edge / market_odds).clamp(0.0, 1.0);

    let recommendation = if edge > min_edge {
        Recommendation::FavorYes
    } else if edge < -min_edge {
        Recommendation::FavorNo
    } else {
        Recommendation::NoAction
    };

    debug!(
        p_win = format!("{:.1}%", p_win * 100.0),
        market_odds = format!("{:.1}%", market_odds * 100.0),
        edge = format!("{:+.1}%", edge * 100.0),
        kelly = format!("{:.1}%", kelly_fraction * 100.0),
        kelly_no = format!("{:.1}%", kelly_fraction_no * 100.0),
        %recommendation,
        "EV computed"
    );

    Ok(EvResult {
        p_win,
        market_odds,
        stake,
        edge,
        expected_value,
        kelly_fraction,
        kelly_fraction_no,
        recommendation,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
