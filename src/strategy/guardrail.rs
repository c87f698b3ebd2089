//! Safety guardrail.
//!
//! Gates every forecast submission behind probability bounds, rationale
//! length limits, a confidence threshold, an optional sentiment requirement
//! and a rolling 24-hour submission budget. All failing checks are reported
//! together.
//!
//! The budget is a sliding window, not a calendar day. Slots are reserved
//! under the same lock that performs the budget check, so concurrent
//! submissions can never overshoot `max_daily_predictions`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::types::{PredictorError, SentimentSignal, Violation};

/// Length of the rolling submission window.
pub const DAILY_WINDOW_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Guardrail thresholds. Immutable for the lifetime of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub min_confidence_threshold: f64,
    pub max_daily_predictions: usize,
    pub min_rationale_length: usize,
    pub max_rationale_length: usize,
    pub min_probability: f64,
    pub max_probability: f64,
    pub require_sentiment_analysis: bool,
    /// Validate and format, but never contact the market API.
    pub dry_run_mode: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.6,
            max_daily_predictions: 50,
            min_rationale_length: 50,
            max_rationale_length: 800,
            min_probability: 0.01,
            max_probability: 0.99,
            require_sentiment_analysis: false,
            dry_run_mode: false,
        }
    }
}

impl SafetyConfig {
    /// Check the threshold invariants.
    pub fn validate(&self) -> Result<(), PredictorError> {
        let (lo, hi) = (self.min_probability, self.max_probability);
        if !(lo.is_finite() && hi.is_finite() && 0.0 <= lo && lo < hi && hi <= 1.0) {
            return Err(PredictorError::Config(format!(
                "probability bounds must satisfy 0 <= min < max <= 1, got [{lo}, {hi}]"
            )));
        }
        if self.min_rationale_length >= self.max_rationale_length {
            return Err(PredictorError::Config(format!(
                "rationale bounds must satisfy min < max, got [{}, {}]",
                self.min_rationale_length, self.max_rationale_length
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            return Err(PredictorError::Config(format!(
                "min_confidence_threshold must be within [0, 1], got {}",
                self.min_confidence_threshold
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A forecast the agent wants to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub market_slug: String,
    pub p_yes: f64,
    pub rationale: String,
    /// Caller's confidence; the threshold check is skipped when absent.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Replaces `min_confidence_threshold` for this request only.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub sentiment: Option<SentimentSignal>,
}

impl PredictionRequest {
    pub fn new(market_slug: impl Into<String>, p_yes: f64, rationale: impl Into<String>) -> Self {
        Self {
            market_slug: market_slug.into(),
            p_yes,
            rationale: rationale.into(),
            confidence: None,
            confidence_threshold: None,
            sentiment: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_sentiment(mut self, signal: SentimentSignal) -> Self {
        self.sentiment = Some(signal);
        self
    }
}

// ---------------------------------------------------------------------------
// Guardrail
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SubmissionWindow {
    /// (slot id, timestamp) of accepted or in-flight submissions.
    slots: Vec<(u64, DateTime<Utc>)>,
    next_id: u64,
}

impl SubmissionWindow {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(DAILY_WINDOW_HOURS);
        self.slots.retain(|(_, at)| *at > cutoff);
    }

    fn push(&mut self, at: DateTime<Utc>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push((id, at));
        id
    }
}

/// Per-agent submission gate.
#[derive(Debug)]
pub struct SafetyGuardrail {
    config: SafetyConfig,
    window: Mutex<SubmissionWindow>,
}

impl SafetyGuardrail {
    pub fn new(config: SafetyConfig) -> Result<Self, PredictorError> {
        config.validate()?;
        Ok(Self {
            config,
            window: Mutex::new(SubmissionWindow::default()),
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    fn lock_window(&self) -> MutexGuard<'_, SubmissionWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run every check against the current window.
    pub fn validate(&self, request: &PredictionRequest) -> Result<(), PredictorError> {
        self.validate_at(request, Utc::now())
    }

    pub fn validate_at(
        &self,
        request: &PredictionRequest,
        now: DateTime<Utc>,
    ) -> Result<(), PredictorError> {
        let mut window = self.lock_window();
        window.prune(now);
        let violations = self.collect_violations(request, window.slots.len());
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PredictorError::Validation(violations))
        }
    }

    /// Validate and, if everything passes, hold a budget slot.
    ///
    /// The slot is released when the returned [`Reservation`] is dropped
    /// without being committed.
    pub fn reserve_at(
        &self,
        request: &PredictionRequest,
        now: DateTime<Utc>,
    ) -> Result<Reservation<'_>, PredictorError> {
        let mut window = self.lock_window();
        window.prune(now);
        let violations = self.collect_violations(request, window.slots.len());
        if !violations.is_empty() {
            debug!(
                market = %request.market_slug,
                count = violations.len(),
                "Guardrail rejected request"
            );
            return Err(PredictorError::Validation(violations));
        }
        let id = window.push(now);
        Ok(Reservation {
            guardrail: self,
            id,
            committed: false,
        })
    }

    /// Count a submission that happened outside this process (journal restore).
    pub fn record_submission_at(&self, at: DateTime<Utc>) {
        let mut window = self.lock_window();
        window.push(at);
        window.prune(Utc::now());
    }

    /// Submissions counted in the trailing window ending at `now`.
    pub fn submissions_in_window_at(&self, now: DateTime<Utc>) -> usize {
        let mut window = self.lock_window();
        window.prune(now);
        window.slots.len()
    }

    pub fn remaining_budget_at(&self, now: DateTime<Utc>) -> usize {
        self.config
            .max_daily_predictions
            .saturating_sub(self.submissions_in_window_at(now))
    }

    fn collect_violations(&self, request: &PredictionRequest, used: usize) -> Vec<Violation> {
        let cfg = &self.config;
        let mut violations = Vec::new();

        if request.market_slug.trim().is_empty() {
            violations.push(Violation::EmptySlug);
        }

        // NaN fails the range check as well.
        if !(cfg.min_probability..=cfg.max_probability).contains(&request.p_yes) {
            violations.push(Violation::ProbabilityOutOfRange {
                p_yes: request.p_yes,
                min: cfg.min_probability,
                max: cfg.max_probability,
            });
        }

        let length = request.rationale.chars().count();
        if length < cfg.min_rationale_length {
            violations.push(Violation::RationaleTooShort {
                length,
                min: cfg.min_rationale_length,
            });
        } else if length > cfg.max_rationale_length {
            violations.push(Violation::RationaleTooLong {
                length,
                max: cfg.max_rationale_length,
            });
        }

        if let Some(confidence) = request.confidence {
            let threshold = request
                .confidence_threshold
                .unwrap_or(cfg.min_confidence_threshold);
            if confidence.is_nan() || confidence < threshold {
                violations.push(Violation::LowConfidence {
                    confidence,
                    threshold,
                });
            }
        }

        if cfg.require_sentiment_analysis && request.sentiment.is_none() {
            violations.push(Violation::MissingSentiment);
        }

        if used >= cfg.max_daily_predictions {
            warn!(
                used,
                limit = cfg.max_daily_predictions,
                "Daily prediction budget exhausted"
            );
            violations.push(Violation::DailyBudgetExhausted {
                limit: cfg.max_daily_predictions,
            });
        }

        violations
    }

    fn release(&self, id: u64) {
        self.lock_window().slots.retain(|(slot, _)| *slot != id);
    }

    fn confirm(&self, id: u64, at: DateTime<Utc>) {
        if let Some(slot) = self.lock_window().slots.iter_mut().find(|(slot, _)| *slot == id) {
            slot.1 = at;
        }
    }
}

/// A held budget slot. Dropping it without [`Reservation::commit`] frees the slot.
#[must_use = "dropping a reservation releases the budget slot"]
pub struct Reservation<'a> {
    guardrail: &'a SafetyGuardrail,
    id: u64,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the slot, stamped with the acceptance time.
    pub fn commit(mut self) {
        self.guardrail.confirm(self.id, Utc::now());
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guardrail.release(self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
