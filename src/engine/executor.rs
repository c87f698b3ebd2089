//! Submission executor.
//!
//! Runs every forecast through the safety guardrail, then either simulates
//! it (dry-run) or submits it to the market API, retrying transient
//! failures with bounded exponential backoff. Every attempt lands in an
//! in-memory order journal that backs the daily stats and is persisted
//! between runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::context::AgentContext;
use crate::gateway::PredictionSubmission;
use crate::strategy::guardrail::{PredictionRequest, SafetyGuardrail, DAILY_WINDOW_HOURS};
use crate::types::{Forecast, PredictorError};

/// Journal entries kept in memory (oldest dropped first).
const JOURNAL_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Journal types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted by the market API.
    Submitted,
    /// Refused locally by the guardrail or by the API (4xx).
    Rejected,
    /// Validated and formatted but never sent.
    DryRun,
    /// Transient failures exhausted the retry budget.
    Failed,
}

/// One submission attempt as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub market_slug: String,
    pub p_yes: f64,
    pub rationale: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub forecast_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Successful (or simulated) submission.
///
/// Dry-run receipts have the same shape as real ones: the request body
/// that would have been sent and a synthesized forecast record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub order_id: String,
    pub status: OrderStatus,
    pub dry_run: bool,
    pub request: PredictionSubmission,
    pub forecast: Forecast,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

/// Counts over the trailing 24-hour window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub submitted: usize,
    pub rejected: usize,
    pub dry_run: usize,
    pub failed: usize,
    pub remaining_budget: usize,
    pub max_daily_predictions: usize,
    pub dry_run_mode: bool,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    ctx: AgentContext,
    guardrail: SafetyGuardrail,
    journal: Mutex<VecDeque<OrderRecord>>,
}

impl Executor {
    pub fn new(ctx: AgentContext) -> Result<Self, PredictorError> {
        let guardrail = SafetyGuardrail::new(ctx.safety().clone())?;
        Ok(Self {
            ctx,
            guardrail,
            journal: Mutex::new(VecDeque::new()),
        })
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn guardrail(&self) -> &SafetyGuardrail {
        &self.guardrail
    }

    pub fn is_dry_run(&self) -> bool {
        self.ctx.safety().dry_run_mode
    }

    fn lock_journal(&self) -> MutexGuard<'_, VecDeque<OrderRecord>> {
        self.journal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate, then submit (or simulate) one forecast.
    ///
    /// Never panics past this boundary: every failure comes back as a
    /// classified [`PredictorError`].
    pub async fn execute_prediction(
        &self,
        request: PredictionRequest,
    ) -> Result<SubmissionReceipt, PredictorError> {
        let order_id = uuid::Uuid::new_v4().to_string();

        // 1. Guardrail. Holding the reservation keeps the budget slot ours
        // while the request is in flight.
        let reservation = match self.guardrail.reserve_at(&request, Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                warn!(market = %request.market_slug, error = %e, "Prediction rejected by guardrail");
                self.journal(&order_id, &request, OrderStatus::Rejected, Some(&e), None, 0);
                return Err(e);
            }
        };

        let body = PredictionSubmission {
            slug: request.market_slug.clone(),
            p_yes: request.p_yes,
            rationale: request.rationale.clone(),
        };

        // 2. Dry run: same shape, no side effects, slot released.
        if self.is_dry_run() {
            drop(reservation);
            let submitted_at = Utc::now();
            let forecast = Forecast {
                id: format!("dry-run-{order_id}"),
                agent_id: None,
                slug: body.slug.clone(),
                p_yes: body.p_yes,
                rationale: body.rationale.clone(),
                updated_at: submitted_at,
            };
            info!(
                market = %body.slug,
                p_yes = format!("{:.1}%", body.p_yes * 100.0),
                "[DRY RUN] Would submit prediction"
            );
            self.journal(&order_id, &request, OrderStatus::DryRun, None, Some(&forecast.id), 0);
            return Ok(SubmissionReceipt {
                order_id,
                status: OrderStatus::DryRun,
                dry_run: true,
                request: body,
                forecast,
                attempts: 0,
                submitted_at,
            });
        }

        // 3. Submit with retry on transient failures.
        let retry = self.ctx.retry();
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            match self.ctx.gateway().submit_prediction(&body).await {
                Ok(forecast) => break Ok(forecast),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        market = %body.slug,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient submission failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    break Err(PredictorError::SubmissionFailed {
                        attempts: attempt,
                        last_error: e.to_string(),
                    })
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(forecast) => {
                reservation.commit();
                info!(
                    market = %body.slug,
                    forecast_id = %forecast.id,
                    p_yes = format!("{:.1}%", body.p_yes * 100.0),
                    attempts = attempt,
                    "Prediction submitted"
                );
                self.journal(&order_id, &request, OrderStatus::Submitted, None, Some(&forecast.id), attempt);
                Ok(SubmissionReceipt {
                    order_id,
                    status: OrderStatus::Submitted,
                    dry_run: false,
                    request: body,
                    forecast,
                    attempts: attempt,
                    submitted_at: Utc::now(),
                })
            }
            Err(e) => {
                let status = match e {
                    PredictorError::SubmissionFailed { .. } => OrderStatus::Failed,
                    _ => OrderStatus::Rejected,
                };
                warn!(market = %body.slug, attempts = attempt, error = %e, ?status, "Prediction not accepted");
                self.journal(&order_id, &request, status, Some(&e), None, attempt);
                Err(e)
            }
        }
    }

    /// Execute requests in order.
    ///
    /// With `stop_on_failure` the batch ends at the first error. An
    /// authentication failure always ends it.
    pub async fn execute_batch(
        &self,
        requests: Vec<PredictionRequest>,
        stop_on_failure: bool,
    ) -> Vec<Result<SubmissionReceipt, PredictorError>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let slug = request.market_slug.clone();
            let result = self.execute_prediction(request).await;
            let stop = match &result {
                Err(e) if e.is_fatal() => true,
                Err(_) => stop_on_failure,
                Ok(_) => false,
            };
            results.push(result);
            if stop {
                warn!(market = %slug, "Batch stopped after failure");
                break;
            }
        }
        results
    }

    // -- Journal ---------------------------------------------------------

    fn journal(
        &self,
        order_id: &str,
        request: &PredictionRequest,
        status: OrderStatus,
        error: Option<&PredictorError>,
        forecast_id: Option<&str>,
        attempts: u32,
    ) {
        let record = OrderRecord {
            order_id: order_id.to_string(),
            market_slug: request.market_slug.clone(),
            p_yes: request.p_yes,
            rationale: request.rationale.clone(),
            confidence: request.confidence,
            status,
            reason: error.map(|e| e.to_string()),
            forecast_id: forecast_id.map(str::to_string),
            attempts,
            created_at: Utc::now(),
        };
        let mut journal = self.lock_journal();
        journal.push_back(record);
        while journal.len() > JOURNAL_CAPACITY {
            journal.pop_front();
        }
    }

    /// Newest first, at most `limit` entries.
    pub fn order_history(&self, limit: usize) -> Vec<OrderRecord> {
        self.lock_journal().iter().rev().take(limit).cloned().collect()
    }

    /// Full journal, oldest first, for persistence.
    pub fn journal_snapshot(&self) -> Vec<OrderRecord> {
        self.lock_journal().iter().cloned().collect()
    }

    /// Reload a persisted journal. Submissions still inside the trailing
    /// window count against today's budget again.
    pub fn restore_journal(&self, records: Vec<OrderRecord>) {
        let cutoff = Utc::now() - Duration::hours(DAILY_WINDOW_HOURS);
        let mut reseeded = 0;
        for record in &records {
            if record.status == OrderStatus::Submitted && record.created_at > cutoff {
                self.guardrail.record_submission_at(record.created_at);
                reseeded += 1;
            }
        }

        let mut journal = self.lock_journal();
        let skip = records.len().saturating_sub(JOURNAL_CAPACITY);
        journal.extend(records.into_iter().skip(skip));
        debug!(entries = journal.len(), reseeded, "Order journal restored");
    }

    pub fn daily_stats(&self) -> DailyStats {
        self.daily_stats_at(Utc::now())
    }

    pub fn daily_stats_at(&self, now: DateTime<Utc>) -> DailyStats {
        let cutoff = now - Duration::hours(DAILY_WINDOW_HOURS);
        let mut stats = DailyStats {
            submitted: 0,
            rejected: 0,
            dry_run: 0,
            failed: 0,
            remaining_budget: self.guardrail.remaining_budget_at(now),
            max_daily_predictions: self.ctx.safety().max_daily_predictions,
            dry_run_mode: self.is_dry_run(),
        };
        for record in self.lock_journal().iter().filter(|r| r.created_at > cutoff) {
            match record.status {
                OrderStatus::Submitted => stats.submitted += 1,
                OrderStatus::Rejected => stats.rejected += 1,
                OrderStatus::DryRun => stats.dry_run += 1,
                OrderStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
