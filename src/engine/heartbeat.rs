//! Heartbeat scheduler.
//!
//! One tick: fetch open markets → estimate P(Yes) → compute EV against the
//! market-implied probability → keep markets whose |edge| clears `min_edge`
//! → either report them or auto-submit through the executor.
//!
//! Ticks never overlap. The run loop awaits each tick inline and the timer
//! skips firings that elapse meanwhile; a standalone `tick()` call made
//! while another tick is running is refused with
//! [`PredictorError::AlreadyRunning`]. Stopping prevents further ticks but
//! lets an in-flight tick finish and deliver its report; any tick requested
//! afterwards fails with [`PredictorError::Stopped`].

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::executor::{Executor, SubmissionReceipt};
use crate::sentiment::SentimentEstimator;
use crate::strategy::ev::{calculate_ev, EvResult};
use crate::strategy::guardrail::PredictionRequest;
use crate::types::{Market, PredictorError, SentimentSignal};

/// Implied probability for a market nobody has forecast yet.
pub const NEUTRAL_ODDS: f64 = 0.5;

/// Tick summaries kept for the status API.
const RECENT_TICKS: usize = 50;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_minutes: u64,
    /// Restrict scans to these categories (case-insensitive). Empty = all.
    pub categories: Vec<String>,
    /// Submit opportunities instead of only reporting them.
    pub auto_predict: bool,
    pub min_edge: f64,
    /// Notional stake used for the EV figure.
    pub stake: f64,
    pub max_markets: usize,
    /// Markets evaluated concurrently within a tick.
    pub concurrency: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            categories: Vec::new(),
            auto_predict: false,
            min_edge: 0.05,
            stake: 100.0,
            max_markets: 20,
            concurrency: 4,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<(), PredictorError> {
        if self.interval_minutes == 0 {
            return Err(PredictorError::Config(
                "heartbeat.interval_minutes must be positive".into(),
            ));
        }
        if !self.min_edge.is_finite() || self.min_edge < 0.0 {
            return Err(PredictorError::Config(format!(
                "heartbeat.min_edge must be non-negative, got {}",
                self.min_edge
            )));
        }
        if !self.stake.is_finite() || self.stake <= 0.0 {
            return Err(PredictorError::Config(format!(
                "heartbeat.stake must be positive, got {}",
                self.stake
            )));
        }
        if self.concurrency == 0 {
            return Err(PredictorError::Config(
                "heartbeat.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

// ---------------------------------------------------------------------------
// Tick results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    Estimator,
    /// Supplied by the caller of the tick.
    Override,
}

/// A market whose estimate diverges from the market by more than `min_edge`.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub market: Market,
    pub estimate: f64,
    pub source: EstimateSource,
    pub signal: Option<SentimentSignal>,
    pub ev: EvResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Estimate,
    MarketOdds,
    Evaluate,
    Submit,
}

/// A per-market failure. Never aborts the rest of the tick (except a
/// fatal authentication error during submission).
#[derive(Debug, Clone, Serialize)]
pub struct MarketFailure {
    pub slug: String,
    pub stage: FailureStage,
    pub error: PredictorError,
}

impl MarketFailure {
    fn new(slug: &str, stage: FailureStage, error: PredictorError) -> Self {
        Self {
            slug: slug.to_string(),
            stage,
            error,
        }
    }
}

/// Everything one tick produced.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub markets_scanned: usize,
    /// Sorted by |edge|, largest first.
    pub opportunities: Vec<Opportunity>,
    pub submissions: Vec<SubmissionReceipt>,
    pub failures: Vec<MarketFailure>,
    /// Set when the market listing itself could not be fetched.
    pub fetch_error: Option<PredictorError>,
}

impl TickReport {
    fn new(tick: u64) -> Self {
        let now = Utc::now();
        Self {
            tick,
            started_at: now,
            finished_at: now,
            markets_scanned: 0,
            opportunities: Vec::new(),
            submissions: Vec::new(),
            failures: Vec::new(),
            fetch_error: None,
        }
    }

    /// The error that should stop the scheduler, if any.
    pub fn fatal_error(&self) -> Option<&PredictorError> {
        self.fetch_error
            .iter()
            .chain(self.failures.iter().map(|f| &f.error))
            .find(|e| e.is_fatal())
    }

    pub fn summary(&self) -> TickSummary {
        TickSummary {
            tick: self.tick,
            started_at: self.started_at,
            duration_ms: (self.finished_at - self.started_at).num_milliseconds(),
            markets_scanned: self.markets_scanned,
            opportunities: self.opportunities.len(),
            submitted: self.submissions.len(),
            failures: self.failures.len(),
            error: self.fetch_error.as_ref().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub markets_scanned: usize,
    pub opportunities: usize,
    pub submitted: usize,
    pub failures: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStatus {
    pub state: HeartbeatState,
    pub ticks: u64,
    pub interval_secs: u64,
    pub auto_predict: bool,
    pub min_edge: f64,
    pub categories: Vec<String>,
    pub last_tick: Option<TickSummary>,
}

/// Build a forecast rationale from an opportunity, cut to `max_len` chars.
pub fn synthesize_rationale(opportunity: &Opportunity, max_len: usize) -> String {
    let ev = &opportunity.ev;
    let mut text = format!(
        "Estimated P(Yes) {:.1}% against a market-implied {:.1}% ({:+.1} pt edge, {}). \
         Kelly fraction on the favoured side is {:.1}%.",
        ev.p_win * 100.0,
        ev.market_odds * 100.0,
        ev.edge * 100.0,
        ev.recommendation,
        ev.recommended_fraction() * 100.0,
    );
    match &opportunity.signal {
        Some(signal) => text.push_str(&format!(
            " Signal built from {} sources at {:.0}% confidence.",
            signal.source_count,
            signal.confidence * 100.0
        )),
        None => text.push_str(" Probability supplied directly by the operator."),
    }
    text.push_str(&format!(" Market: {}", opportunity.market.title));

    if text.chars().count() > max_len {
        text = text.chars().take(max_len).collect();
    }
    text
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Clears the in-tick flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Heartbeat {
    executor: Arc<Executor>,
    estimator: Arc<dyn SentimentEstimator>,
    config: HeartbeatConfig,
    interval: Duration,
    state: Mutex<HeartbeatState>,
    started: AtomicBool,
    in_tick: AtomicBool,
    tick_count: AtomicU64,
    shutdown: watch::Sender<bool>,
    recent: Mutex<VecDeque<TickSummary>>,
    last_opportunities: Mutex<Vec<Opportunity>>,
}

impl Heartbeat {
    pub fn new(
        executor: Arc<Executor>,
        estimator: Arc<dyn SentimentEstimator>,
        config: HeartbeatConfig,
    ) -> Result<Self, PredictorError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            executor,
            estimator,
            interval: config.interval(),
            config,
            state: Mutex::new(HeartbeatState::Idle),
            started: AtomicBool::new(false),
            in_tick: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            shutdown,
            recent: Mutex::new(VecDeque::new()),
            last_opportunities: Mutex::new(Vec::new()),
        })
    }

    /// Override the timer period (sub-minute periods for tests and demos).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> HeartbeatState {
        *Self::lock(&self.state)
    }

    fn set_state(&self, next: HeartbeatState) {
        let mut state = Self::lock(&self.state);
        if *state != HeartbeatState::Stopped {
            *state = next;
        }
    }

    // -- Lifecycle -------------------------------------------------------

    /// Spawn the timer loop. A heartbeat can be started once.
    pub fn start(
        self: &Arc<Self>,
        sink: mpsc::Sender<TickReport>,
    ) -> Result<JoinHandle<Result<(), PredictorError>>, PredictorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PredictorError::AlreadyRunning);
        }
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run(sink).await }))
    }

    /// Prevent any further tick. An in-flight tick runs to completion.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        *Self::lock(&self.state) = HeartbeatState::Stopped;
        info!("Heartbeat stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Timer loop. Returns `Err` only for a fatal error (authentication),
    /// after delivering the report that carried it.
    async fn run(&self, sink: mpsc::Sender<TickReport>) -> Result<(), PredictorError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            estimator = self.estimator.name(),
            auto_predict = self.config.auto_predict,
            min_edge = format!("{:.1}%", self.config.min_edge * 100.0),
            categories = ?self.config.categories,
            "Heartbeat started"
        );

        let result = loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    let stopping = changed.is_err() || *shutdown.borrow();
                    if stopping {
                        break Ok(());
                    }
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => {
                            let fatal = report.fatal_error().cloned();
                            if sink.send(report).await.is_err() {
                                debug!("Tick report receiver dropped");
                            }
                            if let Some(e) = fatal {
                                error!(error = %e, "Fatal error, stopping heartbeat");
                                break Err(e);
                            }
                        }
                        Err(PredictorError::Stopped) => break Ok(()),
                        Err(PredictorError::AlreadyRunning) => {
                            debug!("Previous tick still running, skipping");
                        }
                        Err(e) => warn!(error = %e, "Tick failed"),
                    }
                }
            }
        };

        self.shutdown.send_replace(true);
        *Self::lock(&self.state) = HeartbeatState::Stopped;
        info!(ticks = self.tick_count.load(Ordering::Relaxed), "Heartbeat stopped");
        result
    }

    // -- Tick ------------------------------------------------------------

    /// Run one tick using the configured estimator.
    pub async fn tick(&self) -> Result<TickReport, PredictorError> {
        self.tick_with_overrides(&HashMap::new()).await
    }

    /// Run one tick; markets listed in `overrides` use the supplied
    /// probability instead of the estimator's.
    pub async fn tick_with_overrides(
        &self,
        overrides: &HashMap<String, f64>,
    ) -> Result<TickReport, PredictorError> {
        let _guard = TickGuard::acquire(&self.in_tick).ok_or(PredictorError::AlreadyRunning)?;
        if self.is_stopped() {
            return Err(PredictorError::Stopped);
        }
        self.set_state(HeartbeatState::Running);

        let tick = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport::new(tick);
        debug!(tick, "Tick starting");

        match self.executor.context().gateway().fetch_markets().await {
            Ok(markets) => {
                let now = Utc::now();
                let candidates: Vec<Market> = markets
                    .into_iter()
                    .filter(|m| m.is_open_at(now) && self.matches_category(m))
                    .take(self.config.max_markets)
                    .collect();
                report.markets_scanned = candidates.len();

                let evaluations: Vec<_> = candidates
                    .iter()
                    .map(|market| self.evaluate(market, overrides))
                    .collect();
                let results: Vec<_> = stream::iter(evaluations)
                    .buffer_unordered(self.config.concurrency)
                    .collect()
                    .await;

                for result in results {
                    match result {
                        Ok(Some(opportunity)) => report.opportunities.push(opportunity),
                        Ok(None) => {}
                        Err(failure) => {
                            warn!(
                                market = %failure.slug,
                                stage = ?failure.stage,
                                error = %failure.error,
                                "Market skipped"
                            );
                            report.failures.push(failure);
                        }
                    }
                }
                report.opportunities.sort_by(|a, b| {
                    b.ev.edge
                        .abs()
                        .partial_cmp(&a.ev.edge.abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

                if self.config.auto_predict {
                    self.submit_opportunities(&mut report).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch markets");
                report.fetch_error = Some(e);
            }
        }

        report.finished_at = Utc::now();
        self.record(&report);
        self.set_state(HeartbeatState::Idle);

        info!(
            tick,
            scanned = report.markets_scanned,
            opportunities = report.opportunities.len(),
            submitted = report.submissions.len(),
            failures = report.failures.len(),
            "Tick complete"
        );
        Ok(report)
    }

    fn matches_category(&self, market: &Market) -> bool {
        self.config.categories.is_empty()
            || self
                .config
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&market.category))
    }

    async fn evaluate(
        &self,
        market: &Market,
        overrides: &HashMap<String, f64>,
    ) -> Result<Option<Opportunity>, MarketFailure> {
        let (estimate, source, signal) = match overrides.get(&market.slug) {
            Some(p) => (*p, EstimateSource::Override, None),
            None => {
                let signal = self
                    .estimator
                    .estimate(market)
                    .await
                    .map_err(|e| MarketFailure::new(&market.slug, FailureStage::Estimate, e))?;
                (signal.probability, EstimateSource::Estimator, Some(signal))
            }
        };

        let odds = self
            .market_odds(market)
            .await
            .map_err(|e| MarketFailure::new(&market.slug, FailureStage::MarketOdds, e))?;

        let ev = calculate_ev(estimate, odds, self.config.stake, self.config.min_edge)
            .map_err(|e| MarketFailure::new(&market.slug, FailureStage::Evaluate, e))?;

        if ev.edge.abs() <= self.config.min_edge {
            debug!(market = %market.slug, edge = format!("{:+.1}%", ev.edge * 100.0), "No edge");
            return Ok(None);
        }

        info!(market = %market.slug, %ev, "Opportunity");
        Ok(Some(Opportunity {
            market: market.clone(),
            estimate,
            source,
            signal,
            ev,
        }))
    }

    /// Listing average, else the detail endpoint, else neutral.
    async fn market_odds(&self, market: &Market) -> Result<f64, PredictorError> {
        if let Some(p) = market.avg_probability {
            return Ok(p);
        }
        let detail = self
            .executor
            .context()
            .gateway()
            .market_detail(&market.slug)
            .await?;
        Ok(detail.market.avg_probability.unwrap_or(NEUTRAL_ODDS))
    }

    /// Submit sequentially so the daily budget is spent in edge order.
    async fn submit_opportunities(&self, report: &mut TickReport) {
        let max_len = self.executor.context().safety().max_rationale_length;
        for opportunity in &report.opportunities {
            let mut request = PredictionRequest::new(
                opportunity.market.slug.clone(),
                opportunity.estimate,
                synthesize_rationale(opportunity, max_len),
            );
            if let Some(signal) = opportunity.signal {
                request = request
                    .with_confidence(signal.confidence)
                    .with_sentiment(signal);
            }

            match self.executor.execute_prediction(request).await {
                Ok(receipt) => report.submissions.push(receipt),
                Err(e) => {
                    let fatal = e.is_fatal();
                    report.failures.push(MarketFailure::new(
                        &opportunity.market.slug,
                        FailureStage::Submit,
                        e,
                    ));
                    if fatal {
                        break;
                    }
                }
            }
        }
    }

    // -- Status ----------------------------------------------------------

    fn record(&self, report: &TickReport) {
        let mut recent = Self::lock(&self.recent);
        recent.push_back(report.summary());
        while recent.len() > RECENT_TICKS {
            recent.pop_front();
        }
        *Self::lock(&self.last_opportunities) = report.opportunities.clone();
    }

    /// Newest first.
    pub fn recent_ticks(&self, limit: usize) -> Vec<TickSummary> {
        Self::lock(&self.recent).iter().rev().take(limit).cloned().collect()
    }

    pub fn last_opportunities(&self) -> Vec<Opportunity> {
        Self::lock(&self.last_opportunities).clone()
    }

    pub fn status(&self) -> HeartbeatStatus {
        HeartbeatStatus {
            state: self.state(),
            ticks: self.tick_count.load(Ordering::Relaxed),
            interval_secs: self.interval.as_secs(),
            auto_predict: self.config.auto_predict,
            min_edge: self.config.min_edge,
            categories: self.config.categories.clone(),
            last_tick: Self::lock(&self.recent).back().cloned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
