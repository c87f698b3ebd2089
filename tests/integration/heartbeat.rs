//! Heartbeat and executor against the in-memory gateway.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use market_predictor::engine::heartbeat::{FailureStage, Heartbeat, HeartbeatConfig, HeartbeatState};
use market_predictor::engine::{AgentContext, Executor, OrderStatus, RetryPolicy};
use market_predictor::gateway::MarketGateway;
use market_predictor::sentiment::{FixedEstimator, SentimentEstimator};
use market_predictor::strategy::SafetyConfig;
use market_predictor::types::{Market, PredictorError, SentimentSignal, Violation};

use crate::mock_gateway::{market, InMemoryGateway};

fn signal(probability: f64) -> SentimentSignal {
    SentimentSignal {
        probability,
        confidence: 0.9,
        source_count: 3,
    }
}

fn live_safety() -> SafetyConfig {
    SafetyConfig {
        dry_run_mode: false,
        ..Default::default()
    }
}

fn build(
    gateway: Arc<InMemoryGateway>,
    estimator: Arc<dyn SentimentEstimator>,
    safety: SafetyConfig,
    config: HeartbeatConfig,
) -> Arc<Heartbeat> {
    let gateway: Arc<dyn MarketGateway> = gateway;
    let ctx = AgentContext::new(gateway, safety, RetryPolicy::immediate(3)).unwrap();
    let executor = Arc::new(Executor::new(ctx).unwrap());
    Arc::new(Heartbeat::new(executor, estimator, config).unwrap())
}

/// Estimator that takes a while, for overlap tests.
struct SlowEstimator(Duration);

#[async_trait]
impl SentimentEstimator for SlowEstimator {
    async fn estimate(&self, _market: &Market) -> Result<SentimentSignal, PredictorError> {
        tokio::time::sleep(self.0).await;
        Ok(signal(0.8))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn test_failing_market_does_not_abort_tick() {
    let gateway = Arc::new(
        InMemoryGateway::new(vec![
            market("rate-cut", "economy", Some(0.3)),
            market("eth-etf", "crypto-tech", Some(0.6)),
            market("no-odds", "politics", None),
        ])
        .failing_detail("no-odds"),
    );
    let hb = build(
        gateway,
        Arc::new(FixedEstimator::new(signal(0.8))),
        live_safety(),
        HeartbeatConfig::default(),
    );

    let report = hb.tick().await.unwrap();
    assert_eq!(report.markets_scanned, 3);
    assert_eq!(report.opportunities.len(), 2);
    assert_eq!(report.opportunities[0].market.slug, "rate-cut");
    assert_eq!(report.opportunities[1].market.slug, "eth-etf");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].slug, "no-odds");
    assert_eq!(report.failures[0].stage, FailureStage::MarketOdds);
    assert!(report.fatal_error().is_none());
}

#[tokio::test]
async fn test_category_filter_is_case_insensitive() {
    let gateway = Arc::new(InMemoryGateway::new(vec![
        market("rate-cut", "Economy", Some(0.3)),
        market("eth-etf", "crypto-tech", Some(0.3)),
    ]));
    let config = HeartbeatConfig {
        categories: vec!["economy".into()],
        ..Default::default()
    };
    let hb = build(
        gateway,
        Arc::new(FixedEstimator::new(signal(0.8))),
        live_safety(),
        config,
    );

    let report = hb.tick().await.unwrap();
    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.opportunities[0].market.slug, "rate-cut");
}

#[tokio::test]
async fn test_auto_predict_submits_in_edge_order_within_budget() {
    let gateway = Arc::new(InMemoryGateway::new(vec![
        market("small-edge", "economy", Some(0.6)),
        market("big-edge", "economy", Some(0.2)),
    ]));
    let safety = SafetyConfig {
        max_daily_predictions: 1,
        ..live_safety()
    };
    let config = HeartbeatConfig {
        auto_predict: true,
        ..Default::default()
    };
    let hb = build(
        Arc::clone(&gateway),
        Arc::new(FixedEstimator::new(signal(0.8))),
        safety,
        config,
    );

    let report = hb.tick().await.unwrap();
    assert_eq!(report.submissions.len(), 1);
    assert_eq!(report.submissions[0].request.slug, "big-edge");
    assert!(!report.submissions[0].dry_run);

    let budget_failure = report
        .failures
        .iter()
        .find(|f| f.slug == "small-edge")
        .unwrap();
    assert_eq!(budget_failure.stage, FailureStage::Submit);
    assert!(budget_failure
        .error
        .violations()
        .iter()
        .any(|v| matches!(v, Violation::DailyBudgetExhausted { limit: 1 })));

    let stored = gateway.forecasts();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].slug, "big-edge");
    assert!(stored[0].rationale.len() >= 50);
}

#[tokio::test]
async fn test_transient_submit_failures_are_retried() {
    let gateway = Arc::new(
        InMemoryGateway::new(vec![market("rate-cut", "economy", Some(0.3))]).failing_submissions(2),
    );
    let config = HeartbeatConfig {
        auto_predict: true,
        ..Default::default()
    };
    let hb = build(
        Arc::clone(&gateway),
        Arc::new(FixedEstimator::new(signal(0.8))),
        live_safety(),
        config,
    );

    let report = hb.tick().await.unwrap();
    assert_eq!(report.submissions.len(), 1);
    assert_eq!(report.submissions[0].attempts, 3);
    assert_eq!(gateway.submit_calls(), 3);

    let history = hb.executor().order_history(10);
    assert_eq!(history[0].status, OrderStatus::Submitted);
}

#[tokio::test]
async fn test_dry_run_never_contacts_submit_endpoint() {
    let gateway = Arc::new(InMemoryGateway::new(vec![market(
        "rate-cut",
        "economy",
        Some(0.3),
    )]));
    let config = HeartbeatConfig {
        auto_predict: true,
        ..Default::default()
    };
    let hb = build(
        Arc::clone(&gateway),
        Arc::new(FixedEstimator::new(signal(0.8))),
        SafetyConfig {
            dry_run_mode: true,
            ..Default::default()
        },
        config,
    );

    let report = hb.tick().await.unwrap();
    assert_eq!(report.submissions.len(), 1);
    assert!(report.submissions[0].dry_run);
    assert_eq!(gateway.submit_calls(), 0);
    assert_eq!(hb.executor().daily_stats().dry_run, 1);
}

#[tokio::test]
async fn test_overrides_bypass_estimator() {
    let gateway = Arc::new(InMemoryGateway::new(vec![
        market("rate-cut", "economy", Some(0.5)),
        market("eth-etf", "crypto-tech", Some(0.5)),
    ]));
    // The estimator fails everywhere; only the overridden market evaluates.
    let estimator = FixedEstimator::empty()
        .with_failure("rate-cut")
        .with_failure("eth-etf");
    let hb = build(
        gateway,
        Arc::new(estimator),
        live_safety(),
        HeartbeatConfig::default(),
    );

    let overrides = HashMap::from([("rate-cut".to_string(), 0.1)]);
    let report = hb.tick_with_overrides(&overrides).await.unwrap();
    assert_eq!(report.opportunities.len(), 1);
    assert_eq!(report.opportunities[0].market.slug, "rate-cut");
    assert!(report.opportunities[0].signal.is_none());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, FailureStage::Estimate);
}

#[tokio::test]
async fn test_ticks_never_overlap() {
    let gateway = Arc::new(InMemoryGateway::new(vec![market(
        "rate-cut",
        "economy",
        Some(0.3),
    )]));
    let hb = build(
        gateway,
        Arc::new(SlowEstimator(Duration::from_millis(300))),
        live_safety(),
        HeartbeatConfig::default(),
    );

    let (first, second) = tokio::join!(hb.tick(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        hb.tick().await
    });
    assert!(first.is_ok());
    assert!(matches!(second, Err(PredictorError::AlreadyRunning)));

    // Once the first finishes, ticking works again.
    assert!(hb.tick().await.is_ok());
    assert_eq!(hb.recent_ticks(10).len(), 2);
}

#[tokio::test]
async fn test_scheduler_delivers_reports_and_stops() {
    let gateway = Arc::new(InMemoryGateway::new(vec![market(
        "rate-cut",
        "economy",
        Some(0.3),
    )]));
    let hb = build(
        gateway,
        Arc::new(FixedEstimator::new(signal(0.8))),
        live_safety(),
        HeartbeatConfig::default(),
    );
    let hb = Arc::new(
        Arc::try_unwrap(hb)
            .ok()
            .unwrap()
            .with_interval(Duration::from_millis(50)),
    );

    let (tx, mut rx) = mpsc::channel(8);
    let handle = hb.start(tx.clone()).unwrap();
    assert!(matches!(hb.start(tx), Err(PredictorError::AlreadyRunning)));

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.tick, 1);
    assert_eq!(first.opportunities.len(), 1);

    hb.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
    assert_eq!(hb.state(), HeartbeatState::Stopped);
    assert!(hb.is_stopped());
}

#[tokio::test]
async fn test_scheduler_halts_on_revoked_token() {
    let gateway = Arc::new(
        InMemoryGateway::new(vec![
            market("rate-cut", "economy", Some(0.3)),
            market("eth-etf", "crypto-tech", Some(0.2)),
        ])
        .revoked(),
    );
    let config = HeartbeatConfig {
        auto_predict: true,
        ..Default::default()
    };
    let hb = build(
        Arc::clone(&gateway),
        Arc::new(FixedEstimator::new(signal(0.8))),
        live_safety(),
        config,
    );
    let hb = Arc::new(
        Arc::try_unwrap(hb)
            .ok()
            .unwrap()
            .with_interval(Duration::from_millis(20)),
    );

    let (tx, mut rx) = mpsc::channel(8);
    let handle = hb.start(tx).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(PredictorError::Authentication(_))));

    let report = rx.recv().await.unwrap();
    assert!(matches!(
        report.fatal_error(),
        Some(PredictorError::Authentication(_))
    ));
    // The second opportunity is not attempted after the auth failure.
    assert_eq!(gateway.submit_calls(), 1);
}
