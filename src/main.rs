//! Market predictor: autonomous forecasting agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the order journal from disk, and either runs the heartbeat
//! until Ctrl+C or executes a single command.
//!
//! ```text
//! market-predictor [--config <path>] [command]
//!
//!   run                         heartbeat loop (default)
//!   tick                        one scan, printed as JSON
//!   predict <slug> <p> <conf> <rationale...>
//!   register <name>             create an agent, print its token
//!   history                     this agent's submitted forecasts
//!   leaderboard                 remote leaderboard
//!   profile <address|none>      set or clear the payout address
//!   score <dataset.json>        rank agents from a local dump
//! ```

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use market_predictor::config::AppConfig;
use market_predictor::dashboard::{self, DashboardState};
use market_predictor::engine::heartbeat::{Heartbeat, TickReport};
use market_predictor::engine::{AgentContext, Executor};
use market_predictor::gateway::{HttpGateway, MarketGateway};
use market_predictor::scoring::ScoringDataset;
use market_predictor::sentiment::PriorEstimator;
use market_predictor::storage;
use market_predictor::strategy::PredictionRequest;
use market_predictor::types::{AgentScoreRecord, Forecast};

const USAGE: &str = "usage: market-predictor [--config <path>] \
[run | tick | predict <slug> <p> <confidence> <rationale...> | register <name> | \
history | leaderboard | profile <address|none> | score <dataset.json>]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_flag(&mut args, "--config").unwrap_or_else(|| "config.toml".into());

    init_logging();
    let cfg = AppConfig::load(&config_path)?;

    let command = if args.is_empty() {
        "run".to_string()
    } else {
        args.remove(0)
    };

    match command.as_str() {
        "run" => run(&cfg).await,
        "tick" => single_tick(&cfg).await,
        "predict" => predict(&cfg, &args).await,
        "register" => {
            let name = args.first().context(USAGE)?;
            register(&cfg, name).await
        }
        "history" => {
            let forecasts = build_gateway(&cfg)?.list_predictions().await?;
            print_history(&forecasts);
            Ok(())
        }
        "leaderboard" => {
            let gateway = build_gateway(&cfg)?;
            let rows = gateway.leaderboard().await?;
            print_leaderboard(&rows);
            Ok(())
        }
        "profile" => {
            let arg = args.first().context(USAGE)?;
            let address = (arg != "none").then(|| arg.clone());
            let profile = build_gateway(&cfg)?.update_profile(address).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        "score" => {
            let path = args.first().context(USAGE)?;
            score(path)
        }
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

/// Remove `flag <value>` from the argument list.
fn take_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    if pos + 1 >= args.len() {
        args.remove(pos);
        return None;
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Some(value)
}

fn build_gateway(cfg: &AppConfig) -> Result<HttpGateway> {
    Ok(HttpGateway::new(
        &cfg.agent.api_base,
        cfg.agent_token(),
        Duration::from_secs(cfg.agent.request_timeout_secs),
    )?)
}

/// Executor wired to the HTTP gateway, with the persisted journal restored
/// so the rolling daily budget carries over.
fn build_executor(cfg: &AppConfig) -> Result<Arc<Executor>> {
    let gateway: Arc<dyn MarketGateway> = Arc::new(build_gateway(cfg)?);
    let ctx = AgentContext::new(gateway, cfg.safety.clone(), cfg.retry.clone())?;
    let executor = Executor::new(ctx)?;

    if let Some(records) = storage::load_journal(Some(&cfg.agent.journal_path))? {
        executor.restore_journal(records);
        let stats = executor.daily_stats();
        info!(
            submitted_24h = stats.submitted,
            remaining_budget = stats.remaining_budget,
            "Resumed from saved journal"
        );
    }
    Ok(Arc::new(executor))
}

fn build_heartbeat(cfg: &AppConfig) -> Result<Arc<Heartbeat>> {
    let executor = build_executor(cfg)?;
    let heartbeat = Heartbeat::new(
        executor,
        Arc::new(PriorEstimator::default()),
        cfg.heartbeat.clone(),
    )?;
    Ok(Arc::new(heartbeat))
}

fn save_journal(cfg: &AppConfig, executor: &Executor) {
    if let Err(e) = storage::save_journal(&executor.journal_snapshot(), Some(&cfg.agent.journal_path))
    {
        error!(error = %e, "Failed to save journal");
    }
}

/// Heartbeat loop with optional status API, until Ctrl+C or a fatal error.
async fn run(cfg: &AppConfig) -> Result<()> {
    info!(
        agent_name = %cfg.agent.name,
        api_base = %cfg.agent.api_base,
        interval_minutes = cfg.heartbeat.interval_minutes,
        dry_run = cfg.safety.dry_run_mode,
        auto_predict = cfg.heartbeat.auto_predict,
        "Market predictor starting up"
    );
    if cfg.safety.dry_run_mode {
        warn!("Dry run mode: predictions are validated but never submitted");
    }

    let heartbeat = build_heartbeat(cfg)?;

    let _dashboard = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(&cfg.agent.name, Arc::clone(&heartbeat)));
        Some(dashboard::spawn_dashboard(state, cfg.dashboard.port).await?)
    } else {
        None
    };

    let (tx, mut rx) = mpsc::channel::<TickReport>(16);
    let mut handle = heartbeat.start(tx)?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering heartbeat loop. Press Ctrl+C to stop.");

    let outcome = loop {
        tokio::select! {
            Some(report) = rx.recv() => {
                log_tick_report(&report);
                save_journal(cfg, heartbeat.executor());
            }
            joined = &mut handle => break joined,
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                heartbeat.stop();
                break (&mut handle).await;
            }
        }
    };

    while let Ok(report) = rx.try_recv() {
        log_tick_report(&report);
    }
    save_journal(cfg, heartbeat.executor());

    let stats = heartbeat.executor().daily_stats();
    info!(
        ticks = heartbeat.status().ticks,
        submitted_24h = stats.submitted,
        rejected = stats.rejected,
        failed = stats.failed,
        "Market predictor shut down."
    );

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err::<(), _>(e).context("heartbeat stopped on a fatal error"),
        Err(e) => Err::<(), _>(e).context("heartbeat task panicked"),
    }
}

async fn single_tick(cfg: &AppConfig) -> Result<()> {
    let heartbeat = build_heartbeat(cfg)?;
    let report = heartbeat.tick().await?;
    log_tick_report(&report);
    save_journal(cfg, heartbeat.executor());
    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.fatal_error() {
        Some(e) => Err(e.clone().into()),
        None => Ok(()),
    }
}

async fn predict(cfg: &AppConfig, args: &[String]) -> Result<()> {
    let [slug, p_yes, confidence, rationale @ ..] = args else {
        bail!(USAGE);
    };
    if rationale.is_empty() {
        bail!(USAGE);
    }
    let p_yes: f64 = p_yes.parse().context("p must be a number")?;
    let confidence: f64 = confidence.parse().context("confidence must be a number")?;

    let executor = build_executor(cfg)?;
    let request =
        PredictionRequest::new(slug.as_str(), p_yes, rationale.join(" ")).with_confidence(confidence);
    let result = executor.execute_prediction(request).await;
    save_journal(cfg, &executor);

    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn register(cfg: &AppConfig, name: &str) -> Result<()> {
    use secrecy::ExposeSecret;

    let gateway = HttpGateway::new(
        &cfg.agent.api_base,
        None,
        Duration::from_secs(cfg.agent.request_timeout_secs),
    )?;
    let agent = gateway.register_agent(name).await?;
    info!(agent_id = %agent.agent_id, name = %agent.name, "Agent registered");

    println!("agent id: {}", agent.agent_id);
    println!("Store the token now; it is not shown again:");
    println!("export {}={}", cfg.agent.token_env, agent.token.expose_secret());
    Ok(())
}

fn score(path: &str) -> Result<()> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    let dataset: ScoringDataset =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {path}"))?;
    let rows = dataset.leaderboard()?;
    print_leaderboard(&rows);
    Ok(())
}

fn print_history(forecasts: &[Forecast]) {
    if forecasts.is_empty() {
        println!("No forecasts submitted yet.");
        return;
    }
    println!("{:<32} {:>7}  {}", "market", "p(yes)", "updated");
    for f in forecasts {
        println!(
            "{:<32} {:>6.1}%  {}",
            f.slug,
            f.p_yes * 100.0,
            f.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_leaderboard(rows: &[AgentScoreRecord]) {
    if rows.is_empty() {
        println!("No ranked agents yet.");
        return;
    }
    println!("{:>4}  {:<24} {:>8} {:>9} {:>8}", "rank", "agent", "brier", "resolved", "acc");
    for (i, row) in rows.iter().enumerate() {
        let name = if row.name.is_empty() { &row.agent_id } else { &row.name };
        println!(
            "{:>4}  {:<24} {:>8.4} {:>9} {:>7.1}%",
            row.rank.unwrap_or(i + 1),
            name,
            row.brier_score,
            row.resolved_predictions,
            row.accuracy * 100.0
        );
    }
}

/// Log a human-readable tick summary.
fn log_tick_report(report: &TickReport) {
    let summary = report.summary();
    info!(
        tick = summary.tick,
        scanned = summary.markets_scanned,
        opportunities = summary.opportunities,
        submitted = summary.submitted,
        failures = summary.failures,
        duration_ms = summary.duration_ms,
        "Tick complete"
    );
    for opp in report.opportunities.iter().take(5) {
        info!(
            slug = %opp.market.slug,
            estimate = format!("{:.1}%", opp.estimate * 100.0),
            edge = format!("{:+.1}%", opp.ev.edge * 100.0),
            recommendation = %opp.ev.recommendation,
            "Opportunity"
        );
    }
    if let Some(e) = &summary.error {
        warn!(error = %e, "Market listing failed this tick");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_predictor=info"));

    let json_logging = std::env::var("PREDICTOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
