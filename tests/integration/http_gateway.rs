//! `HttpGateway` against a local axum stub of the forecasting service.

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;

use market_predictor::gateway::{HttpGateway, MarketGateway, PredictionSubmission, AUTH_HEADER};
use market_predictor::types::{PredictorError, Violation};

const TOKEN: &str = "good-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TOKEN)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" }))).into_response()
}

fn market_json(slug: &str, avg: f64) -> Value {
    json!({
        "slug": slug,
        "title": format!("Will {slug} happen?"),
        "category": "economy",
        "endDate": "2099-01-01T00:00:00Z",
        "agentCount": 5,
        "avgProbability": avg,
    })
}

async fn markets_top(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "markets": [market_json("rate-cut", 0.42), market_json("eth-etf", 0.7)] }))
        .into_response()
}

async fn market_detail(headers: HeaderMap, Path(slug): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match slug.as_str() {
        "missing" => (StatusCode::NOT_FOUND, Json(json!({ "error": "no such market" }))).into_response(),
        "busy" => (StatusCode::SERVICE_UNAVAILABLE, "upstream down").into_response(),
        _ => {
            let mut body = market_json(&slug, 0.42);
            body["recentPredictions"] = json!([
                { "id": "p1", "agentId": "a1", "slug": slug, "pYes": 0.4, "rationale": "r" }
            ]);
            Json(body).into_response()
        }
    }
}

async fn submit(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match body["slug"].as_str() {
        Some("closed") => {
            (StatusCode::CONFLICT, Json(json!({ "error": "market closed" }))).into_response()
        }
        Some("bad") => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "pYes out of range" }))).into_response()
        }
        // Echo only the id; the client fills in the rest.
        _ => Json(json!({ "id": "forecast-1", "pYes": body["pYes"] })).into_response(),
    }
}

async fn history(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "predictions": [
        { "id": "p1", "agentId": "agent-1", "slug": "rate-cut", "pYes": 0.64, "rationale": "r1", "updatedAt": "2026-10-01T12:00:00Z" },
        { "id": "p2", "agentId": "agent-1", "marketSlug": "eth-etf", "pYes": 0.3, "createdAt": "2026-10-02T12:00:00Z" }
    ] }))
    .into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    match body["name"].as_str() {
        Some("taken") => {
            (StatusCode::CONFLICT, Json(json!({ "error": "name taken" }))).into_response()
        }
        Some(name) => Json(json!({
            "agentId": "agent-1",
            "agentToken": "fresh-token",
            "name": name,
        }))
        .into_response(),
        None => (StatusCode::BAD_REQUEST, Json(json!({ "error": "name required" }))).into_response(),
    }
}

async fn leaderboard() -> Json<Value> {
    Json(json!([
        { "agentId": "a1", "name": "alpha", "brierScore": 0.12, "totalPredictions": 9, "resolvedPredictions": 4, "accuracy": 0.75, "rank": 1 }
    ]))
}

async fn profile(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "id": "agent-1", "name": "alpha", "evmAddress": body["evmAddress"] }))
        .into_response()
}

async fn stub_server() -> String {
    let app = Router::new()
        .route("/api/markets/top", get(markets_top))
        .route("/api/markets/:slug", get(market_detail))
        .route("/api/predictions", get(history).post(submit))
        .route("/api/agents/register", post(register))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/agents/profile", patch(profile));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

fn client(base: &str, token: Option<&str>) -> HttpGateway {
    HttpGateway::new(
        base,
        token.map(|t| SecretString::new(t.to_string())),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetch_markets_unwraps_envelope() {
    let base = stub_server().await;
    let markets = client(&base, Some(TOKEN)).fetch_markets().await.unwrap();
    assert_eq!(markets.len(), 2);
    assert_eq!(markets[0].slug, "rate-cut");
    assert_eq!(markets[0].avg_probability, Some(0.42));
    assert_eq!(markets[1].outcomes, vec!["Yes", "No"]);
}

#[tokio::test]
async fn test_bad_token_is_authentication_error() {
    let base = stub_server().await;
    let err = client(&base, Some("stale")).fetch_markets().await.unwrap_err();
    assert!(matches!(err, PredictorError::Authentication(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_market_detail_statuses() {
    let base = stub_server().await;
    let gw = client(&base, Some(TOKEN));

    let detail = gw.market_detail("rate-cut").await.unwrap();
    assert_eq!(detail.market.slug, "rate-cut");
    assert_eq!(detail.recent_predictions.len(), 1);
    assert_eq!(detail.recent_predictions[0].p_yes, 0.4);

    assert!(matches!(
        gw.market_detail("missing").await,
        Err(PredictorError::MarketNotFound(s)) if s == "missing"
    ));
    assert!(gw.market_detail("busy").await.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_submit_prediction_outcomes() {
    let base = stub_server().await;
    let gw = client(&base, Some(TOKEN));

    let forecast = gw
        .submit_prediction(&PredictionSubmission {
            slug: "rate-cut".into(),
            p_yes: 0.64,
            rationale: "because".into(),
        })
        .await
        .unwrap();
    assert_eq!(forecast.id, "forecast-1");
    assert_eq!(forecast.slug, "rate-cut");
    assert_eq!(forecast.p_yes, 0.64);
    assert_eq!(forecast.rationale, "because");

    let closed = gw
        .submit_prediction(&PredictionSubmission {
            slug: "closed".into(),
            p_yes: 0.5,
            rationale: "x".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(closed, PredictorError::MarketClosed(s) if s == "closed"));

    let bad = gw
        .submit_prediction(&PredictionSubmission {
            slug: "bad".into(),
            p_yes: 0.5,
            rationale: "x".into(),
        })
        .await
        .unwrap_err();
    assert!(bad
        .violations()
        .iter()
        .any(|v| matches!(v, Violation::Server { message } if message == "pYes out of range")));
}

#[tokio::test]
async fn test_submit_without_token_fails_before_network() {
    // Nothing listens here; the call must fail on the missing token alone.
    let gw = client("http://127.0.0.1:9/api", None);
    let err = gw
        .submit_prediction(&PredictionSubmission {
            slug: "rate-cut".into(),
            p_yes: 0.5,
            rationale: "x".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PredictorError::Authentication(_)));
}

#[tokio::test]
async fn test_register_agent() {
    let base = stub_server().await;
    let gw = client(&base, None);

    let agent = gw.register_agent("delphi-7").await.unwrap();
    assert_eq!(agent.agent_id, "agent-1");
    assert_eq!(agent.name, "delphi-7");
    assert_eq!(agent.token.expose_secret(), "fresh-token");

    assert!(matches!(
        gw.register_agent("taken").await,
        Err(PredictorError::NameTaken(n)) if n == "taken"
    ));
}

#[tokio::test]
async fn test_leaderboard_bare_array() {
    let base = stub_server().await;
    let rows = client(&base, None).leaderboard().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].agent_id, "a1");
    assert_eq!(rows[0].rank, Some(1));
    assert_eq!(rows[0].resolved_predictions, 4);
}

#[tokio::test]
async fn test_update_profile_set_and_clear() {
    let base = stub_server().await;
    let gw = client(&base, Some(TOKEN));

    let address = "0x52908400098527886E0F7030069857D2E4169EE7";
    let profile = gw.update_profile(Some(address.into())).await.unwrap();
    assert_eq!(profile.evm_address.as_deref(), Some(address));

    let cleared = gw.update_profile(None).await.unwrap();
    assert!(cleared.evm_address.is_none());

    let err = gw.update_profile(Some("0xnope".into())).await.unwrap_err();
    assert!(!err.violations().is_empty());
}

#[tokio::test]
async fn test_list_predictions_unwraps_envelope() {
    let base = stub_server().await;
    let history = client(&base, Some(TOKEN)).list_predictions().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, "p1");
    assert_eq!(history[0].p_yes, 0.64);
    assert_eq!(history[1].slug, "eth-etf");
    assert!(history[1].rationale.is_empty());
    assert!(history[0].updated_at < history[1].updated_at);

    let err = client(&base, Some("stale")).list_predictions().await.unwrap_err();
    assert!(matches!(err, PredictorError::Authentication(_)));
}
