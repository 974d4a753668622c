//! REST API Integration Tests
//!
//! Drives the full router with in-process requests against a real engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{ADMIN_TOKEN, harness, session_time};
use index_engine::BroadcastSettings;
use index_engine::infrastructure::http::router;

async fn call(harness: &common::Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(harness.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn admin_post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn index_is_unavailable_before_first_calculation() {
    let h = harness(BroadcastSettings::default()).await;

    let (status, body) = call(&h, get("/api/index")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "not_ready");

    let (status, _) = call(&h, get("/api/constituents")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn index_and_constituents_after_tick() {
    let h = harness(BroadcastSettings::default()).await;
    h.engine.tick(session_time()).await.unwrap();

    let (status, body) = call(&h, get("/api/index")).await;
    assert_eq!(status, StatusCode::OK);
    assert!((body["index"]["value"].as_f64().unwrap() - 1000.0).abs() < 1e-9);
    assert!((body["index"]["divisor"].as_f64().unwrap() - 14_500_000.0).abs() < 1e-6);
    assert!(body["updated_at"].is_string());

    let (status, body) = call(&h, get("/api/constituents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let weight_sum: f64 = body["constituents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["weight_percent"].as_f64().unwrap())
        .sum();
    assert!((weight_sum - 100.0).abs() <= 0.01);
}

#[tokio::test]
async fn full_history_reports_base() {
    let h = harness(BroadcastSettings::default()).await;
    let date = common::base_date().succ_opt().unwrap();
    h.engine
        .finalize_end_of_day(date, session_time())
        .await
        .unwrap();

    let (status, body) = call(&h, get("/api/history/full")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["base_date"], "2024-01-02");
    assert_eq!(body["base_value"], 1000.0);
    assert_eq!(body["history"][0]["date"], "2024-01-03");
    assert_eq!(body["history"][0]["source"], "end_of_day");
}

#[tokio::test]
async fn history_range_is_inclusive_and_validated() {
    let h = harness(BroadcastSettings::default()).await;
    h.engine
        .finalize_end_of_day(common::base_date().succ_opt().unwrap(), session_time())
        .await
        .unwrap();

    let (status, body) = call(&h, get("/api/history/range?from=2024-01-03&to=2024-01-03")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = call(&h, get("/api/history/range?from=2024-01-05&to=2024-01-02")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_range");

    let (status, body) = call(&h, get("/api/history/range?from=yesterday&to=2024-01-02")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn history_days_are_bounded() {
    let h = harness(BroadcastSettings::default()).await;

    let (status, body) = call(&h, get("/api/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["count"].is_u64());

    for days in ["0", "3651"] {
        let (status, body) = call(&h, get(&format!("/api/history?days={days}"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "days={days}");
        assert_eq!(body["error"], "bad_request");
    }
}

#[tokio::test]
async fn meta_describes_the_index() {
    let h = harness(BroadcastSettings::default()).await;

    let (status, body) = call(&h, get("/api/meta")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["methodology"],
        "Free-float Market Cap Weighted (Divisor Method)"
    );
    assert_eq!(body["base_date"], "2024-01-02");
    assert_eq!(body["constituent_count"], 3);
    assert!((body["divisor"].as_f64().unwrap() - 14_500_000.0).abs() < 1e-6);
    assert!(body["next_calculation"].is_string());
}

#[tokio::test]
async fn admin_requires_bearer_token() {
    let h = harness(BroadcastSettings::default()).await;
    let change = r#"{"action":"remove","ticker":"C"}"#;

    let (status, body) = call(&h, admin_post("/api/admin/constituents", None, change)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = call(
        &h,
        admin_post("/api/admin/constituents", Some("wrong"), change),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.engine.status().constituent_count, 3);
}

#[tokio::test]
async fn removing_constituent_recalibrates_and_keeps_value() {
    let h = harness(BroadcastSettings::default()).await;
    h.engine.tick(session_time()).await.unwrap();

    let (status, body) = call(
        &h,
        admin_post(
            "/api/admin/constituents",
            Some(ADMIN_TOKEN),
            r#"{"action":"remove","ticker":"C"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "remove");
    assert!((body["new_divisor"].as_f64().unwrap() - 10_900_000.0).abs() < 1e-6);
    assert_eq!(body["constituent_count"], 2);
    assert!((body["index"]["value"].as_f64().unwrap() - 1000.0).abs() < 1e-9);

    let (_, body) = call(&h, get("/api/constituents")).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn halted_engine_stops_serving_its_last_snapshot() {
    let h = harness(BroadcastSettings::default()).await;
    h.engine.tick(session_time()).await.unwrap();

    // Overflows the free-float total, so the recalibration fails.
    h.quotes.set("A", f64::MAX);
    let (status, body) = call(
        &h,
        admin_post(
            "/api/admin/constituents",
            Some(ADMIN_TOKEN),
            r#"{"action":"set_free_float","ticker":"B","free_float_factor":0.7}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "divisor_error");
    assert!(h.engine.is_halted());
    assert!(h.engine.current_snapshot().is_some());

    for uri in ["/api/index", "/api/constituents"] {
        let (status, body) = call(&h, get(uri)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        assert_eq!(body["error"], "halted", "{uri}");
    }

    let (status, _) = call(&h, get("/api/history/full")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_rejects_bad_changes() {
    let h = harness(BroadcastSettings::default()).await;

    let (status, body) = call(
        &h,
        admin_post("/api/admin/constituents", Some(ADMIN_TOKEN), r#"{"action":"split"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = call(
        &h,
        admin_post(
            "/api/admin/constituents",
            Some(ADMIN_TOKEN),
            r#"{"action":"remove","ticker":"ZZZ"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_ticker");

    h.quotes.remove("E");
    let add = json!({
        "action": "add",
        "constituent": {
            "ticker": "E",
            "name": "Epsilon",
            "sector": "Retail",
            "shares_outstanding": 1_000_000,
            "free_float_factor": 0.4
        }
    });
    let (status, body) = call(
        &h,
        admin_post("/api/admin/constituents", Some(ADMIN_TOKEN), &add.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "missing_price");
    assert_eq!(h.engine.status().constituent_count, 3);
}

#[tokio::test]
async fn adding_priced_constituent_recalibrates() {
    let h = harness(BroadcastSettings::default()).await;
    h.quotes.set("D", 500.0);
    let add = json!({
        "action": "add",
        "constituent": {
            "ticker": "D",
            "name": "Delta",
            "sector": "Retail",
            "shares_outstanding": 4_000_000,
            "free_float_factor": 0.5
        }
    });

    let (status, body) = call(
        &h,
        admin_post("/api/admin/constituents", Some(ADMIN_TOKEN), &add.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // 14.5e9 + 500 * 4e6 * 0.5 = 15.5e9
    assert!((body["total_ff_after"].as_f64().unwrap() - 15.5e9).abs() < 1.0);
    assert!((body["new_divisor"].as_f64().unwrap() - 15_500_000.0).abs() < 1e-6);
    assert_eq!(body["constituent_count"], 4);
}

#[tokio::test]
async fn backfill_fills_missing_weekdays_once() {
    let h = harness(BroadcastSettings::default()).await;

    let (status, body) = call(&h, admin_post("/api/admin/backfill", Some(ADMIN_TOKEN), "")).await;
    assert_eq!(status, StatusCode::OK);
    let inserted = body["inserted"].as_u64().unwrap();
    assert!(inserted > 0);
    assert_eq!(body["first"], "2024-01-02");
    assert_eq!(body["history_count"].as_u64().unwrap(), inserted);

    let (status, body) = call(&h, admin_post("/api/admin/backfill", Some(ADMIN_TOKEN), "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 0);
}

#[tokio::test]
async fn health_endpoints_report_readiness() {
    let h = harness(BroadcastSettings::default()).await;

    let response = router(h.state.clone()).oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(h.state.clone()).oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = call(&h, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["index_ready"], false);

    h.engine.tick(session_time()).await.unwrap();
    let (_, body) = call(&h, get("/api/health")).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index_ready"], true);
    assert_eq!(body["subscribers"], 0);
}
