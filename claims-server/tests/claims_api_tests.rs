//! Claims API Tests
//!
//! Drives the router in-process against the in-memory repository:
//! 1. Caller identity and error bodies
//! 2. A claim from draft to paid over HTTP
//! 3. Denial and appeal endpoints
//! 4. Reports

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use claims_engine::InMemoryClaimRepository;
use claims_server::{create_app, ClaimsServer, ServerConfig};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

const ACTOR: &str = "biller-7";

fn create_test_app() -> Router {
    let server = ClaimsServer::with_repository(
        ServerConfig::default(),
        Arc::new(InMemoryClaimRepository::new()),
    )
    .unwrap();
    create_app(server)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor-id", ACTOR);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn amount(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not an amount: {other}"),
    }
}

fn new_claim_body() -> Value {
    json!({
        "patient_ref": "patient-42",
        "visit_ref": "visit-9",
        "rendering_provider_ref": "1881234567",
        "payer": {
            "payer_id": "AETNA",
            "member_id": "MBR-2231"
        },
        "diagnoses": ["E11.9", "I10"],
        "place_of_service_code": "11",
        "service_date_start": "2024-05-02",
        "service_date_end": "2024-05-02"
    })
}

/// Create a claim with a single 150.00 line and move it into adjudication.
/// Returns the claim id and line id.
async fn pending_claim(app: &Router) -> (String, String) {
    let (status, body) = send(app, "POST", "/api/v1/claims", Some(new_claim_body())).await;
    assert_eq!(status, StatusCode::OK);
    let claim_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/line-items"),
        Some(json!({
            "procedure_code": "99213",
            "diagnosis_pointers": [1],
            "units": "1",
            "unit_charge": "150.00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let line_id = body["data"]["line_item"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(app, "POST", &format!("/api/v1/claims/{claim_id}/ready"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/submit"),
        Some(json!({ "method": "electronic" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "submitted");

    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/responses"),
        Some(json!({
            "response_code": "A3",
            "received_at": "2024-05-10T12:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim"]["status"], "pending");

    (claim_id, line_id)
}

// ============================================================================
// Caller identity and errors
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_actor_is_unauthorized() {
    let app = create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/claims")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(new_claim_body().to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error_type"], "authentication_error");
}

#[tokio::test]
async fn test_unknown_claim_is_not_found() {
    let app = create_test_app();
    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/claims/6f1c1c4e-0b39-4d8c-9a0e-4c7f0d1f2a11",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CLAIMS_9001");
}

#[tokio::test]
async fn test_rule_violation_returns_stable_code() {
    let app = create_test_app();
    let (_, body) = send(&app, "POST", "/api/v1/claims", Some(new_claim_body())).await;
    let claim_id = body["data"]["id"].as_str().unwrap();

    // No line items yet
    let (status, body) = send(&app, "POST", &format!("/api/v1/claims/{claim_id}/ready"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CLAIMS_1004");
    assert_eq!(body["retryable"], false);
    assert!(body["suggestions"].is_array());

    // Nothing was recorded for the refused operation
    let (_, history) = send(&app, "GET", &format!("/api/v1/claims/{claim_id}/history"), None).await;
    assert_eq!(history["metadata"]["total_count"], 1);
}

// ============================================================================
// Claim lifecycle
// ============================================================================

#[tokio::test]
async fn test_claim_paid_over_http() {
    let app = create_test_app();
    let (claim_id, line_id) = pending_claim(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/payments"),
        Some(json!({
            "amount": "120.00",
            "payment_date": "2024-05-20",
            "method": "eft",
            "trace_number": "EFT-1001",
            "allocations": [{
                "line_item_id": line_id,
                "paid_amount": "120.00",
                "adjustment_amount": "30.00"
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim"]["status"], "paid");
    assert_eq!(amount(&body["data"]["claim"]["financials"]["amount_paid"]), Decimal::new(120, 0));
    assert_eq!(amount(&body["data"]["claim"]["financials"]["outstanding"]), Decimal::ZERO);

    let (_, postings) = send(&app, "GET", &format!("/api/v1/claims/{claim_id}/payments"), None).await;
    assert_eq!(postings["metadata"]["total_count"], 1);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/claims/{claim_id}/history/verify"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn test_overpayment_is_refused() {
    let app = create_test_app();
    let (claim_id, line_id) = pending_claim(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/payments"),
        Some(json!({
            "amount": "200.00",
            "payment_date": "2024-05-20",
            "allocations": [{ "line_item_id": line_id, "paid_amount": "200.00" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CLAIMS_3001");

    let (_, claim) = send(&app, "GET", &format!("/api/v1/claims/{claim_id}"), None).await;
    assert_eq!(claim["data"]["status"], "pending");
}

#[tokio::test]
async fn test_cancel_draft_claim() {
    let app = create_test_app();
    let (_, body) = send(&app, "POST", "/api/v1/claims", Some(new_claim_body())).await;
    let claim_id = body["data"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/cancel"),
        Some(json!({ "reason": "duplicate visit" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    let (status, _) = send(&app, "POST", &format!("/api/v1/claims/{claim_id}/ready"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Denials and appeals
// ============================================================================

#[tokio::test]
async fn test_denial_appeal_round_trip() {
    let app = create_test_app();
    let (claim_id, line_id) = pending_claim(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/denials"),
        Some(json!({
            "line_item_id": line_id,
            "code": "CO-50",
            "reason": "Not medically necessary",
            "category": "medical_necessity"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim"]["status"], "denied");
    let denial_id = body["data"]["denial"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", &format!("/api/v1/denials/{denial_id}/appeal"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim"]["status"], "appealed");

    let (status, _) = send(&app, "POST", &format!("/api/v1/denials/{denial_id}/review"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/denials/{denial_id}/resolve"),
        Some(json!({ "outcome": "denied", "notes": "upheld" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim"]["status"], "closed");

    let (_, denials) = send(&app, "GET", &format!("/api/v1/claims/{claim_id}/denials"), None).await;
    assert_eq!(denials["metadata"]["total_count"], 1);
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test]
async fn test_summary_counts_claims_by_status() {
    let app = create_test_app();
    pending_claim(&app).await;
    send(&app, "POST", "/api/v1/claims", Some(new_claim_body())).await;

    let (status, body) = send(&app, "GET", "/api/v1/reports/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claim_count"], 2);
    assert_eq!(body["data"]["by_status"]["pending"], 1);
    assert_eq!(body["data"]["by_status"]["draft"], 1);
    assert_eq!(amount(&body["data"]["total_charges"]), Decimal::new(150, 0));

    let (status, body) = send(&app, "GET", "/api/v1/claims?status=draft", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["total_count"], 1);
}

#[tokio::test]
async fn test_stale_submission_report() {
    let app = create_test_app();
    let (_, body) = send(&app, "POST", "/api/v1/claims", Some(new_claim_body())).await;
    let claim_id = body["data"]["id"].as_str().unwrap().to_string();
    send(
        &app,
        "POST",
        &format!("/api/v1/claims/{claim_id}/line-items"),
        Some(json!({ "procedure_code": "99213", "diagnosis_pointers": [1], "units": "1", "unit_charge": "90" })),
    )
    .await;
    send(&app, "POST", &format!("/api/v1/claims/{claim_id}/ready"), None).await;
    send(&app, "POST", &format!("/api/v1/claims/{claim_id}/submit"), None).await;

    let (_, now) = send(&app, "GET", "/api/v1/reports/stale-submissions", None).await;
    assert_eq!(now["metadata"]["total_count"], 0);

    let (status, later) = send(
        &app,
        "GET",
        "/api/v1/reports/stale-submissions?as_of=2999-01-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(later["metadata"]["total_count"], 1);
    assert_eq!(later["data"][0]["claim_id"], claim_id.as_str());
}
