#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the verification email endpoint.

use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;
use common::{TestApp, json_request, request, response_json};

const SEND: &str = "/api/send-verification";

async fn send(app: &TestApp, body: serde_json::Value) -> axum::response::Response {
    app.request(
        json_request(Method::POST, SEND)
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn sends_code_and_returns_message_id() {
    let app = TestApp::new();
    let response = send(
        &app,
        json!({
            "email": "owner@example.com",
            "code": "482913",
            "firstName": "Ada",
            "lastName": "<b>Lovelace</b>"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["messageId"], "<test-1@tenantdesk.test>");

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    let email = &sent[0];
    assert_eq!(email.to, "owner@example.com");
    assert_eq!(email.subject, "Your verification code");
    assert!(email.text.contains("482913"));
    assert!(email.html.contains("482913"));
    assert!(email.text.contains("15 minutes"));
    assert!(email.html.contains("Hello Ada Lovelace,"));
    assert!(email.reference.is_some());
}

#[tokio::test]
async fn names_are_plain_in_text_and_escaped_in_html() {
    let app = TestApp::new();
    let response = send(
        &app,
        json!({
            "email": "owner@example.com",
            "code": "482913",
            "firstName": "Smith & Sons",
            "lastName": "<i>Lettings</i>"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = app.mailer.sent();
    let email = &sent[0];
    assert!(email.text.starts_with("Hello Smith & Sons Lettings,"));
    assert!(email.html.contains("Hello Smith &amp; Sons Lettings,"));
    assert!(!email.text.contains("&amp;"));
}

#[tokio::test]
async fn rejects_codes_that_are_not_six_digits() {
    let app = TestApp::new();
    for code in ["12345", "1234567", "12a456", ""] {
        let response = send(&app, json!({ "email": "owner@example.com", "code": code })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "code {code:?}");
    }
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn rejects_invalid_email() {
    let app = TestApp::new();
    let response = send(&app, json!({ "email": "nobody", "code": "123456" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Invalid email format");
}

#[tokio::test]
async fn only_post_is_allowed() {
    let app = TestApp::new();

    let response = app
        .request(request(Method::OPTIONS, SEND).body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(request(Method::GET, SEND).body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unconfigured_email_is_unavailable() {
    let app = TestApp::without_email();
    let response = send(&app, json!({ "email": "owner@example.com", "code": "123456" })).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn provider_failure_is_generic_server_error() {
    let app = TestApp::new();
    app.mailer.set_fail(true);

    let response = send(&app, json!({ "email": "owner@example.com", "code": "123456" })).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Internal server error");
}
