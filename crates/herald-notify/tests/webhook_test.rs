//! Webhook transport behavior against a live HTTP mock server.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use herald_core::{Notify, Process, ServicesConfig};
use herald_notify::{
    webhook::{WebhookProvider, DEFAULT_USER_AGENT},
    NotifyError, NotifyProvider,
};
use herald_testing::{
    fixtures::{webhook_service, ProcessBuilder},
    http::MockServer,
};
use serde_json::json;

fn process() -> Process {
    ProcessBuilder::new()
        .with_id(3)
        .state("awaiting_payment")
        .action("pay", ["service:hook"])
        .instructions("service:hook", "Collect payment")
        .event("f00d")
        .build()
}

fn provider(services: ServicesConfig) -> WebhookProvider {
    WebhookProvider::new(Arc::new(services), DEFAULT_USER_AGENT).unwrap()
}

fn hook(server: &MockServer) -> ServicesConfig {
    ServicesConfig::new().with_service("hook", webhook_service(&server.endpoint("/hook")))
}

#[tokio::test]
async fn accepted_response_means_no_reply() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_status("POST", "/hook", 202).await;

    let reply = provider(hook(&server)).notify(&process(), &Notify::new("hook")).await?;

    assert!(reply.is_none());
    server.assert_request_count(1).await;
    Ok(())
}

#[tokio::test]
async fn json_response_parsed_as_reply() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_json("POST", "/hook", 200, &json!({"status": "paid", "amount": 42})).await;

    let reply = provider(hook(&server)).notify(&process(), &Notify::new("hook")).await?;

    assert_eq!(reply, Some(json!({"status": "paid", "amount": 42})));
    Ok(())
}

#[tokio::test]
async fn text_response_returned_as_string() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_text("POST", "/hook", 200, "thanks").await;

    let reply = provider(hook(&server)).notify(&process(), &Notify::new("hook")).await?;

    assert_eq!(reply, Some(json!("thanks")));
    Ok(())
}

#[tokio::test]
async fn error_status_reported_with_body() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_text("POST", "/hook", 500, "database unavailable").await;

    let error = provider(hook(&server)).notify(&process(), &Notify::new("hook")).await.unwrap_err();

    match error {
        NotifyError::WebhookStatus { status_code, body, .. } => {
            assert_eq!(status_code, 500);
            assert_eq!(body, "database unavailable");
        },
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn canonical_message_posted_with_headers() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_status("PUT", "/hook", 202).await;

    let services = ServicesConfig::new().with_service(
        "hook",
        webhook_service(&server.endpoint("/hook"))
            .with("method", json!("put"))
            .with("headers", json!({"Authorization": "Bearer token", "Host": "evil.example"})),
    );
    provider(services).notify(&process(), &Notify::new("hook")).await?;

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.path, "/hook");
    assert_eq!(request.header("authorization"), Some("Bearer token"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("user-agent"), Some(DEFAULT_USER_AGENT));
    assert_ne!(request.header("host"), Some("evil.example"));
    assert_eq!(
        request.json(),
        json!({
            "process": "00000000-0000-0000-0000-000000000003",
            "actions": [{"key": "pay", "actor": ["service:hook"]}],
            "instructions": "Collect payment",
            "etag": "f00d"
        })
    );
    Ok(())
}

#[tokio::test]
async fn explicit_text_message_posted_as_text() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_status("POST", "/hook", 202).await;

    let directive = Notify::new("hook").with_message("ping");
    provider(hook(&server)).notify(&process(), &directive).await?;

    let request = &server.received_requests().await[0];
    assert_eq!(request.header("content-type"), Some("text/plain"));
    assert_eq!(&request.body[..], b"ping");
    Ok(())
}

#[tokio::test]
async fn slow_endpoint_times_out() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_delay("POST", "/hook", Duration::from_secs(5)).await;

    let services = ServicesConfig::new().with_service(
        "hook",
        webhook_service(&server.endpoint("/hook")).with("timeout_ms", json!(100)),
    );
    let error = provider(services).notify(&process(), &Notify::new("hook")).await.unwrap_err();

    assert!(matches!(error, NotifyError::Timeout { timeout_ms: 100 }));
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_is_network_error() -> Result<()> {
    let services = ServicesConfig::new()
        .with_service("hook", webhook_service("http://127.0.0.1:9/unreachable"));

    let error = provider(services).notify(&process(), &Notify::new("hook")).await.unwrap_err();

    assert!(matches!(error, NotifyError::Network { .. } | NotifyError::Timeout { .. }));
    Ok(())
}

#[tokio::test]
async fn waived_reply_ignores_response_body() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_json("POST", "/hook", 200, &json!({"approved": true})).await;

    let directive = Notify::new("hook").with_trigger("pay").wait_for_reply(false);
    let reply = provider(hook(&server)).notify(&process(), &directive).await?;

    assert!(reply.is_none());
    server.assert_request_count(1).await;
    Ok(())
}

#[tokio::test]
async fn waived_reply_still_reports_error_status() -> Result<()> {
    let server = MockServer::start().await;
    server.mock_text("POST", "/hook", 500, "down").await;

    let directive = Notify::new("hook").wait_for_reply(false);
    let error = provider(hook(&server)).notify(&process(), &directive).await.unwrap_err();

    assert!(matches!(error, NotifyError::WebhookStatus { status_code: 500, .. }));
    Ok(())
}
