//! ZeroMQ transport behavior against scripted sockets.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::Result;
use herald_core::{Notify, Process, ServicesConfig};
use herald_notify::{zmq::ZeromqProvider, NotifyError, NotifyProvider};
use herald_testing::{
    fixtures::{zeromq_service, ProcessBuilder},
    MockSocketFactory, SocketReply,
};
use serde_json::json;

const PUSH_ADDRESS: &str = "tcp://127.0.0.1:5555";
const REPLY_ADDRESS: &str = "tcp://127.0.0.1:5556";

fn services() -> ServicesConfig {
    ServicesConfig::new()
        .with_service("push", zeromq_service("push", PUSH_ADDRESS))
        .with_service(
            "reply",
            zeromq_service("reply", REPLY_ADDRESS).with("receive_timeout_ms", json!(2_000)),
        )
}

fn provider(sockets: &MockSocketFactory) -> ZeromqProvider {
    ZeromqProvider::new(Arc::new(services()), Arc::new(sockets.clone()))
}

fn process() -> Process {
    ProcessBuilder::new()
        .with_id(7)
        .state("pending")
        .action("approve", ["service:reply"])
        .action("notify", ["service:push"])
        .event("abcd")
        .build()
}

#[tokio::test(start_paused = true)]
async fn push_sends_canonical_message_without_reply() -> Result<()> {
    let sockets = MockSocketFactory::new();
    let provider = provider(&sockets);

    let reply = provider.notify(&process(), &Notify::new("push")).await?;

    assert!(reply.is_none());
    let log = sockets.log();
    assert_eq!(log.connects, vec![PUSH_ADDRESS.to_string()]);
    assert_eq!(log.sent.len(), 1);

    let (address, body) = &log.sent[0];
    assert_eq!(address, PUSH_ADDRESS);
    let message: serde_json::Value = serde_json::from_slice(body)?;
    assert_eq!(message["etag"], "abcd");
    assert_eq!(message["actions"][0]["key"], "notify");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reply_socket_returns_frame_as_text() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::text("approved"));
    let provider = provider(&sockets);

    let directive = Notify::new("reply").with_trigger("approve");
    let reply = provider.notify(&process(), &directive).await?;

    assert_eq!(reply, Some(json!("approved")));
    let message: serde_json::Value = serde_json::from_slice(&sockets.log().sent[0].1)?;
    assert_eq!(message["action"]["key"], "approve");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sockets_cached_per_service() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::text("one"));
    sockets.push_reply(SocketReply::text("two"));
    let provider = provider(&sockets);

    provider.notify(&process(), &Notify::new("push")).await?;
    provider.notify(&process(), &Notify::new("push")).await?;
    assert_eq!(provider.notify(&process(), &Notify::new("reply")).await?, Some(json!("one")));
    assert_eq!(provider.notify(&process(), &Notify::new("reply")).await?, Some(json!("two")));

    assert_eq!(sockets.log().connects.len(), 2);
    assert_eq!(provider.socket_count().await, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn receive_timeout_evicts_socket_and_reconnects() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::Hang);
    let provider = provider(&sockets);

    let reply = provider.notify(&process(), &Notify::new("reply")).await?;

    assert!(reply.is_none(), "a missed reply is reported as no reply");
    assert_eq!(provider.socket_count().await, 0);
    assert_eq!(sockets.log().closed, 1);

    sockets.push_reply(SocketReply::text("recovered"));
    let reply = provider.notify(&process(), &Notify::new("reply")).await?;

    assert_eq!(reply, Some(json!("recovered")));
    assert_eq!(sockets.log().connects.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn receive_failure_reported_as_no_reply() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::Fail("peer reset".to_string()));
    let provider = provider(&sockets);

    let reply = provider.notify(&process(), &Notify::new("reply")).await?;

    assert!(reply.is_none());
    assert_eq!(provider.socket_count().await, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_failure_reported_as_no_reply() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.fail_sends(true);
    let provider = provider(&sockets);

    let reply = provider.notify(&process(), &Notify::new("push")).await?;

    assert!(reply.is_none());
    assert!(sockets.log().sent.is_empty());
    assert_eq!(sockets.log().closed, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_failure_reported_as_no_reply() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.fail_connections(true);
    let provider = provider(&sockets);

    let reply = provider.notify(&process(), &Notify::new("push")).await?;

    assert!(reply.is_none());
    assert_eq!(provider.socket_count().await, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_trigger_is_an_error() -> Result<()> {
    let sockets = MockSocketFactory::new();
    let provider = provider(&sockets);

    let directive = Notify::new("push").with_trigger("refund");
    let error = provider.notify(&process(), &directive).await.unwrap_err();

    assert!(matches!(error, NotifyError::ActionNotFound { .. }));
    assert!(sockets.log().sent.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_cached_sockets() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::text("ok"));
    let provider = provider(&sockets);

    provider.notify(&process(), &Notify::new("push")).await?;
    provider.notify(&process(), &Notify::new("reply")).await?;
    provider.shutdown().await;

    assert_eq!(sockets.log().closed, 2);
    assert_eq!(provider.socket_count().await, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn waived_reply_completes_exchange_without_reply() -> Result<()> {
    let sockets = MockSocketFactory::new();
    sockets.push_reply(SocketReply::text("ignored"));
    sockets.push_reply(SocketReply::text("approved"));
    let provider = provider(&sockets);

    let directive = Notify::new("reply").with_trigger("approve").wait_for_reply(false);
    assert_eq!(provider.notify(&process(), &directive).await?, None);
    assert_eq!(provider.socket_count().await, 1, "socket stays usable");

    let reply = provider.notify(&process(), &Notify::new("reply")).await?;
    assert_eq!(reply, Some(json!("approved")));
    assert_eq!(sockets.log().connects.len(), 1);
    Ok(())
}
