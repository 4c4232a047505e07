//! Test infrastructure for herald.
//!
//! Provides an in-memory AMQP broker, scripted ZeroMQ sockets, a recording
//! process engine, HTTP mocking, and fixture builders. [`TestNotifier`] wires
//! them into a [`Notifier`] so dispatcher tests run without external
//! services.

pub mod broker;
pub mod engine;
pub mod fixtures;
pub mod http;
pub mod sockets;

use std::sync::Arc;

use anyhow::{Context, Result};
pub use broker::{BrokerLog, MockBroker, PublishedMessage, Reply};
pub use engine::{RecordingEngine, StepCall};
pub use fixtures::ProcessBuilder;
use herald_core::ServicesConfig;
use herald_notify::{Dispatcher, Notifier, NotifierConfig};
pub use sockets::{MockSocketFactory, SocketLog, SocketReply};
use tracing_subscriber::EnvFilter;

/// Notifier wired to test doubles.
pub struct TestNotifier {
    /// Broker behind the AMQP transport.
    pub broker: MockBroker,
    /// Sockets behind the ZeroMQ transport.
    pub sockets: MockSocketFactory,
    /// Engine receiving service replies.
    pub engine: RecordingEngine,
    /// The notifier under test.
    pub notifier: Notifier,
}

impl TestNotifier {
    /// Creates a notifier for `services`.
    pub fn new(services: ServicesConfig) -> Result<Self> {
        init_test_tracing();

        let broker = MockBroker::new();
        let sockets = MockSocketFactory::new();
        let engine = RecordingEngine::new();
        let config = NotifierConfig { services, ..Default::default() };

        let notifier = Notifier::with_transports(
            config,
            Arc::new(engine.clone()),
            Arc::new(broker.clone()),
            Arc::new(sockets.clone()),
        )
        .context("failed to assemble notifier")?;

        Ok(Self { broker, sockets, engine, notifier })
    }

    /// The dispatcher under test.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.notifier.dispatcher()
    }
}

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,herald=debug")),
        )
        .with_test_writer()
        .try_init();
}
