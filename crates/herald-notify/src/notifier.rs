//! Notifier assembly and lifecycle.
//!
//! Wires configuration, transports, registry and dispatcher together and owns
//! the background lifecycle listener.
//!
//! ```text
//!  NotifierConfig ──▶ ServicesConfig ──┬─▶ AmqpProvider    (AmqpConnector)
//!                                      ├─▶ ZeromqProvider  (SocketFactory)
//!                                      └─▶ WebhookProvider (reqwest)
//!                                                │
//!                                      ProviderRegistry ──▶ Dispatcher ◀── ProcessEngine
//!                                                              │
//!                                 mpsc<LifecycleEvent> ──▶ listener task
//! ```

use std::sync::Arc;

use herald_core::{LifecycleEvent, LifecycleHandler, ProcessEngine};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    amqp::{AmqpConnector, AmqpProvider, LapinConnector},
    config::NotifierConfig,
    dispatcher::Dispatcher,
    error::Result,
    registry::ProviderRegistry,
    webhook::WebhookProvider,
    zmq::{SocketFactory, ZeromqProvider, ZmqSocketFactory},
};

/// Notification subsystem handle.
#[derive(Debug)]
pub struct Notifier {
    config: NotifierConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    /// Creates a notifier using real broker and socket connections.
    pub fn new(config: NotifierConfig, engine: Arc<dyn ProcessEngine>) -> Result<Self> {
        Self::with_transports(
            config,
            engine,
            Arc::new(LapinConnector),
            Arc::new(ZmqSocketFactory),
        )
    }

    /// Creates a notifier with custom AMQP and ZeroMQ backends.
    pub fn with_transports(
        config: NotifierConfig,
        engine: Arc<dyn ProcessEngine>,
        connector: Arc<dyn AmqpConnector>,
        sockets: Arc<dyn SocketFactory>,
    ) -> Result<Self> {
        let services = Arc::new(config.services.clone());
        let registry = ProviderRegistry::new(
            services.clone(),
            AmqpProvider::new(services.clone(), connector),
            ZeromqProvider::new(services.clone(), sockets),
            WebhookProvider::new(services, &config.user_agent)?,
        );
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), engine));

        Ok(Self {
            config,
            dispatcher,
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
        })
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// The dispatcher as a lifecycle subscriber, for engines that push
    /// signals through callbacks.
    pub fn handler(&self) -> Arc<dyn LifecycleHandler> {
        self.dispatcher.clone()
    }

    /// Starts consuming lifecycle signals from `events`.
    ///
    /// A listener that is already running keeps running; the new receiver is
    /// dropped.
    pub async fn start(&self, events: mpsc::Receiver<LifecycleEvent>) {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("lifecycle listener already running");
            return;
        }

        *listener = Some(self.dispatcher.clone().spawn_listener(events, self.shutdown.clone()));
    }

    /// Stops the lifecycle listener and releases every transport resource.
    ///
    /// Pending AMQP replies are abandoned and their callers fail with
    /// `ShutdownRequested`.
    pub async fn shutdown(&self) {
        info!("shutting down notifier");
        self.shutdown.cancel();

        if let Some(handle) = self.listener.lock().await.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.config.shutdown_timeout(), handle).await.is_err() {
                warn!(
                    timeout_seconds = self.config.shutdown_timeout_seconds,
                    "lifecycle listener did not stop in time"
                );
                abort.abort();
            }
        }

        self.dispatcher.registry().shutdown().await;
        info!("notifier stopped");
    }
}
