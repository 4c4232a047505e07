//! Notification dispatcher.
//!
//! Reacts to process lifecycle signals by delivering every notification
//! directive of the current state, concurrently and independently, and feeds
//! service replies back to the engine as state transitions.
//!
//! ```text
//!  Stepped(process) ─┐
//!                    ├─▶ directives ──▶ notify() ×N (join_all)
//!  Retry(process, ─┘       │                 │
//!        services?)        │ filter          ├─ registry.resolve(service)
//!                          ▼                 ├─ provider.notify()
//!                   current.notify           └─ reply + trigger ─▶ engine.step()
//! ```
//!
//! Failure policy: deployment errors (unknown service or provider) abort the
//! one notification and are returned; transport failures are logged and
//! count as "no reply", so no transition is attempted.

use std::sync::Arc;

use futures::future::join_all;
use herald_core::{
    LifecycleEvent, LifecycleHandler, Notify, Process, ProcessEngine, RetryRequest,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    error::{ErrorCategory, NotifyError, Result},
    registry::ProviderRegistry,
};

/// Outcome of a single notification: the stepped process when the reply
/// triggered a transition.
pub type NotifyOutcome = Result<Option<Process>>;

/// Delivers notification directives and turns replies into transitions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    engine: Arc<dyn ProcessEngine>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(registry: Arc<ProviderRegistry>, engine: Arc<dyn ProcessEngine>) -> Self {
        Self { registry, engine }
    }

    /// The provider registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Delivers every directive of the process's current state.
    ///
    /// Outcomes are returned in directive order.
    pub async fn on_stepped(&self, process: &Process) -> Vec<NotifyOutcome> {
        self.fan_out(process, process.current.notify.iter()).await
    }

    /// Re-delivers the directives selected by `request`.
    pub async fn on_retry(&self, request: &RetryRequest) -> Vec<NotifyOutcome> {
        let process = &request.process;
        let directives =
            process.current.notify.iter().filter(|directive| request.includes(&directive.service));
        self.fan_out(process, directives).await
    }

    async fn fan_out<'a>(
        &self,
        process: &Process,
        directives: impl Iterator<Item = &'a Notify>,
    ) -> Vec<NotifyOutcome> {
        let outcomes = join_all(directives.map(|directive| self.notify(process, directive))).await;

        for outcome in &outcomes {
            if let Err(e) = outcome {
                error!(
                    process_id = %process.id,
                    category = %ErrorCategory::from(e),
                    error = %e,
                    "notification aborted"
                );
            }
        }

        outcomes
    }

    /// Delivers one directive.
    ///
    /// Returns the stepped process when the service replied and the directive
    /// names a trigger action.
    ///
    /// # Errors
    ///
    /// Deployment errors from provider resolution, and `Engine` when the
    /// engine rejects the resulting transition. Transport failures are logged
    /// and yield `Ok(None)`.
    pub async fn notify(&self, process: &Process, directive: &Notify) -> NotifyOutcome {
        let service = directive.service.as_str();
        let span = info_span!("notify", service, process_id = %process.id);

        async move {
            let provider = self.registry.resolve(service)?;

            let reply = match provider.notify(process, directive).await {
                Ok(reply) => reply,
                Err(e) => {
                    log_transport_failure(service, &e);
                    return Ok(None);
                },
            };

            let (Some(reply), Some(trigger)) = (reply, directive.trigger.as_deref()) else {
                debug!("notification delivered without transition");
                return Ok(None);
            };

            let actor = directive.actor();
            let stepped = self.engine.step(process, trigger, &actor, reply).await?;
            info!(action = trigger, actor = %actor, "service reply stepped process");
            Ok(Some(stepped))
        }
        .instrument(span)
        .await
    }

    /// Consumes lifecycle signals from `events` until `shutdown` fires or the
    /// sender side closes. Each signal is handled on its own task.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LifecycleEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("lifecycle listener started");

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let dispatcher = self.clone();
                        tokio::spawn(async move { dispatcher.handle_lifecycle(event).await });
                    }
                }
            }

            info!("lifecycle listener stopped");
        })
    }
}

fn log_transport_failure(service: &str, error: &NotifyError) {
    let category = ErrorCategory::from(error);
    if error.is_response_timeout() {
        warn!(service, category = %category, error = %error, "no reply from service");
    } else {
        error!(service, category = %category, error = %error, "notification failed");
    }
}

#[async_trait::async_trait]
impl LifecycleHandler for Dispatcher {
    async fn handle_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Stepped(process) => {
                self.on_stepped(&process).await;
            },
            LifecycleEvent::Retry(request) => {
                self.on_retry(&request).await;
            },
        }
    }
}
