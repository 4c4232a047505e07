//! Provider registry.
//!
//! Maps a service name to its transport. The provider kind comes from the
//! service's configuration and is parsed into the closed [`ProviderKind`] set
//! on every resolution, so adding a transport means extending the enum and
//! the match below.

use std::{fmt, str::FromStr, sync::Arc};

use herald_core::{Notify, Process, ServicesConfig};
use serde_json::Value;

use crate::{
    amqp::AmqpProvider,
    error::{NotifyError, Result},
    webhook::WebhookProvider,
    zmq::ZeromqProvider,
};

/// Delivers a notification over one transport.
#[async_trait::async_trait]
pub trait NotifyProvider: Send + Sync + fmt::Debug {
    /// Delivers `directive` for `process`.
    ///
    /// Returns the service's reply, or `None` when the transport does not
    /// reply or the service acknowledged without one.
    async fn notify(&self, process: &Process, directive: &Notify) -> Result<Option<Value>>;

    /// Releases cached transport resources.
    async fn shutdown(&self) {}
}

/// Transport kinds a service can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// AMQP 0-9-1 broker.
    Amqp,
    /// ZeroMQ socket.
    Zeromq,
    /// HTTP webhook.
    Webhook,
}

impl ProviderKind {
    /// Configuration name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amqp => "amqp",
            Self::Zeromq => "zeromq",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "amqp" => Ok(Self::Amqp),
            "zeromq" => Ok(Self::Zeromq),
            "webhook" => Ok(Self::Webhook),
            other => Err(other.to_string()),
        }
    }
}

/// Resolves services to transports.
#[derive(Debug)]
pub struct ProviderRegistry {
    services: Arc<ServicesConfig>,
    amqp: AmqpProvider,
    zeromq: ZeromqProvider,
    webhook: WebhookProvider,
}

impl ProviderRegistry {
    /// Creates a registry over the given transports.
    pub fn new(
        services: Arc<ServicesConfig>,
        amqp: AmqpProvider,
        zeromq: ZeromqProvider,
        webhook: WebhookProvider,
    ) -> Self {
        Self { services, amqp, zeromq, webhook }
    }

    /// Provider kind configured for `service`.
    ///
    /// # Errors
    ///
    /// `UnconfiguredService`, `ProviderNotSpecified` or `UnsupportedProvider`,
    /// all of which are deployment errors.
    pub fn kind(&self, service: &str) -> Result<ProviderKind> {
        let config =
            self.services.get(service).ok_or_else(|| NotifyError::unconfigured_service(service))?;
        let provider = config
            .provider
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| NotifyError::provider_not_specified(service))?;

        provider.parse().map_err(|provider| NotifyError::unsupported_provider(service, provider))
    }

    /// Transport for `service`.
    pub fn resolve(&self, service: &str) -> Result<&dyn NotifyProvider> {
        Ok(match self.kind(service)? {
            ProviderKind::Amqp => &self.amqp,
            ProviderKind::Zeromq => &self.zeromq,
            ProviderKind::Webhook => &self.webhook,
        })
    }

    /// The AMQP transport.
    pub fn amqp(&self) -> &AmqpProvider {
        &self.amqp
    }

    /// The ZeroMQ transport.
    pub fn zeromq(&self) -> &ZeromqProvider {
        &self.zeromq
    }

    /// Shuts down every transport holding resources.
    pub async fn shutdown(&self) {
        self.amqp.shutdown().await;
        self.zeromq.shutdown().await;
    }
}
