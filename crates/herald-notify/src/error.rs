//! Error types for notification dispatch.
//!
//! Separates deployment defects (a directive names a service or provider that
//! does not exist) from transport failures. The dispatcher returns the former
//! and logs the latter as "no reply", so a failed delivery never causes a
//! state transition.

use std::fmt;

use herald_core::CoreError;
use thiserror::Error;

/// Result type alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Error conditions raised while delivering a notification.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// The directive names a service that is not configured.
    #[error("service '{service}' not configured")]
    UnconfiguredService {
        /// Service name from the directive
        service: String,
    },

    /// The service configuration does not name a provider.
    #[error("provider not specified for service '{service}'")]
    ProviderNotSpecified {
        /// Service name from the directive
        service: String,
    },

    /// The service names a provider kind that is not implemented.
    #[error("unsupported provider '{provider}' for service '{service}'")]
    UnsupportedProvider {
        /// Service name from the directive
        service: String,
        /// Provider kind from the configuration
        provider: String,
    },

    /// Provider-specific settings are missing or malformed.
    #[error("invalid settings for service '{service}': {message}")]
    InvalidSettings {
        /// Service name
        service: String,
        /// What is wrong with the settings
        message: String,
    },

    /// The trigger action does not exist in the current state.
    #[error("action {action} not found in state {state} of process {process}")]
    ActionNotFound {
        /// Requested action key
        action: String,
        /// Current state key
        state: String,
        /// Process identifier
        process: String,
    },

    /// No correlated reply arrived before the response timeout.
    #[error("response timeout exceeded after {timeout_seconds}s for service '{service}'")]
    ResponseTimeoutExceeded {
        /// Service the request was sent to
        service: String,
        /// Correlation id of the abandoned request
        correlation_id: String,
        /// Configured response timeout
        timeout_seconds: u64,
    },

    /// A request with the same correlation id is already awaiting its reply.
    #[error("a reply for correlation id {correlation_id} is already pending")]
    DuplicateCorrelation {
        /// Conflicting correlation id
        correlation_id: String,
    },

    /// Broker or socket connection could not be established.
    #[error("connection failed: {message}")]
    Connection {
        /// Underlying error message
        message: String,
    },

    /// Broker refused or failed the publish.
    #[error("publish failed: {message}")]
    Publish {
        /// Underlying error message
        message: String,
    },

    /// Reply queue could not be declared or consumed.
    #[error("consume failed: {message}")]
    Consume {
        /// Underlying error message
        message: String,
    },

    /// ZeroMQ send or receive failed.
    #[error("socket error: {message}")]
    Socket {
        /// Underlying error message
        message: String,
    },

    /// HTTP request could not be completed.
    #[error("network error: {message}")]
    Network {
        /// Underlying error message
        message: String,
    },

    /// An outbound operation exceeded its time limit.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Limit that was exceeded
        timeout_ms: u64,
    },

    /// Webhook endpoint answered with a non-2xx status.
    #[error("webhook failed with status {status_code} {reason}: {body}")]
    WebhookStatus {
        /// HTTP status code
        status_code: u16,
        /// Canonical reason phrase
        reason: String,
        /// Response body content
        body: String,
    },

    /// The engine failed to step the process with a reply.
    #[error("engine step failed: {message}")]
    Engine {
        /// Engine error message
        message: String,
    },

    /// The transport is shutting down; in-flight requests are abandoned.
    #[error("notifier shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("internal notification error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl NotifyError {
    /// Creates an unconfigured service error.
    pub fn unconfigured_service(service: impl Into<String>) -> Self {
        Self::UnconfiguredService { service: service.into() }
    }

    /// Creates a missing provider error.
    pub fn provider_not_specified(service: impl Into<String>) -> Self {
        Self::ProviderNotSpecified { service: service.into() }
    }

    /// Creates an unsupported provider error.
    pub fn unsupported_provider(service: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::UnsupportedProvider { service: service.into(), provider: provider.into() }
    }

    /// Creates an invalid settings error.
    pub fn invalid_settings(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSettings { service: service.into(), message: message.into() }
    }

    /// Creates a response timeout error.
    pub fn response_timeout(
        service: impl Into<String>,
        correlation_id: impl Into<String>,
        timeout_seconds: u64,
    ) -> Self {
        Self::ResponseTimeoutExceeded {
            service: service.into(),
            correlation_id: correlation_id.into(),
            timeout_seconds,
        }
    }

    /// Creates a duplicate correlation error.
    pub fn duplicate_correlation(correlation_id: impl Into<String>) -> Self {
        Self::DuplicateCorrelation { correlation_id: correlation_id.into() }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a publish error.
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish { message: message.into() }
    }

    /// Creates a consume error.
    pub fn consume(message: impl Into<String>) -> Self {
        Self::Consume { message: message.into() }
    }

    /// Creates a socket error.
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket { message: message.into() }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a webhook status error from an HTTP response.
    pub fn webhook_status(
        status_code: u16,
        reason: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::WebhookStatus { status_code, reason: reason.into(), body: body.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this error is a deployment defect rather than a delivery
    /// failure.
    ///
    /// Deployment defects abort their notification and are surfaced to the
    /// caller; everything else is logged and treated as "no reply".
    pub fn is_deployment_error(&self) -> bool {
        matches!(
            self,
            Self::UnconfiguredService { .. }
                | Self::ProviderNotSpecified { .. }
                | Self::UnsupportedProvider { .. }
        )
    }

    /// Whether this error is the request/reply timeout.
    pub fn is_response_timeout(&self) -> bool {
        matches!(self, Self::ResponseTimeoutExceeded { .. })
    }
}

impl From<CoreError> for NotifyError {
    fn from(error: CoreError) -> Self {
        Self::Engine { message: error.to_string() }
    }
}

/// Category of notification error for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Service or provider configuration problems.
    Configuration,
    /// Connection, publish, consume or socket failures.
    Transport,
    /// Reply or operation timeouts.
    Timeout,
    /// The remote service answered with an error.
    Remote,
    /// The engine rejected the resulting transition.
    Engine,
    /// Internal system errors.
    Internal,
}

impl From<&NotifyError> for ErrorCategory {
    fn from(error: &NotifyError) -> Self {
        match error {
            NotifyError::UnconfiguredService { .. }
            | NotifyError::ProviderNotSpecified { .. }
            | NotifyError::UnsupportedProvider { .. }
            | NotifyError::InvalidSettings { .. }
            | NotifyError::ActionNotFound { .. } => Self::Configuration,
            NotifyError::Connection { .. }
            | NotifyError::Publish { .. }
            | NotifyError::Consume { .. }
            | NotifyError::Socket { .. }
            | NotifyError::Network { .. } => Self::Transport,
            NotifyError::ResponseTimeoutExceeded { .. } | NotifyError::Timeout { .. } => {
                Self::Timeout
            },
            NotifyError::WebhookStatus { .. } => Self::Remote,
            NotifyError::Engine { .. } => Self::Engine,
            NotifyError::DuplicateCorrelation { .. }
            | NotifyError::ShutdownRequested
            | NotifyError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Remote => write!(f, "remote"),
            Self::Engine => write!(f, "engine"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_errors_identified_correctly() {
        assert!(NotifyError::unconfigured_service("billing").is_deployment_error());
        assert!(NotifyError::provider_not_specified("billing").is_deployment_error());
        assert!(NotifyError::unsupported_provider("billing", "smtp").is_deployment_error());

        assert!(!NotifyError::response_timeout("billing", "abc", 30).is_deployment_error());
        assert!(!NotifyError::webhook_status(500, "Internal Server Error", "boom")
            .is_deployment_error());
        assert!(!NotifyError::connection("refused").is_deployment_error());
        assert!(!NotifyError::invalid_settings("billing", "missing url").is_deployment_error());
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(
            ErrorCategory::from(&NotifyError::unsupported_provider("a", "smtp")),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCategory::from(&NotifyError::publish("nack")), ErrorCategory::Transport);
        assert_eq!(
            ErrorCategory::from(&NotifyError::response_timeout("a", "id", 5)),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::from(&NotifyError::webhook_status(404, "Not Found", "")),
            ErrorCategory::Remote
        );
        assert_eq!(ErrorCategory::Timeout.to_string(), "timeout");
    }

    #[test]
    fn error_display_format() {
        let error = NotifyError::webhook_status(500, "Internal Server Error", "Server error");
        assert_eq!(
            error.to_string(),
            "webhook failed with status 500 Internal Server Error: Server error"
        );

        let error = NotifyError::unsupported_provider("billing", "smtp");
        assert_eq!(error.to_string(), "unsupported provider 'smtp' for service 'billing'");
    }
}
