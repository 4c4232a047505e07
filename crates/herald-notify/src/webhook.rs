//! Webhook transport.
//!
//! Stateless: every notification is one HTTP request with the configured
//! method and headers. A 202 response acknowledges without replying; any
//! other 2xx response body is the reply, unless the directive waives it.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use herald_core::{Notify, Process, ServicesConfig};
use reqwest::{header::CONTENT_TYPE, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::{
    error::{NotifyError, Result},
    message::{decode_reply, Payload},
    registry::NotifyProvider,
};

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = "herald-notify/0.1";

const MAX_ERROR_BODY_SIZE: usize = 1024;

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30_000
}

/// Per-service webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookSettings {
    /// Endpoint URL.
    pub url: String,

    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Milliseconds before the request is cancelled.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl WebhookSettings {
    /// Reads the webhook settings of `service`.
    pub fn for_service(services: &ServicesConfig, service: &str) -> Result<Self> {
        let config =
            services.get(service).ok_or_else(|| NotifyError::unconfigured_service(service))?;
        config.settings().map_err(|e| NotifyError::invalid_settings(service, e.to_string()))
    }

    fn method(&self, service: &str) -> Result<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            NotifyError::invalid_settings(service, format!("invalid method '{}'", self.method))
        })
    }

    fn has_content_type(&self) -> bool {
        self.headers.keys().any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
    }
}

/// Webhook transport.
#[derive(Debug, Clone)]
pub struct WebhookProvider {
    services: Arc<ServicesConfig>,
    client: reqwest::Client,
}

impl WebhookProvider {
    /// Creates a webhook transport.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be built.
    pub fn new(services: Arc<ServicesConfig>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| NotifyError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { services, client })
    }
}

#[async_trait::async_trait]
impl NotifyProvider for WebhookProvider {
    async fn notify(&self, process: &Process, directive: &Notify) -> Result<Option<Value>> {
        let service = directive.service.as_str();
        let settings = WebhookSettings::for_service(&self.services, service)?;
        let payload = Payload::for_directive(process, directive)?;

        let mut request = self
            .client
            .request(settings.method(service)?, &settings.url)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .body(payload.to_bytes());

        for (name, value) in &settings.headers {
            if !is_managed_header(name) {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if !settings.has_content_type() {
            request = request.header(CONTENT_TYPE, payload.content_type());
        }

        let wants_reply = directive.wait_for_reply != Some(false);
        let span = info_span!("webhook_call", service, url = %settings.url);

        async move {
            let response = request.send().await.map_err(|e| {
                tracing::warn!(error = %e, "webhook request failed");
                if e.is_timeout() {
                    NotifyError::timeout(settings.timeout_ms)
                } else {
                    NotifyError::network(e.to_string())
                }
            })?;

            let status = response.status();
            tracing::debug!(status_code = status.as_u16(), "received webhook response");

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::webhook_status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default(),
                    truncate_body(body),
                ));
            }

            if status == StatusCode::ACCEPTED || !wants_reply {
                return Ok(None);
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(|e| NotifyError::network(e.to_string()))?;

            Ok(Some(decode_reply(content_type.as_deref(), &body)))
        }
        .instrument(span)
        .await
    }
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY_SIZE {
        return body;
    }

    let mut end = MAX_ERROR_BODY_SIZE;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Headers owned by the HTTP client that configuration may not override.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length" | "host" | "connection" | "transfer-encoding" | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use herald_core::ServiceConfig;
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_url_is_invalid() {
        let services =
            ServicesConfig::new().with_service("hook", ServiceConfig::new("webhook"));

        let error = WebhookSettings::for_service(&services, "hook").unwrap_err();
        assert!(matches!(error, NotifyError::InvalidSettings { .. }));
    }

    #[test]
    fn defaults_applied() {
        let services = ServicesConfig::new().with_service(
            "hook",
            ServiceConfig::new("webhook").with("url", json!("https://example.com/hook")),
        );

        let settings = WebhookSettings::for_service(&services, "hook").unwrap();
        assert_eq!(settings.method("hook").unwrap(), Method::POST);
        assert_eq!(settings.timeout_ms, 30_000);
        assert!(!settings.has_content_type());
    }

    #[test]
    fn configured_content_type_detected_case_insensitively() {
        let services = ServicesConfig::new().with_service(
            "hook",
            ServiceConfig::new("webhook")
                .with("url", json!("https://example.com/hook"))
                .with("headers", json!({"content-type": "application/xml"})),
        );

        assert!(WebhookSettings::for_service(&services, "hook").unwrap().has_content_type());
    }

    #[test]
    fn long_error_bodies_truncated() {
        let body = "é".repeat(MAX_ERROR_BODY_SIZE);
        let truncated = truncate_body(body);

        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() <= MAX_ERROR_BODY_SIZE + "... (truncated)".len());
    }

    #[test]
    fn managed_headers_filtered() {
        assert!(is_managed_header("Content-Length"));
        assert!(is_managed_header("host"));
        assert!(!is_managed_header("Authorization"));
    }
}
