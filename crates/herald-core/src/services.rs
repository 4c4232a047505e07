//! Service configuration as seen by the notification transports.
//!
//! Each configured service names its provider kind and carries
//! provider-specific fields. The provider string is kept raw here so that an
//! unknown kind is reported when a directive resolves it rather than failing
//! the whole configuration; transports deserialise the remaining fields into
//! their own typed settings.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration of a single external service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Provider kind, e.g. `amqp`, `zeromq` or `webhook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Provider-specific fields.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ServiceConfig {
    /// Creates a configuration for the given provider kind.
    pub fn new(provider: impl Into<String>) -> Self {
        Self { provider: Some(provider.into()), settings: Map::new() }
    }

    /// Sets a provider-specific field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Deserialises the provider-specific fields into typed settings.
    ///
    /// # Errors
    ///
    /// Returns the deserialisation error when fields are missing or have the
    /// wrong type.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.settings.clone()))
    }
}

/// All configured services keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicesConfig(BTreeMap<String, ServiceConfig>);

impl ServicesConfig {
    /// Creates an empty service map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces a service, builder style.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, config: ServiceConfig) -> Self {
        self.0.insert(name.into(), config);
        self
    }

    /// Adds or replaces a service.
    pub fn insert(&mut self, name: impl Into<String>, config: ServiceConfig) {
        self.0.insert(name.into(), config);
    }

    /// Looks up a service by name.
    pub fn get(&self, name: &str) -> Option<&ServiceConfig> {
        self.0.get(name)
    }

    /// Names of all configured services.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of configured services.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no service is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ServiceConfig)> for ServicesConfig {
    fn from_iter<T: IntoIterator<Item = (String, ServiceConfig)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct UrlSettings {
        url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    }

    #[test]
    fn provider_fields_flattened_from_json() {
        let services: ServicesConfig = serde_json::from_value(json!({
            "billing": {"provider": "amqp", "url": "amqp://localhost", "exchange": "billing"},
            "crm": {"url": "https://crm.example.com/hook"}
        }))
        .unwrap();

        let billing = services.get("billing").unwrap();
        assert_eq!(billing.provider.as_deref(), Some("amqp"));
        assert_eq!(billing.settings.get("exchange"), Some(&json!("billing")));
        assert!(!billing.settings.contains_key("provider"));

        assert_eq!(services.get("crm").unwrap().provider, None);
        assert_eq!(services.names().collect::<Vec<_>>(), vec!["billing", "crm"]);
    }

    #[test]
    fn typed_settings_deserialised_on_demand() {
        let config = ServiceConfig::new("webhook").with("url", "https://example.com/hook");

        let settings: UrlSettings = config.settings().unwrap();
        assert_eq!(settings.url, "https://example.com/hook");
        assert_eq!(settings.timeout_ms, None);

        let missing = ServiceConfig::new("webhook").settings::<UrlSettings>();
        assert!(missing.is_err());
    }
}
