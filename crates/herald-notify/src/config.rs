//! Notifier configuration.

use std::{path::PathBuf, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_core::ServicesConfig;
use serde::{Deserialize, Serialize};

use crate::webhook::DEFAULT_USER_AGENT;

const CONFIG_FILE: &str = "herald.toml";
const CONFIG_FILE_ENV: &str = "HERALD_CONFIG";
const ENV_PREFIX: &str = "HERALD_";

/// Notifier configuration with defaults, file, and environment overrides.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed `HERALD_`, nested keys separated by
///    `__` (e.g. `HERALD_SERVICES__BILLING__URL`)
/// 2. Configuration file (`herald.toml`, or the path in `HERALD_CONFIG`)
/// 3. Built-in defaults
///
/// # Example
///
/// ```toml
/// [services.billing]
/// provider = "amqp"
/// url = "amqp://localhost"
/// reply = true
/// response_timeout_seconds = 5
///
/// [services.crm]
/// provider = "webhook"
/// url = "https://crm.example.com/hooks/process"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Configured services keyed by name.
    #[serde(default)]
    pub services: ServicesConfig,

    /// User agent of webhook requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Seconds to wait for the lifecycle listener to stop on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl NotifierConfig {
    /// Loads configuration from defaults, the configuration file and the
    /// environment.
    pub fn load() -> Result<Self, figment::Error> {
        let file = std::env::var_os(CONFIG_FILE_ENV)
            .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
        Self::from_figment(Self::figment(Toml::file(file), ENV_PREFIX))
    }

    fn figment(file: figment::providers::Data<Toml>, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Extracts and validates configuration from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Time allowed for shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    fn validate(&self) -> Result<(), figment::Error> {
        if self.user_agent.trim().is_empty() {
            return Err(figment::Error::from("user_agent must not be empty".to_string()));
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(figment::Error::from(
                "shutdown_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            services: ServicesConfig::new(),
            user_agent: default_user_agent(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}
