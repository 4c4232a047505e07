//! Tracing subscriber setup for embedding applications.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,herald=debug";

/// Installs a global subscriber with an `EnvFilter` from `RUST_LOG`, falling
/// back to `default_filter`, and a formatting layer.
///
/// # Errors
///
/// Fails when the fallback filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_fallback_filter_reported() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_tracing("herald=notalevel").is_err());
        }
    }
}
