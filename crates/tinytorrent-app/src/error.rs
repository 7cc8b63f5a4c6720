//! # Design
//!
//! - Centralize bootstrap errors for the recovery runtime.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: tinytorrent_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: tinytorrent_telemetry::TelemetryError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: tinytorrent_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: tinytorrent_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn app_error_helpers_build_variants() -> Result<(), Box<dyn Error>> {
        let Err(json_error) = serde_json::from_str::<serde_json::Value>("invalid") else {
            return Err(io::Error::other("expected invalid json").into());
        };
        let config = AppError::config(
            "profile.load",
            tinytorrent_config::ConfigError::Parse {
                origin: "inline".into(),
                source: json_error,
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.to_string(), "configuration operation failed");
        assert!(config.source().is_some());

        let telemetry = AppError::telemetry(
            "telemetry.render",
            tinytorrent_telemetry::TelemetryError::MetricsUtf8 {
                source: String::from_utf8(vec![0xff]).err().ok_or("expected utf-8 error")?,
            },
        );
        assert!(matches!(telemetry, AppError::Telemetry { .. }));
        Ok(())
    }
}
