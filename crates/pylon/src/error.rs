//! Facade error type.

use pylon_config::ConfigError;
use pylon_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while assembling or reconfiguring an [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum PylonError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging or metrics could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The operation needs a configuration file but the engine has none.
    #[error("engine was built without a configuration file")]
    NoConfigFile,
}

/// Result alias for facade operations.
pub type PylonResult<T> = Result<T, PylonError>;
