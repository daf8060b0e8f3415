//! Fatal-path errors of the control core.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that prevent the control task from entering or staying in the
/// Running lifecycle. Everything recoverable (pauses, limit guards, permit
/// denial) is handled in place and never surfaces here.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Startup could not resolve a usable GPIO backend.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An unanticipated runtime failure; axes were disabled and the task
    /// published a terminal Fault state. Recovery requires a restart.
    #[error("control fault: {0}")]
    Fault(String),
}
