//! Backend resolution.
//!
//! The backend name comes from configuration and is resolved exactly once,
//! before the control task starts. Resolution failure is fatal: the
//! station refuses to enter Running rather than run against a half-alive
//! hardware layer.

use thiserror::Error;
use tracing::info;

use drill_common::config::StationConfig;

use crate::http::HttpSimGpio;
use crate::sim::SimGpio;
use crate::Gpio;

/// Names the resolver understands.
pub const KNOWN_BACKENDS: &[&str] = &["sim", "http"];

/// Backend resolution failure.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Unknown or unreachable backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Resolve the configured GPIO backend.
pub fn resolve(config: &StationConfig) -> Result<Gpio, BackendError> {
    match config.backend.as_str() {
        "sim" => {
            info!("GPIO backend: in-process simulator");
            Ok(Gpio::Sim(SimGpio::new(&config.pins)))
        }
        "http" => {
            info!(addr = %config.simulator_addr, "GPIO backend: HTTP simulator");
            let gpio = HttpSimGpio::connect(&config.simulator_addr).map_err(|e| {
                BackendError::Unavailable(format!(
                    "HTTP simulator at {}: {e}",
                    config.simulator_addr
                ))
            })?;
            Ok(Gpio::Http(gpio))
        }
        other => Err(BackendError::Unavailable(format!(
            "no backend named '{other}' is registered (known: {})",
            KNOWN_BACKENDS.join(", ")
        ))),
    }
}
