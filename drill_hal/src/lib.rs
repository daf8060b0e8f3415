//! # Drill-Station HAL
//!
//! GPIO abstraction for the drill-station control core: digital reads and
//! writes, one analog channel, and a monotonic microsecond clock.
//!
//! Backends are resolved once at startup through [`registry::resolve`];
//! after resolution every call dispatches through a two-variant enum match,
//! keeping the pulse hot path free of virtual calls. Available backends:
//!
//! - `sim` — in-process fake with operator/test hooks ([`sim::SimGpio`])
//! - `http` — client for the HTTP-addressable GPIO simulator
//!   ([`http::HttpSimGpio`])
//!
//! A real-hardware backend registers as a further enum variant; resolving
//! an unregistered name fails startup instead of limping along.

pub mod clock;
pub mod http;
pub mod registry;
pub mod sim;

use thiserror::Error;

pub use clock::MonotonicClock;
pub use http::HttpSimGpio;
pub use registry::{resolve, BackendError};
pub use sim::SimGpio;

/// Analog read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The converter has no such channel.
    #[error("no such analog channel: {0}")]
    NoSuchChannel(u8),
}

/// Resolved GPIO backend.
///
/// Cloning shares the underlying backend state; the coordinator keeps a
/// clone for its synchronous emergency-stop writes.
#[derive(Debug, Clone)]
pub enum Gpio {
    Sim(SimGpio),
    Http(HttpSimGpio),
}

impl Gpio {
    /// Read a digital line. Returns 0 or 1.
    #[inline]
    pub fn read_digital(&self, pin: u8) -> u8 {
        match self {
            Self::Sim(gpio) => gpio.read_digital(pin),
            Self::Http(gpio) => gpio.read_digital(pin),
        }
    }

    /// Drive a digital line.
    #[inline]
    pub fn write_digital(&self, pin: u8, level: u8) {
        match self {
            Self::Sim(gpio) => gpio.write_digital(pin, level),
            Self::Http(gpio) => gpio.write_digital(pin, level),
        }
    }

    /// Read the 10-bit analog channel.
    #[inline]
    pub fn read_analog(&self, channel: u8) -> Result<u16, ReadError> {
        match self {
            Self::Sim(gpio) => gpio.read_analog(channel),
            Self::Http(gpio) => gpio.read_analog(channel),
        }
    }

    /// Monotonic microsecond tick.
    #[inline]
    pub fn now_micros(&self) -> u64 {
        match self {
            Self::Sim(gpio) => gpio.now_micros(),
            Self::Http(gpio) => gpio.now_micros(),
        }
    }

    /// The in-process simulator, when that is the resolved backend.
    ///
    /// Tests and the simulator UI use this to reach the operator hooks.
    pub fn as_sim(&self) -> Option<&SimGpio> {
        match self {
            Self::Sim(gpio) => Some(gpio),
            Self::Http(_) => None,
        }
    }
}
