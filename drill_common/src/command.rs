//! Command types for the coordinator ingress channel.
//!
//! External collaborators (web dashboard, simulator UI) enqueue these onto
//! the bounded channel consumed by the control task. Precondition failures
//! are reported synchronously to the producer; the physical effect always
//! completes asynchronously on the control task, with `EmergencyStop` as
//! the single exception (its axis-disable writes happen before enqueue).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ModeParams;

/// Bounded capacity of the coordinator command channel.
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

/// A command accepted by the control task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Bind a drilling mode (1-based index) and run homing → waiting.
    ///
    /// `params` overrides the configured record for this binding; `None`
    /// binds the record from the mode table.
    SelectMode {
        index: u8,
        params: Option<ModeParams>,
    },
    /// Enter or leave joystick-driven manual control.
    SetManual(bool),
    /// Equivalent to a Start button rising edge.
    Start,
    /// Equivalent to a Stop button rising edge.
    Stop,
    /// Equivalent to a Reset button rising edge.
    Reset,
    /// Axes were already disabled synchronously; fall back to Idle.
    EmergencyStop,
    /// Stop the control task cleanly, driving both axes low.
    Shutdown,
}

/// Synchronous rejection of a coordinator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The operation is not allowed while a cycle owns the axes.
    #[error("machine is busy: a drilling cycle is in progress")]
    Busy,
    /// Mode index outside 1..=5.
    #[error("invalid mode index {0}, expected 1..=5")]
    InvalidMode(u8),
    /// The bounded command channel is full.
    #[error("command queue is full")]
    QueueFull,
    /// The control task has exited and its channel is disconnected.
    #[error("control task is not running")]
    TaskStopped,
}
