//! Coordinator: the external command surface of the control core.
//!
//! Owns the mode table and brokers operator intents onto the bounded
//! command channel consumed by the control task. All mutating operations
//! return once the command is accepted, not once the physical effect
//! completes; `emergency_stop` is the single exception and writes the
//! axis-disable outputs synchronously before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;

use tracing::{error, warn};

use drill_common::command::{Command, CommandError};
use drill_common::config::{ModeParams, PinMap, MODE_COUNT};
use drill_common::state::Phase;
use drill_common::status::{StatusCell, StatusSnapshot};
use drill_hal::Gpio;

/// Cloneable handle for external collaborators.
#[derive(Clone)]
pub struct Coordinator {
    tx: SyncSender<Command>,
    cell: Arc<StatusCell>,
    estop: Arc<AtomicBool>,
    gpio: Gpio,
    pins: PinMap,
    modes: Vec<ModeParams>,
}

impl Coordinator {
    pub(crate) fn new(
        tx: SyncSender<Command>,
        cell: Arc<StatusCell>,
        estop: Arc<AtomicBool>,
        gpio: Gpio,
        pins: PinMap,
        modes: Vec<ModeParams>,
    ) -> Self {
        Self {
            tx,
            cell,
            estop,
            gpio,
            pins,
            modes,
        }
    }

    /// Bind a mode from the configured table and run homing → waiting.
    pub fn select_mode(&self, index: u8) -> Result<(), CommandError> {
        let params = *self
            .mode_entry(index)
            .ok_or(CommandError::InvalidMode(index))?;
        self.select_mode_with(index, params)
    }

    /// Bind a mode with a pre-bound parameter record from the
    /// configuration collaborator.
    pub fn select_mode_with(&self, index: u8, params: ModeParams) -> Result<(), CommandError> {
        if self.mode_entry(index).is_none() {
            return Err(CommandError::InvalidMode(index));
        }
        if self.snapshot().phase.in_cycle() {
            return Err(CommandError::Busy);
        }
        self.send(Command::SelectMode {
            index,
            params: Some(params),
        })
    }

    /// Enter or leave manual mode. Allowed only while no cycle owns the
    /// axes.
    pub fn select_manual(&self, enable: bool) -> Result<(), CommandError> {
        match self.snapshot().phase {
            Phase::Idle | Phase::Waiting => self.send(Command::SetManual(enable)),
            _ => Err(CommandError::Busy),
        }
    }

    /// Equivalent to a Start button rising edge.
    pub fn press_start_virtual(&self) -> Result<(), CommandError> {
        self.send(Command::Start)
    }

    /// Equivalent to a Stop button rising edge.
    pub fn press_stop_virtual(&self) -> Result<(), CommandError> {
        self.send(Command::Stop)
    }

    /// Equivalent to a Reset button rising edge.
    pub fn reset_virtual(&self) -> Result<(), CommandError> {
        self.send(Command::Reset)
    }

    /// Disable both axes immediately and drop the machine to Idle without
    /// homing.
    ///
    /// The latch is raised before the pin writes so the control task
    /// cannot re-energize an output between the write and its next yield;
    /// each write is a single atomic store on the backend.
    pub fn emergency_stop(&self) {
        error!("emergency stop");
        self.estop.store(true, Ordering::Release);
        for pin in [
            self.pins.step_linear,
            self.pins.dir_linear,
            self.pins.step_drill,
            self.pins.dir_drill,
        ] {
            self.gpio.write_digital(pin, 0);
        }
        // Wake the control task; the latch already carries the intent.
        match self.tx.try_send(Command::EmergencyStop) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("command queue full during emergency stop; latch still set");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("control task already stopped; outputs parked directly");
            }
        }
    }

    /// Stop the control task cleanly.
    pub fn shutdown(&self) -> Result<(), CommandError> {
        self.send(Command::Shutdown)
    }

    /// Latest published machine status.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.cell.read()
    }

    fn mode_entry(&self, index: u8) -> Option<&ModeParams> {
        if (1..=MODE_COUNT as u8).contains(&index) {
            self.modes.get(index as usize - 1)
        } else {
            None
        }
    }

    fn send(&self, command: Command) -> Result<(), CommandError> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => CommandError::QueueFull,
            TrySendError::Disconnected(_) => CommandError::TaskStopped,
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
