//! Safety supervisor: motion pre-emption and pause/resume mediation.
//!
//! Every gap between pulse edges and every phase boundary runs through
//! [`Supervisor::poll_motion`]. It samples inputs, drains the command
//! channel, and turns the combined picture into a verdict:
//!
//! - interlock open or Stop pressed → blocking pause, resumed by a Start
//!   edge followed by the mechanical settling delay;
//! - Reset pressed → abort the motion, caller falls back through homing;
//! - a guarded limit switch → end of the current motion segment.
//!
//! The pause deliberately resumes on the Start edge alone; the interlock
//! level is not a resume precondition. The operator acknowledges with
//! Start, and an interlock that is still open pauses again on the next
//! poll.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use drill_common::command::Command;
use drill_common::config::{PinMap, SystemParams};
use drill_common::state::StrokeDirection;
use drill_hal::Gpio;

use crate::external::StatusDisplay;
use crate::input::{Button, InputSampler};
use crate::publisher::StatusPublisher;

/// Why a motion primitive stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// Home limit reached while guarded Toward_Home.
    LimitHome,
    /// Final limit reached while guarded Toward_Final.
    LimitFinal,
    /// Reset pressed — abandon the cycle.
    Reset,
    /// Axes were force-disabled from outside the control task.
    EmergencyStop,
    /// Control task shutdown requested.
    Shutdown,
}

/// Limit-switch guarding for the current motion segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitGuard {
    /// No motion, or motion that must ignore limits.
    None,
    /// Linear motion in the given direction; the facing limit ends the
    /// segment.
    Motion(StrokeDirection),
}

/// End of a guarded motion segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    HomeReached,
    FinalReached,
}

/// Supervisor verdict over one input picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    PauseInterlock,
    PauseStop,
    Abort,
    EndSegment(SegmentEnd),
}

/// Pure verdict evaluation. Precedence: abort, interlock, stop, limits.
pub fn verdict(
    reset_edge: bool,
    stop_edge: bool,
    safety_ok: bool,
    limit_home: bool,
    limit_final: bool,
    guard: LimitGuard,
) -> Verdict {
    if reset_edge {
        return Verdict::Abort;
    }
    if !safety_ok {
        return Verdict::PauseInterlock;
    }
    if stop_edge {
        return Verdict::PauseStop;
    }
    if let LimitGuard::Motion(direction) = guard {
        match direction {
            StrokeDirection::TowardHome if limit_home => {
                return Verdict::EndSegment(SegmentEnd::HomeReached);
            }
            StrokeDirection::TowardFinal if limit_final => {
                return Verdict::EndSegment(SegmentEnd::FinalReached);
            }
            _ => {}
        }
    }
    Verdict::Continue
}

/// Kind of blocking pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    Stop,
    Interlock,
}

/// Runtime context shared by every suspension point of the control task.
///
/// Owns the input sampler, the status publisher, the display sink, and
/// the command-channel consumer; motion code reaches all of them through
/// the yield hook.
pub struct Supervisor {
    pub gpio: Gpio,
    pub sampler: InputSampler,
    pub status: StatusPublisher,
    pub display: Box<dyn StatusDisplay>,
    rx: Receiver<Command>,
    estop: Arc<AtomicBool>,
    shutdown: bool,
    /// Mode/manual commands that arrived at a motion suspension point;
    /// handled once control returns to a dispatch loop.
    deferred: VecDeque<Command>,
    pins: PinMap,
    system: SystemParams,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gpio: Gpio,
        sampler: InputSampler,
        status: StatusPublisher,
        display: Box<dyn StatusDisplay>,
        rx: Receiver<Command>,
        estop: Arc<AtomicBool>,
        pins: PinMap,
        system: SystemParams,
    ) -> Self {
        Self {
            gpio,
            sampler,
            status,
            display,
            rx,
            estop,
            shutdown: false,
            deferred: VecDeque::new(),
            pins,
            system,
        }
    }

    #[inline]
    pub fn system(&self) -> &SystemParams {
        &self.system
    }

    #[inline]
    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    /// The emergency latch was tripped and not yet acknowledged.
    #[inline]
    pub fn estop_latched(&self) -> bool {
        self.estop.load(Ordering::Acquire)
    }

    /// Acknowledge the emergency latch once the axes are parked and the
    /// machine is back in Idle.
    pub fn clear_estop(&self) {
        self.estop.store(false, Ordering::Release);
    }

    /// Drain the command channel at a quiescent point.
    ///
    /// Virtual button commands become injected edges so the rest of the
    /// core sees one uniform edge source; mode and manual requests are
    /// deferred to the dispatch loops.
    pub fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Start => self.sampler.inject_press(Button::Start),
                Command::Stop => self.sampler.inject_press(Button::Stop),
                Command::Reset => self.sampler.inject_press(Button::Reset),
                // The coordinator already latched the flag and parked the
                // outputs; the message only wakes the task.
                Command::EmergencyStop => {}
                Command::Shutdown => self.shutdown = true,
                deferred @ (Command::SelectMode { .. } | Command::SetManual(_)) => {
                    debug!(?deferred, "command deferred to dispatch loop");
                    self.deferred.push_back(deferred);
                }
            }
        }
    }

    /// Next deferred dispatch command, if any.
    pub fn take_deferred(&mut self) -> Option<Command> {
        self.deferred.pop_front()
    }

    /// Re-queue a dispatch command at the front, for loops that hand a
    /// command back to the dispatch hub.
    pub fn defer_front(&mut self, command: Command) {
        self.deferred.push_front(command);
    }

    /// A clean shutdown was requested through the command channel.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Yield-hook body for all motion primitives.
    ///
    /// Returns `None` to continue the motion (possibly after a blocking
    /// pause), or the cause that must stop it.
    pub fn poll_motion(&mut self, guard: LimitGuard) -> Option<StopCause> {
        self.drain_commands();
        if self.shutdown {
            return Some(StopCause::Shutdown);
        }
        if self.estop_latched() {
            return Some(StopCause::EmergencyStop);
        }

        self.sampler.sample();
        let frame = self.sampler.frame();
        let reset_edge = self.sampler.rising_edge(Button::Reset);
        let stop_edge = self.sampler.rising_edge(Button::Stop);

        match verdict(
            reset_edge,
            stop_edge,
            frame.safety_ok,
            frame.limit_home,
            frame.limit_final,
            guard,
        ) {
            Verdict::Continue => None,
            Verdict::Abort => Some(StopCause::Reset),
            Verdict::EndSegment(SegmentEnd::HomeReached) => Some(StopCause::LimitHome),
            Verdict::EndSegment(SegmentEnd::FinalReached) => Some(StopCause::LimitFinal),
            Verdict::PauseInterlock => self.pause(PauseKind::Interlock),
            Verdict::PauseStop => self.pause(PauseKind::Stop),
        }
    }

    /// Blocking pause: park both axes, wait for a Start edge, settle,
    /// restore the direction lines.
    ///
    /// Returns `None` when motion may resume, or a cause that must
    /// propagate (Reset pressed during the pause, emergency, shutdown).
    pub fn pause(&mut self, kind: PauseKind) -> Option<StopCause> {
        match kind {
            PauseKind::Stop => info!("stop requested, pausing until Start"),
            PauseKind::Interlock => warn!("interlock open, pausing until Start"),
        }

        // Park both axes, remembering the direction levels so the stroke
        // resumes with a settled dir line.
        let dir_linear = self.gpio.read_digital(self.pins.dir_linear);
        let dir_drill = self.gpio.read_digital(self.pins.dir_drill);
        for pin in [
            self.pins.step_linear,
            self.pins.dir_linear,
            self.pins.step_drill,
            self.pins.dir_drill,
        ] {
            self.gpio.write_digital(pin, 0);
        }

        self.status.set_paused(true);
        self.display.show(match kind {
            PauseKind::Stop => "PAUSED",
            PauseKind::Interlock => "SAFETY PAUSE",
        });

        let exit = loop {
            self.drain_commands();
            if self.shutdown {
                break Some(StopCause::Shutdown);
            }
            if self.estop_latched() {
                break Some(StopCause::EmergencyStop);
            }
            self.sampler.sample();
            if self.sampler.rising_edge(Button::Reset) {
                break Some(StopCause::Reset);
            }
            if self.sampler.rising_edge(Button::Start) {
                break None;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        if exit.is_none() {
            info!(
                delay_ms = self.system.pause_resume_delay_ms,
                "resume acknowledged, settling"
            );
            std::thread::sleep(Duration::from_millis(self.system.pause_resume_delay_ms));
            self.gpio.write_digital(self.pins.dir_linear, dir_linear);
            self.gpio.write_digital(self.pins.dir_drill, dir_drill);
        }
        self.status.set_paused(false);
        exit
    }

    /// Inter-phase idle delay that keeps all suspension-point polling
    /// alive while waiting.
    pub fn idle_delay(&mut self, ms: u64) -> Option<StopCause> {
        let deadline = self.gpio.now_micros() + ms * 1_000;
        while self.gpio.now_micros() < deadline {
            if let Some(cause) = self.poll_motion(LimitGuard::None) {
                return Some(cause);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    /// Park both axis outputs low without touching channel state.
    pub fn park_outputs(&self) {
        for pin in [
            self.pins.step_linear,
            self.pins.dir_linear,
            self.pins.step_drill,
            self.pins.dir_drill,
        ] {
            self.gpio.write_digital(pin, 0);
        }
    }
}
