//! The control task: single owner of all mutable motion state.
//!
//! One high-priority thread owns the GPIO backend, the input sampler,
//! both pulse channels, and the cycle context. Everything else talks to
//! it through the bounded command channel and reads the published status
//! snapshot. The task alternates between short blocking motion primitives
//! and the dispatch hub below; commands are consumed at the suspension
//! points only.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use drill_common::command::{Command, COMMAND_QUEUE_CAPACITY};
use drill_common::config::{ModeParams, StationConfig};
use drill_common::error::CoreError;
use drill_common::state::{Phase, StatusError};
use drill_common::status::StatusCell;
use drill_hal::Gpio;

use crate::coordinator::Coordinator;
use crate::cycle::{self, CycleContext, CycleOutcome};
use crate::external::{OperationPermit, StatusDisplay};
use crate::input::{Button, InputSampler};
use crate::manual::ManualController;
use crate::publisher::StatusPublisher;
use crate::pulse::StepChannel;
use crate::safety::{StopCause, Supervisor};

/// Control flow of the dispatch hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
    Fatal,
}

/// Exit reasons of the waiting loop.
#[derive(Debug)]
enum WaitExit {
    StartCycle,
    Rebind(u8, ModeParams),
    Manual,
    Reset,
    EmergencyStop,
    Shutdown,
}

/// Homing attempts until a hard cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HomeOutcome {
    Homed,
    EmergencyStop,
    Shutdown,
    Fatal,
}

pub struct ControlTask {
    sup: Supervisor,
    linear: StepChannel,
    drill: StepChannel,
    config: StationConfig,
    permit: Box<dyn OperationPermit>,
    ctx: Option<CycleContext>,
}

impl ControlTask {
    /// Resolve the configured backend and start the control thread.
    pub fn spawn(
        config: StationConfig,
        permit: Box<dyn OperationPermit>,
        display: Box<dyn StatusDisplay>,
    ) -> Result<(Coordinator, JoinHandle<()>), CoreError> {
        config.validate()?;
        let gpio = drill_hal::resolve(&config)
            .map_err(|e| CoreError::HardwareUnavailable(e.to_string()))?;
        Self::spawn_with_gpio(config, gpio, permit, display)
    }

    /// Start the control thread on an already-resolved backend.
    pub fn spawn_with_gpio(
        config: StationConfig,
        gpio: Gpio,
        permit: Box<dyn OperationPermit>,
        display: Box<dyn StatusDisplay>,
    ) -> Result<(Coordinator, JoinHandle<()>), CoreError> {
        config.validate()?;

        let (tx, rx) = mpsc::sync_channel(COMMAND_QUEUE_CAPACITY);
        let cell = Arc::new(StatusCell::new());
        let estop = Arc::new(AtomicBool::new(false));

        let sampler = InputSampler::new(gpio.clone(), config.pins, config.system);
        let status = StatusPublisher::new(Arc::clone(&cell));
        let sup = Supervisor::new(
            gpio.clone(),
            sampler,
            status,
            display,
            rx,
            Arc::clone(&estop),
            config.pins,
            config.system,
        );
        let linear = StepChannel::new(
            "linear",
            config.pins.step_linear,
            config.pins.dir_linear,
            config.system.linear_direction_invert,
        );
        let drill = StepChannel::new(
            "drill",
            config.pins.step_drill,
            config.pins.dir_drill,
            config.system.drill_direction_invert,
        );

        let coordinator = Coordinator::new(
            tx,
            cell,
            estop,
            gpio,
            config.pins,
            config.modes.clone(),
        );
        let task = Self {
            sup,
            linear,
            drill,
            config,
            permit,
            ctx: None,
        };
        let handle = std::thread::Builder::new()
            .name("drill-control".to_string())
            .spawn(move || task.run())
            .map_err(|e| CoreError::Fault(format!("failed to spawn control task: {e}")))?;

        Ok((coordinator, handle))
    }

    /// The control loop. Returns when a shutdown command arrives or a
    /// fatal fault parks the machine.
    pub fn run(mut self) {
        info!("control task up, homing");
        match self.home_to_idle() {
            Flow::Continue => {}
            Flow::Shutdown => {
                self.park_and_exit();
                return;
            }
            Flow::Fatal => return,
        }

        loop {
            let flow = self.dispatch_tick();
            match flow {
                Flow::Continue => std::thread::sleep(Duration::from_millis(1)),
                Flow::Shutdown => {
                    self.park_and_exit();
                    return;
                }
                Flow::Fatal => return,
            }
        }
    }

    /// One iteration of the dispatch hub (machine in Idle).
    fn dispatch_tick(&mut self) -> Flow {
        self.sup.drain_commands();
        if self.sup.shutdown_requested() {
            return Flow::Shutdown;
        }
        if self.sup.estop_latched() {
            return self.estop_to_idle();
        }

        self.sup.sampler.sample();
        // Start/Stop have no meaning in Idle; consume stale edges so they
        // cannot fire later in Waiting.
        let _ = self.sup.sampler.rising_edge(Button::Start);
        let _ = self.sup.sampler.rising_edge(Button::Stop);
        if self.sup.sampler.rising_edge(Button::Reset) {
            return self.home_to_idle();
        }

        while let Some(command) = self.sup.take_deferred() {
            match command {
                Command::SelectMode {
                    index,
                    params: Some(params),
                } => return self.automatic(index, params),
                Command::SelectMode { index, params: None } => {
                    match self.config.mode(index).copied() {
                        Some(params) => return self.automatic(index, params),
                        None => warn!(index, "select for unknown mode dropped"),
                    }
                }
                Command::SetManual(true) => return self.manual_session(),
                Command::SetManual(false) => {}
                other => warn!(?other, "unexpected deferred command"),
            }
        }
        Flow::Continue
    }

    // ── Automatic mode ──────────────────────────────────────────────

    /// Bind a mode, home, wait for Start, run the cycle.
    fn automatic(&mut self, index: u8, params: ModeParams) -> Flow {
        let mut index = index;
        let mut params = params;
        loop {
            info!(mode = index, "mode bound");
            self.ctx = Some(CycleContext::new(index, params));
            self.sup.status.set_mode(index);
            self.sup.status.set_error(StatusError::None);

            match self.go_home() {
                HomeOutcome::Homed => {}
                HomeOutcome::EmergencyStop => return self.estop_to_idle(),
                HomeOutcome::Shutdown => return Flow::Shutdown,
                HomeOutcome::Fatal => return self.fault("homing hit the final limit"),
            }

            match self.waiting() {
                WaitExit::StartCycle => {
                    let mut ctx = match self.ctx.take() {
                        Some(ctx) => ctx,
                        None => return self.fault("start accepted without a bound mode"),
                    };
                    let outcome = cycle::run_automatic(
                        &mut self.sup,
                        &mut self.linear,
                        &mut self.drill,
                        &mut ctx,
                    );
                    self.ctx = Some(ctx);
                    return match outcome {
                        CycleOutcome::Completed
                        | CycleOutcome::Halted(StopCause::Reset)
                        | CycleOutcome::Halted(StopCause::LimitHome)
                        | CycleOutcome::Halted(StopCause::LimitFinal) => self.home_to_idle(),
                        CycleOutcome::Halted(StopCause::EmergencyStop) => self.estop_to_idle(),
                        CycleOutcome::Halted(StopCause::Shutdown) => Flow::Shutdown,
                    };
                }
                WaitExit::Rebind(next_index, next_params) => {
                    index = next_index;
                    params = next_params;
                }
                WaitExit::Manual => {
                    // Manual requires an idle cycle context; hand the
                    // request back to the hub after unbinding.
                    self.clear_binding();
                    self.sup.defer_front(Command::SetManual(true));
                    return Flow::Continue;
                }
                WaitExit::Reset => return self.home_to_idle(),
                WaitExit::EmergencyStop => return self.estop_to_idle(),
                WaitExit::Shutdown => return Flow::Shutdown,
            }
        }
    }

    /// Workpiece-load wait. Exits on a Start edge with the interlock
    /// closed and the external permit granted.
    fn waiting(&mut self) -> WaitExit {
        self.ctx_phase(Phase::Waiting);
        self.sup.display.show("LOAD WORKPIECE");
        self.sup.display.show("PRESS START");

        // Drop edges that predate the wait.
        let _ = self.sup.sampler.rising_edge(Button::Start);
        let _ = self.sup.sampler.rising_edge(Button::Stop);

        loop {
            self.sup.drain_commands();
            if self.sup.shutdown_requested() {
                return WaitExit::Shutdown;
            }
            if self.sup.estop_latched() {
                return WaitExit::EmergencyStop;
            }
            while let Some(command) = self.sup.take_deferred() {
                match command {
                    Command::SelectMode {
                        index,
                        params: Some(params),
                    } => return WaitExit::Rebind(index, params),
                    Command::SelectMode { index, params: None } => {
                        match self.config.mode(index).copied() {
                            Some(params) => return WaitExit::Rebind(index, params),
                            None => warn!(index, "select for unknown mode dropped"),
                        }
                    }
                    Command::SetManual(true) => return WaitExit::Manual,
                    Command::SetManual(false) => {}
                    other => warn!(?other, "unexpected deferred command"),
                }
            }

            self.sup.sampler.sample();
            if self.sup.sampler.rising_edge(Button::Reset) {
                return WaitExit::Reset;
            }
            let _ = self.sup.sampler.rising_edge(Button::Stop);
            if self.sup.sampler.rising_edge(Button::Start) {
                let frame = self.sup.sampler.frame();
                if !frame.safety_ok {
                    warn!("start ignored, interlock open");
                } else if !self.permit.permitted() {
                    warn!("start refused, operation permit denied");
                    self.sup.status.set_error(StatusError::PermitDenied);
                    self.sup.display.show("OPERATION NOT PERMITTED");
                } else {
                    self.sup.status.set_error(StatusError::None);
                    return WaitExit::StartCycle;
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // ── Manual mode ─────────────────────────────────────────────────

    fn manual_session(&mut self) -> Flow {
        // Manual runs only with an idle cycle context; keep the bound
        // drill speed if a mode was just active, else the first mode's.
        let drill_half = self
            .ctx
            .as_ref()
            .map(|ctx| ctx.params.drill_half_period_us)
            .unwrap_or(self.config.modes[0].drill_half_period_us);
        self.clear_binding();
        self.sup.status.set_phase(Phase::Idle);
        self.sup.status.set_manual(true);
        self.sup.display.show("MANUAL");
        info!("manual mode on");

        let mut manual = ManualController::new(drill_half);
        let flow = loop {
            if let Some(cause) =
                manual.service(&mut self.sup, &mut self.linear, &mut self.drill)
            {
                match cause {
                    StopCause::Reset => {
                        manual.deactivate(&self.sup, &mut self.linear, &mut self.drill);
                        self.sup.status.set_manual(false);
                        return self.home_to_idle();
                    }
                    StopCause::EmergencyStop => {
                        manual.deactivate(&self.sup, &mut self.linear, &mut self.drill);
                        self.sup.status.set_manual(false);
                        return self.estop_to_idle();
                    }
                    StopCause::Shutdown => break Flow::Shutdown,
                    // A rebound ran into its own guard; the axis is
                    // already stopped, manual stays active.
                    StopCause::LimitHome | StopCause::LimitFinal => {}
                }
            }
            let mut leave = None;
            while let Some(command) = self.sup.take_deferred() {
                match command {
                    Command::SetManual(false) => leave = Some(Flow::Continue),
                    select @ Command::SelectMode { .. } => {
                        self.sup.defer_front(select);
                        leave = Some(Flow::Continue);
                    }
                    Command::SetManual(true) => {}
                    other => warn!(?other, "unexpected deferred command"),
                }
            }
            if let Some(flow) = leave {
                break flow;
            }
        };

        manual.deactivate(&self.sup, &mut self.linear, &mut self.drill);
        self.sup.status.set_manual(false);
        info!("manual mode off");
        flow
    }

    // ── Shared transitions ──────────────────────────────────────────

    fn go_home(&mut self) -> HomeOutcome {
        self.ctx_phase(Phase::Homing);
        loop {
            match cycle::find_home(&mut self.sup, &mut self.linear) {
                None => return HomeOutcome::Homed,
                Some(StopCause::Reset) => {
                    info!("reset during homing, restarting the search");
                }
                Some(StopCause::EmergencyStop) => return HomeOutcome::EmergencyStop,
                Some(StopCause::Shutdown) => return HomeOutcome::Shutdown,
                Some(StopCause::LimitHome) | Some(StopCause::LimitFinal) => {
                    return HomeOutcome::Fatal;
                }
            }
        }
    }

    /// Home the axis, then publish a clean Idle.
    fn home_to_idle(&mut self) -> Flow {
        match self.go_home() {
            HomeOutcome::Homed => {
                self.clear_binding();
                self.sup.status.set_error(StatusError::None);
                self.sup.status.set_idle();
                self.sup.display.show("READY");
                Flow::Continue
            }
            HomeOutcome::EmergencyStop => self.estop_to_idle(),
            HomeOutcome::Shutdown => Flow::Shutdown,
            HomeOutcome::Fatal => self.fault("homing hit the final limit"),
        }
    }

    /// Emergency path: axes are already force-disabled; drop straight to
    /// Idle without homing and re-arm the latch.
    fn estop_to_idle(&mut self) -> Flow {
        warn!("emergency stop acknowledged, machine idle without homing");
        self.sup.park_outputs();
        self.clear_binding();
        self.sup.clear_estop();
        self.sup.status.set_error(StatusError::None);
        self.sup.status.set_idle();
        self.sup.display.show("EMERGENCY STOP");
        Flow::Continue
    }

    /// Unrecoverable failure: park everything and publish the terminal
    /// state. Recovery requires an external restart.
    fn fault(&mut self, why: &str) -> Flow {
        error!(why, "control fault, parking axes");
        self.sup.park_outputs();
        self.clear_binding();
        self.sup.status.set_error(StatusError::Fault);
        self.sup.status.set_phase(Phase::Fault);
        self.sup.display.show("FAULT");
        Flow::Fatal
    }

    fn clear_binding(&mut self) {
        self.ctx = None;
        self.sup.status.set_mode(0);
    }

    fn ctx_phase(&mut self, phase: Phase) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.phase = phase;
            ctx.linear_step_count = 0;
        }
        self.sup.status.set_phase(phase);
    }

    fn park_and_exit(&mut self) {
        self.sup.park_outputs();
        self.clear_binding();
        self.sup.status.set_idle();
        info!("control task down");
    }
}
