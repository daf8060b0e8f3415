#![allow(dead_code)] // each suite uses its own slice of the harness

//! Shared harness for the integration suites.
//!
//! Runs the control task against the in-process simulator with scaled
//! timing so full cycles finish in milliseconds. The harness plays the
//! machine: it watches the step-pin edge counters and asserts the home
//! limit when the carriage "reaches" it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use drill_common::config::{ModeParams, PinMap, StationConfig, SystemParams};
use drill_common::state::Phase;
use drill_common::status::StatusSnapshot;
use drill_control_unit::{AlwaysPermitted, ControlTask, Coordinator, LogDisplay, OperationPermit};
use drill_hal::{Gpio, SimGpio};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scaled-down station: small step counts, sub-millisecond half-periods.
///
/// Mode 1 runs a complete cycle quickly; mode 2 has a Cycle-1 long enough
/// to interrupt; mode 3 reaches Cycle-2 fast and then strokes for a long
/// time.
pub fn test_config() -> StationConfig {
    let quick = ModeParams {
        steps_cycle1: 6,
        steps_intermediate: 3,
        steps_cycle2: 8,
        revolutions_level1: 2,
        revolutions_level2: 4,
        linear_half_period_us: 150,
        drill_half_period_us: 120,
    };
    let long_cycle1 = ModeParams {
        steps_cycle1: 50_000,
        revolutions_level1: 100_000,
        ..quick
    };
    let long_cycle2 = ModeParams {
        steps_cycle1: 4,
        revolutions_level1: 1,
        steps_cycle2: 50_000,
        ..quick
    };

    StationConfig {
        backend: "sim".to_string(),
        simulator_addr: "127.0.0.1:8100".to_string(),
        pins: PinMap::default(),
        modes: vec![quick, long_cycle1, long_cycle2, quick, quick],
        system: SystemParams {
            home_rebound_steps: 4,
            limit_rebound_steps: 5,
            limit_rebound_half_period_us: 120,
            home_half_period_us: 120,
            drill_burst_half_period_us: 100,
            drill_burst_step_edges: 6,
            spindle_revolutions_cycle2_bursts: 2,
            pulses_per_spindle_revolution: 5,
            pre_cycle_drill_warmup_ms: 30,
            pause_resume_delay_ms: 40,
            manual_velocity_slow_us: 400,
            manual_velocity_fast_us: 150,
            joystick_low_threshold: 352,
            joystick_high_threshold: 652,
            linear_direction_invert: false,
            drill_direction_invert: false,
            cycle_direction_invert: false,
        },
    }
}

pub struct Station {
    pub coordinator: Coordinator,
    pub sim: SimGpio,
    pub pins: PinMap,
    handle: Option<JoinHandle<()>>,
}

/// Start a station with the scaled config and complete the startup homing.
pub fn start_station() -> Station {
    start_with_permit(test_config(), Box::new(AlwaysPermitted))
}

/// Start with an externally controlled permit gate.
pub fn start_gated(gate: Arc<AtomicBool>) -> Station {
    let permit = move || gate.load(Ordering::Acquire);
    start_with_permit(test_config(), Box::new(permit))
}

pub fn start_with_permit(config: StationConfig, permit: Box<dyn OperationPermit>) -> Station {
    let pins = config.pins;
    let sim = SimGpio::new(&pins);
    let (coordinator, handle) = ControlTask::spawn_with_gpio(
        config,
        Gpio::Sim(sim.clone()),
        permit,
        Box::new(LogDisplay),
    )
    .expect("control task must start");

    let station = Station {
        coordinator,
        sim,
        pins,
        handle: Some(handle),
    };
    // Power-up homing runs immediately.
    station.complete_homing();
    station.wait_for(|s| s.phase == Phase::Idle, "idle after startup homing");
    station
}

impl Station {
    /// Block until the published snapshot satisfies the predicate.
    pub fn wait_for(&self, pred: impl Fn(StatusSnapshot) -> bool, what: &str) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let snapshot = self.coordinator.snapshot();
            if pred(snapshot) {
                return;
            }
            if Instant::now() > deadline {
                panic!("timeout waiting for {what}; last snapshot: {snapshot:?}");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Linear step-pin rising edges observed so far.
    pub fn linear_edges(&self) -> u64 {
        self.sim.rising_edges(self.pins.step_linear)
    }

    /// Drill step-pin rising edges observed so far.
    pub fn drill_edges(&self) -> u64 {
        self.sim.rising_edges(self.pins.step_drill)
    }

    /// Block until the linear edge counter passes `target`.
    pub fn wait_linear_edges(&self, target: u64, what: &str) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while self.linear_edges() < target {
            if Instant::now() > deadline {
                panic!(
                    "timeout waiting for {what}; edges {} < {target}",
                    self.linear_edges()
                );
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    /// Play the machine through one homing phase: once the carriage has
    /// emitted at least one seek edge, trip the home limit; release it
    /// after the rebound finishes and the phase moves on.
    pub fn complete_homing(&self) {
        self.wait_for(|s| s.phase == Phase::Homing, "homing phase");
        let base = self.linear_edges();
        self.wait_linear_edges(base + 1, "homing seek motion");
        self.sim.set_limit(self.pins.limit_home, true);
        self.wait_for(|s| s.phase != Phase::Homing, "homing completion");
        self.sim.set_limit(self.pins.limit_home, false);
    }

    /// Request a clean shutdown and join the control thread.
    pub fn stop(mut self) {
        let _ = self.coordinator.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("control task must exit cleanly");
        }
    }
}
