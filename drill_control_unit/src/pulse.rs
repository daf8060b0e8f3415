//! Pulse engine: half-period-timed step/dir generation per axis.
//!
//! Each axis owns a [`StepChannel`]. Edges are scheduled against the
//! monotonic microsecond clock: an edge toggles the step line once at
//! least one half-period has elapsed since the previous edge, and only
//! rising edges count as steps. Direction writes always precede the first
//! step edge of a stroke.
//!
//! The engine knows nothing about limits or the interlock; the yield hook
//! passed to the blocking primitives is the only cancellation point, and
//! the safety supervisor lives behind it.

use std::time::Duration;

use tracing::{debug, trace};

use drill_common::state::StrokeDirection;
use drill_hal::Gpio;

use crate::safety::StopCause;

/// Cap on a single in-loop sleep so the yield hook keeps its cadence even
/// at very slow half-periods.
const MAX_GAP_SLEEP_US: u64 = 500;

/// Outcome of a blocking motion primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Edges emitted before return: rising edges for `step_blocking`,
    /// raw edges for `burst`.
    pub edges_emitted: u32,
    /// Why the primitive returned early, if it did.
    pub halted: Option<StopCause>,
}

impl StepOutcome {
    /// The primitive ran to its configured count.
    #[inline]
    pub fn completed(&self) -> bool {
        self.halted.is_none()
    }
}

/// One step/dir output pair with its scheduling state.
#[derive(Debug)]
pub struct StepChannel {
    name: &'static str,
    step_pin: u8,
    dir_pin: u8,
    /// Flips the dir-pin polarity for this axis.
    invert: bool,
    enabled: bool,
    direction: StrokeDirection,
    half_period_us: u32,
    /// Current step-line level; steps are counted on 0→1 only.
    edge_level: u8,
    last_edge_at_us: u64,
    /// Rising edges emitted since construction.
    step_edges_emitted: u64,
}

impl StepChannel {
    pub fn new(name: &'static str, step_pin: u8, dir_pin: u8, invert: bool) -> Self {
        Self {
            name,
            step_pin,
            dir_pin,
            invert,
            enabled: false,
            direction: StrokeDirection::TowardFinal,
            half_period_us: 2_000,
            edge_level: 0,
            last_edge_at_us: 0,
            step_edges_emitted: 0,
        }
    }

    #[inline]
    fn dir_level(&self, direction: StrokeDirection) -> u8 {
        (direction as u8) ^ (self.invert as u8)
    }

    #[inline]
    pub fn direction(&self) -> StrokeDirection {
        self.direction
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rising edges emitted since construction.
    #[inline]
    pub fn step_edges_emitted(&self) -> u64 {
        self.step_edges_emitted
    }

    #[inline]
    pub fn set_half_period(&mut self, half_period_us: u32) {
        self.half_period_us = half_period_us;
    }

    /// Latch a travel direction.
    ///
    /// The dir pin is written immediately and the step line returns to 0,
    /// so the next emitted edge is a rising edge at least one half-period
    /// later; the driver sees a settled direction before the first step.
    pub fn set_direction(&mut self, gpio: &Gpio, direction: StrokeDirection) {
        self.direction = direction;
        gpio.write_digital(self.dir_pin, self.dir_level(direction));
        if self.edge_level != 0 {
            gpio.write_digital(self.step_pin, 0);
            self.edge_level = 0;
        }
        self.last_edge_at_us = gpio.now_micros();
        debug!(axis = self.name, ?direction, "direction latched");
    }

    /// Enable or disable edge generation.
    ///
    /// Disabling drives both step and dir lines to 0 immediately; enabling
    /// restores the dir line for the latched direction and restarts the
    /// half-period spacing from now.
    pub fn enable(&mut self, gpio: &Gpio, on: bool) {
        self.enabled = on;
        if on {
            gpio.write_digital(self.dir_pin, self.dir_level(self.direction));
            self.last_edge_at_us = gpio.now_micros();
        } else {
            gpio.write_digital(self.step_pin, 0);
            gpio.write_digital(self.dir_pin, 0);
            self.edge_level = 0;
        }
    }

    /// Non-blocking edge scheduling. Returns `true` when a rising edge was
    /// emitted (one counted step).
    #[inline]
    pub fn tick(&mut self, gpio: &Gpio, now_us: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if now_us.saturating_sub(self.last_edge_at_us) < self.half_period_us as u64 {
            return false;
        }
        self.edge_level ^= 1;
        gpio.write_digital(self.step_pin, self.edge_level);
        self.last_edge_at_us = now_us;
        if self.edge_level == 1 {
            self.step_edges_emitted += 1;
            true
        } else {
            false
        }
    }

    /// Microseconds until the next edge is due; 0 when already due.
    #[inline]
    pub fn micros_until_due(&self, now_us: u64) -> u64 {
        if !self.enabled {
            return u64::MAX;
        }
        (self.half_period_us as u64).saturating_sub(now_us.saturating_sub(self.last_edge_at_us))
    }

    /// Emit exactly `count` rising edges at `half_period_us`, calling the
    /// yield hook in the gap between edges.
    ///
    /// The hook is the sole cancellation point: a `Some` return stops the
    /// motion and the outcome carries the rising-edge count reached.
    pub fn step_blocking<F>(
        &mut self,
        gpio: &Gpio,
        count: u32,
        half_period_us: u32,
        mut yield_hook: F,
    ) -> StepOutcome
    where
        F: FnMut() -> Option<StopCause>,
    {
        self.set_half_period(half_period_us);
        if !self.enabled {
            self.enable(gpio, true);
        }

        let mut rising = 0u32;
        while rising < count {
            if let Some(cause) = yield_hook() {
                trace!(axis = self.name, rising, ?cause, "blocking step halted");
                return StepOutcome {
                    edges_emitted: rising,
                    halted: Some(cause),
                };
            }
            let now = gpio.now_micros();
            if self.tick(gpio, now) {
                rising += 1;
            } else {
                sleep_gap(self.micros_until_due(now));
            }
        }
        StepOutcome {
            edges_emitted: rising,
            halted: None,
        }
    }

    /// Emit exactly `edges` raw edges (rising and falling both counted) at
    /// `half_period_us`. Used for the Cycle-2 drill bursts, which the
    /// machine counts in edges rather than full steps.
    pub fn burst<F>(
        &mut self,
        gpio: &Gpio,
        edges: u32,
        half_period_us: u32,
        mut yield_hook: F,
    ) -> StepOutcome
    where
        F: FnMut() -> Option<StopCause>,
    {
        self.set_half_period(half_period_us);
        if !self.enabled {
            self.enable(gpio, true);
        }

        let mut emitted = 0u32;
        while emitted < edges {
            if let Some(cause) = yield_hook() {
                trace!(axis = self.name, emitted, ?cause, "burst halted");
                return StepOutcome {
                    edges_emitted: emitted,
                    halted: Some(cause),
                };
            }
            let now = gpio.now_micros();
            let before = self.edge_level;
            if self.tick(gpio, now) || self.edge_level != before {
                emitted += 1;
            } else {
                sleep_gap(self.micros_until_due(now));
            }
        }
        StepOutcome {
            edges_emitted: emitted,
            halted: None,
        }
    }
}

#[inline]
pub(crate) fn sleep_gap(due_in_us: u64) {
    let wait = due_in_us.min(MAX_GAP_SLEEP_US);
    if wait > 0 {
        std::thread::sleep(Duration::from_micros(wait));
    }
}
