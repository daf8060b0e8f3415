//! Manual controller: joystick-driven velocity control.
//!
//! Active only while no cycle is bound. The joystick's outer bands drive
//! the linear axis at the mapped half-period; before pulsing toward a
//! limit the relevant switch is checked, and an already-triggered limit
//! turns the request into a counted rebound away from the switch. The
//! drill toggles on the drill-button press with a short lockout against
//! contact chatter.

use tracing::{debug, info};

use drill_common::state::StrokeDirection;

use crate::cycle::DRILL_SPIN;
use crate::input::{Button, JoystickCommand};
use crate::pulse::{sleep_gap, StepChannel};
use crate::safety::{LimitGuard, StopCause, Supervisor};

/// Ignore further drill-button edges for this long after a toggle.
const DRILL_TOGGLE_LOCKOUT_US: u64 = 50_000;

/// Per-entry state of manual operation.
pub struct ManualController {
    drill_on: bool,
    last_toggle_at_us: u64,
    drill_half_period_us: u32,
}

impl ManualController {
    /// `drill_half_period_us` is the spin speed the drill toggle uses:
    /// the bound mode's value when one is bound, the first mode's
    /// otherwise.
    pub fn new(drill_half_period_us: u32) -> Self {
        Self {
            drill_on: false,
            last_toggle_at_us: 0,
            drill_half_period_us,
        }
    }

    /// One control-loop iteration of manual operation.
    ///
    /// Returns the cause that must end manual mode, or `None` to keep
    /// iterating.
    pub fn service(
        &mut self,
        sup: &mut Supervisor,
        linear: &mut StepChannel,
        drill: &mut StepChannel,
    ) -> Option<StopCause> {
        let gpio = sup.gpio.clone();

        // Interlock, stop, reset, and pending commands; no limit guard,
        // manual limit handling rebounds instead of ending a segment.
        if let Some(cause) = sup.poll_motion(LimitGuard::None) {
            return Some(cause);
        }

        match sup.sampler.joystick() {
            JoystickCommand::Neutral => {
                if linear.is_enabled() {
                    linear.enable(&gpio, false);
                }
            }
            JoystickCommand::Move {
                direction,
                half_period_us,
            } => {
                let frame = sup.sampler.frame();
                let limit_hit = match direction {
                    StrokeDirection::TowardHome => frame.limit_home,
                    StrokeDirection::TowardFinal => frame.limit_final,
                };
                if limit_hit {
                    if let Some(cause) = rebound(sup, linear, direction) {
                        return Some(cause);
                    }
                } else {
                    if !linear.is_enabled() || linear.direction() != direction {
                        linear.set_direction(&gpio, direction);
                        linear.enable(&gpio, true);
                    }
                    linear.set_half_period(half_period_us);
                    linear.tick(&gpio, gpio.now_micros());
                }
            }
        }

        let now = gpio.now_micros();
        if sup.sampler.rising_edge(Button::Drill)
            && now.saturating_sub(self.last_toggle_at_us) >= DRILL_TOGGLE_LOCKOUT_US
        {
            self.last_toggle_at_us = now;
            self.drill_on = !self.drill_on;
            if self.drill_on {
                info!(half_period_us = self.drill_half_period_us, "drill on");
                drill.set_direction(&gpio, DRILL_SPIN);
                drill.set_half_period(self.drill_half_period_us);
                drill.enable(&gpio, true);
            } else {
                info!("drill off");
                drill.enable(&gpio, false);
            }
        }
        if self.drill_on {
            drill.tick(&gpio, gpio.now_micros());
        }

        let now = gpio.now_micros();
        sleep_gap(
            linear
                .micros_until_due(now)
                .min(drill.micros_until_due(now))
                .min(1_000),
        );
        None
    }

    /// Leave manual mode: stop both axes and drop the drill latch.
    pub fn deactivate(
        &mut self,
        sup: &Supervisor,
        linear: &mut StepChannel,
        drill: &mut StepChannel,
    ) {
        let gpio = sup.gpio.clone();
        linear.enable(&gpio, false);
        drill.enable(&gpio, false);
        self.drill_on = false;
    }
}

/// Counted bounce-back away from an already-triggered limit.
fn rebound(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    commanded: StrokeDirection,
) -> Option<StopCause> {
    let gpio = sup.gpio.clone();
    let steps = sup.system().limit_rebound_steps;
    let half = sup.system().limit_rebound_half_period_us;
    let back = commanded.reversed();
    debug!(?commanded, steps, "limit triggered, rebounding");

    linear.set_direction(&gpio, back);
    let outcome =
        linear.step_blocking(&gpio, steps, half, || sup.poll_motion(LimitGuard::Motion(back)));
    linear.enable(&gpio, false);
    outcome.halted
}
