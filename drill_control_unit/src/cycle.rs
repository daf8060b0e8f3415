//! Cycle state machine: homing and the multi-phase drilling sequence.
//!
//! Phase order: `Homing → Waiting → Cycle1 → Intermediate → Cycle2 →
//! Unload`, with Waiting owned by the dispatch loop in the runner and the
//! rest executed here. All motion goes through the pulse channels with the
//! supervisor's `poll_motion` as the yield hook, so every phase can be
//! paused, aborted, or shut down between any two edges.

use tracing::{debug, info};

use drill_common::config::{ModeParams, SystemParams};
use drill_common::state::{Phase, StrokeDirection};

use crate::pulse::{sleep_gap, StepChannel};
use crate::safety::{LimitGuard, StopCause, Supervisor};

/// Mutable context of one bound drilling cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Bound mode index (1..=5).
    pub selected_mode: u8,
    /// Mode parameters, immutable for the lifetime of the binding.
    pub params: ModeParams,
    pub phase: Phase,
    pub stroke_direction: StrokeDirection,
    /// Rising linear edges within the current stroke; reset on every
    /// direction flip and phase transition.
    pub linear_step_count: u32,
    /// Rising drill edges accumulated toward the next counted revolution.
    pub drill_edge_accum: u32,
    /// Revolutions in Cycle-1; burst count in Cycle-2.
    pub spindle_rev_count: u32,
    pub termination_pending: bool,
}

impl CycleContext {
    pub fn new(selected_mode: u8, params: ModeParams) -> Self {
        Self {
            selected_mode,
            params,
            phase: Phase::Idle,
            stroke_direction: StrokeDirection::TowardFinal,
            linear_step_count: 0,
            drill_edge_accum: 0,
            spindle_rev_count: 0,
            termination_pending: false,
        }
    }
}

/// Result of a full automatic sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Ran through Unload and the operator pressed Reset.
    Completed,
    /// Stopped early; the runner decides the recovery path.
    Halted(StopCause),
}

/// The "away" travel direction of the cycle phases. Mirrored
/// installations flip the whole cycle frame with one flag instead of
/// negating each phase separately.
#[inline]
pub fn cycle_away(system: &SystemParams) -> StrokeDirection {
    if system.cycle_direction_invert {
        StrokeDirection::TowardHome
    } else {
        StrokeDirection::TowardFinal
    }
}

/// Nominal drill spin direction; polarity inversion is the channel's job.
pub(crate) const DRILL_SPIN: StrokeDirection = StrokeDirection::TowardFinal;

// ─── Homing ─────────────────────────────────────────────────────────

/// Drive toward the home limit, then rebound a fixed step count away.
///
/// Returns `None` once the axis rests at the working home position.
/// Stop and interlock stay observed throughout, including the rebound.
pub fn find_home(sup: &mut Supervisor, linear: &mut StepChannel) -> Option<StopCause> {
    let gpio = sup.gpio.clone();
    let system = *sup.system();
    sup.display.show("FINDING HOME");
    info!("homing: seeking home limit");

    linear.set_direction(&gpio, StrokeDirection::TowardHome);
    let seek = linear.step_blocking(&gpio, u32::MAX, system.home_half_period_us, || {
        sup.poll_motion(LimitGuard::Motion(StrokeDirection::TowardHome))
    });
    match seek.halted {
        Some(StopCause::LimitHome) => {}
        Some(other) => {
            linear.enable(&gpio, false);
            return Some(other);
        }
        // u32::MAX edges without a limit hit cannot complete in practice.
        None => {
            linear.enable(&gpio, false);
            return Some(StopCause::Shutdown);
        }
    }

    info!(
        steps = system.home_rebound_steps,
        "homing: limit found, rebounding"
    );
    linear.set_direction(&gpio, StrokeDirection::TowardFinal);
    let rebound = linear.step_blocking(
        &gpio,
        system.home_rebound_steps,
        system.home_half_period_us,
        || sup.poll_motion(LimitGuard::Motion(StrokeDirection::TowardFinal)),
    );
    linear.enable(&gpio, false);

    if rebound.halted.is_none() {
        sup.display.show("HOME");
        info!("homing complete");
    }
    rebound.halted
}

// ─── Automatic sequence ─────────────────────────────────────────────

/// Execute the bound cycle from the post-Start point through Unload.
pub fn run_automatic(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    drill: &mut StepChannel,
    ctx: &mut CycleContext,
) -> CycleOutcome {
    sup.status.set_running(true);
    let halted = execute_phases(sup, linear, drill, ctx);

    let gpio = sup.gpio.clone();
    linear.enable(&gpio, false);
    drill.enable(&gpio, false);
    sup.status.set_running(false);

    match halted {
        None => CycleOutcome::Completed,
        Some(cause) => {
            info!(?cause, phase = ?ctx.phase, "cycle halted");
            CycleOutcome::Halted(cause)
        }
    }
}

fn execute_phases(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    drill: &mut StepChannel,
    ctx: &mut CycleContext,
) -> Option<StopCause> {
    enter_phase(sup, ctx, Phase::Cycle1);
    sup.display.show("CYCLE 1");
    if let Some(cause) = warmup(sup, drill, ctx) {
        return Some(cause);
    }
    if let Some(cause) = cycle1(sup, linear, drill, ctx) {
        return Some(cause);
    }

    enter_phase(sup, ctx, Phase::Intermediate);
    sup.display.show("ADVANCING LEVEL");
    if let Some(cause) = intermediate(sup, linear, ctx) {
        return Some(cause);
    }

    enter_phase(sup, ctx, Phase::Cycle2);
    sup.display.show("CYCLE 2");
    if let Some(cause) = cycle2(sup, linear, drill, ctx) {
        return Some(cause);
    }

    enter_phase(sup, ctx, Phase::Unload);
    sup.status.set_running(false);
    unload(sup)
}

fn enter_phase(sup: &mut Supervisor, ctx: &mut CycleContext, phase: Phase) {
    ctx.phase = phase;
    ctx.linear_step_count = 0;
    sup.status.set_phase(phase);
    debug!(?phase, mode = ctx.selected_mode, "phase entered");
}

/// Drill-only spin-up before the first Cycle-1 stroke.
fn warmup(sup: &mut Supervisor, drill: &mut StepChannel, ctx: &CycleContext) -> Option<StopCause> {
    let gpio = sup.gpio.clone();
    let warmup_ms = sup.system().pre_cycle_drill_warmup_ms;

    drill.set_direction(&gpio, DRILL_SPIN);
    drill.set_half_period(ctx.params.drill_half_period_us);
    drill.enable(&gpio, true);

    let deadline = gpio.now_micros() + warmup_ms * 1_000;
    while gpio.now_micros() < deadline {
        if let Some(cause) = sup.poll_motion(LimitGuard::None) {
            return Some(cause);
        }
        let now = gpio.now_micros();
        drill.tick(&gpio, now);
        sleep_gap(drill.micros_until_due(gpio.now_micros()));
    }
    None
}

/// Reciprocating strokes with the drill running concurrently; spindle
/// revolutions counted from drill rising edges.
fn cycle1(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    drill: &mut StepChannel,
    ctx: &mut CycleContext,
) -> Option<StopCause> {
    let gpio = sup.gpio.clone();
    let params = ctx.params;
    let pulses_per_rev = sup.system().pulses_per_spindle_revolution;
    let away = cycle_away(sup.system());

    ctx.stroke_direction = away;
    ctx.termination_pending = false;
    ctx.drill_edge_accum = 0;
    ctx.spindle_rev_count = 0;
    sup.status.set_revolutions(0);

    drill.set_half_period(params.drill_half_period_us);
    if !drill.is_enabled() {
        drill.set_direction(&gpio, DRILL_SPIN);
        drill.enable(&gpio, true);
    }

    loop {
        let direction = ctx.stroke_direction;
        linear.set_direction(&gpio, direction);
        linear.set_half_period(params.linear_half_period_us);
        linear.enable(&gpio, true);
        ctx.linear_step_count = 0;

        while ctx.linear_step_count < params.steps_cycle1 {
            if let Some(cause) = sup.poll_motion(LimitGuard::Motion(direction)) {
                return Some(cause);
            }
            let now = gpio.now_micros();
            if linear.tick(&gpio, now) {
                ctx.linear_step_count += 1;
            }
            if drill.tick(&gpio, now) {
                ctx.drill_edge_accum += 1;
                if ctx.drill_edge_accum >= pulses_per_rev {
                    ctx.drill_edge_accum = 0;
                    ctx.spindle_rev_count += 1;
                    sup.status.set_revolutions(ctx.spindle_rev_count);
                    sup.display
                        .show(&format!("REVOLUTIONS {}", ctx.spindle_rev_count));
                }
            }
            let now = gpio.now_micros();
            sleep_gap(
                linear
                    .micros_until_due(now)
                    .min(drill.micros_until_due(now)),
            );
        }

        if ctx.spindle_rev_count >= params.revolutions_level1 {
            ctx.termination_pending = true;
        }
        if stroke_terminates(ctx, away) {
            break;
        }
        ctx.stroke_direction = ctx.stroke_direction.reversed();
    }

    linear.enable(&gpio, false);
    drill.enable(&gpio, false);
    info!(
        revolutions = ctx.spindle_rev_count,
        "cycle 1 complete"
    );
    None
}

/// Termination boundary rule shared by both reciprocating phases: a cycle
/// may only end on a completed away stroke once termination is pending.
#[inline]
fn stroke_terminates(ctx: &CycleContext, away: StrokeDirection) -> bool {
    ctx.termination_pending && ctx.stroke_direction == away
}

/// One-way advance to the second drilling level.
fn intermediate(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    ctx: &mut CycleContext,
) -> Option<StopCause> {
    if let Some(cause) = sup.idle_delay(1_000) {
        return Some(cause);
    }

    let gpio = sup.gpio.clone();
    let away = cycle_away(sup.system());
    linear.set_direction(&gpio, away);
    let outcome = linear.step_blocking(
        &gpio,
        ctx.params.steps_intermediate,
        ctx.params.linear_half_period_us,
        || sup.poll_motion(LimitGuard::Motion(away)),
    );
    ctx.linear_step_count = outcome.edges_emitted;
    linear.enable(&gpio, false);
    outcome.halted
}

/// Reciprocating strokes with a drill burst after each completed away
/// stroke. `spindle_rev_count` counts bursts here.
fn cycle2(
    sup: &mut Supervisor,
    linear: &mut StepChannel,
    drill: &mut StepChannel,
    ctx: &mut CycleContext,
) -> Option<StopCause> {
    if let Some(cause) = sup.idle_delay(1_000) {
        return Some(cause);
    }

    let gpio = sup.gpio.clone();
    let params = ctx.params;
    let system = *sup.system();
    let away = cycle_away(&system);

    ctx.stroke_direction = away;
    ctx.termination_pending = false;
    ctx.spindle_rev_count = 0;
    sup.status.set_revolutions(0);

    loop {
        let direction = ctx.stroke_direction;
        linear.set_direction(&gpio, direction);
        ctx.linear_step_count = 0;
        let stroke = linear.step_blocking(
            &gpio,
            params.steps_cycle2,
            params.linear_half_period_us,
            || sup.poll_motion(LimitGuard::Motion(direction)),
        );
        ctx.linear_step_count = stroke.edges_emitted;
        if let Some(cause) = stroke.halted {
            return Some(cause);
        }

        if direction == away {
            if ctx.termination_pending {
                break;
            }
            // Burst between strokes, linear axis idle.
            drill.set_direction(&gpio, DRILL_SPIN);
            let burst = drill.burst(
                &gpio,
                system.drill_burst_step_edges,
                system.drill_burst_half_period_us,
                || sup.poll_motion(LimitGuard::None),
            );
            drill.enable(&gpio, false);
            if let Some(cause) = burst.halted {
                return Some(cause);
            }
            ctx.spindle_rev_count += 1;
            sup.status.set_revolutions(ctx.spindle_rev_count);
            sup.display
                .show(&format!("BURST {}", ctx.spindle_rev_count));
            if ctx.spindle_rev_count >= system.spindle_revolutions_cycle2_bursts {
                ctx.termination_pending = true;
            }
        }
        ctx.stroke_direction = ctx.stroke_direction.reversed();
    }

    linear.enable(&gpio, false);
    info!(bursts = ctx.spindle_rev_count, "cycle 2 complete");
    None
}

/// Wait for the operator to unload the workpiece and press Reset.
fn unload(sup: &mut Supervisor) -> Option<StopCause> {
    sup.display.show("OPEN AND UNLOAD");
    sup.display.show("PRESS START FOR NEXT CYCLE");
    loop {
        match sup.poll_motion(LimitGuard::None) {
            // Reset is the normal exit here, not an abort.
            Some(StopCause::Reset) => return None,
            Some(other) => return Some(other),
            None => std::thread::sleep(std::time::Duration::from_millis(2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ModeParams {
        ModeParams {
            steps_cycle1: 6,
            steps_intermediate: 3,
            steps_cycle2: 8,
            revolutions_level1: 2,
            revolutions_level2: 4,
            linear_half_period_us: 100,
            drill_half_period_us: 80,
        }
    }

    #[test]
    fn away_direction_follows_invert_flag() {
        let mut system = SystemParams::default();
        assert_eq!(cycle_away(&system), StrokeDirection::TowardFinal);
        system.cycle_direction_invert = true;
        assert_eq!(cycle_away(&system), StrokeDirection::TowardHome);
    }

    #[test]
    fn termination_only_on_away_stroke() {
        let away = StrokeDirection::TowardFinal;
        let mut ctx = CycleContext::new(1, params());

        ctx.termination_pending = true;
        ctx.stroke_direction = StrokeDirection::TowardHome;
        assert!(!stroke_terminates(&ctx, away));

        ctx.stroke_direction = StrokeDirection::TowardFinal;
        assert!(stroke_terminates(&ctx, away));

        ctx.termination_pending = false;
        assert!(!stroke_terminates(&ctx, away));
    }

    #[test]
    fn context_starts_clean() {
        let ctx = CycleContext::new(3, params());
        assert_eq!(ctx.selected_mode, 3);
        assert_eq!(ctx.phase, Phase::Idle);
        assert_eq!(ctx.linear_step_count, 0);
        assert_eq!(ctx.spindle_rev_count, 0);
        assert!(!ctx.termination_pending);
    }
}
