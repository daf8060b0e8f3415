//! Integration: a complete automatic cycle on the in-process simulator.
//!
//! Mode 1 of the scaled test config: homing, load wait, Cycle-1 with
//! concurrent drill rotation, intermediate advance, Cycle-2 with counted
//! drill bursts, unload, reset back to Idle.

mod common;

use common::start_station;
use drill_common::state::Phase;

#[test]
fn mode_one_runs_the_whole_sequence() {
    let station = start_station();
    let config = common::test_config();
    let mode = config.modes[0];
    let system = config.system;

    // Bind mode 1: homing first, then the load wait.
    station.coordinator.select_mode(1).unwrap();
    station.complete_homing();
    station.wait_for(|s| s.phase == Phase::Waiting, "waiting after mode bind");
    assert_eq!(station.coordinator.snapshot().active_mode, 1);

    let drill_before_start = station.drill_edges();
    station.coordinator.press_start_virtual().unwrap();
    station.wait_for(|s| s.phase == Phase::Cycle1 && s.running, "cycle 1");

    // Cycle 1 terminates once the revolution target is met on an away
    // stroke; the warmup plus the strokes must have spun the drill at
    // least one full target's worth.
    station.wait_for(|s| s.phase == Phase::Intermediate, "intermediate");
    let spindle_target =
        (mode.revolutions_level1 * system.pulses_per_spindle_revolution) as u64;
    assert!(
        station.drill_edges() - drill_before_start >= spindle_target,
        "drill rising edges {} below the revolution target {spindle_target}",
        station.drill_edges() - drill_before_start
    );

    // The intermediate phase opens with a quiet second; capture the
    // linear position before the advance.
    let linear_before_advance = station.linear_edges();
    station.wait_for(|s| s.phase == Phase::Cycle2, "cycle 2");
    let advance = station.linear_edges() - linear_before_advance;
    assert_eq!(
        advance,
        mode.steps_intermediate as u64,
        "intermediate advance must be exactly the configured rising edges"
    );

    // Cycle 2 also opens quietly; the drill only moves in bursts.
    let drill_before_bursts = station.drill_edges();
    station.wait_for(|s| s.phase == Phase::Unload, "unload");

    let snapshot = station.coordinator.snapshot();
    assert_eq!(
        snapshot.spindle_rev_count, system.spindle_revolutions_cycle2_bursts,
        "cycle 2 publishes the burst count"
    );
    assert!(!snapshot.running, "unload is a post-cycle wait");

    let burst_rising = (system.spindle_revolutions_cycle2_bursts
        * (system.drill_burst_step_edges / 2)) as u64;
    assert_eq!(
        station.drill_edges() - drill_before_bursts,
        burst_rising,
        "each burst contributes half its raw edges as rising edges"
    );

    // Reset: homing, then a clean Idle.
    station.coordinator.reset_virtual().unwrap();
    station.complete_homing();
    station.wait_for(|s| s.phase == Phase::Idle, "idle after unload reset");
    let snapshot = station.coordinator.snapshot();
    assert_eq!(snapshot.active_mode, 0);
    assert_eq!(snapshot.spindle_rev_count, 0);

    station.stop();
}

#[test]
fn reselecting_the_same_mode_is_idempotent() {
    let station = start_station();

    station.coordinator.select_mode(1).unwrap();
    station.complete_homing();
    station.wait_for(|s| s.phase == Phase::Waiting, "first waiting");
    let first = station.coordinator.snapshot();

    // Re-selecting re-homes and lands back in the identical wait state.
    station.coordinator.select_mode(1).unwrap();
    station.complete_homing();
    station.wait_for(|s| s.phase == Phase::Waiting, "second waiting");
    let second = station.coordinator.snapshot();

    assert_eq!(first, second);

    station.stop();
}
