//! Input sampling: debounced buttons, level inputs, joystick scaling.
//!
//! Raw pin samples become semantic flags here. Buttons are active-low
//! behind pull-ups, so "pressed" means the line reads 0; the edge flags
//! exposed to the rest of the core speak in press/release terms, never in
//! raw levels. Limits and the interlock are plain levels (triggered and
//! closed both read HIGH).

use tracing::{debug, warn};

use drill_common::config::{PinMap, SystemParams};
use drill_common::state::StrokeDirection;
use drill_hal::Gpio;

/// Debounce hold time: a changed level must survive two consecutive
/// samples at least this far apart before the logical state flips.
const DEBOUNCE_US: u64 = 5_000;

/// Minimum interval between full input sweeps.
const SAMPLE_INTERVAL_US: u64 = 500;

/// Operator buttons, indexable into the sampler's debouncer array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Reset = 0,
    Start = 1,
    Stop = 2,
    Drill = 3,
}

const BUTTON_COUNT: usize = 4;

/// One debounced active-low input line.
#[derive(Debug)]
struct DebouncedButton {
    /// Committed raw level.
    stable: u8,
    /// Raw level seen on the most recent sample run.
    candidate: u8,
    /// When the candidate level first differed from `stable`.
    candidate_since_us: u64,
    /// One-shot: the button became pressed.
    pressed: bool,
    /// One-shot: the button was released.
    released: bool,
}

impl DebouncedButton {
    /// Released at rest (pull-up HIGH).
    fn new() -> Self {
        Self {
            stable: 1,
            candidate: 1,
            candidate_since_us: 0,
            pressed: false,
            released: false,
        }
    }

    fn sample(&mut self, raw: u8, now_us: u64) {
        if raw == self.stable {
            self.candidate = raw;
            return;
        }
        if raw != self.candidate {
            // First sample at the new level starts the hold window.
            self.candidate = raw;
            self.candidate_since_us = now_us;
        } else if now_us.saturating_sub(self.candidate_since_us) >= DEBOUNCE_US {
            self.stable = raw;
            if raw == 0 {
                self.pressed = true;
            } else {
                self.released = true;
            }
        }
    }
}

/// Joystick command derived from the raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickCommand {
    /// Raw value inside the neutral band.
    Neutral,
    /// Commanded travel with the mapped half-period.
    Move {
        direction: StrokeDirection,
        half_period_us: u32,
    },
}

/// Latest level-sampled input state.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputFrame {
    pub safety_ok: bool,
    pub limit_home: bool,
    pub limit_final: bool,
    pub joystick_raw: u16,
}

/// Converts raw pin samples into edge events and semantic flags.
pub struct InputSampler {
    gpio: Gpio,
    pins: PinMap,
    system: SystemParams,
    buttons: [DebouncedButton; BUTTON_COUNT],
    frame: InputFrame,
    last_sweep_us: u64,
    adc_warned: bool,
}

impl InputSampler {
    pub fn new(gpio: Gpio, pins: PinMap, system: SystemParams) -> Self {
        let mut sampler = Self {
            gpio,
            pins,
            system,
            buttons: std::array::from_fn(|_| DebouncedButton::new()),
            frame: InputFrame::default(),
            last_sweep_us: 0,
            adc_warned: false,
        };
        sampler.sweep(sampler.gpio.now_micros());
        sampler
    }

    /// Sample all inputs, rate-limited to one sweep per ~500 µs.
    pub fn sample(&mut self) {
        let now = self.gpio.now_micros();
        if now.saturating_sub(self.last_sweep_us) < SAMPLE_INTERVAL_US {
            return;
        }
        self.sweep(now);
    }

    fn sweep(&mut self, now_us: u64) {
        self.last_sweep_us = now_us;

        let pins = [
            self.pins.btn_reset,
            self.pins.btn_start,
            self.pins.btn_stop,
            self.pins.btn_drill,
        ];
        for (button, pin) in self.buttons.iter_mut().zip(pins) {
            button.sample(self.gpio.read_digital(pin), now_us);
        }

        self.frame.safety_ok = self.gpio.read_digital(self.pins.safety) == 1;
        self.frame.limit_home = self.gpio.read_digital(self.pins.limit_home) == 1;
        self.frame.limit_final = self.gpio.read_digital(self.pins.limit_final) == 1;
        self.frame.joystick_raw = match self.gpio.read_analog(self.pins.joystick_channel) {
            Ok(raw) => raw,
            Err(e) => {
                if !self.adc_warned {
                    warn!(error = %e, "joystick read failed, holding neutral");
                    self.adc_warned = true;
                }
                neutral_raw(&self.system)
            }
        };
    }

    /// Latest level-sampled state.
    #[inline]
    pub fn frame(&self) -> InputFrame {
        self.frame
    }

    /// One-shot press edge. Returning `true` clears the flag.
    pub fn rising_edge(&mut self, button: Button) -> bool {
        let flag = &mut self.buttons[button as usize].pressed;
        std::mem::take(flag)
    }

    /// One-shot release edge. Returning `true` clears the flag.
    pub fn falling_edge(&mut self, button: Button) -> bool {
        let flag = &mut self.buttons[button as usize].released;
        std::mem::take(flag)
    }

    /// Inject a virtual press edge (coordinator `press_*_virtual`).
    pub fn inject_press(&mut self, button: Button) {
        debug!(?button, "virtual press injected");
        self.buttons[button as usize].pressed = true;
    }

    /// Map the latest joystick sample into a travel command.
    pub fn joystick(&self) -> JoystickCommand {
        joystick_command(self.frame.joystick_raw, &self.system)
    }
}

fn neutral_raw(system: &SystemParams) -> u16 {
    (system.joystick_low_threshold + system.joystick_high_threshold) / 2
}

/// Partition the raw sample into direction bands and map the outer-band
/// magnitude linearly onto the half-period range. Full deflection maps to
/// the fast (small) half-period, the band edge to the slow one.
pub fn joystick_command(raw: u16, system: &SystemParams) -> JoystickCommand {
    let low = system.joystick_low_threshold;
    let high = system.joystick_high_threshold;
    let slow = system.manual_velocity_slow_us as i64;
    let fast = system.manual_velocity_fast_us as i64;

    if raw <= low {
        JoystickCommand::Move {
            direction: StrokeDirection::TowardHome,
            half_period_us: map_value(raw as i64, 0, low as i64, fast, slow) as u32,
        }
    } else if raw >= high {
        JoystickCommand::Move {
            direction: StrokeDirection::TowardFinal,
            half_period_us: map_value(raw as i64, high as i64, 1023, slow, fast) as u32,
        }
    } else {
        JoystickCommand::Neutral
    }
}

/// Linear range map, truncating like the classic Arduino `map()`.
fn map_value(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

#[cfg(test)]
mod tests {
    use super::*;
    use drill_hal::SimGpio;
    use std::time::Duration;

    fn sampler() -> (InputSampler, SimGpio, PinMap) {
        let pins = PinMap::default();
        let sim = SimGpio::new(&pins);
        let sampler = InputSampler::new(
            Gpio::Sim(sim.clone()),
            pins,
            SystemParams::default(),
        );
        (sampler, sim, pins)
    }

    fn settle(sampler: &mut InputSampler) {
        // Two sweeps across the debounce window commit a level change.
        std::thread::sleep(Duration::from_millis(6));
        sampler.sample();
        std::thread::sleep(Duration::from_millis(6));
        sampler.sample();
    }

    #[test]
    fn press_produces_one_shot_edge() {
        let (mut sampler, sim, pins) = sampler();
        assert!(!sampler.rising_edge(Button::Start));

        sim.press_button(pins.btn_start);
        settle(&mut sampler);

        assert!(sampler.rising_edge(Button::Start));
        assert!(!sampler.rising_edge(Button::Start), "flag clears on read");
    }

    #[test]
    fn release_produces_falling_edge() {
        let (mut sampler, sim, pins) = sampler();
        sim.press_button(pins.btn_stop);
        settle(&mut sampler);
        assert!(sampler.rising_edge(Button::Stop));

        sim.release_button(pins.btn_stop);
        settle(&mut sampler);
        assert!(sampler.falling_edge(Button::Stop));
        assert!(!sampler.falling_edge(Button::Stop));
    }

    #[test]
    fn glitch_shorter_than_debounce_is_ignored() {
        let (mut sampler, sim, pins) = sampler();

        sim.press_button(pins.btn_reset);
        std::thread::sleep(Duration::from_millis(1));
        sampler.sample();
        // Released again before the hold window elapsed.
        sim.release_button(pins.btn_reset);
        settle(&mut sampler);

        assert!(!sampler.rising_edge(Button::Reset));
    }

    #[test]
    fn levels_track_limits_and_interlock() {
        let (mut sampler, sim, pins) = sampler();
        assert!(sampler.frame().safety_ok);
        assert!(!sampler.frame().limit_home);

        sim.set_safety(pins.safety, false);
        sim.set_limit(pins.limit_home, true);
        settle(&mut sampler);

        assert!(!sampler.frame().safety_ok);
        assert!(sampler.frame().limit_home);
    }

    #[test]
    fn virtual_press_behaves_like_an_edge() {
        let (mut sampler, _sim, _pins) = sampler();
        sampler.inject_press(Button::Start);
        assert!(sampler.rising_edge(Button::Start));
        assert!(!sampler.rising_edge(Button::Start));
    }

    #[test]
    fn joystick_neutral_band() {
        let system = SystemParams::default();
        assert_eq!(joystick_command(502, &system), JoystickCommand::Neutral);
        assert_eq!(joystick_command(353, &system), JoystickCommand::Neutral);
        assert_eq!(joystick_command(651, &system), JoystickCommand::Neutral);
    }

    #[test]
    fn joystick_threshold_maps_to_slow() {
        let system = SystemParams::default();
        match joystick_command(352, &system) {
            JoystickCommand::Move {
                direction,
                half_period_us,
            } => {
                assert_eq!(direction, StrokeDirection::TowardHome);
                assert_eq!(half_period_us, system.manual_velocity_slow_us);
            }
            other => panic!("expected motion, got {other:?}"),
        }
        match joystick_command(652, &system) {
            JoystickCommand::Move {
                direction,
                half_period_us,
            } => {
                assert_eq!(direction, StrokeDirection::TowardFinal);
                assert_eq!(half_period_us, system.manual_velocity_slow_us);
            }
            other => panic!("expected motion, got {other:?}"),
        }
    }

    #[test]
    fn joystick_full_deflection_maps_to_fast() {
        let system = SystemParams::default();
        for (raw, direction) in [
            (0u16, StrokeDirection::TowardHome),
            (1023, StrokeDirection::TowardFinal),
        ] {
            match joystick_command(raw, &system) {
                JoystickCommand::Move {
                    direction: d,
                    half_period_us,
                } => {
                    assert_eq!(d, direction);
                    assert_eq!(half_period_us, system.manual_velocity_fast_us);
                }
                other => panic!("expected motion, got {other:?}"),
            }
        }
    }

    #[test]
    fn joystick_magnitude_is_monotonic() {
        let system = SystemParams::default();
        let half = |raw| match joystick_command(raw, &system) {
            JoystickCommand::Move { half_period_us, .. } => half_period_us,
            JoystickCommand::Neutral => panic!("unexpected neutral at {raw}"),
        };
        // Further from the threshold → smaller half-period → faster.
        assert!(half(100) < half(300));
        assert!(half(900) < half(700));
    }
}
