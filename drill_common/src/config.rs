//! TOML configuration loader with validation.
//!
//! The station configuration binds the five drilling-mode records, the
//! system-wide motion constants, and the GPIO pin map. Parameter editing
//! and persistence live outside the core; this module only parses and
//! validates the record it is handed at startup.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of selectable drilling modes.
pub const MODE_COUNT: usize = 5;

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config validation: {0}")]
    Validation(String),
}

/// Per-mode drilling parameters, immutable once a cycle is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Linear steps per reciprocation stroke in Cycle-1.
    pub steps_cycle1: u32,
    /// Linear steps of one-way advance between cycles.
    pub steps_intermediate: u32,
    /// Linear steps per reciprocation stroke in Cycle-2.
    pub steps_cycle2: u32,
    /// Spindle revolutions target for Cycle-1.
    pub revolutions_level1: u32,
    /// Spindle revolutions target for Cycle-2.
    pub revolutions_level2: u32,
    /// Half-period between linear-axis pulse edges [µs].
    pub linear_half_period_us: u32,
    /// Half-period between drill-axis pulse edges [µs].
    pub drill_half_period_us: u32,
}

/// System-wide motion constants shared by all modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemParams {
    /// Steps driven away from the home limit after it triggers.
    #[serde(default = "default_home_rebound_steps")]
    pub home_rebound_steps: u32,
    /// Steps of the manual-mode limit rebound.
    #[serde(default = "default_limit_rebound_steps")]
    pub limit_rebound_steps: u32,
    /// Half-period of the manual-mode limit rebound [µs].
    #[serde(default = "default_limit_rebound_half_period_us")]
    pub limit_rebound_half_period_us: u32,
    /// Half-period while seeking / rebounding from home [µs].
    #[serde(default = "default_home_half_period_us")]
    pub home_half_period_us: u32,
    /// Half-period of a Cycle-2 drill burst [µs].
    #[serde(default = "default_drill_burst_half_period_us")]
    pub drill_burst_half_period_us: u32,
    /// Raw edges (rising + falling) per Cycle-2 drill burst.
    #[serde(default = "default_drill_burst_step_edges")]
    pub drill_burst_step_edges: u32,
    /// Drill bursts emitted per Cycle-2 before termination.
    #[serde(default = "default_spindle_revolutions_cycle2_bursts")]
    pub spindle_revolutions_cycle2_bursts: u32,
    /// Drill rising edges per counted spindle revolution.
    #[serde(default = "default_pulses_per_spindle_revolution")]
    pub pulses_per_spindle_revolution: u32,
    /// Drill-only warmup before the first Cycle-1 stroke [ms].
    #[serde(default = "default_pre_cycle_drill_warmup_ms")]
    pub pre_cycle_drill_warmup_ms: u64,
    /// Mechanical settling delay between resume trigger and motion [ms].
    #[serde(default = "default_pause_resume_delay_ms")]
    pub pause_resume_delay_ms: u64,
    /// Slowest manual half-period, at the joystick thresholds [µs].
    #[serde(default = "default_manual_velocity_slow_us")]
    pub manual_velocity_slow_us: u32,
    /// Fastest manual half-period, at full joystick deflection [µs].
    #[serde(default = "default_manual_velocity_fast_us")]
    pub manual_velocity_fast_us: u32,
    /// Joystick raw value below which travel is Toward_Home.
    #[serde(default = "default_joystick_low_threshold")]
    pub joystick_low_threshold: u16,
    /// Joystick raw value above which travel is Toward_Final.
    #[serde(default = "default_joystick_high_threshold")]
    pub joystick_high_threshold: u16,
    /// Invert the linear-axis dir pin polarity.
    #[serde(default)]
    pub linear_direction_invert: bool,
    /// Invert the drill-axis dir pin polarity.
    #[serde(default)]
    pub drill_direction_invert: bool,
    /// Mirror the cycle-phase travel frame (mirrored installations).
    #[serde(default)]
    pub cycle_direction_invert: bool,
}

fn default_home_rebound_steps() -> u32 {
    425
}
fn default_limit_rebound_steps() -> u32 {
    300
}
fn default_limit_rebound_half_period_us() -> u32 {
    2500
}
fn default_home_half_period_us() -> u32 {
    2000
}
fn default_drill_burst_half_period_us() -> u32 {
    2640
}
fn default_drill_burst_step_edges() -> u32 {
    200
}
fn default_spindle_revolutions_cycle2_bursts() -> u32 {
    3
}
fn default_pulses_per_spindle_revolution() -> u32 {
    400
}
fn default_pre_cycle_drill_warmup_ms() -> u64 {
    2000
}
fn default_pause_resume_delay_ms() -> u64 {
    2000
}
fn default_manual_velocity_slow_us() -> u32 {
    2500
}
fn default_manual_velocity_fast_us() -> u32 {
    1000
}
fn default_joystick_low_threshold() -> u16 {
    352
}
fn default_joystick_high_threshold() -> u16 {
    652
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            home_rebound_steps: default_home_rebound_steps(),
            limit_rebound_steps: default_limit_rebound_steps(),
            limit_rebound_half_period_us: default_limit_rebound_half_period_us(),
            home_half_period_us: default_home_half_period_us(),
            drill_burst_half_period_us: default_drill_burst_half_period_us(),
            drill_burst_step_edges: default_drill_burst_step_edges(),
            spindle_revolutions_cycle2_bursts: default_spindle_revolutions_cycle2_bursts(),
            pulses_per_spindle_revolution: default_pulses_per_spindle_revolution(),
            pre_cycle_drill_warmup_ms: default_pre_cycle_drill_warmup_ms(),
            pause_resume_delay_ms: default_pause_resume_delay_ms(),
            manual_velocity_slow_us: default_manual_velocity_slow_us(),
            manual_velocity_fast_us: default_manual_velocity_fast_us(),
            joystick_low_threshold: default_joystick_low_threshold(),
            joystick_high_threshold: default_joystick_high_threshold(),
            linear_direction_invert: false,
            drill_direction_invert: false,
            cycle_direction_invert: false,
        }
    }
}

/// GPIO pin assignments (BCM numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    #[serde(default = "default_step_linear")]
    pub step_linear: u8,
    #[serde(default = "default_dir_linear")]
    pub dir_linear: u8,
    #[serde(default = "default_step_drill")]
    pub step_drill: u8,
    #[serde(default = "default_dir_drill")]
    pub dir_drill: u8,
    #[serde(default = "default_btn_reset")]
    pub btn_reset: u8,
    #[serde(default = "default_btn_start")]
    pub btn_start: u8,
    #[serde(default = "default_btn_stop")]
    pub btn_stop: u8,
    #[serde(default = "default_btn_drill")]
    pub btn_drill: u8,
    #[serde(default = "default_safety")]
    pub safety: u8,
    #[serde(default = "default_limit_home")]
    pub limit_home: u8,
    #[serde(default = "default_limit_final")]
    pub limit_final: u8,
    /// ADC channel of the joystick, not a GPIO pin.
    #[serde(default)]
    pub joystick_channel: u8,
}

fn default_step_linear() -> u8 {
    20
}
fn default_dir_linear() -> u8 {
    21
}
fn default_step_drill() -> u8 {
    23
}
fn default_dir_drill() -> u8 {
    24
}
fn default_btn_reset() -> u8 {
    17
}
fn default_btn_start() -> u8 {
    27
}
fn default_btn_stop() -> u8 {
    22
}
fn default_btn_drill() -> u8 {
    5
}
fn default_safety() -> u8 {
    6
}
fn default_limit_home() -> u8 {
    13
}
fn default_limit_final() -> u8 {
    19
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            step_linear: default_step_linear(),
            dir_linear: default_dir_linear(),
            step_drill: default_step_drill(),
            dir_drill: default_dir_drill(),
            btn_reset: default_btn_reset(),
            btn_start: default_btn_start(),
            btn_stop: default_btn_stop(),
            btn_drill: default_btn_drill(),
            safety: default_safety(),
            limit_home: default_limit_home(),
            limit_final: default_limit_final(),
            joystick_channel: 0,
        }
    }
}

impl PinMap {
    /// All GPIO pins in declaration order (excludes the ADC channel).
    pub fn gpio_pins(&self) -> [u8; 11] {
        [
            self.step_linear,
            self.dir_linear,
            self.step_drill,
            self.dir_drill,
            self.btn_reset,
            self.btn_start,
            self.btn_stop,
            self.btn_drill,
            self.safety,
            self.limit_home,
            self.limit_final,
        ]
    }
}

/// Complete validated station configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Backend name resolved by the HAL registry at startup.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Address of the HTTP GPIO simulator (http backend only).
    #[serde(default = "default_simulator_addr")]
    pub simulator_addr: String,
    #[serde(default)]
    pub pins: PinMap,
    /// Exactly five mode records, selected by 1-based index.
    pub modes: Vec<ModeParams>,
    #[serde(default)]
    pub system: SystemParams,
}

fn default_backend() -> String {
    "sim".to_string()
}
fn default_simulator_addr() -> String {
    "127.0.0.1:8100".to_string()
}

impl StationConfig {
    /// Mode record for a 1-based mode index.
    #[inline]
    pub fn mode(&self, index: u8) -> Option<&ModeParams> {
        if (1..=MODE_COUNT as u8).contains(&index) {
            self.modes.get(index as usize - 1)
        } else {
            None
        }
    }

    /// Validate parameter bounds and pin uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modes.len() != MODE_COUNT {
            return Err(ConfigError::Validation(format!(
                "expected {MODE_COUNT} mode records, got {}",
                self.modes.len()
            )));
        }

        for (i, mode) in self.modes.iter().enumerate() {
            let idx = i + 1;
            if mode.linear_half_period_us == 0 || mode.drill_half_period_us == 0 {
                return Err(ConfigError::Validation(format!(
                    "mode {idx}: half-periods must be non-zero"
                )));
            }
            if mode.steps_cycle1 == 0 || mode.steps_cycle2 == 0 {
                return Err(ConfigError::Validation(format!(
                    "mode {idx}: stroke step counts must be non-zero"
                )));
            }
            if mode.revolutions_level1 == 0 {
                return Err(ConfigError::Validation(format!(
                    "mode {idx}: revolutions_level1 must be non-zero"
                )));
            }
        }

        let sys = &self.system;
        if sys.pulses_per_spindle_revolution == 0 {
            return Err(ConfigError::Validation(
                "pulses_per_spindle_revolution must be non-zero".to_string(),
            ));
        }
        for (name, v) in [
            ("home_half_period_us", sys.home_half_period_us),
            (
                "limit_rebound_half_period_us",
                sys.limit_rebound_half_period_us,
            ),
            (
                "drill_burst_half_period_us",
                sys.drill_burst_half_period_us,
            ),
            ("manual_velocity_slow_us", sys.manual_velocity_slow_us),
            ("manual_velocity_fast_us", sys.manual_velocity_fast_us),
        ] {
            if v == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        if sys.joystick_low_threshold >= sys.joystick_high_threshold {
            return Err(ConfigError::Validation(format!(
                "joystick thresholds out of order: {} >= {}",
                sys.joystick_low_threshold, sys.joystick_high_threshold
            )));
        }
        if sys.joystick_high_threshold > 1023 {
            return Err(ConfigError::Validation(
                "joystick_high_threshold exceeds the 10-bit ADC range".to_string(),
            ));
        }
        if sys.manual_velocity_fast_us >= sys.manual_velocity_slow_us {
            // A smaller half-period is faster; the fast bound must be below
            // the slow one for the outer-band map to be monotonic.
            return Err(ConfigError::Validation(format!(
                "manual_velocity_fast_us {} must be below manual_velocity_slow_us {}",
                sys.manual_velocity_fast_us, sys.manual_velocity_slow_us
            )));
        }

        let mut seen = HashSet::new();
        for pin in self.pins.gpio_pins() {
            if !seen.insert(pin) {
                return Err(ConfigError::Validation(format!(
                    "pin {pin} assigned to more than one role"
                )));
            }
        }

        Ok(())
    }
}

/// Load and validate the station configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<StationConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
    load_config_from_str(&text)
}

/// Load config from a TOML string (startup and tests).
pub fn load_config_from_str(text: &str) -> Result<StationConfig, ConfigError> {
    let config: StationConfig =
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn five_modes_toml() -> String {
        let mode = r#"
[[modes]]
steps_cycle1 = 175
steps_intermediate = 10
steps_cycle2 = 390
revolutions_level1 = 100
revolutions_level2 = 1000
linear_half_period_us = 3900
drill_half_period_us = 2860
"#;
        mode.repeat(5)
    }

    #[test]
    fn load_valid_config() {
        let config = load_config_from_str(&five_modes_toml()).unwrap();
        assert_eq!(config.backend, "sim");
        assert_eq!(config.modes.len(), 5);
        assert_eq!(config.system.home_rebound_steps, 425);
        assert_eq!(config.system.pulses_per_spindle_revolution, 400);
        assert_eq!(config.pins.btn_start, 27);
    }

    #[test]
    fn mode_lookup_is_one_based() {
        let config = load_config_from_str(&five_modes_toml()).unwrap();
        assert!(config.mode(0).is_none());
        assert!(config.mode(1).is_some());
        assert!(config.mode(5).is_some());
        assert!(config.mode(6).is_none());
    }

    #[test]
    fn reject_wrong_mode_count() {
        let mode = r#"
[[modes]]
steps_cycle1 = 1
steps_intermediate = 1
steps_cycle2 = 1
revolutions_level1 = 1
revolutions_level2 = 1
linear_half_period_us = 100
drill_half_period_us = 100
"#;
        let err = load_config_from_str(&mode.repeat(3)).unwrap_err();
        assert!(err.to_string().contains("mode records"), "got: {err}");
    }

    #[test]
    fn reject_zero_half_period() {
        let toml = five_modes_toml().replace("linear_half_period_us = 3900", "linear_half_period_us = 0");
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("half-periods"), "got: {err}");
    }

    #[test]
    fn reject_joystick_thresholds_out_of_order() {
        let toml = format!(
            "{}\n[system]\njoystick_low_threshold = 700\njoystick_high_threshold = 652\n",
            five_modes_toml()
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("thresholds"), "got: {err}");
    }

    #[test]
    fn reject_manual_velocity_inversion() {
        let toml = format!(
            "{}\n[system]\nmanual_velocity_slow_us = 900\nmanual_velocity_fast_us = 1000\n",
            five_modes_toml()
        );
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("manual_velocity"), "got: {err}");
    }

    #[test]
    fn reject_duplicate_pins() {
        let toml = format!(
            "{}\n[pins]\nstep_linear = 17\n",
            five_modes_toml()
        );
        // 17 collides with the default btn_reset pin.
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("more than one role"), "got: {err}");
    }

    #[test]
    fn reject_malformed_toml() {
        assert!(load_config_from_str("not valid toml @@@").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(five_modes_toml().as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.modes.len(), 5);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/station.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn system_defaults_match_machine_constants() {
        let sys = SystemParams::default();
        assert_eq!(sys.limit_rebound_steps, 300);
        assert_eq!(sys.limit_rebound_half_period_us, 2500);
        assert_eq!(sys.drill_burst_step_edges, 200);
        assert_eq!(sys.spindle_revolutions_cycle2_bursts, 3);
        assert_eq!(sys.pre_cycle_drill_warmup_ms, 2000);
        assert_eq!(sys.pause_resume_delay_ms, 2000);
        assert_eq!(sys.joystick_low_threshold, 352);
        assert_eq!(sys.joystick_high_threshold, 652);
        assert!(!sys.cycle_direction_invert);
    }
}
