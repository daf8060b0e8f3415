//! Machine state and phase enums for the drill-station control core.
//!
//! All enums use `#[repr(u8)]` for compact storage inside the packed status
//! word, with `const fn from_u8` decoders for the read side.

use serde::{Deserialize, Serialize};

/// Drilling-cycle phase.
///
/// Only the control task transitions phases; observers read the last
/// published value from the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    /// No mode bound, axes at rest.
    Idle = 0,
    /// Driving toward the home limit, then the counted rebound.
    Homing = 1,
    /// Mode bound, workpiece load wait ("PRESS START").
    Waiting = 2,
    /// Reciprocating strokes with concurrent drill rotation.
    Cycle1 = 3,
    /// One-way advance between drilling levels.
    Intermediate = 4,
    /// Reciprocating strokes with per-stroke drill bursts.
    Cycle2 = 5,
    /// Cycle complete, workpiece unload wait.
    Unload = 6,
    /// Unrecoverable fault — axes disabled, restart required.
    Fault = 7,
}

impl Phase {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Homing),
            2 => Some(Self::Waiting),
            3 => Some(Self::Cycle1),
            4 => Some(Self::Intermediate),
            5 => Some(Self::Cycle2),
            6 => Some(Self::Unload),
            7 => Some(Self::Fault),
            _ => None,
        }
    }

    /// Returns true while an automatic cycle owns the axes.
    ///
    /// Mode re-selection and manual mode are rejected in these phases.
    #[inline]
    pub const fn in_cycle(&self) -> bool {
        matches!(self, Self::Cycle1 | Self::Intermediate | Self::Cycle2)
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Direction of travel on the linear feed axis.
///
/// The mapping to the physical `dir` pin level goes through the
/// `*_direction_invert` configuration flags; core logic only speaks in
/// these two terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StrokeDirection {
    /// Toward the home limit switch.
    TowardHome = 0,
    /// Toward the final (far end) limit switch.
    TowardFinal = 1,
}

impl StrokeDirection {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::TowardHome),
            1 => Some(Self::TowardFinal),
            _ => None,
        }
    }

    /// The opposite travel direction.
    #[inline]
    pub const fn reversed(&self) -> Self {
        match self {
            Self::TowardHome => Self::TowardFinal,
            Self::TowardFinal => Self::TowardHome,
        }
    }
}

impl Default for StrokeDirection {
    fn default() -> Self {
        Self::TowardFinal
    }
}

/// Top-level operating mode of the control task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationMode {
    /// No mode selected.
    Idle = 0,
    /// Joystick-driven manual control.
    Manual = 1,
    /// One of the five automatic drilling modes.
    Automatic = 2,
}

impl OperationMode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Manual),
            2 => Some(Self::Automatic),
            _ => None,
        }
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::Idle
    }
}

/// Non-fatal error condition surfaced in the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusError {
    /// No error.
    None = 0,
    /// The external operation permit refused a cycle start.
    PermitDenied = 1,
    /// The control task hit an unrecoverable fault and stopped.
    Fault = 2,
}

impl StatusError {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::PermitDenied),
            2 => Some(Self::Fault),
            _ => None,
        }
    }
}

impl Default for StatusError {
    fn default() -> Self {
        Self::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_roundtrip() {
        for v in 0..=7u8 {
            let phase = Phase::from_u8(v).unwrap();
            assert_eq!(phase as u8, v);
        }
        assert!(Phase::from_u8(8).is_none());
    }

    #[test]
    fn phase_in_cycle() {
        assert!(!Phase::Idle.in_cycle());
        assert!(!Phase::Homing.in_cycle());
        assert!(!Phase::Waiting.in_cycle());
        assert!(Phase::Cycle1.in_cycle());
        assert!(Phase::Intermediate.in_cycle());
        assert!(Phase::Cycle2.in_cycle());
        assert!(!Phase::Unload.in_cycle());
        assert!(!Phase::Fault.in_cycle());
    }

    #[test]
    fn stroke_direction_reversed() {
        assert_eq!(
            StrokeDirection::TowardHome.reversed(),
            StrokeDirection::TowardFinal
        );
        assert_eq!(
            StrokeDirection::TowardFinal.reversed(),
            StrokeDirection::TowardHome
        );
    }

    #[test]
    fn stroke_direction_roundtrip() {
        for v in 0..=1u8 {
            let dir = StrokeDirection::from_u8(v).unwrap();
            assert_eq!(dir as u8, v);
        }
        assert!(StrokeDirection::from_u8(2).is_none());
    }

    #[test]
    fn operation_mode_roundtrip() {
        for v in 0..=2u8 {
            let mode = OperationMode::from_u8(v).unwrap();
            assert_eq!(mode as u8, v);
        }
        assert!(OperationMode::from_u8(3).is_none());
    }

    #[test]
    fn status_error_roundtrip() {
        for v in 0..=2u8 {
            let err = StatusError::from_u8(v).unwrap();
            assert_eq!(err as u8, v);
        }
        assert!(StatusError::from_u8(3).is_none());
    }

    #[test]
    fn defaults() {
        assert_eq!(Phase::default(), Phase::Idle);
        assert_eq!(StrokeDirection::default(), StrokeDirection::TowardFinal);
        assert_eq!(OperationMode::default(), OperationMode::Idle);
        assert_eq!(StatusError::default(), StatusError::None);
    }
}
