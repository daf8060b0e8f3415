//! In-process GPIO simulator.
//!
//! Backs the control core in tests and headless development. Pin levels
//! live in an atomic bank so the control task and test/UI threads can
//! touch them concurrently without locks; rising edges on each pin are
//! counted so observers can follow pulse trains.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use drill_common::config::PinMap;

use crate::clock::MonotonicClock;
use crate::ReadError;

/// Number of addressable GPIO lines (BCM numbering fits comfortably).
const PIN_COUNT: usize = 64;
/// Number of ADC channels the simulated converter exposes.
const ADC_CHANNELS: usize = 8;

/// Joystick raw value resting in the neutral band.
const JOYSTICK_NEUTRAL: u16 = 502;

struct SimBank {
    levels: [AtomicU8; PIN_COUNT],
    rising_edges: [AtomicU64; PIN_COUNT],
    /// Configured ADC channels; unconfigured channels fail reads.
    adc: [Option<AtomicU16>; ADC_CHANNELS],
}

/// Shared-handle in-process GPIO fake.
///
/// Cloning shares the pin bank, which is what the coordinator's direct
/// emergency-stop writes rely on.
#[derive(Clone)]
pub struct SimGpio {
    bank: Arc<SimBank>,
    clock: MonotonicClock,
}

impl SimGpio {
    /// Create a simulator with idle input levels for the given pin map:
    /// buttons released (pull-up HIGH), interlock closed (HIGH), limits
    /// clear (LOW), joystick resting in the neutral band.
    pub fn new(pins: &PinMap) -> Self {
        // Only the joystick channel exists on the simulated converter.
        let mut adc: [Option<AtomicU16>; ADC_CHANNELS] = std::array::from_fn(|_| None);
        adc[pins.joystick_channel as usize % ADC_CHANNELS] =
            Some(AtomicU16::new(JOYSTICK_NEUTRAL));

        let bank = SimBank {
            levels: std::array::from_fn(|_| AtomicU8::new(0)),
            rising_edges: std::array::from_fn(|_| AtomicU64::new(0)),
            adc,
        };
        let sim = Self {
            bank: Arc::new(bank),
            clock: MonotonicClock::new(),
        };

        // Pull-ups on the active-low buttons.
        for pin in [pins.btn_reset, pins.btn_start, pins.btn_stop, pins.btn_drill] {
            sim.set_level(pin, 1);
        }
        // Interlock closed; HIGH means safe to run.
        sim.set_level(pins.safety, 1);
        // Limits read LOW until the carriage reaches them.

        sim
    }

    #[inline]
    pub fn read_digital(&self, pin: u8) -> u8 {
        self.bank.levels[pin as usize % PIN_COUNT].load(Ordering::Acquire)
    }

    #[inline]
    pub fn write_digital(&self, pin: u8, level: u8) {
        let level = (level != 0) as u8;
        let slot = &self.bank.levels[pin as usize % PIN_COUNT];
        let previous = slot.swap(level, Ordering::AcqRel);
        if previous == 0 && level == 1 {
            self.bank.rising_edges[pin as usize % PIN_COUNT].fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn read_analog(&self, channel: u8) -> Result<u16, ReadError> {
        self.bank
            .adc
            .get(channel as usize)
            .and_then(Option::as_ref)
            .map(|slot| slot.load(Ordering::Acquire))
            .ok_or(ReadError::NoSuchChannel(channel))
    }

    #[inline]
    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    // ── Operator/test hooks ─────────────────────────────────────────

    /// Current level of a pin (alias for observers reading outputs).
    #[inline]
    pub fn level(&self, pin: u8) -> u8 {
        self.read_digital(pin)
    }

    /// Set a pin level directly (limits, interlock, foreign inputs).
    pub fn set_level(&self, pin: u8, level: u8) {
        self.write_digital(pin, level);
    }

    /// Rising edges observed on a pin since startup.
    pub fn rising_edges(&self, pin: u8) -> u64 {
        self.bank.rising_edges[pin as usize % PIN_COUNT].load(Ordering::Acquire)
    }

    /// Press an active-low button (drives the line LOW).
    pub fn press_button(&self, pin: u8) {
        self.set_level(pin, 0);
    }

    /// Release an active-low button (pull-up restores HIGH).
    pub fn release_button(&self, pin: u8) {
        self.set_level(pin, 1);
    }

    /// Trigger or clear a limit switch (triggered reads HIGH).
    pub fn set_limit(&self, pin: u8, triggered: bool) {
        self.set_level(pin, triggered as u8);
    }

    /// Open or close the safety interlock (closed reads HIGH).
    pub fn set_safety(&self, pin: u8, ok: bool) {
        self.set_level(pin, ok as u8);
    }

    /// Set the joystick raw sample on its configured channel.
    pub fn set_joystick_raw(&self, channel: u8, raw: u16) {
        if let Some(Some(slot)) = self.bank.adc.get(channel as usize) {
            slot.store(raw.min(1023), Ordering::Release);
        }
    }
}

impl std::fmt::Debug for SimGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimGpio").finish_non_exhaustive()
    }
}
