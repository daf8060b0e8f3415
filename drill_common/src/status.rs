//! Observable machine status, published lock-free by the control task.
//!
//! The whole snapshot packs into a single 64-bit word, so publication is a
//! single atomic store and observers get a torn-free read with a single
//! atomic load. The control task is the only writer; any number of
//! observer threads may read.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::{Phase, StatusError};

/// Point-in-time machine status for external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    /// Bound mode (1..=5), 0 when none is bound.
    pub active_mode: u8,
    /// Current cycle phase.
    pub phase: Phase,
    /// Spindle revolutions in Cycle-1, burst count in Cycle-2.
    pub spindle_rev_count: u32,
    /// An automatic cycle is executing.
    pub running: bool,
    /// Motion is paused (stop button or interlock).
    pub paused: bool,
    /// Manual mode is active.
    pub manual: bool,
    /// Last non-fatal error condition.
    pub error: StatusError,
}

// Bit layout of the packed word:
//   0..32   spindle_rev_count
//  32..40   phase
//  40..48   active_mode
//  48..56   error
//  56       running
//  57       paused
//  58       manual
const RUNNING_BIT: u64 = 1 << 56;
const PAUSED_BIT: u64 = 1 << 57;
const MANUAL_BIT: u64 = 1 << 58;

impl StatusSnapshot {
    /// Pack into a single `u64` for atomic publication.
    pub fn pack(&self) -> u64 {
        let mut word = self.spindle_rev_count as u64;
        word |= (self.phase as u64) << 32;
        word |= (self.active_mode as u64) << 40;
        word |= (self.error as u64) << 48;
        if self.running {
            word |= RUNNING_BIT;
        }
        if self.paused {
            word |= PAUSED_BIT;
        }
        if self.manual {
            word |= MANUAL_BIT;
        }
        word
    }

    /// Unpack from a published word.
    ///
    /// Unknown phase or error codes decode to `Fault`; the writer only ever
    /// stores valid codes, so this is a belt for decoding foreign words.
    pub fn unpack(word: u64) -> Self {
        Self {
            spindle_rev_count: word as u32,
            phase: Phase::from_u8((word >> 32) as u8).unwrap_or(Phase::Fault),
            active_mode: (word >> 40) as u8,
            error: StatusError::from_u8((word >> 48) as u8).unwrap_or(StatusError::Fault),
            running: word & RUNNING_BIT != 0,
            paused: word & PAUSED_BIT != 0,
            manual: word & MANUAL_BIT != 0,
        }
    }
}

/// Single-writer, many-reader snapshot cell.
#[derive(Debug, Default)]
pub struct StatusCell {
    word: AtomicU64,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(StatusSnapshot::default().pack()),
        }
    }

    /// Publish a snapshot. Control-task only.
    #[inline]
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.word.store(snapshot.pack(), Ordering::Release);
    }

    /// Read the latest published snapshot.
    #[inline]
    pub fn read(&self) -> StatusSnapshot {
        StatusSnapshot::unpack(self.word.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let snapshot = StatusSnapshot {
            active_mode: 3,
            phase: Phase::Cycle2,
            spindle_rev_count: 123_456,
            running: true,
            paused: false,
            manual: false,
            error: StatusError::PermitDenied,
        };
        assert_eq!(StatusSnapshot::unpack(snapshot.pack()), snapshot);

        let all_flags = StatusSnapshot {
            active_mode: 5,
            phase: Phase::Unload,
            spindle_rev_count: u32::MAX,
            running: true,
            paused: true,
            manual: true,
            error: StatusError::Fault,
        };
        assert_eq!(StatusSnapshot::unpack(all_flags.pack()), all_flags);
    }

    #[test]
    fn default_snapshot_is_idle() {
        let snapshot = StatusSnapshot::default();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.active_mode, 0);
        assert!(!snapshot.running);
        assert_eq!(snapshot.error, StatusError::None);
    }

    #[test]
    fn cell_publish_read() {
        let cell = StatusCell::new();
        assert_eq!(cell.read(), StatusSnapshot::default());

        let snapshot = StatusSnapshot {
            active_mode: 1,
            phase: Phase::Waiting,
            spindle_rev_count: 7,
            running: false,
            paused: false,
            manual: false,
            error: StatusError::None,
        };
        cell.publish(snapshot);
        assert_eq!(cell.read(), snapshot);
    }

    #[test]
    fn cell_is_shareable_across_threads() {
        use std::sync::Arc;

        let cell = Arc::new(StatusCell::new());
        let reader = Arc::clone(&cell);
        let handle = std::thread::spawn(move || {
            // Each read must decode to a snapshot that was published whole.
            for _ in 0..1000 {
                let s = reader.read();
                assert_eq!(s.spindle_rev_count as u64 % 2, (s.active_mode % 2) as u64);
            }
        });
        for i in 0..1000u32 {
            cell.publish(StatusSnapshot {
                active_mode: (i % 2) as u8,
                spindle_rev_count: i * 2 + (i % 2),
                ..Default::default()
            });
        }
        handle.join().unwrap();
    }
}
