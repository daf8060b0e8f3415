//! Write side of the status snapshot.

use std::sync::Arc;

use drill_common::state::{Phase, StatusError};
use drill_common::status::{StatusCell, StatusSnapshot};

/// Control-task handle over the shared [`StatusCell`].
///
/// Keeps the current snapshot locally and republishes the whole word on
/// every mutation, so observers always read a coherent snapshot.
pub struct StatusPublisher {
    cell: Arc<StatusCell>,
    current: StatusSnapshot,
}

impl StatusPublisher {
    pub fn new(cell: Arc<StatusCell>) -> Self {
        let current = StatusSnapshot::default();
        cell.publish(current);
        Self { cell, current }
    }

    #[inline]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.current
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.current.phase = phase;
        self.publish();
    }

    pub fn set_mode(&mut self, mode: u8) {
        self.current.active_mode = mode;
        self.publish();
    }

    pub fn set_revolutions(&mut self, count: u32) {
        self.current.spindle_rev_count = count;
        self.publish();
    }

    pub fn set_running(&mut self, running: bool) {
        self.current.running = running;
        self.publish();
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.current.paused = paused;
        self.publish();
    }

    pub fn set_manual(&mut self, manual: bool) {
        self.current.manual = manual;
        self.publish();
    }

    pub fn set_error(&mut self, error: StatusError) {
        self.current.error = error;
        self.publish();
    }

    /// Collapse to an idle snapshot, keeping only the error field.
    pub fn set_idle(&mut self) {
        let error = self.current.error;
        self.current = StatusSnapshot {
            error,
            ..Default::default()
        };
        self.publish();
    }

    #[inline]
    fn publish(&self) {
        self.cell.publish(self.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_are_visible_to_readers() {
        let cell = Arc::new(StatusCell::new());
        let mut publisher = StatusPublisher::new(Arc::clone(&cell));

        publisher.set_phase(Phase::Cycle1);
        publisher.set_mode(2);
        publisher.set_revolutions(41);
        publisher.set_running(true);

        let seen = cell.read();
        assert_eq!(seen.phase, Phase::Cycle1);
        assert_eq!(seen.active_mode, 2);
        assert_eq!(seen.spindle_rev_count, 41);
        assert!(seen.running);
    }

    #[test]
    fn set_idle_clears_everything_but_error() {
        let cell = Arc::new(StatusCell::new());
        let mut publisher = StatusPublisher::new(Arc::clone(&cell));

        publisher.set_phase(Phase::Waiting);
        publisher.set_error(StatusError::PermitDenied);
        publisher.set_idle();

        let seen = cell.read();
        assert_eq!(seen.phase, Phase::Idle);
        assert_eq!(seen.active_mode, 0);
        assert_eq!(seen.error, StatusError::PermitDenied);
    }
}
