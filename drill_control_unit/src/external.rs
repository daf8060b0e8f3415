//! Seams to the external collaborators the core only talks *through*.

use tracing::info;

/// Operation-permit query, asked before every `Waiting → Cycle1`
/// transition. The concrete policy (date lockout, licensing) lives with
/// the collaborator; the core only sees the boolean.
pub trait OperationPermit: Send {
    fn permitted(&self) -> bool;
}

impl<F> OperationPermit for F
where
    F: Fn() -> bool + Send,
{
    fn permitted(&self) -> bool {
        self()
    }
}

/// Permit that always allows cycle starts.
pub struct AlwaysPermitted;

impl OperationPermit for AlwaysPermitted {
    fn permitted(&self) -> bool {
        true
    }
}

/// Write-only sink for short operator status lines.
pub trait StatusDisplay: Send {
    fn show(&mut self, line: &str);
}

/// Default display: status lines go to the log.
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show(&mut self, line: &str) {
        info!(target: "display", "{line}");
    }
}
