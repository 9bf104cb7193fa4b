//! Last-resort termination of threads that ignore interruption.
//!
//! No primitive can safely kill an uncooperative thread. Whatever a strategy
//! does bypasses the thread's own cleanup and may leave shared state
//! inconsistent; the coordinator logs a warning every time this tier runs.

use crate::registry::ThreadHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAttempt {
    /// The stop was delivered. The thread may still take time to exit, or never exit.
    Requested,
    /// This strategy has no way to stop threads.
    Unsupported,
}

pub trait HardStop: Send + Sync {
    fn name(&self) -> &'static str;

    fn stop(&self, thread: &ThreadHandle) -> StopAttempt;
}

/// Sets the hard-stop flag and interrupts.
///
/// The thread unwinds with [`crate::ForcedStop`] the next time it enters a
/// context checkpoint (`checkpoint`, `sleep`, `is_interrupted`,
/// `interrupted`). A thread that never calls back into its context cannot be
/// stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnwindAtCheckpoint;

impl HardStop for UnwindAtCheckpoint {
    fn name(&self) -> &'static str {
        "unwind-at-checkpoint"
    }

    fn stop(&self, thread: &ThreadHandle) -> StopAttempt {
        thread.request_stop();
        StopAttempt::Requested
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardStop;

impl HardStop for NoHardStop {
    fn name(&self) -> &'static str {
        "none"
    }

    fn stop(&self, _thread: &ThreadHandle) -> StopAttempt {
        StopAttempt::Unsupported
    }
}
