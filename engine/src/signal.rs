//! Per-thread cooperative signals and completion latches.
//!
//! Interruption is the only cancellation primitive a registered thread is
//! guaranteed to see. The hard-stop flag is the escalation tier: blocking
//! context calls observe it and unwind the thread with [`ForcedStop`].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Panic payload used to unwind a force-stopped thread.
///
/// Never reported as a thread failure.
#[derive(Debug, Clone, Copy)]
pub struct ForcedStop;

/// Returned by interruptible context calls when the thread was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("thread was interrupted")]
pub struct Interrupted;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SignalState {
    interrupted: bool,
    stop_requested: bool,
}

/// Outcome of [`ThreadSignal::park`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Elapsed,
    Interrupted,
    Stop,
}

#[derive(Debug, Default)]
pub(crate) struct ThreadSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ThreadSignal {
    pub(crate) fn interrupt(&self) {
        lock(&self.state).interrupted = true;
        self.cond.notify_all();
    }

    /// Sets the hard-stop flag. Also interrupts so parked threads wake up.
    pub(crate) fn request_stop(&self) {
        {
            let mut state = lock(&self.state);
            state.stop_requested = true;
            state.interrupted = true;
        }
        self.cond.notify_all();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        lock(&self.state).interrupted
    }

    /// Test-and-clear.
    pub(crate) fn clear_interrupt(&self) -> bool {
        std::mem::take(&mut lock(&self.state).interrupted)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        lock(&self.state).stop_requested
    }

    /// Blocks for up to `timeout`, returning early on interrupt or hard stop.
    ///
    /// A pending interrupt is consumed; the stop flag is sticky.
    pub(crate) fn park(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if state.stop_requested {
                return Wake::Stop;
            }
            if state.interrupted {
                state.interrupted = false;
                return Wake::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// One-shot "finished" flag with timed waits.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn set(&self) {
        *lock(&self.done) = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *lock(&self.done)
    }

    /// Waits until set; `None` waits without limit. Returns whether the latch is set.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = lock(&self.done);
        match timeout {
            None => *self
                .cond
                .wait_while(guard, |done| !*done)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |done| !*done)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            }
        }
    }
}
