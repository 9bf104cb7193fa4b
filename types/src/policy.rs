//! Shutdown tuning for background threads.

use std::time::Duration;

/// Budget for waiting on interrupted background threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationTimeout {
    Bounded(Duration),
    Unbounded,
}

impl TerminationTimeout {
    pub const DEFAULT_MILLIS: i64 = 15_000;

    /// Values `<= 0` mean "wait until the thread finishes".
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        if millis <= 0 {
            Self::Unbounded
        } else {
            Self::Bounded(Duration::from_millis(millis as u64))
        }
    }

    /// Time left after `elapsed`, or `None` when unbounded.
    #[must_use]
    pub fn remaining(self, elapsed: Duration) -> Option<Duration> {
        match self {
            Self::Bounded(budget) => Some(budget.saturating_sub(elapsed)),
            Self::Unbounded => None,
        }
    }

    #[must_use]
    pub fn is_exhausted(self, elapsed: Duration) -> bool {
        self.remaining(elapsed).is_some_and(|left| left.is_zero())
    }
}

impl Default for TerminationTimeout {
    fn default() -> Self {
        Self::from_millis(Self::DEFAULT_MILLIS)
    }
}

impl std::fmt::Display for TerminationTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounded(d) => write!(f, "{}ms", d.as_millis()),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// How the engine treats threads that outlive the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Interrupt and wait out background threads. When off, they are left alone.
    pub cleanup_background: bool,
    pub timeout: TerminationTimeout,
    /// Permit the hard-stop tier for threads that ignore interruption.
    pub force_stop: bool,
    /// Total wait for force-stopped threads to actually exit.
    pub escalation_grace: Duration,
}

impl ShutdownPolicy {
    pub const DEFAULT_ESCALATION_GRACE: Duration = Duration::from_millis(250);

    #[must_use]
    pub fn with_timeout(mut self, timeout: TerminationTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_force_stop(mut self, force_stop: bool) -> Self {
        self.force_stop = force_stop;
        self
    }
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            cleanup_background: true,
            timeout: TerminationTimeout::default(),
            force_stop: false,
            escalation_grace: Self::DEFAULT_ESCALATION_GRACE,
        }
    }
}
