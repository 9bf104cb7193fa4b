//! Drives every thread of an invocation to completion.
//!
//! Foreground threads are awaited without limit. Background threads are then
//! interrupted and waited out within the timeout budget, with the registry
//! rescanned after each sweep to catch threads spawned in the meantime.
//! Threads still alive when the budget runs out are either left lingering or,
//! when the policy permits, handed to a [`HardStop`] strategy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use spindle_types::{LiveFilter, ShutdownPolicy, TerminationTimeout, ThreadId};

use crate::hard_stop::{HardStop, StopAttempt};
use crate::registry::{ThreadHandle, ThreadRegistry, ThreadSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitForeground,
    RequestStop,
    AwaitBackground,
    Escalate,
    Done,
}

impl Phase {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitForeground => "await_foreground",
            Self::RequestStop => "request_stop",
            Self::AwaitBackground => "await_background",
            Self::Escalate => "escalate",
            Self::Done => "done",
        }
    }
}

/// Non-fatal shutdown outcomes. Never change the invocation verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownWarning {
    #[error("{lingering} thread(s) did not finish despite being asked via interruption (budget {budget})")]
    Timeout {
        budget: TerminationTimeout,
        lingering: usize,
    },
    #[error("{threads} thread(s) were force-stopped; resources they held may be left inconsistent")]
    ForcedTermination { threads: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Background threads still running when the coordinator returned.
    pub lingering: Vec<ThreadSummary>,
    /// Threads that exited after the hard-stop tier ran.
    pub force_stopped: Vec<ThreadSummary>,
    pub warnings: Vec<ShutdownWarning>,
    /// Background cleanup was disabled; background threads were never touched.
    pub cleanup_skipped: bool,
}

impl ShutdownReport {
    /// No lingering threads and no warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.lingering.is_empty() && self.warnings.is_empty()
    }
}

pub struct ShutdownCoordinator<'a> {
    registry: &'a ThreadRegistry,
    policy: &'a ShutdownPolicy,
    hard_stop: &'a dyn HardStop,
    budget_start: Option<Instant>,
    batch: Vec<Arc<ThreadHandle>>,
    uncooperative: Vec<Arc<ThreadHandle>>,
    report: ShutdownReport,
}

impl<'a> ShutdownCoordinator<'a> {
    #[must_use]
    pub fn new(
        registry: &'a ThreadRegistry,
        policy: &'a ShutdownPolicy,
        hard_stop: &'a dyn HardStop,
    ) -> Self {
        Self {
            registry,
            policy,
            hard_stop,
            budget_start: None,
            batch: Vec::new(),
            uncooperative: Vec::new(),
            report: ShutdownReport::default(),
        }
    }

    /// Blocks until every foreground thread has finished and background
    /// threads have been dealt with according to the policy.
    pub fn run(mut self) -> ShutdownReport {
        let mut phase = Phase::AwaitForeground;
        while phase != Phase::Done {
            tracing::debug!(registry = %self.registry.label(), phase = phase.as_str(), "Shutdown phase");
            phase = match phase {
                Phase::AwaitForeground => self.await_foreground(),
                Phase::RequestStop => self.request_stop(),
                Phase::AwaitBackground => self.await_background(),
                Phase::Escalate => self.escalate(),
                Phase::Done => Phase::Done,
            };
        }
        self.finish()
    }

    fn elapsed(&self) -> Duration {
        self.budget_start.map_or(Duration::ZERO, |start| start.elapsed())
    }

    fn await_foreground(&mut self) -> Phase {
        // New foreground threads may appear while waiting, so repeat until a
        // full pass finds none alive.
        loop {
            let foreground = self.registry.live(LiveFilter::Foreground);
            if foreground.is_empty() {
                break;
            }
            for thread in foreground {
                tracing::debug!(thread = %thread.summary(), "Waiting for foreground thread");
                thread.finished.wait(None);
                tracing::debug!(thread = %thread.summary(), "Foreground thread joined");
            }
        }

        if !self.policy.cleanup_background {
            self.report.cleanup_skipped = true;
            return Phase::Done;
        }
        self.budget_start = Some(Instant::now());
        Phase::RequestStop
    }

    fn is_uncooperative(&self, id: ThreadId) -> bool {
        self.uncooperative.iter().any(|thread| thread.id() == id)
    }

    fn request_stop(&mut self) -> Phase {
        let pending: Vec<_> = self
            .registry
            .live(LiveFilter::Background)
            .into_iter()
            .filter(|thread| !self.is_uncooperative(thread.id()))
            .collect();
        if pending.is_empty() {
            return self.after_budget();
        }
        for thread in &pending {
            tracing::debug!(thread = %thread.summary(), "Interrupting thread");
            thread.interrupt();
        }
        self.batch = pending;
        Phase::AwaitBackground
    }

    fn await_background(&mut self) -> Phase {
        for thread in std::mem::take(&mut self.batch) {
            let remaining = self.policy.timeout.remaining(self.elapsed());
            tracing::debug!(
                thread = %thread.summary(),
                remaining_ms = ?remaining.map(|d| d.as_millis()),
                "Joining interrupted thread"
            );
            if thread.finished.wait(remaining) {
                tracing::debug!(thread = %thread.summary(), "Thread joined");
            } else {
                tracing::debug!(thread = %thread.summary(), "Thread ignored interruption");
                self.uncooperative.push(thread);
            }
        }

        if self.policy.timeout.is_exhausted(self.elapsed()) {
            self.after_budget()
        } else {
            Phase::RequestStop
        }
    }

    /// Live set is empty or the budget is gone: escalate or stop.
    fn after_budget(&mut self) -> Phase {
        self.uncooperative.retain(|thread| !thread.is_finished());
        if self.policy.force_stop && !self.stragglers().is_empty() {
            Phase::Escalate
        } else {
            Phase::Done
        }
    }

    fn stragglers(&self) -> Vec<Arc<ThreadHandle>> {
        self.registry.live(LiveFilter::Background)
    }

    fn escalate(&mut self) -> Phase {
        let targets = self.stragglers();
        tracing::warn!(
            threads = targets.len(),
            strategy = self.hard_stop.name(),
            "Unresponsive thread(s) will be force-stopped; this is unsafe and may leak resources"
        );
        self.report.warnings.push(ShutdownWarning::ForcedTermination {
            threads: targets.len(),
        });

        let mut requested = Vec::with_capacity(targets.len());
        for thread in targets {
            tracing::warn!(thread = %thread.summary(), "Force-stopping thread");
            match self.hard_stop.stop(&thread) {
                StopAttempt::Requested => requested.push(thread),
                StopAttempt::Unsupported => {
                    tracing::warn!(
                        thread = %thread.summary(),
                        strategy = self.hard_stop.name(),
                        "Hard stop unsupported; thread left running"
                    );
                }
            }
        }

        let deadline = Instant::now() + self.policy.escalation_grace;
        for thread in requested {
            let left = deadline.saturating_duration_since(Instant::now());
            if thread.finished.wait(Some(left)) {
                tracing::debug!(thread = %thread.summary(), "Force-stopped thread exited");
                self.report.force_stopped.push(thread.summary().clone());
            } else {
                tracing::warn!(thread = %thread.summary(), "Thread survived hard stop");
            }
        }
        Phase::Done
    }

    fn finish(mut self) -> ShutdownReport {
        let lingering: Vec<ThreadSummary> = self
            .stragglers()
            .iter()
            .map(|thread| thread.summary().clone())
            .collect();

        if self.report.cleanup_skipped {
            if !lingering.is_empty() {
                tracing::debug!(
                    threads = lingering.len(),
                    "Background cleanup disabled; leaving thread(s) running"
                );
            }
        } else if !lingering.is_empty() {
            let warning = ShutdownWarning::Timeout {
                budget: self.policy.timeout,
                lingering: lingering.len(),
            };
            tracing::warn!(
                threads = ?lingering.iter().map(ThreadSummary::name).collect::<Vec<_>>(),
                "{warning}"
            );
            self.report.warnings.push(warning);
        }

        let unaccounted = self
            .registry
            .live(LiveFilter::All)
            .len()
            .saturating_sub(lingering.len());
        if unaccounted > 0 {
            tracing::debug!("strange; {unaccounted} thread(s) still active");
        }

        self.report.lingering = lingering;
        self.report
    }
}
