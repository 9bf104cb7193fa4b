use crate::error::ExecError;
use crate::shutdown::ShutdownReport;

/// Verdict of one invocation.
///
/// Success means every thread returned without raising. Lingering threads
/// and forced stops are reported on [`InvocationOutcome::report`] and do not
/// change the verdict.
#[derive(Debug, Clone)]
pub enum InvocationResult {
    Success,
    Failure(ExecError),
}

impl InvocationResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ExecError> {
        match self {
            Self::Success => None,
            Self::Failure(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<(), ExecError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(err) => Err(err),
        }
    }

    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(err) => err.as_label(),
        }
    }
}

impl From<Result<(), ExecError>> for InvocationResult {
    fn from(result: Result<(), ExecError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(err) => Self::Failure(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub result: InvocationResult,
    pub report: ShutdownReport,
    /// Threads started for this invocation, the bootstrap thread included.
    pub threads_spawned: usize,
}

impl InvocationOutcome {
    pub(crate) fn fatal(err: ExecError) -> Self {
        Self {
            result: InvocationResult::Failure(err),
            report: ShutdownReport::default(),
            threads_spawned: 0,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}
