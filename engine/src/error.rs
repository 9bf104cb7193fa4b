//! Error taxonomy for invocations.
//!
//! Fatal kinds ([`ExecError::EntryPointNotFound`],
//! [`ExecError::InvalidCallingConvention`]) are raised before any thread is
//! spawned. Everything a running thread raises is funneled into a single
//! [`CapturedFailure`], whether it came from the entry point itself or from a
//! thread it spawned.

use std::fmt;
use std::sync::Arc;

use spindle_types::EntryPointId;

use crate::loader::{ConventionViolation, Signature};
use crate::overlay::OverlayError;
use crate::registry::ThreadSummary;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("entry point '{entry_point}' not found on classpath ({searched} location(s) searched)")]
    EntryPointNotFound {
        entry_point: EntryPointId,
        searched: usize,
    },
    #[error("entry point '{entry_point}' has signature {signature}: {violation}")]
    InvalidCallingConvention {
        entry_point: EntryPointId,
        signature: Signature,
        violation: ConventionViolation,
    },
    #[error(transparent)]
    ThreadFailure(#[from] CapturedFailure),
    #[error("failed to spawn thread '{name}': {message}")]
    Spawn { name: String, message: String },
    #[error("environment overlay rejected: {0}")]
    Overlay(#[from] OverlayError),
}

impl ExecError {
    /// Short stable label (snake_case) for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::EntryPointNotFound { .. } => "entry_point_not_found",
            ExecError::InvalidCallingConvention { .. } => "invalid_calling_convention",
            ExecError::ThreadFailure(_) => "thread_failure",
            ExecError::Spawn { .. } => "spawn_failed",
            ExecError::Overlay(_) => "overlay_rejected",
        }
    }

    /// True for errors raised before any thread ran.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecError::ThreadFailure(_))
    }

    #[must_use]
    pub fn captured(&self) -> Option<&CapturedFailure> {
        match self {
            ExecError::ThreadFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// How a registered thread failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The thread body returned `Err`.
    Error,
    /// The thread body panicked.
    Panic,
}

/// The first unhandled failure of any thread in one invocation.
#[derive(Debug, Clone)]
pub struct CapturedFailure {
    thread: ThreadSummary,
    kind: FailureKind,
    cause: Arc<anyhow::Error>,
}

impl CapturedFailure {
    pub(crate) fn new(thread: ThreadSummary, kind: FailureKind, cause: anyhow::Error) -> Self {
        Self {
            thread,
            kind,
            cause: Arc::new(cause),
        }
    }

    #[must_use]
    pub fn thread(&self) -> &ThreadSummary {
        &self.thread
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Downcast the root error raised by the thread.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.cause.downcast_ref::<E>()
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            FailureKind::Error => "an error",
            FailureKind::Panic => "a panic",
        };
        write!(
            f,
            "{what} occurred in thread '{}': {:#}",
            self.thread.name(),
            self.cause
        )
    }
}

impl std::error::Error for CapturedFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = (*self.cause).as_ref();
        Some(inner)
    }
}
