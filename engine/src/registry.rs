//! Per-invocation thread registry.
//!
//! Every thread an invocation creates, directly or transitively, is spawned
//! through its registry. Members are registered before their OS thread starts,
//! so a freshly spawned thread is visible to liveness queries immediately.
//!
//! The registry also owns the invocation's failure slot. The slot is set at
//! most once; whichever thread reports first wins and every later report is
//! logged as suppressed.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use spindle_types::{LiveFilter, ThreadId, ThreadKind};

use crate::error::{CapturedFailure, ExecError, FailureKind};
use crate::signal::{ForcedStop, Latch, ThreadSignal};

/// Identity of a registered thread, detached from its live handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    id: ThreadId,
    name: String,
    kind: ThreadKind,
}

impl ThreadSummary {
    #[must_use]
    pub fn new(id: ThreadId, name: impl Into<String>, kind: ThreadKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ThreadKind {
        self.kind
    }
}

impl fmt::Display for ThreadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.kind)
    }
}

/// Live handle of a registered thread.
pub struct ThreadHandle {
    summary: ThreadSummary,
    pub(crate) signal: ThreadSignal,
    pub(crate) finished: Latch,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadHandle {
    #[must_use]
    pub fn summary(&self) -> &ThreadSummary {
        &self.summary
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.summary.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.summary.name
    }

    #[must_use]
    pub fn kind(&self) -> ThreadKind {
        self.summary.kind
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Cooperative stop request.
    pub fn interrupt(&self) {
        self.signal.interrupt();
    }

    /// Sets the hard-stop flag. The thread unwinds at its next context checkpoint.
    pub fn request_stop(&self) {
        self.signal.request_stop();
    }

    fn join_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.join.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("summary", &self.summary)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

pub struct ThreadRegistry {
    label: String,
    next_id: AtomicU64,
    members: Mutex<Vec<Arc<ThreadHandle>>>,
    failure: OnceLock<CapturedFailure>,
    suppressed: AtomicUsize,
    started: AtomicUsize,
    /// Held while a failure is recorded, so a report either lands before
    /// `close` or is seen as late.
    closed: Mutex<bool>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            next_id: AtomicU64::new(1),
            members: Mutex::new(Vec::new()),
            failure: OnceLock::new(),
            suppressed: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            closed: Mutex::new(false),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn members(&self) -> MutexGuard<'_, Vec<Arc<ThreadHandle>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, kind: ThreadKind, name: Option<String>) -> Arc<ThreadHandle> {
        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.unwrap_or_else(|| format!("{}-thread-{}", self.label, id.value()));
        let handle = Arc::new(ThreadHandle {
            summary: ThreadSummary::new(id, name, kind),
            signal: ThreadSignal::default(),
            finished: Latch::default(),
            join: Mutex::new(None),
        });
        self.members().push(Arc::clone(&handle));
        tracing::debug!(registry = %self.label, thread = %handle.summary, "Registered thread");
        handle
    }

    fn unregister(&self, id: ThreadId) {
        self.members().retain(|member| member.id() != id);
    }

    /// Registers a member and starts its OS thread.
    ///
    /// The body's `Err` and panics are reported as the member's failure. A
    /// [`ForcedStop`] unwind is not a failure.
    pub(crate) fn spawn<F>(
        self: &Arc<Self>,
        kind: ThreadKind,
        name: Option<String>,
        body: F,
    ) -> Result<Arc<ThreadHandle>, ExecError>
    where
        F: FnOnce(Arc<ThreadHandle>) -> anyhow::Result<()> + Send + 'static,
    {
        let handle = self.register(kind, name);
        let member = Arc::clone(&handle);
        let registry = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(handle.name().to_owned())
            .spawn(move || registry.run_member(member, body));

        match spawned {
            Ok(join) => {
                *handle.join_slot() = Some(join);
                self.started.fetch_add(1, Ordering::Relaxed);
                Ok(handle)
            }
            Err(err) => {
                handle.finished.set();
                self.unregister(handle.id());
                Err(ExecError::Spawn {
                    name: handle.name().to_owned(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn run_member<F>(&self, member: Arc<ThreadHandle>, body: F)
    where
        F: FnOnce(Arc<ThreadHandle>) -> anyhow::Result<()>,
    {
        tracing::debug!(thread = %member.summary, os_tid = ?os_tid(), "Thread started");
        let outcome = catch_unwind(AssertUnwindSafe(|| body(Arc::clone(&member))));
        match outcome {
            Ok(Ok(())) => tracing::debug!(thread = %member.summary, "Thread finished"),
            Ok(Err(err)) => self.report_failure(&member, FailureKind::Error, err),
            Err(payload) if payload.is::<ForcedStop>() => {
                tracing::debug!(thread = %member.summary, "Thread unwound by hard stop");
            }
            Err(payload) => {
                let message = panic_payload_to_string(&payload);
                self.report_failure(&member, FailureKind::Panic, anyhow::anyhow!(message));
            }
        }
        member.finished.set();
    }

    /// Records `cause` as the invocation failure unless one is already set.
    ///
    /// Safe to call from any number of threads at once; exactly one cause is kept.
    pub fn report_failure(&self, thread: &ThreadHandle, kind: FailureKind, cause: anyhow::Error) {
        let candidate = CapturedFailure::new(thread.summary.clone(), kind, cause);
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            tracing::warn!(
                registry = %self.label,
                error = %candidate,
                "Failure in thread after invocation completed; not captured"
            );
            return;
        }
        match self.failure.set(candidate) {
            Ok(()) => tracing::debug!(registry = %self.label, thread = %thread.summary, "Captured failure"),
            Err(lost) => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    registry = %self.label,
                    error = %lost,
                    "Suppressed secondary failure"
                );
            }
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&CapturedFailure> {
        self.failure.get()
    }

    #[must_use]
    pub fn suppressed_failures(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Unfinished members matching `filter`, in registration order.
    #[must_use]
    pub fn live(&self, filter: LiveFilter) -> Vec<Arc<ThreadHandle>> {
        self.members()
            .iter()
            .filter(|member| filter.matches(member.kind()) && !member.is_finished())
            .cloned()
            .collect()
    }

    /// Number of threads successfully started.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    /// Reaps finished members and detaches lingering ones. Idempotent.
    ///
    /// Returns the number of detached threads.
    pub fn close(&self) -> usize {
        {
            let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return 0;
            }
            *closed = true;
        }
        let members = std::mem::take(&mut *self.members());
        let mut detached = 0;
        for member in members {
            let Some(join) = member.join_slot().take() else {
                continue;
            };
            if member.is_finished() {
                if join.join().is_err() {
                    tracing::debug!(thread = %member.summary, "Thread exited abnormally after finishing");
                }
            } else {
                detached += 1;
                tracing::debug!(thread = %member.summary, "Detaching lingering thread");
            }
        }
        tracing::debug!(registry = %self.label, detached, "Registry closed");
        detached
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("label", &self.label)
            .field("members", &self.members().len())
            .field("failure", &self.failure.get().is_some())
            .finish_non_exhaustive()
    }
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(target_os = "linux")]
fn os_tid() -> Option<i64> {
    // gettid has no arguments and cannot fail.
    Some(i64::from(unsafe { libc::syscall(libc::SYS_gettid) }))
}

#[cfg(not(target_os = "linux"))]
fn os_tid() -> Option<i64> {
    None
}
