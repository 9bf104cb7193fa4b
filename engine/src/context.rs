//! The capability handed to entry points and every thread they spawn.

use std::cell::RefCell;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::time::Duration;

use spindle_types::{Classpath, EntryPointId, OverlayEntries, ThreadKind};

use crate::error::ExecError;
use crate::invoker;
use crate::loader::{EntryPoint, EntryPointLoader};
use crate::overlay::{EnvBorrow, EnvHold};
use crate::registry::{ThreadHandle, ThreadRegistry, ThreadSummary};
use crate::signal::{ForcedStop, Interrupted, Wake};

thread_local! {
    static CURRENT: RefCell<Option<InvocationContext>> = const { RefCell::new(None) };
}

/// State shared by every thread of one invocation.
pub(crate) struct InvocationScope {
    pub(crate) entry_point: EntryPointId,
    pub(crate) classpath: Classpath,
    pub(crate) properties: OverlayEntries,
    pub(crate) registry: Arc<ThreadRegistry>,
    pub(crate) loader: Arc<dyn EntryPointLoader>,
    pub(crate) env_hold: Arc<EnvHold>,
}

impl InvocationScope {
    /// Spawns a registered thread whose body runs with its own context installed.
    pub(crate) fn spawn<F>(
        self: &Arc<Self>,
        kind: ThreadKind,
        name: Option<String>,
        body: F,
    ) -> Result<ThreadSummary, ExecError>
    where
        F: FnOnce(&InvocationContext) -> anyhow::Result<()> + Send + 'static,
    {
        let scope = Arc::clone(self);
        let handle = self.registry.spawn(kind, name, move |thread| {
            let ctx = InvocationContext { scope, thread };
            let _installed = ctx.install();
            body(&ctx)
        })?;
        Ok(handle.summary().clone())
    }
}

/// Invocation-scoped view for the thread that holds it.
///
/// Every call that observes the interrupt flag, plus [`sleep`](Self::sleep)
/// and [`checkpoint`](Self::checkpoint), is a hard-stop checkpoint: once the
/// engine escalates, the thread unwinds from there with [`ForcedStop`].
#[derive(Clone)]
pub struct InvocationContext {
    scope: Arc<InvocationScope>,
    thread: Arc<ThreadHandle>,
}

impl InvocationContext {
    /// Context of the registered thread this is called from, if any.
    #[must_use]
    pub fn current() -> Option<InvocationContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    fn install(&self) -> InstallGuard {
        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        InstallGuard { previous }
    }

    #[must_use]
    pub fn classpath(&self) -> &Classpath {
        &self.scope.classpath
    }

    #[must_use]
    pub fn entry_point(&self) -> &EntryPointId {
        &self.scope.entry_point
    }

    /// Invocation-local property; later definitions win.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.scope.properties.get(key)
    }

    #[must_use]
    pub fn current_thread(&self) -> &ThreadSummary {
        self.thread.summary()
    }

    /// Whether this thread has a pending interrupt. Does not clear it.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.checkpoint();
        self.thread.signal.is_interrupted()
    }

    /// Test-and-clear of the interrupt flag.
    pub fn interrupted(&self) -> bool {
        self.checkpoint();
        self.thread.signal.clear_interrupt()
    }

    /// Sleeps for `duration`, returning early with [`Interrupted`] if asked to stop.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        match self.thread.signal.park(duration) {
            Wake::Elapsed => Ok(()),
            Wake::Interrupted => Err(Interrupted),
            Wake::Stop => forced_stop(),
        }
    }

    /// Unwinds this thread if a hard stop was requested.
    pub fn checkpoint(&self) {
        if self.thread.signal.stop_requested() {
            forced_stop();
        }
    }

    /// Spawns a background thread in this invocation.
    pub fn spawn<F>(&self, name: impl Into<String>, body: F) -> Result<ThreadSummary, ExecError>
    where
        F: FnOnce(&InvocationContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.builder().name(name).spawn(body)
    }

    #[must_use]
    pub fn builder(&self) -> ThreadBuilder<'_> {
        ThreadBuilder {
            ctx: self,
            name: None,
            kind: ThreadKind::Background,
        }
    }

    /// Borrows this run's environment lock for a nested run, if it has one to lend.
    pub(crate) fn borrow_env(&self) -> Option<EnvBorrow> {
        self.scope.env_hold.borrow()
    }

    /// Looks up and validates another entry point on this invocation's classpath.
    pub fn resolve(&self, id: &EntryPointId) -> Result<EntryPoint, ExecError> {
        invoker::resolve(&*self.scope.loader, &self.scope.classpath, id)
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("entry_point", &self.scope.entry_point)
            .field("thread", self.thread.summary())
            .finish_non_exhaustive()
    }
}

fn forced_stop() -> ! {
    resume_unwind(Box::new(ForcedStop))
}

struct InstallGuard {
    previous: Option<InvocationContext>,
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Configures a thread before spawning it. Threads default to background.
pub struct ThreadBuilder<'a> {
    ctx: &'a InvocationContext,
    name: Option<String>,
    kind: ThreadKind,
}

impl ThreadBuilder<'_> {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The engine waits for foreground threads unconditionally.
    #[must_use]
    pub fn foreground(mut self) -> Self {
        self.kind = ThreadKind::Foreground;
        self
    }

    pub fn spawn<F>(self, body: F) -> Result<ThreadSummary, ExecError>
    where
        F: FnOnce(&InvocationContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.ctx.scope.spawn(self.kind, self.name, body)
    }
}
