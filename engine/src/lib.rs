//! Supervised, isolated execution of entry points.
//!
//! [`Engine::run`] applies an environment overlay, resolves the entry point,
//! runs it on a registered foreground thread, waits for foreground work,
//! shuts background threads down within the configured budget, restores the
//! overlay, and reports the first failure any thread raised.
//!
//! ```no_run
//! use spindle_engine::{Catalog, Engine, InvocationContext};
//! use spindle_types::{Classpath, EntryPointId, InvocationRequest};
//!
//! let mut catalog = Catalog::new();
//! catalog
//!     .library("/opt/app/app.jar")
//!     .main("app.Main", |_: &InvocationContext, args: &[String]| {
//!         println!("hello {}", args.join(" "));
//!         Ok(())
//!     })?;
//!
//! let request = InvocationRequest::new(
//!     EntryPointId::new("app.Main")?,
//!     Classpath::new(["/opt/app/app.jar"])?,
//! )
//! .with_arguments(["world"]);
//!
//! let outcome = Engine::new(catalog).run(request);
//! assert!(outcome.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

use std::sync::Arc;

mod context;
mod error;
mod hard_stop;
mod invoker;
mod loader;
mod outcome;
mod overlay;
mod registry;
mod shutdown;
mod signal;

pub use context::{InvocationContext, ThreadBuilder};
pub use error::{CapturedFailure, ExecError, FailureKind};
pub use hard_stop::{HardStop, NoHardStop, StopAttempt, UnwindAtCheckpoint};
pub use invoker::EntryPointInvoker;
pub use loader::{
    Catalog, CatalogError, ConventionViolation, EntryPoint, EntryPointLoader, Invocable,
    LibraryBuilder, ParamKind, Receiver, Signature,
};
pub use outcome::{InvocationOutcome, InvocationResult};
pub use overlay::{EnvironmentOverlay, OverlayError, OverlayGuard, OverlaySnapshot};
pub use registry::{ThreadHandle, ThreadRegistry, ThreadSummary};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownWarning};
pub use signal::{ForcedStop, Interrupted};

use context::InvocationScope;
use overlay::EnvHold;
use spindle_types::InvocationRequest;

// ============================================================================
// Engine
// ============================================================================

/// Runs invocations against one loader.
///
/// An engine holds no per-invocation state; every [`Engine::run`] gets a
/// fresh registry, so concurrent runs never share threads or failures.
/// Concurrent runs with non-empty environment overlays are serialized.
#[derive(Clone)]
pub struct Engine {
    invoker: EntryPointInvoker,
    hard_stop: Arc<dyn HardStop>,
}

impl Engine {
    pub fn new(loader: impl EntryPointLoader + 'static) -> Self {
        Self::with_loader(Arc::new(loader))
    }

    pub fn with_loader(loader: Arc<dyn EntryPointLoader>) -> Self {
        Self {
            invoker: EntryPointInvoker::new(loader),
            hard_stop: Arc::new(UnwindAtCheckpoint),
        }
    }

    /// Strategy for the escalation tier. Only used when the request's policy
    /// permits force-stopping.
    #[must_use]
    pub fn with_hard_stop(mut self, hard_stop: impl HardStop + 'static) -> Self {
        self.hard_stop = Arc::new(hard_stop);
        self
    }

    #[must_use]
    pub fn invoker(&self) -> &EntryPointInvoker {
        &self.invoker
    }

    /// Blocks until the entry point and every foreground thread it created
    /// have finished and background threads were shut down per the policy.
    pub fn run(&self, request: InvocationRequest) -> InvocationOutcome {
        let InvocationRequest {
            entry_point,
            classpath,
            arguments,
            env,
            properties,
            shutdown,
        } = request;

        tracing::info!(
            entry_point = %entry_point,
            classpath = %classpath,
            arguments = arguments.len(),
            "Starting invocation"
        );

        // Declared before the overlay so it is returned only after the restore.
        let enclosing = InvocationContext::current().and_then(|ctx| ctx.borrow_env());
        let applied = if enclosing.is_some() {
            EnvironmentOverlay::apply_nested(&env)
        } else {
            EnvironmentOverlay::apply(&env)
        };
        let overlay = match applied {
            Ok(guard) => guard,
            Err(err) => return Self::finish(&entry_point, InvocationOutcome::fatal(err.into())),
        };
        let env_hold = EnvHold::new(enclosing.is_some() || overlay.holds_lock());

        let entry = match self.invoker.prepare(&classpath, &entry_point) {
            Ok(entry) => entry,
            Err(err) => {
                overlay.restore();
                return Self::finish(&entry_point, InvocationOutcome::fatal(err));
            }
        };

        let registry = ThreadRegistry::new(entry_point.as_str());
        let scope = Arc::new(InvocationScope {
            entry_point: entry_point.clone(),
            classpath,
            properties,
            registry: Arc::clone(&registry),
            loader: Arc::clone(self.invoker.loader()),
            env_hold: Arc::clone(&env_hold),
        });

        let started = self.invoker.start(&scope, entry, arguments);
        drop(scope);

        let report = ShutdownCoordinator::new(&registry, &shutdown, &*self.hard_stop).run();
        let threads_spawned = registry.spawned();
        // Closing first makes any later failure a post-run failure, which the
        // registry logs at warn instead of capturing.
        registry.close();
        let failure = registry.failure().cloned();
        env_hold.close();
        overlay.restore();
        drop(enclosing);

        let result = match (started, failure) {
            (Err(err), _) => InvocationResult::Failure(err),
            (Ok(_), Some(failure)) => InvocationResult::Failure(ExecError::ThreadFailure(failure)),
            (Ok(_), None) => InvocationResult::Success,
        };

        Self::finish(
            &entry_point,
            InvocationOutcome {
                result,
                report,
                threads_spawned,
            },
        )
    }

    fn finish(
        entry_point: &spindle_types::EntryPointId,
        outcome: InvocationOutcome,
    ) -> InvocationOutcome {
        tracing::info!(
            entry_point = %entry_point,
            result = outcome.result.as_label(),
            threads = outcome.threads_spawned,
            lingering = outcome.report.lingering.len(),
            "Invocation finished"
        );
        outcome
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("hard_stop", &self.hard_stop.name())
            .finish_non_exhaustive()
    }
}
