use std::sync::Arc;

use spindle_types::{Classpath, EntryPointId, ThreadKind};

use crate::context::InvocationScope;
use crate::error::ExecError;
use crate::loader::{EntryPoint, EntryPointLoader};
use crate::registry::ThreadSummary;

/// Loads `id` and checks its calling convention. Spawns nothing.
pub(crate) fn resolve(
    loader: &dyn EntryPointLoader,
    classpath: &Classpath,
    id: &EntryPointId,
) -> Result<EntryPoint, ExecError> {
    let entry = loader.load(classpath, id)?;
    if let Err(violation) = entry.signature().check() {
        return Err(ExecError::InvalidCallingConvention {
            entry_point: id.clone(),
            signature: entry.signature().clone(),
            violation,
        });
    }
    Ok(entry)
}

/// Resolves entry points and runs them on a bootstrap thread.
#[derive(Clone)]
pub struct EntryPointInvoker {
    loader: Arc<dyn EntryPointLoader>,
}

impl EntryPointInvoker {
    pub fn new(loader: Arc<dyn EntryPointLoader>) -> Self {
        Self { loader }
    }

    pub(crate) fn loader(&self) -> &Arc<dyn EntryPointLoader> {
        &self.loader
    }

    /// Fails fast with [`ExecError::EntryPointNotFound`] or
    /// [`ExecError::InvalidCallingConvention`].
    pub fn prepare(&self, classpath: &Classpath, id: &EntryPointId) -> Result<EntryPoint, ExecError> {
        resolve(&*self.loader, classpath, id)
    }

    /// Spawns the foreground bootstrap thread running `entry`.
    ///
    /// Anything the body raises travels the registry's failure path like any
    /// other thread's.
    pub(crate) fn start(
        &self,
        scope: &Arc<InvocationScope>,
        entry: EntryPoint,
        args: Vec<String>,
    ) -> Result<ThreadSummary, ExecError> {
        tracing::debug!("Invoking: {}({})", entry.id(), args.join(", "));
        let name = format!("{}.main()", entry.id());
        scope.spawn(ThreadKind::Foreground, Some(name), move |ctx| {
            entry.invoke(ctx, &args)
        })
    }
}

impl std::fmt::Debug for EntryPointInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointInvoker").finish_non_exhaustive()
    }
}
