use crate::{Classpath, EntryPointId, OverlayEntries, ShutdownPolicy};

/// Everything the engine needs for one run, already resolved and validated.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub entry_point: EntryPointId,
    pub classpath: Classpath,
    pub arguments: Vec<String>,
    /// Process-global environment overrides, reverted after the run.
    pub env: OverlayEntries,
    /// Invocation-local properties, visible only through the invocation context.
    pub properties: OverlayEntries,
    pub shutdown: ShutdownPolicy,
}

impl InvocationRequest {
    #[must_use]
    pub fn new(entry_point: EntryPointId, classpath: Classpath) -> Self {
        Self {
            entry_point,
            classpath,
            arguments: Vec::new(),
            env: OverlayEntries::default(),
            properties: OverlayEntries::default(),
            shutdown: ShutdownPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: OverlayEntries) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: OverlayEntries) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }
}
