//! Entry point lookup.
//!
//! An [`EntryPointLoader`] maps a classpath and an identifier to an
//! [`EntryPoint`]: a callable plus the [`Signature`] it declares. Signature
//! validation is an explicit pre-check so a wrong shape is reported as
//! [`ExecError::InvalidCallingConvention`] before any thread exists.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spindle_types::{Classpath, EntryPointId, EntryPointIdError};

use crate::context::InvocationContext;
use crate::error::ExecError;

/// A runnable program body.
pub trait Invocable: Send + Sync {
    fn invoke(&self, ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()>;
}

impl<F> Invocable for F
where
    F: Fn(&InvocationContext, &[String]) -> anyhow::Result<()> + Send + Sync,
{
    fn invoke(&self, ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()> {
        self(ctx, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Callable without an instance.
    Static,
    /// Needs an instance to be constructed first.
    Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// The argument vector.
    StringVec,
    Other(String),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StringVec => f.write_str("[String]"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Declared shape of an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub receiver: Receiver,
    pub params: Vec<ParamKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConventionViolation {
    #[error("entry point must be invocable without an instance")]
    InstanceReceiver,
    #[error("entry point must accept the argument vector")]
    MissingArgumentVector,
    #[error("entry point must accept only the argument vector, found {0} parameters")]
    UnexpectedParameters(usize),
}

impl Signature {
    /// The only accepted shape: static, one argument vector.
    #[must_use]
    pub fn main() -> Self {
        Self {
            receiver: Receiver::Static,
            params: vec![ParamKind::StringVec],
        }
    }

    #[must_use]
    pub fn new(receiver: Receiver, params: impl IntoIterator<Item = ParamKind>) -> Self {
        Self {
            receiver,
            params: params.into_iter().collect(),
        }
    }

    pub fn check(&self) -> Result<(), ConventionViolation> {
        if self.receiver == Receiver::Instance {
            return Err(ConventionViolation::InstanceReceiver);
        }
        if !self.params.contains(&ParamKind::StringVec) {
            return Err(ConventionViolation::MissingArgumentVector);
        }
        if self.params.len() != 1 {
            return Err(ConventionViolation::UnexpectedParameters(self.params.len()));
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let receiver = match self.receiver {
            Receiver::Static => "static",
            Receiver::Instance => "instance",
        };
        write!(f, "{receiver} (")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A resolved callable. Not yet validated; see [`Signature::check`].
#[derive(Clone)]
pub struct EntryPoint {
    id: EntryPointId,
    signature: Signature,
    origin: Option<PathBuf>,
    body: Arc<dyn Invocable>,
}

impl EntryPoint {
    pub fn new(id: EntryPointId, signature: Signature, body: impl Invocable + 'static) -> Self {
        Self {
            id,
            signature,
            origin: None,
            body: Arc::new(body),
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &EntryPointId {
        &self.id
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Classpath location that supplied this entry point.
    #[must_use]
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Runs the body on the calling thread.
    pub fn invoke(&self, ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()> {
        self.body.invoke(ctx, args)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

pub trait EntryPointLoader: Send + Sync {
    fn load(&self, classpath: &Classpath, id: &EntryPointId) -> Result<EntryPoint, ExecError>;
}

impl<L: EntryPointLoader + ?Sized> EntryPointLoader for Arc<L> {
    fn load(&self, classpath: &Classpath, id: &EntryPointId) -> Result<EntryPoint, ExecError> {
        (**self).load(classpath, id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("entry point {id} is already defined in {}", .library.display())]
    Duplicate { id: EntryPointId, library: PathBuf },
    #[error(transparent)]
    InvalidId(#[from] EntryPointIdError),
}

/// In-process loader: entry points grouped by the classpath location that provides them.
///
/// Lookup walks the requested classpath in order; the first location that
/// defines the identifier wins.
#[derive(Debug, Default)]
pub struct Catalog {
    libraries: HashMap<PathBuf, HashMap<EntryPointId, EntryPoint>>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(&mut self, path: impl Into<PathBuf>) -> LibraryBuilder<'_> {
        let path = path.into();
        self.libraries.entry(path.clone()).or_default();
        LibraryBuilder {
            catalog: self,
            path,
        }
    }

    /// Number of entry points across all libraries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.libraries.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntryPointLoader for Catalog {
    fn load(&self, classpath: &Classpath, id: &EntryPointId) -> Result<EntryPoint, ExecError> {
        for location in classpath.iter() {
            let Some(entry) = self
                .libraries
                .get(location.path())
                .and_then(|library| library.get(id))
            else {
                continue;
            };
            tracing::debug!(entry_point = %id, origin = %location, "Resolved entry point");
            return Ok(entry.clone());
        }
        Err(ExecError::EntryPointNotFound {
            entry_point: id.clone(),
            searched: classpath.len(),
        })
    }
}

#[derive(Debug)]
pub struct LibraryBuilder<'a> {
    catalog: &'a mut Catalog,
    path: PathBuf,
}

impl LibraryBuilder<'_> {
    /// Defines `id` with an explicit signature.
    pub fn entry(
        self,
        id: &str,
        signature: Signature,
        body: impl Invocable + 'static,
    ) -> Result<Self, CatalogError> {
        let id = EntryPointId::new(id)?;
        let library = self.catalog.libraries.entry(self.path.clone()).or_default();
        if library.contains_key(&id) {
            return Err(CatalogError::Duplicate {
                id,
                library: self.path,
            });
        }
        let entry = EntryPoint::new(id.clone(), signature, body).with_origin(&self.path);
        library.insert(id, entry);
        Ok(self)
    }

    /// Defines `id` with the standard argument-vector signature.
    pub fn main(self, id: &str, body: impl Invocable + 'static) -> Result<Self, CatalogError> {
        self.entry(id, Signature::main(), body)
    }
}
