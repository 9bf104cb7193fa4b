//! Ordered classpath handed over by the artifact resolver.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClasspathError {
    #[error("classpath entry must be an absolute path: {}", .0.display())]
    Relative(PathBuf),
}

/// One absolute location on the classpath.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct ClasspathEntry(PathBuf);

impl ClasspathEntry {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ClasspathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(ClasspathError::Relative(path));
        }
        Ok(Self(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl TryFrom<PathBuf> for ClasspathEntry {
    type Error = ClasspathError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClasspathEntry> for PathBuf {
    fn from(value: ClasspathEntry) -> Self {
        value.0
    }
}

impl fmt::Display for ClasspathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Fully resolved, ordered classpath. Earlier entries shadow later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classpath(Vec<ClasspathEntry>);

impl Classpath {
    pub fn new<I, P>(entries: I) -> Result<Self, ClasspathError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        entries
            .into_iter()
            .map(ClasspathEntry::new)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    #[must_use]
    pub fn entries(&self) -> &[ClasspathEntry] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClasspathEntry> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of `path` on the classpath, if present.
    #[must_use]
    pub fn position(&self, path: &Path) -> Option<usize> {
        self.0.iter().position(|entry| entry.path() == path)
    }
}

impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if cfg!(windows) { ";" } else { ":" };
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(sep)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}
