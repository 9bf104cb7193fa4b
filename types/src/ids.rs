use std::fmt;

/// Identity of one registered thread within a single invocation.
///
/// Ids are assigned in registration order starting at 1, so sorting by id
/// reproduces the order threads were created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Classification fixed at thread creation.
///
/// Foreground threads must finish on their own; background threads may be
/// asked to stop once foreground work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    Foreground,
    Background,
}

impl ThreadKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector for registry liveness queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFilter {
    Foreground,
    Background,
    All,
}

impl LiveFilter {
    #[must_use]
    pub const fn matches(self, kind: ThreadKind) -> bool {
        match self {
            Self::All => true,
            Self::Foreground => matches!(kind, ThreadKind::Foreground),
            Self::Background => matches!(kind, ThreadKind::Background),
        }
    }
}
