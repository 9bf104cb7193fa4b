//! Scoped process-environment overrides.
//!
//! The process environment is a single global slot. Every holder of a
//! non-empty overlay is serialized through one process-wide lock, held from
//! [`EnvironmentOverlay::apply`] until the returned [`OverlayGuard`] restores.
//!
//! # Hazard
//!
//! The lock only arbitrates between overlays. Code that reads or writes the
//! environment without going through an overlay (another library, a test
//! harness, a concurrently running unrelated invocation that uses `std::env`
//! directly) can still observe a half-applied overlay. Callers running
//! invocations concurrently must not rely on environment overrides.
//!
//! A nested invocation started from a thread of a run that holds the lock
//! borrows that hold through an [`EnvHold`] instead of taking the lock again.
//! The enclosing run closes its hold before restoring and waits for every
//! borrower to restore first. A run that holds nothing (empty overlay), or
//! one that is already tearing down, lends nothing, so the nested run takes
//! the lock itself.

use std::ffi::OsString;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use spindle_types::OverlayEntries;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid environment key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("invalid value for environment key {key:?}: contains NUL")]
    InvalidValue { key: String },
}

/// Prior value of every slot an overlay touched, in application order.
///
/// `None` means the slot was absent and is removed again on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySnapshot {
    slots: Vec<(String, Option<OsString>)>,
}

impl OverlaySnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&OsString>)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    fn restore(&mut self) {
        for (key, prior) in self.slots.drain(..).rev() {
            // Serialized by ENV_LOCK (or by the enclosing invocation when nested).
            unsafe {
                match prior {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

pub struct EnvironmentOverlay;

impl EnvironmentOverlay {
    /// Validates and applies `entries`, capturing prior values first.
    ///
    /// Nothing is mutated when validation fails. An empty overlay takes no
    /// lock and touches nothing.
    pub fn apply(entries: &OverlayEntries) -> Result<OverlayGuard, OverlayError> {
        Self::apply_inner(entries, true)
    }

    pub(crate) fn apply_nested(entries: &OverlayEntries) -> Result<OverlayGuard, OverlayError> {
        Self::apply_inner(entries, false)
    }

    fn apply_inner(entries: &OverlayEntries, serialize: bool) -> Result<OverlayGuard, OverlayError> {
        if entries.is_empty() {
            return Ok(OverlayGuard {
                snapshot: OverlaySnapshot::default(),
                lock: None,
            });
        }
        for (key, value) in entries.iter() {
            validate(key, value)?;
        }

        let lock = serialize.then(env_guard);
        let mut snapshot = OverlaySnapshot {
            slots: Vec::with_capacity(entries.len()),
        };
        for (key, value) in entries.iter() {
            snapshot.slots.push((key.to_owned(), std::env::var_os(key)));
            // Serialized by ENV_LOCK (or by the enclosing invocation when nested).
            unsafe { std::env::set_var(key, value) };
        }
        tracing::debug!(slots = snapshot.len(), nested = !serialize, "Applied environment overlay");

        Ok(OverlayGuard {
            snapshot,
            lock,
        })
    }
}

fn validate(key: &str, value: &str) -> Result<(), OverlayError> {
    let reason = if key.is_empty() {
        Some("empty")
    } else if key.contains('=') {
        Some("contains '='")
    } else if key.contains('\0') {
        Some("contains NUL")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(OverlayError::InvalidKey {
            key: key.to_owned(),
            reason,
        });
    }
    if value.contains('\0') {
        return Err(OverlayError::InvalidValue {
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// Restores the captured snapshot when dropped or on [`OverlayGuard::restore`].
#[must_use = "dropping the guard restores the environment immediately"]
pub struct OverlayGuard {
    snapshot: OverlaySnapshot,
    lock: Option<MutexGuard<'static, ()>>,
}

impl OverlayGuard {
    #[must_use]
    pub fn snapshot(&self) -> &OverlaySnapshot {
        &self.snapshot
    }

    /// Whether this guard owns the process-wide environment lock.
    pub(crate) fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn restore(self) {
        drop(self);
    }
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        if self.snapshot.is_empty() {
            return;
        }
        let slots = self.snapshot.len();
        self.snapshot.restore();
        tracing::debug!(slots, "Restored environment overlay");
    }
}

impl std::fmt::Debug for OverlayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayGuard")
            .field("snapshot", &self.snapshot)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

/// A run's hold on the environment lock, lendable to nested runs.
#[derive(Debug, Default)]
pub(crate) struct EnvHold {
    state: Mutex<HoldState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct HoldState {
    open: bool,
    borrowers: usize,
}

impl EnvHold {
    /// `held` is true when the owning run holds the lock, directly or
    /// through a borrow of its own.
    pub(crate) fn new(held: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HoldState {
                open: held,
                borrowers: 0,
            }),
            released: Condvar::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, HoldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrows the hold if the owning run holds the lock and is still live.
    pub(crate) fn borrow(self: &Arc<Self>) -> Option<EnvBorrow> {
        let mut state = self.state();
        if !state.open {
            return None;
        }
        state.borrowers += 1;
        Some(EnvBorrow {
            hold: Arc::clone(self),
        })
    }

    /// Refuses new borrowers, then blocks until current ones are returned.
    pub(crate) fn close(&self) {
        let mut state = self.state();
        state.open = false;
        if state.borrowers > 0 {
            tracing::debug!(
                borrowers = state.borrowers,
                "Waiting for nested invocation(s) to restore their overlay"
            );
        }
        while state.borrowers > 0 {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Returned to its [`EnvHold`] on drop.
#[derive(Debug)]
pub(crate) struct EnvBorrow {
    hold: Arc<EnvHold>,
}

impl Drop for EnvBorrow {
    fn drop(&mut self) {
        let mut state = self.hold.state();
        state.borrowers -= 1;
        if state.borrowers == 0 {
            self.hold.released.notify_all();
        }
    }
}
