//! Configuration loading for Spindle.
//!
//! Raw TOML structs (with `Option` fields) stay private to this crate. The
//! loader resolves them into a validated [`InvocationRequest`] at the parse
//! boundary, so everything downstream works with proven-valid values.
//!
//! ```toml
//! [invocation]
//! entry_point = "com.example.Main"
//! classpath = ["${HOME}/.m2/repository/com/example/app/1.0/app-1.0.jar"]
//! arguments = ["--port", "8080"]
//!
//! [overlay.env]
//! APP_MODE = "batch"
//!
//! [overlay.properties]
//! "app.name" = "demo"
//!
//! [shutdown]
//! cleanup_background_threads = true
//! join_timeout_ms = 15000
//! force_stop_unresponsive = false
//! escalation_grace_ms = 250
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use spindle_types::{
    Classpath, ClasspathError, EntryPointId, EntryPointIdError, InvocationRequest,
    OverlayEntries, ShutdownPolicy, TerminationTimeout,
};

/// Environment variable that overrides `[invocation].entry_point`.
pub const ENTRY_POINT_ENV: &str = "SPINDLE_ENTRY_POINT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no entry point configured (set [invocation].entry_point or SPINDLE_ENTRY_POINT)")]
    MissingEntryPoint,
    #[error("invalid entry point: {0}")]
    EntryPoint(#[from] EntryPointIdError),
    #[error("invalid classpath: {0}")]
    Classpath(#[from] ClasspathError),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            _ => None,
        }
    }
}

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

const fn default_join_timeout_ms() -> i64 {
    TerminationTimeout::DEFAULT_MILLIS
}

const fn default_escalation_grace_ms() -> u64 {
    ShutdownPolicy::DEFAULT_ESCALATION_GRACE.as_millis() as u64
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpindleConfig {
    #[serde(default)]
    invocation: InvocationSection,
    #[serde(default)]
    overlay: OverlaySection,
    #[serde(default)]
    shutdown: ShutdownSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InvocationSection {
    entry_point: Option<String>,
    #[serde(default)]
    classpath: Vec<String>,
    #[serde(default)]
    arguments: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverlaySection {
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShutdownSection {
    /// Interrupt and join background threads once foreground work is done.
    #[serde(default = "default_true")]
    cleanup_background_threads: bool,
    /// Budget for background threads after interruption. `<= 0` waits forever.
    #[serde(default = "default_join_timeout_ms")]
    join_timeout_ms: i64,
    /// Hard-stop threads that ignore interruption. Unsafe; off by default.
    #[serde(default)]
    force_stop_unresponsive: bool,
    #[serde(default = "default_escalation_grace_ms")]
    escalation_grace_ms: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            cleanup_background_threads: true,
            join_timeout_ms: default_join_timeout_ms(),
            force_stop_unresponsive: false,
            escalation_grace_ms: default_escalation_grace_ms(),
        }
    }
}

impl SpindleConfig {
    /// Load from the default location. Returns `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        let s = &self.shutdown;
        ShutdownPolicy {
            cleanup_background: s.cleanup_background_threads,
            timeout: TerminationTimeout::from_millis(s.join_timeout_ms),
            force_stop: s.force_stop_unresponsive,
            escalation_grace: Duration::from_millis(s.escalation_grace_ms),
        }
    }

    /// Resolve into a validated request.
    ///
    /// `${VAR}` references in classpath entries and overlay values are
    /// expanded against the current environment. [`ENTRY_POINT_ENV`] wins
    /// over the file's entry point.
    pub fn into_request(self) -> Result<InvocationRequest, ConfigError> {
        self.into_request_with(env::var(ENTRY_POINT_ENV).ok())
    }

    /// Like [`into_request`](Self::into_request), with the entry point
    /// override supplied by the caller instead of read from the environment.
    /// A blank override is ignored.
    pub fn into_request_with(
        self,
        entry_override: Option<String>,
    ) -> Result<InvocationRequest, ConfigError> {
        let shutdown = self.shutdown_policy();
        let raw_entry = entry_override
            .filter(|v| !v.trim().is_empty())
            .or(self.invocation.entry_point)
            .ok_or(ConfigError::MissingEntryPoint)?;
        let entry_point = EntryPointId::new(raw_entry)?;

        let classpath = Classpath::new(
            self.invocation
                .classpath
                .iter()
                .map(|entry| PathBuf::from(expand_env_vars(entry))),
        )?;

        let env_overlay: OverlayEntries = self
            .overlay
            .env
            .into_iter()
            .map(|(k, v)| (k, expand_env_vars(&v)))
            .collect();
        let properties: OverlayEntries = self
            .overlay
            .properties
            .into_iter()
            .map(|(k, v)| (k, expand_env_vars(&v)))
            .collect();

        Ok(InvocationRequest::new(entry_point, classpath)
            .with_arguments(self.invocation.arguments)
            .with_env(env_overlay)
            .with_properties(properties)
            .with_shutdown(shutdown))
    }
}

impl std::str::FromStr for SpindleConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".spindle").join("config.toml"))
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            // Unclosed reference: keep the remainder verbatim.
            out.push_str(&rest[pos..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
