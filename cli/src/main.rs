//! Spindle CLI - runs one configured entry point and maps its verdict to an
//! exit status.
//!
//! ```text
//! spindle [CONFIG] [ARGS...]
//! ```
//!
//! `CONFIG` defaults to `~/.spindle/config.toml`. Extra `ARGS` are appended to
//! the configured argument vector. When the configuration names no classpath,
//! the entry points bundled with this binary (`demo.Echo`, `demo.Ticker`,
//! `demo.Stubborn`, `demo.Fail`) are used.

mod demo;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use spindle_config::{ENTRY_POINT_ENV, SpindleConfig};
use spindle_engine::{Engine, InvocationResult};
use spindle_types::{Classpath, InvocationRequest};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout belongs to the invoked program.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(explicit: Option<PathBuf>) -> Result<SpindleConfig> {
    if let Some(path) = explicit {
        return SpindleConfig::load_from(&path).with_context(|| format!("loading {}", path.display()));
    }
    match SpindleConfig::load()? {
        Some(config) => Ok(config),
        None => {
            tracing::debug!(
                path = ?SpindleConfig::path(),
                "No config file; relying on {ENTRY_POINT_ENV}"
            );
            Ok(SpindleConfig::default())
        }
    }
}

fn build_request(
    config: SpindleConfig,
    entry_override: Option<String>,
    extra_args: Vec<String>,
    exe: PathBuf,
) -> Result<InvocationRequest> {
    let mut request = config.into_request_with(entry_override)?;
    if request.classpath.is_empty() {
        request.classpath = Classpath::new([exe]).context("resolving bundled classpath")?;
    }
    request.arguments.extend(extra_args);
    Ok(request)
}

fn main() -> Result<ExitCode> {
    init_tracing();

    let mut args = env::args().skip(1);
    let config_arg = args.next().map(PathBuf::from);
    let extra_args: Vec<String> = args.collect();

    let exe = env::current_exe().context("locating the spindle executable")?;
    let config = load_config(config_arg)?;
    let request = build_request(config, env::var(ENTRY_POINT_ENV).ok(), extra_args, exe.clone())?;

    let engine = Engine::new(demo::catalog(&exe)?);
    let outcome = engine.run(request);

    for warning in &outcome.report.warnings {
        eprintln!("warning: {warning}");
    }

    match outcome.result {
        InvocationResult::Success => Ok(ExitCode::SUCCESS),
        InvocationResult::Failure(err) => {
            eprintln!("Error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::{build_request, load_config};

    #[test]
    fn explicit_config_and_bundled_classpath() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[invocation]\nentry_point = \"demo.Echo\"\narguments = [\"a\"]\n\n[shutdown]\njoin_timeout_ms = 0"
        )
        .unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        let exe = PathBuf::from("/opt/spindle/bin/spindle");
        let request = build_request(config, None, vec!["b".into()], exe.clone()).unwrap();

        assert_eq!(request.entry_point.as_str(), "demo.Echo");
        assert_eq!(request.arguments, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(request.classpath.entries()[0].path(), exe.as_path());
        assert_eq!(
            request.shutdown.timeout,
            spindle_types::TerminationTimeout::Unbounded
        );
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
