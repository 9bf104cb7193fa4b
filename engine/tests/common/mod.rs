//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::Once;

use spindle_engine::{Catalog, InvocationContext};
use spindle_types::{
    Classpath, EntryPointId, InvocationRequest, ShutdownPolicy, TerminationTimeout,
};

pub const LIBRARY: &str = "/spindle/test/app.jar";

/// Routes engine logs to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn id(name: &str) -> EntryPointId {
    EntryPointId::new(name).unwrap()
}

pub fn classpath() -> Classpath {
    Classpath::new([LIBRARY]).unwrap()
}

pub fn request(name: &str) -> InvocationRequest {
    InvocationRequest::new(id(name), classpath())
}

pub fn policy(timeout_ms: i64, force_stop: bool) -> ShutdownPolicy {
    ShutdownPolicy::default()
        .with_timeout(TerminationTimeout::from_millis(timeout_ms))
        .with_force_stop(force_stop)
}

/// Catalog with one library holding a single standard entry point.
pub fn catalog_with<F>(name: &str, body: F) -> Catalog
where
    F: Fn(&InvocationContext, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let mut catalog = Catalog::new();
    catalog.library(LIBRARY).main(name, body).unwrap();
    catalog
}
