//! End-to-end behavior of a single invocation: verdicts, shutdown timing,
//! and overlay restoration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spindle_engine::{
    Catalog, ConventionViolation, Engine, ExecError, InvocationContext, ParamKind, Receiver,
    ShutdownWarning, Signature,
};
use spindle_types::OverlayEntries;

use crate::common::{LIBRARY, catalog_with, init_tracing, policy, request};

#[derive(Debug, thiserror::Error)]
#[error("configuration file is corrupt")]
struct Corrupt;

#[test]
fn returning_entry_point_succeeds_without_waiting_for_timeout() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Quick", |_, _| Ok(())));

    let started = Instant::now();
    let outcome = engine.run(request("app.Quick").with_shutdown(policy(60_000, false)));

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.threads_spawned, 1);
    assert!(outcome.report.is_clean());
}

#[test]
fn lingering_background_thread_is_a_warning_not_a_failure() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Linger", |ctx, _| {
        // std sleep ignores interruption.
        ctx.spawn("sleeper", |_| {
            std::thread::sleep(Duration::from_secs(3));
            Ok(())
        })?;
        Ok(())
    }));

    let started = Instant::now();
    let outcome = engine.run(request("app.Linger").with_shutdown(policy(500, false)));
    let elapsed = started.elapsed();

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(elapsed >= Duration::from_millis(450), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2_500), "{elapsed:?}");
    assert_eq!(outcome.report.lingering.len(), 1);
    assert_eq!(outcome.report.lingering[0].name(), "sleeper");
    assert!(matches!(
        outcome.report.warnings.as_slice(),
        [ShutdownWarning::Timeout { lingering: 1, .. }]
    ));
}

#[test]
fn escalation_force_stops_unresponsive_thread() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Stubborn", |ctx, _| {
        ctx.spawn("spinner", |ctx| {
            loop {
                ctx.checkpoint();
                std::thread::sleep(Duration::from_millis(5));
            }
        })?;
        Ok(())
    }));

    let started = Instant::now();
    let outcome = engine.run(request("app.Stubborn").with_shutdown(policy(300, true)));
    let elapsed = started.elapsed();

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    assert!(outcome.report.lingering.is_empty());
    assert_eq!(outcome.report.force_stopped.len(), 1);
    assert!(
        outcome
            .report
            .warnings
            .contains(&ShutdownWarning::ForcedTermination { threads: 1 })
    );
}

#[test]
fn raising_entry_point_fails_and_restores_environment() {
    init_tracing();
    let preset = "SPINDLE_IT_RAISE_PRESET";
    let absent = "SPINDLE_IT_RAISE_ABSENT";
    let prior = "prior value with spaces = and symbols";

    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);
    let raising = Engine::new(catalog_with("app.Raise", move |_, _| {
        *record.lock().unwrap() = Some((std::env::var(preset).ok(), std::env::var(absent).ok()));
        Err(Corrupt.into())
    }));

    // The host run owns the prior value of `preset` under the environment lock.
    let result = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);
    let host = Engine::new(catalog_with("app.Host", move |_, _| {
        let env = OverlayEntries::new()
            .with(preset, "overridden")
            .with(absent, "temporary");
        let outcome = raising.run(request("app.Raise").with_env(env));
        let after = (std::env::var(preset).ok(), std::env::var_os(absent).is_none());
        *slot.lock().unwrap() = Some((outcome, after));
        Ok(())
    }));
    let hosted = host.run(request("app.Host").with_env(OverlayEntries::new().with(preset, prior)));
    assert!(hosted.is_success(), "{:?}", hosted.result);

    let (outcome, after) = result.lock().unwrap().take().expect("host ran");
    let err = outcome.result.failure().expect("failure verdict");
    let captured = err.captured().expect("captured thread failure");
    assert!(captured.downcast_ref::<Corrupt>().is_some());
    assert_eq!(captured.thread().name(), "app.Raise.main()");

    assert_eq!(
        seen.lock().unwrap().clone(),
        Some((Some("overridden".to_string()), Some("temporary".to_string())))
    );
    assert_eq!(after, (Some(prior.to_string()), true));
    assert!(std::env::var_os(preset).is_none());
}

#[test]
fn concurrent_background_failures_capture_exactly_one() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Race", |ctx, _| {
        for name in ["left", "right"] {
            ctx.spawn(name, move |ctx| {
                // Raise once the engine broadcasts the stop request.
                let _ = ctx.sleep(Duration::from_secs(30));
                anyhow::bail!("{name} failed")
            })?;
        }
        Ok(())
    }));

    for _ in 0..50 {
        let outcome = engine.run(request("app.Race").with_shutdown(policy(10_000, false)));
        let err = outcome.result.failure().expect("failure verdict");
        let cause = err.captured().expect("thread failure").cause().to_string();
        assert!(cause == "left failed" || cause == "right failed", "{cause}");
        assert_eq!(outcome.threads_spawned, 3);
        assert!(outcome.report.lingering.is_empty());
    }
}

#[test]
fn calling_convention_violations_spawn_nothing() {
    init_tracing();
    let ran = Arc::new(AtomicBool::new(false));
    let instance_flag = Arc::clone(&ran);
    let no_args_flag = Arc::clone(&ran);
    let mut catalog = Catalog::new();
    catalog
        .library(LIBRARY)
        .entry(
            "app.Instance",
            Signature::new(Receiver::Instance, [ParamKind::StringVec]),
            move |_: &InvocationContext, _: &[String]| {
                instance_flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap()
        .entry(
            "app.NoArgs",
            Signature::new(Receiver::Static, []),
            move |_: &InvocationContext, _: &[String]| {
                no_args_flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();
    let engine = Engine::new(catalog);

    let instance = engine.run(request("app.Instance"));
    assert!(matches!(
        instance.result.failure(),
        Some(ExecError::InvalidCallingConvention {
            violation: ConventionViolation::InstanceReceiver,
            ..
        })
    ));
    assert_eq!(instance.threads_spawned, 0);

    let no_args = engine.run(request("app.NoArgs"));
    assert!(matches!(
        no_args.result.failure(),
        Some(ExecError::InvalidCallingConvention {
            violation: ConventionViolation::MissingArgumentVector,
            ..
        })
    ));
    assert_eq!(no_args.threads_spawned, 0);
    assert!(no_args.report.is_clean());
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn missing_entry_point_restores_overlay() {
    init_tracing();
    let key = "SPINDLE_IT_MISSING_KEY";
    let engine = Engine::new(Catalog::new());

    let empty = engine.run(request("app.Missing"));
    assert!(matches!(
        empty.result.failure(),
        Some(ExecError::EntryPointNotFound { searched: 1, .. })
    ));

    let applied = engine.run(request("app.Missing").with_env(OverlayEntries::new().with(key, "x")));
    assert!(matches!(
        applied.result.failure(),
        Some(ExecError::EntryPointNotFound { .. })
    ));
    assert_eq!(applied.threads_spawned, 0);
    assert!(std::env::var_os(key).is_none());
}
