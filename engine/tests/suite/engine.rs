use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spindle_engine::{
    Catalog, Engine, EnvironmentOverlay, FailureKind, InvocationContext, NoHardStop,
};
use spindle_types::{Classpath, OverlayEntries, ThreadKind};

use crate::common::{LIBRARY, catalog_with, id, init_tracing, policy, request};

#[test]
fn arguments_and_properties_reach_the_entry_point() {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let engine = Engine::new(catalog_with("app.Echo", move |ctx, args| {
        let seen = (args.to_vec(), ctx.property("greeting").map(str::to_owned));
        tx.lock().unwrap().send(seen)?;
        Ok(())
    }));

    let outcome = engine.run(
        request("app.Echo")
            .with_arguments(["a", "b c"])
            .with_properties(OverlayEntries::new().with("greeting", "hi").with("greeting", "hello")),
    );

    assert!(outcome.is_success(), "{:?}", outcome.result);
    let (args, greeting) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(args, vec!["a".to_string(), "b c".to_string()]);
    assert_eq!(greeting.as_deref(), Some("hello"));
    // Properties never leak into the process environment.
    assert!(std::env::var_os("greeting").is_none());
}

#[test]
fn background_failure_after_entry_returns_is_captured() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Late", |ctx, _| {
        ctx.spawn("late", |_| {
            std::thread::sleep(Duration::from_millis(50));
            anyhow::bail!("late failure")
        })?;
        Ok(())
    }));

    let outcome = engine.run(request("app.Late"));
    let failure = outcome.result.failure().and_then(|err| err.captured()).unwrap();
    assert_eq!(failure.thread().name(), "late");
    assert_eq!(failure.thread().kind(), ThreadKind::Background);
    assert_eq!(failure.cause().to_string(), "late failure");
}

#[test]
fn panicking_entry_point_is_a_failure() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Panic", |_, _| panic!("index out of bounds")));

    let outcome = engine.run(request("app.Panic"));
    let failure = outcome.result.failure().and_then(|err| err.captured()).unwrap();
    assert_eq!(failure.kind(), FailureKind::Panic);
    assert!(failure.to_string().contains("index out of bounds"));
}

#[test]
fn foreground_children_are_awaited_before_shutdown() {
    init_tracing();
    let done = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&done);
    let engine = Engine::new(catalog_with("app.Fg", move |ctx, _| {
        let flag = Arc::clone(&flag);
        ctx.builder().name("writer").foreground().spawn(move |ctx| {
            // Foreground threads are never interrupted by the engine.
            ctx.sleep(Duration::from_millis(200))?;
            *flag.lock().unwrap() = true;
            Ok(())
        })?;
        Ok(())
    }));

    let outcome = engine.run(request("app.Fg").with_shutdown(policy(10, false)));
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(*done.lock().unwrap());
    assert_eq!(outcome.threads_spawned, 2);
}

#[test]
fn disabled_cleanup_returns_without_interrupting() {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let engine = Engine::new(catalog_with("app.Daemon", move |ctx, _| {
        let tx = tx.lock().unwrap().clone();
        ctx.spawn("daemon", move |ctx| {
            let interrupted = ctx.sleep(Duration::from_millis(300)).is_err();
            let _ = tx.send(interrupted);
            Ok(())
        })?;
        Ok(())
    }));

    let mut shutdown = policy(5_000, false);
    shutdown.cleanup_background = false;
    let outcome = engine.run(request("app.Daemon").with_shutdown(shutdown));

    assert!(outcome.is_success());
    assert!(outcome.report.cleanup_skipped);
    assert_eq!(outcome.report.lingering.len(), 1);
    assert!(outcome.report.warnings.is_empty());
    assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
}

#[test]
fn resolve_runs_sibling_entry_point_on_same_classpath() {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let mut catalog = Catalog::new();
    catalog
        .library(LIBRARY)
        .main("app.Launcher", |ctx: &InvocationContext, args: &[String]| {
            let helper = ctx.resolve(&spindle_types::EntryPointId::new("app.Helper")?)?;
            helper.invoke(ctx, args)
        })
        .unwrap()
        .main("app.Helper", move |ctx: &InvocationContext, _: &[String]| {
            tx.lock().unwrap().send(ctx.current_thread().name().to_owned())?;
            Ok(())
        })
        .unwrap();

    let outcome = Engine::new(catalog).run(request("app.Launcher"));
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "app.Launcher.main()");
}

#[test]
fn nested_invocation_with_overlay_does_not_deadlock() {
    init_tracing();
    let outer_key = "SPINDLE_IT_NESTED_OUTER";
    let inner_key = "SPINDLE_IT_NESTED_INNER";
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let engine = Engine::new(catalog_with("app.Outer", move |_, _| {
        let tx = Mutex::new(tx.lock().unwrap().clone());
        let inner = Engine::new(catalog_with("app.Inner", move |_, _| {
            let seen = (std::env::var(outer_key).ok(), std::env::var(inner_key).ok());
            tx.lock().unwrap().send(seen)?;
            Ok(())
        }));
        inner
            .run(request("app.Inner").with_env(OverlayEntries::new().with(inner_key, "in")))
            .result
            .into_result()?;
        anyhow::ensure!(std::env::var_os(inner_key).is_none(), "inner overlay leaked");
        Ok(())
    }));

    let outcome =
        engine.run(request("app.Outer").with_env(OverlayEntries::new().with(outer_key, "out")));
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        (Some("out".to_string()), Some("in".to_string()))
    );
    assert!(std::env::var_os(outer_key).is_none());
}

#[test]
fn nested_run_under_empty_outer_overlay_takes_the_lock() {
    init_tracing();
    let key = "SPINDLE_IT_NESTED_UNHELD";
    let held = EnvironmentOverlay::apply(&OverlayEntries::new().with(key, "held")).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let engine = Engine::new(catalog_with("app.Outer", move |_, _| {
        let tx = Mutex::new(tx.lock().unwrap().clone());
        let inner = Engine::new(catalog_with("app.Inner", move |_, _| {
            tx.lock().unwrap().send(std::env::var(key).ok())?;
            Ok(())
        }));
        inner
            .run(request("app.Inner").with_env(OverlayEntries::new().with(key, "nested")))
            .result
            .into_result()?;
        Ok(())
    }));
    let runner = std::thread::spawn(move || engine.run(request("app.Outer")));

    // The outer run holds nothing to lend, so the nested run blocks on the lock.
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(std::env::var(key).unwrap(), "held");
    held.restore();

    let outcome = runner.join().unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(), Some("nested"));
    assert!(std::env::var_os(key).is_none());
}

#[test]
fn nested_run_from_lingering_thread_takes_the_lock() {
    init_tracing();
    let outer_key = "SPINDLE_IT_LINGER_OUTER";
    let inner_key = "SPINDLE_IT_LINGER_INNER";
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let go_rx = Mutex::new(Some(go_rx));
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let engine = Engine::new(catalog_with("app.Outer", move |ctx, _| {
        let go = go_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("outer ran twice"))?;
        let tx = tx.lock().unwrap().clone();
        ctx.spawn("late-nested", move |_| {
            go.recv()?;
            let outer_restored = std::env::var_os(outer_key).is_none();
            let inner = Engine::new(catalog_with("app.Inner", |_, _| Ok(())));
            let outcome =
                inner.run(request("app.Inner").with_env(OverlayEntries::new().with(inner_key, "in")));
            tx.send((outer_restored, outcome.is_success()))?;
            Ok(())
        })?;
        Ok(())
    }));

    let mut shutdown = policy(5_000, false);
    shutdown.cleanup_background = false;
    let outcome = engine.run(
        request("app.Outer")
            .with_env(OverlayEntries::new().with(outer_key, "out"))
            .with_shutdown(shutdown),
    );
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.report.lingering.len(), 1);
    assert!(std::env::var_os(outer_key).is_none());

    // The finished outer run lends nothing; the nested run must wait for us.
    let held = EnvironmentOverlay::apply(&OverlayEntries::new().with(inner_key, "held")).unwrap();
    go_tx.send(()).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(std::env::var(inner_key).unwrap(), "held");
    held.restore();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (true, true));
    assert!(std::env::var_os(inner_key).is_none());
}

#[test]
fn late_failure_on_lingering_thread_does_not_change_verdict() {
    init_tracing();
    let engine = Engine::new(catalog_with("app.Late", |ctx, _| {
        ctx.spawn("late", |_| {
            std::thread::sleep(Duration::from_millis(200));
            anyhow::bail!("after the run")
        })?;
        Ok(())
    }));

    let mut shutdown = policy(5_000, false);
    shutdown.cleanup_background = false;
    let outcome = engine.run(request("app.Late").with_shutdown(shutdown));
    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.report.lingering.len(), 1);
}

#[test]
fn shadowed_entry_point_resolves_from_first_location() {
    init_tracing();
    let (tx, rx) = mpsc::channel();
    let first = Mutex::new(tx.clone());
    let second = Mutex::new(tx);
    let mut catalog = Catalog::new();
    catalog
        .library("/spindle/test/first.jar")
        .main("app.Main", move |_: &InvocationContext, _: &[String]| {
            first.lock().unwrap().send("first")?;
            Ok(())
        })
        .unwrap();
    catalog
        .library("/spindle/test/second.jar")
        .main("app.Main", move |_: &InvocationContext, _: &[String]| {
            second.lock().unwrap().send("second")?;
            Ok(())
        })
        .unwrap();

    let classpath = Classpath::new(["/spindle/test/second.jar", "/spindle/test/first.jar"]).unwrap();
    let request = spindle_types::InvocationRequest::new(id("app.Main"), classpath);
    let outcome = Engine::new(catalog).with_hard_stop(NoHardStop).run(request);

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
}
