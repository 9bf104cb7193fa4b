//! Entry points bundled with the binary.
//!
//! They live in a library keyed by the path of the running executable, which
//! is also the classpath used when the configuration names none.

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use spindle_engine::{Catalog, CatalogError, InvocationContext};

pub fn catalog(location: &Path) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::new();
    catalog
        .library(location)
        .main("demo.Echo", echo)?
        .main("demo.Ticker", ticker)?
        .main("demo.Stubborn", stubborn)?
        .main("demo.Fail", fail)?;
    Ok(catalog)
}

fn echo(ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()> {
    let prefix = ctx.property("echo.prefix").unwrap_or("");
    println!("{prefix}{}", args.join(" "));
    Ok(())
}

/// Starts a background ticker and returns; the ticker stops when interrupted.
fn ticker(ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()> {
    let interval_ms = match args.first() {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("invalid tick interval {raw:?}"))?,
        None => 100,
    };
    ctx.spawn("ticker", move |ctx| {
        let mut ticks = 0_u64;
        while ctx.sleep(Duration::from_millis(interval_ms)).is_ok() {
            ticks += 1;
            println!("tick {ticks}");
        }
        tracing::info!(ticks, "Ticker interrupted");
        Ok(())
    })?;
    Ok(())
}

/// Background thread that ignores interruption. Only a hard stop ends it.
fn stubborn(ctx: &InvocationContext, _args: &[String]) -> anyhow::Result<()> {
    ctx.spawn("stubborn", |ctx| {
        loop {
            ctx.checkpoint();
            std::thread::sleep(Duration::from_millis(50));
        }
    })?;
    Ok(())
}

fn fail(_ctx: &InvocationContext, args: &[String]) -> anyhow::Result<()> {
    let reason = if args.is_empty() {
        "demo failure".to_string()
    } else {
        args.join(" ")
    };
    Err(anyhow::anyhow!(reason)).context("demo.Fail raised")
}
