//! Ingestion and dispatch core of `pathmon`
//!
//! Files appearing below watched source directories are classified, deduplicated against the
//! transfer history and handed to a transfer executor exactly once.
//!
//! # Pipeline
//!
//! ```text
//! dirconf -> scheduler -> scan -> dispatch -> classify -> dedup -> executor
//! ```
//!
//! - [`dirconf`] parses the multi-line directory specification into a [`dirconf::DirectoryMap`]
//! - [`scheduler`] drives the full resync and the incremental scan, on demand or on timers
//! - [`dispatch`] pushes a single path through classification, admission and transfer
//! - [`dedup`] guarantees that a unit of work is admitted at most once
//! - [`executor`] moves, copies or links the unit and records it in the [`history`]
//!
//! # Logging
//!
//! [`run`] installs a `tracing` subscriber. Verbosity maps to levels: 0=ERROR, 1=INFO,
//! 2=DEBUG, 3+=TRACE. `RUST_LOG` takes precedence when set.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod dirconf;
pub mod dispatch;
pub mod executor;
pub mod history;
pub mod notify;
pub mod progress;
pub mod scan;
pub mod scheduler;

#[cfg(test)]
pub mod testutils;

pub use config::{
    MonitorSettings, OutputConfig, RuntimeConfig, ThrottleConfig, TracingConfig, TransferMode,
};

fn level_filter(output: &OutputConfig) -> &'static str {
    if output.quiet && output.verbose == 0 {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(output: &OutputConfig, tracing: &TracingConfig) -> anyhow::Result<()> {
    use anyhow::Context;
    let filter = match std::env::var("RUST_LOG") {
        Ok(value) if !value.is_empty() => tracing_subscriber::EnvFilter::try_new(&value)
            .with_context(|| format!("invalid RUST_LOG value {:?}", value))?,
        _ => tracing_subscriber::EnvFilter::new(level_filter(output)),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = match &tracing.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {:?}", path))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stdout).try_init(),
    };
    result.map_err(|error| anyhow::anyhow!("failed to install tracing subscriber: {}", error))
}

fn setup_throttle(runtime: &tokio::runtime::Runtime, throttle: &ThrottleConfig) {
    throttle::set_max_concurrent_transfers(throttle.max_concurrent_transfers);
    if throttle.dispatch_throttle > 0 {
        let (replenish, interval) = throttle::replenish_schedule(throttle.dispatch_throttle);
        throttle::init_dispatch_tokens(replenish);
        runtime.spawn(throttle::run_dispatch_replenish_thread(
            replenish, interval,
        ));
    }
}

/// Build the runtime and the tracing subscriber, then run `func` to completion.
///
/// Returns None when `func` failed (the error has been printed unless `quiet` is set) or the
/// environment could not be set up.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    tracing: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_tracing(&output, &tracing) {
        eprintln!("{:#}", error);
        return None;
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to build tokio runtime: {}", error);
            return None;
        }
    };
    setup_throttle(&runtime, &throttle);
    let res = runtime.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{}", &error);
            }
            None
        }
    }
}
