use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::dispatch::{Dispatcher, Snapshot};
use common::executor::LocalExecutor;
use common::history::{JsonlHistory, MemoryHistory, TransferHistory};
use common::progress::Summary;
use common::scheduler::{Schedule, Scheduler};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pathmon",
    version,
    about = "Watch media download directories and transfer every new file exactly once",
    long_about = "`pathmon` watches source directories for new media files and moves, copies or links each \
of them to its destination exactly once.

Watched directories are configured in the `monitor_dirs` field of the settings file, one per line:

    <source>[:<destination>][#<mode>][$<category>]

EXAMPLE:
    # Check the configuration
    pathmon --config settings.json check

    # Transfer everything not transferred yet, then print a summary
    pathmon --config settings.json --summary sync

    # Run as a daemon (SIGHUP reloads the settings file, SIGUSR1 starts a full resync)
    pathmon --config settings.json -v run

The history file is locked while in use: `sync` and `scan` refuse to run next to a daemon sharing
the same history, send the daemon SIGUSR1 instead."
)]
struct Args {
    /// Monitor settings file (JSON)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: std::path::PathBuf,

    /// Override the global transfer mode of the settings file
    #[arg(long, value_name = "MODE", help_heading = "Transfer options")]
    transfer_mode: Option<common::TransferMode>,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    log_file: Option<std::path::PathBuf>,

    // Performance & throttling
    /// Maximum number of transfers running at once, 0 means no limit (default: value of the settings file)
    #[arg(long, value_name = "N", help_heading = "Performance & throttling")]
    max_concurrent_transfers: Option<usize>,

    /// Throttle the number of dispatches per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Parse the settings and print the watched directories
    Check,
    /// Full resync of every watched directory
    Sync,
    /// Incremental scan of recently modified files
    Scan {
        /// Dispatch candidates right away instead of after the configured delay
        #[arg(long)]
        now: bool,
    },
    /// Run the periodic timers until interrupted (SIGHUP reloads, SIGUSR1 resyncs)
    Run,
}

fn load(args: &Args) -> Result<(common::MonitorSettings, Snapshot)> {
    let settings = common::MonitorSettings::from_file(&args.config)?;
    let (snapshot, errors) = Snapshot::from_settings(&settings, args.transfer_mode)
        .with_context(|| format!("invalid monitor_dirs in {:?}", &args.config))?;
    for error in &errors {
        tracing::warn!("skipping directory line: {}", error);
    }
    Ok((settings, snapshot))
}

fn open_history(
    settings: &common::MonitorSettings,
) -> Result<std::sync::Arc<dyn TransferHistory>> {
    if settings.history {
        Ok(std::sync::Arc::new(JsonlHistory::open(&settings.history_file)?))
    } else {
        Ok(std::sync::Arc::new(MemoryHistory::new()))
    }
}

fn build_scheduler(
    args: &Args,
    settings: &common::MonitorSettings,
    snapshot: Snapshot,
) -> Result<Scheduler> {
    if args.max_concurrent_transfers.is_none() && settings.max_concurrent_transfers > 0 {
        throttle::set_max_concurrent_transfers(settings.max_concurrent_transfers);
    }
    let history = open_history(settings)?;
    let executor = LocalExecutor::new(
        common::executor::Settings {
            overwrite: settings.overwrite,
            softlink_dir: settings
                .softlink_dir
                .clone()
                .filter(|_| settings.softlink_linkage),
            rclone_binary: None,
        },
        history.clone(),
    );
    let dispatcher = Dispatcher::new(
        snapshot,
        history,
        std::sync::Arc::new(executor),
        common::notify::from_settings(settings.notify),
    )
    .with_refresh(settings.refresh);
    Ok(Scheduler::new(
        std::sync::Arc::new(dispatcher),
        Schedule::from_settings(settings),
    ))
}

fn fail_with_summary(args: &Args, message: &str, summary: &Summary) -> anyhow::Error {
    if args.summary {
        return anyhow!("{}\n\n{}", message, summary);
    }
    anyhow!("{}", message)
}

fn check(args: &Args) -> Result<Summary> {
    let settings = common::MonitorSettings::from_file(&args.config)?;
    let defaults = common::dirconf::Defaults {
        mode: args.transfer_mode.unwrap_or(settings.transfer_mode),
        category: settings.category,
    };
    let parsed = common::dirconf::parse_text(&settings.monitor_dirs, defaults);
    for error in &parsed.errors {
        println!("skipped {}", error);
    }
    let parsed = parsed.require_any()?;
    for watched in &parsed.directories {
        let destination = watched
            .destination
            .as_ref()
            .map(|destination| format!("{:?}", destination))
            .unwrap_or_else(|| "(default routing)".to_string());
        println!(
            "{:?} -> {} mode={} category={}",
            watched.source, destination, watched.mode, watched.category
        );
    }
    Ok(Summary::default())
}

fn reload(args: &Args, scheduler: &Scheduler) {
    tracing::info!("reloading {:?}", &args.config);
    match load(args) {
        Ok((settings, snapshot)) => {
            scheduler.reload(snapshot, Schedule::from_settings(&settings));
        }
        Err(error) => {
            tracing::error!("reload failed, keeping the current configuration: {:#}", &error);
        }
    }
}

async fn run_daemon(args: &Args, scheduler: &Scheduler) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut hangup = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;
    let mut user_sync =
        signal(SignalKind::user_defined1()).context("cannot install SIGUSR1 handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    scheduler.start();
    // without periodic timers there is nothing left to do once the start-up resync is done
    let mut one_shot = !scheduler.schedule().enabled;
    let finished = scheduler.finish();
    tokio::pin!(finished);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping");
                break;
            }
            _ = terminate.recv() => {
                tracing::info!("terminated, stopping");
                break;
            }
            _ = hangup.recv() => {
                reload(args, scheduler);
                one_shot = !scheduler.schedule().enabled;
            }
            _ = user_sync.recv() => {
                tracing::info!("full resync requested");
                scheduler.request_sync();
            }
            _ = &mut finished, if one_shot => break,
        }
    }
    scheduler.stop().await;
    Ok(())
}

fn prepare(args: &Args) -> Result<(common::MonitorSettings, Scheduler)> {
    let (settings, snapshot) = load(args)?;
    let scheduler = build_scheduler(args, &settings, snapshot)?;
    Ok((settings, scheduler))
}

#[instrument]
async fn async_main(args: Args) -> Result<Summary> {
    match args.command {
        Command::Check => check(&args),
        Command::Sync => {
            let (_, scheduler) = prepare(&args)?;
            let report = scheduler.sync_all().await;
            if !report.is_success() {
                for failure in &report.failures {
                    tracing::error!("cannot scan {}", failure);
                }
                return Err(fail_with_summary(
                    &args,
                    "pathmon sync encountered errors",
                    &report.summary,
                ));
            }
            Ok(report.summary)
        }
        Command::Scan { now } => {
            let (_, scheduler) = prepare(&args)?;
            let report = scheduler.scan_recent(now).await;
            if !now && report.scheduled > 0 {
                tracing::info!("waiting for {} delayed dispatches", report.scheduled);
            }
            scheduler.finish().await;
            let summary = scheduler.dispatcher().progress().summary();
            if !report.failures.is_empty() || summary.failed > 0 {
                return Err(fail_with_summary(
                    &args,
                    "pathmon scan encountered errors",
                    &summary,
                ));
            }
            Ok(summary)
        }
        Command::Run => {
            let (settings, scheduler) = prepare(&args)?;
            if !settings.enabled && !settings.run_once {
                return Err(anyhow!(
                    "nothing to run: neither `enabled` nor `run_once` is set in {:?}",
                    &args.config
                ));
            }
            run_daemon(&args, &scheduler).await?;
            Ok(scheduler.dispatcher().progress().summary())
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_concurrent_transfers: args.max_concurrent_transfers.unwrap_or(0),
        dispatch_throttle: args.ops_throttle,
    };
    let tracing = common::TracingConfig {
        log_file: args.log_file.clone(),
    };
    let res = common::run(output, runtime, throttle, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
