//! barliman - command-line front end
//!
//! Loads a session file, runs every check against it, and prints each
//! outcome as it arrives. With `--watch`, edits to the session file trigger
//! new generations until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use barliman::{
    config::Config, session, CheckKind, Outcome, Scheduler, SchedulerEvent, SchemeQueryBuilder,
    SharedInputs,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "barliman", about = "Live miniKanren checks for a definition and its examples")]
struct Cli {
    /// Session file (.json, .yaml or .yml)
    session: PathBuf,

    /// Keep running and re-check whenever the session file changes
    #[arg(long)]
    watch: bool,

    /// Poll interval for --watch, in milliseconds
    #[arg(long, default_value_t = 250)]
    poll_ms: u64,

    /// Print events as JSON lines instead of status text
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "barliman=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!(
        evaluator = %config.evaluator.display(),
        staging_dir = %config.staging_dir.display(),
        "Loaded configuration"
    );

    let inputs = SharedInputs::new(session::load_snapshot(&cli.session).await?);
    let builder = Arc::new(SchemeQueryBuilder::from_config(&config));
    let (scheduler, mut events) = Scheduler::spawn(&config, Arc::new(inputs.clone()), builder);
    scheduler.on_input_changed();

    let mut last_modified = modified(&cli.session).await;
    let mut poll = tokio::time::interval(Duration::from_millis(cli.poll_ms.max(10)));

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, cli.json);
                if !cli.watch && matches!(event, SchedulerEvent::GenerationFinished { .. }) {
                    break;
                }
            }
            _ = poll.tick(), if cli.watch => {
                let current = modified(&cli.session).await;
                if current == last_modified {
                    continue;
                }
                last_modified = current;
                match session::load_snapshot(&cli.session).await {
                    Ok(snapshot) => {
                        inputs.replace(snapshot);
                        scheduler.on_input_changed();
                    }
                    Err(e) => warn!("Ignoring session change: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    scheduler.shutdown().await?;
    Ok(())
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

fn print_event(event: &SchedulerEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
        return;
    }
    match event {
        SchedulerEvent::GenerationStarted { generation, checks } => {
            println!("[{generation}] checking {} item(s)", checks.len());
        }
        SchedulerEvent::Outcome {
            generation,
            kind,
            outcome,
        } => println!("[{generation}] {}", describe(kind, outcome)),
        SchedulerEvent::EvaluatorUnavailable {
            generation, reason, ..
        } => println!("[{generation}] evaluator unavailable: {reason}"),
        SchedulerEvent::StagingFailed {
            generation, reason, ..
        } => println!("[{generation}] staging failed: {reason}"),
        SchedulerEvent::GenerationFinished { generation } => println!("[{generation}] done"),
        SchedulerEvent::ShutdownStalled {
            generation,
            remaining,
        } => println!("[{generation}] {} check(s) did not stop in time", remaining.len()),
    }
}

fn describe(kind: &CheckKind, outcome: &Outcome) -> String {
    let label = match outcome {
        Outcome::Killed => "(cancelled)".to_string(),
        Outcome::SearchSucceeded { candidate, .. } => format!("{}: {}", outcome.label(kind), candidate),
        _ => outcome.label(kind),
    };
    let marker = if outcome.is_error() { "!" } else { " " };
    format!("{marker} {kind}: {label}")
}
