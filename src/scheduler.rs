//! Debouncing scheduler that owns the current generation.
//!
//! The scheduler runs as one control task. Front ends talk to it through
//! [`Scheduler::on_input_changed`] and [`Scheduler::shutdown`]; everything it
//! learns flows out through the [`SchedulerEvent`] channel returned by
//! [`Scheduler::spawn`].
//!
//! A rebuild always finalizes the previous generation before the next one
//! stages its files, so two generations never race over the staging dir.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::check::{CheckKind, Evaluator};
use crate::config::Config;
use crate::events::SchedulerEvent;
use crate::generation::{Generation, GenerationContext, Joined};
use crate::query::QueryBuilder;
use crate::snapshot::SnapshotSource;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("generation {generation} still had {} check(s) running after the shutdown grace period", .remaining.len())]
    ShutdownStalled {
        generation: u64,
        remaining: Vec<CheckKind>,
    },

    #[error("scheduler control loop is gone")]
    ControlLoop,
}

/// Messages to the control task.
#[derive(Debug)]
enum SchedulerCommand {
    InputChanged,
    Shutdown {
        respond: oneshot::Sender<Result<(), SchedulerError>>,
    },
}

/// Handle to a running scheduler.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    control: JoinHandle<()>,
}

impl Scheduler {
    /// Start the control task. Nothing runs until the first input change.
    pub fn spawn(
        config: &Config,
        source: Arc<dyn SnapshotSource>,
        builder: Arc<dyn QueryBuilder>,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let state = ControlState {
            source,
            ctx: GenerationContext {
                evaluator: Arc::new(Evaluator::from_config(config)),
                builder,
                staging_dir: config.staging_dir.clone(),
                events: events_tx,
            },
            debounce: config.debounce,
            shutdown_grace: config.shutdown_grace,
            current: None,
            next_id: 1,
        };
        let control = tokio::spawn(control_loop(state, commands_rx));

        (Self { commands, control }, events_rx)
    }

    /// Record an edit. Restarts the debounce period.
    pub fn on_input_changed(&self) {
        if self.commands.send(SchedulerCommand::InputChanged).is_err() {
            warn!("Input change after the scheduler stopped");
        }
    }

    /// Cancel pending work, finalize the current generation and stop.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(SchedulerCommand::Shutdown { respond })
            .map_err(|_| SchedulerError::ControlLoop)?;
        let result = rx.await.map_err(|_| SchedulerError::ControlLoop)?;
        if let Err(e) = self.control.await {
            error!("Scheduler control task failed: {}", e);
        }
        result
    }
}

struct ControlState {
    source: Arc<dyn SnapshotSource>,
    ctx: GenerationContext,
    debounce: Duration,
    shutdown_grace: Duration,
    current: Option<Generation>,
    next_id: u64,
}

impl ControlState {
    async fn rebuild(&mut self) {
        let snapshot = self.source.snapshot();
        if let Some(mut previous) = self.current.take() {
            debug!(generation = previous.id(), "Finalizing superseded generation");
            // Unbounded: every task escalates to SIGKILL on its own.
            let _ = previous.finalize(None).await;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.current = Some(Generation::launch(id, snapshot, &self.ctx).await);
    }

    async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        let Some(mut generation) = self.current.take() else {
            info!("Scheduler stopped");
            return Ok(());
        };
        let id = generation.id();
        match generation.finalize(Some(self.shutdown_grace)).await {
            Ok(()) => {
                info!(generation = id, "Scheduler stopped");
                Ok(())
            }
            Err(remaining) => {
                error!(
                    generation = id,
                    remaining = remaining.len(),
                    "Checks still running after shutdown grace period"
                );
                let _ = self.ctx.events.send(SchedulerEvent::ShutdownStalled {
                    generation: id,
                    remaining: remaining.clone(),
                });
                Err(SchedulerError::ShutdownStalled {
                    generation: id,
                    remaining,
                })
            }
        }
    }
}

enum Step {
    Command(Option<SchedulerCommand>),
    Fire,
    Joined(Joined),
}

async fn control_loop(
    mut state: ControlState,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let step = tokio::select! {
            cmd = commands.recv() => Step::Command(cmd),
            _ = debounce_elapsed(deadline) => Step::Fire,
            joined = next_joined(&mut state.current) => Step::Joined(joined),
        };

        match step {
            Step::Command(Some(SchedulerCommand::InputChanged)) => {
                deadline = Some(Instant::now() + state.debounce);
            }
            Step::Command(Some(SchedulerCommand::Shutdown { respond })) => {
                let _ = respond.send(state.shutdown().await);
                break;
            }
            Step::Command(None) => {
                debug!("All scheduler handles dropped");
                let _ = state.shutdown().await;
                break;
            }
            Step::Fire => {
                deadline = None;
                state.rebuild().await;
            }
            Step::Joined(joined) => {
                if let Some(generation) = state.current.as_mut() {
                    generation.handle_joined(joined);
                }
            }
        }
    }
}

async fn debounce_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Next finished task of the current generation; never resolves when idle.
async fn next_joined(current: &mut Option<Generation>) -> Joined {
    if let Some(generation) = current.as_mut() {
        if let Some(joined) = generation.join_next().await {
            return joined;
        }
    }
    pending().await
}
