//! A generation: every check spawned from one snapshot.
//!
//! # Lifecycle
//! ```text
//! Building -> Active -> Finalizing -> Disposed
//! ```
//! `Building` stages query files; `Active` runs the checks and applies the
//! implication rules as they finish; `Finalizing` cancels whatever is left and
//! waits for every task to exit before the staging files are released.

mod implication;

pub use implication::{Effects, ImplicationEngine, TaskState};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::check::{CheckKind, CheckTask, Evaluator, Outcome, TaskError};
use crate::events::{EventSender, SchedulerEvent};
use crate::query::QueryBuilder;
use crate::snapshot::Snapshot;

/// What a finished task hands back to its generation.
pub type Joined = Result<(CheckKind, Result<Outcome, TaskError>), JoinError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Building,
    Active,
    Finalizing,
    Disposed,
}

/// Everything a generation needs besides its snapshot.
#[derive(Clone)]
pub struct GenerationContext {
    pub evaluator: Arc<Evaluator>,
    pub builder: Arc<dyn QueryBuilder>,
    pub staging_dir: PathBuf,
    pub events: EventSender,
}

/// Checks a snapshot calls for: the definition check, the combined search,
/// and one check per active example.
pub fn planned_checks(snapshot: &Snapshot) -> Vec<CheckKind> {
    let mut seen = BTreeSet::new();
    let mut kinds = vec![CheckKind::DefinitionCheck, CheckKind::CombinedSearch];
    for example in snapshot.active_examples() {
        if seen.insert(example.id) {
            kinds.push(CheckKind::ExampleCheck(example.id));
        } else {
            warn!(example = %example.id, "Duplicate example id, checking it once");
        }
    }
    kinds
}

pub struct Generation {
    id: u64,
    phase: GenerationPhase,
    snapshot: Arc<Snapshot>,
    engine: ImplicationEngine,
    cancels: BTreeMap<CheckKind, CancellationToken>,
    tasks: JoinSet<(CheckKind, Result<Outcome, TaskError>)>,
    events: EventSender,
    evaluator_reported: bool,
    staging_reported: bool,
    finished: bool,
}

impl Generation {
    /// Stage query files for `snapshot` and start its checks.
    pub async fn launch(id: u64, snapshot: Snapshot, ctx: &GenerationContext) -> Self {
        let mut generation = Self {
            id,
            phase: GenerationPhase::Building,
            snapshot: Arc::new(snapshot),
            engine: ImplicationEngine::new(),
            cancels: BTreeMap::new(),
            tasks: JoinSet::new(),
            events: ctx.events.clone(),
            evaluator_reported: false,
            staging_reported: false,
            finished: false,
        };

        let staged = generation.stage(ctx).await;

        generation.phase = GenerationPhase::Active;
        for task in staged {
            let kind = task.kind();
            generation.engine.register(kind);
            generation.cancels.insert(kind, task.cancel_token());
            generation.engine.mark_running(kind);
            let evaluator = Arc::clone(&ctx.evaluator);
            generation.tasks.spawn(async move { (kind, task.run(&evaluator).await) });
        }

        let checks: Vec<CheckKind> = generation.engine.kinds().copied().collect();
        info!(generation = id, checks = checks.len(), "Generation started");
        generation.emit(SchedulerEvent::GenerationStarted {
            generation: id,
            checks,
        });
        generation.maybe_finish();
        generation
    }

    async fn stage(&mut self, ctx: &GenerationContext) -> Vec<CheckTask> {
        let kinds = planned_checks(&self.snapshot);
        if let Err(source) = tokio::fs::create_dir_all(&ctx.staging_dir).await {
            let error = TaskError::Stage {
                path: ctx.staging_dir.clone(),
                source,
            };
            self.report_environment(CheckKind::DefinitionCheck, &error);
            return Vec::new();
        }

        let mut staged = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let path = ctx.staging_dir.join(kind.script_file_name());
            let source = ctx.builder.build_query(&kind, &self.snapshot);
            match tokio::fs::write(&path, source).await {
                Ok(()) => staged.push(CheckTask::new(kind, path)),
                Err(source) => {
                    let error = TaskError::Stage { path, source };
                    self.report_environment(kind, &error);
                }
            }
        }
        staged
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn engine(&self) -> &ImplicationEngine {
        &self.engine
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next finished task. Resolves to `None` immediately when none is left.
    pub async fn join_next(&mut self) -> Option<Joined> {
        self.tasks.join_next().await
    }

    /// Route a finished task through the implication rules.
    pub fn handle_joined(&mut self, joined: Joined) {
        match joined {
            Ok((kind, Ok(outcome))) => self.apply(kind, outcome),
            Ok((kind, Err(error))) => {
                self.engine.abandon(kind);
                self.report_environment(kind, &error);
            }
            Err(join_error) => {
                error!(generation = self.id, "Check task panicked: {}", join_error);
            }
        }
        self.maybe_finish();
    }

    fn apply(&mut self, kind: CheckKind, outcome: Outcome) {
        let Effects { forward, cancel } = self.engine.on_outcome(kind, outcome);
        for target in cancel {
            if let Some(token) = self.cancels.get(&target) {
                debug!(generation = self.id, kind = %target, cause = %kind, "Cancelling moot check");
                token.cancel();
            }
        }
        for (kind, outcome) in forward {
            self.emit(SchedulerEvent::Outcome {
                generation: self.id,
                kind,
                outcome,
            });
        }
    }

    /// Cancel every remaining check and wait for all of them to exit.
    ///
    /// With a `grace` bound, returns the checks still alive when it ran out;
    /// their tasks are then aborted, which kills the processes on drop.
    pub async fn finalize(&mut self, grace: Option<Duration>) -> Result<(), Vec<CheckKind>> {
        if self.phase == GenerationPhase::Disposed {
            return Ok(());
        }
        self.phase = GenerationPhase::Finalizing;
        let cancelled = self.engine.begin_teardown();
        debug!(generation = self.id, cancelled = cancelled.len(), "Finalizing generation");
        for token in self.cancels.values() {
            token.cancel();
        }

        let deadline = grace.map(|grace| tokio::time::Instant::now() + grace);
        while !self.tasks.is_empty() {
            let next = match deadline {
                Some(deadline) => {
                    let bounded = tokio::time::timeout_at(deadline, self.tasks.join_next()).await;
                    match bounded {
                        Ok(next) => next,
                        Err(_) => {
                            let remaining = self.engine.unfinished();
                            self.tasks.abort_all();
                            self.phase = GenerationPhase::Disposed;
                            return Err(remaining);
                        }
                    }
                }
                None => self.tasks.join_next().await,
            };
            match next {
                Some(joined) => self.handle_joined(joined),
                None => break,
            }
        }

        self.phase = GenerationPhase::Disposed;
        self.maybe_finish();
        Ok(())
    }

    fn report_environment(&mut self, kind: CheckKind, error: &TaskError) {
        let event = match error {
            TaskError::Stage { .. } => {
                if std::mem::replace(&mut self.staging_reported, true) {
                    debug!(generation = self.id, kind = %kind, "Staging failure already reported: {}", error);
                    return;
                }
                SchedulerEvent::StagingFailed {
                    generation: self.id,
                    kind,
                    reason: error.to_string(),
                }
            }
            TaskError::Spawn { .. } | TaskError::Wait(_) => {
                if std::mem::replace(&mut self.evaluator_reported, true) {
                    debug!(generation = self.id, kind = %kind, "Evaluator failure already reported: {}", error);
                    return;
                }
                SchedulerEvent::EvaluatorUnavailable {
                    generation: self.id,
                    kind,
                    reason: error.to_string(),
                }
            }
        };
        error!(generation = self.id, kind = %kind, "{}", error);
        self.emit(event);
    }

    fn maybe_finish(&mut self) {
        if self.finished || !self.tasks.is_empty() || self.phase == GenerationPhase::Building {
            return;
        }
        self.finished = true;
        info!(generation = self.id, "Generation finished");
        self.emit(SchedulerEvent::GenerationFinished {
            generation: self.id,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }
}
