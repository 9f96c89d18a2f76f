use serde::Serialize;
use tokio::sync::mpsc;

use crate::check::{CheckKind, Outcome};

/// Sending half of the outward event stream.
pub type EventSender = mpsc::UnboundedSender<SchedulerEvent>;

/// Events the scheduler emits to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A generation's checks have been launched.
    GenerationStarted {
        generation: u64,
        checks: Vec<CheckKind>,
    },
    /// A check reached its terminal outcome (organic or inferred).
    Outcome {
        generation: u64,
        kind: CheckKind,
        outcome: Outcome,
    },
    /// The evaluator could not be run. Emitted once per generation.
    EvaluatorUnavailable {
        generation: u64,
        kind: CheckKind,
        reason: String,
    },
    /// A query file could not be staged. Emitted once per generation.
    StagingFailed {
        generation: u64,
        kind: CheckKind,
        reason: String,
    },
    /// Every check of the generation is terminal.
    GenerationFinished { generation: u64 },
    /// Checks still alive after the shutdown grace period.
    ShutdownStalled {
        generation: u64,
        remaining: Vec<CheckKind>,
    },
}

impl SchedulerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::GenerationStarted { generation, .. }
            | Self::Outcome { generation, .. }
            | Self::EvaluatorUnavailable { generation, .. }
            | Self::StagingFailed { generation, .. }
            | Self::GenerationFinished { generation }
            | Self::ShutdownStalled { generation, .. } => *generation,
        }
    }
}
