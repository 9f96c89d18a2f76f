//! Checks: single units of verification work delegated to the evaluator.
//!
//! - `outcome`: the closed set of results a check can report
//! - `classify`: maps a finished evaluator process to an [`Outcome`]
//! - `task`: owns one evaluator subprocess and its cancellation

mod classify;
mod outcome;
mod task;

pub use classify::{classify, ProcessExit, Sentinel};
pub use outcome::Outcome;
pub use task::{CheckTask, Evaluator, TaskError};

use serde::Serialize;

use crate::snapshot::ExampleId;

/// Role of a check within a generation.
///
/// The role decides how the evaluator's output is read and which implication
/// rules apply when the check finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CheckKind {
    /// Does the definition parse and evaluate on its own?
    DefinitionCheck,
    /// Does the definition satisfy one example?
    ExampleCheck(ExampleId),
    /// Find a definition satisfying every active example at once.
    CombinedSearch,
}

impl CheckKind {
    pub fn is_example(&self) -> bool {
        matches!(self, Self::ExampleCheck(_))
    }

    /// File name of the staged query source for this check.
    pub fn script_file_name(&self) -> String {
        match self {
            Self::DefinitionCheck => "barliman-query-simple.scm".to_string(),
            Self::ExampleCheck(id) => format!("barliman-query-test-{}.scm", id.as_uuid().simple()),
            Self::CombinedSearch => "barliman-query-alltests.scm".to_string(),
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefinitionCheck => write!(f, "definition"),
            Self::ExampleCheck(id) => write!(f, "example {}", id.short()),
            Self::CombinedSearch => write!(f, "combined search"),
        }
    }
}
