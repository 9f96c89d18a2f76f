use std::time::Duration;

use serde::Serialize;

use super::CheckKind;

/// Terminal result of one check.
///
/// # Exhaustive Matching
/// Every consumer matches on all variants; there is no "unknown" fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// The input is not a legal s-expression.
    IllegalSyntax,
    /// The input reads but does not parse in the interpreter's grammar.
    ParseError,
    /// The evaluator ran to completion and found no answer.
    EvaluationFailed { elapsed: Duration },
    /// The check passed. `result` is `None` when the outcome was inferred
    /// rather than reported by the evaluator.
    Succeeded {
        elapsed: Duration,
        result: Option<String>,
    },
    /// The definition is broken, so this check's own status is unknowable.
    Inconclusive,
    /// Cancelled before completion. Neutral, never an error.
    Killed,
    /// The combined search was exhausted without a candidate.
    SearchFailed { elapsed: Duration },
    /// The combined search produced a definition satisfying every example.
    SearchSucceeded { candidate: String, elapsed: Duration },
}

impl Outcome {
    /// Whether this outcome should be presented as an error.
    pub fn is_error(&self) -> bool {
        match self {
            Self::IllegalSyntax
            | Self::ParseError
            | Self::EvaluationFailed { .. }
            | Self::SearchFailed { .. } => true,
            Self::Succeeded { .. }
            | Self::Inconclusive
            | Self::Killed
            | Self::SearchSucceeded { .. } => false,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::EvaluationFailed { elapsed }
            | Self::Succeeded { elapsed, .. }
            | Self::SearchFailed { elapsed }
            | Self::SearchSucceeded { elapsed, .. } => Some(*elapsed),
            Self::IllegalSyntax | Self::ParseError | Self::Inconclusive | Self::Killed => None,
        }
    }

    /// Short status text for `kind`'s status label. `Killed` clears the label.
    ///
    /// A failing example shows its run time like a failed search; a failing
    /// definition just says so.
    pub fn label(&self, kind: &CheckKind) -> String {
        match self {
            Self::IllegalSyntax => "Illegal sexpression".to_string(),
            Self::ParseError => "Syntax error".to_string(),
            Self::EvaluationFailed { elapsed } if kind.is_example() => {
                format!("Failed ({:.2} s)", elapsed.as_secs_f64())
            }
            Self::EvaluationFailed { .. } => "Evaluation failed".to_string(),
            Self::Succeeded { elapsed, .. } | Self::SearchSucceeded { elapsed, .. } => {
                format!("Succeeded ({:.2} s)", elapsed.as_secs_f64())
            }
            Self::SearchFailed { elapsed } => format!("Failed ({:.2} s)", elapsed.as_secs_f64()),
            Self::Inconclusive => "???".to_string(),
            Self::Killed => String::new(),
        }
    }
}
