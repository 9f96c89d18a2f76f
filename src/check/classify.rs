//! Evaluator output classification.
//!
//! The evaluator answers through its exit status and a small vocabulary of
//! sentinels on stdout. Classification is pure; stderr is never consulted.

use std::process::ExitStatus;
use std::time::Duration;

use super::{CheckKind, Outcome};

/// Shell convention for a child that died of SIGTERM / SIGKILL.
const SHELL_SIGTERM_EXIT: i32 = 128 + 15;
const SHELL_SIGKILL_EXIT: i32 = 128 + 9;

/// How an evaluator process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal termination with an exit code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(i32),
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Exited(-1)
    }

    /// Ended by the termination signals cancellation sends.
    pub fn is_termination(&self) -> bool {
        match *self {
            Self::Signaled(signal) => signal == libc::SIGTERM || signal == libc::SIGKILL,
            Self::Exited(code) => code == SHELL_SIGTERM_EXIT || code == SHELL_SIGKILL_EXIT,
        }
    }
}

/// Fixed stdout vocabulary of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel<'a> {
    IllegalSexpInDefn,
    ParseErrorInDefn,
    IllegalSexpInTest,
    ParseErrorInTest,
    /// `()`, or nothing at all: evaluation produced no answer.
    NoAnswer,
    /// `fail`: the combined search was exhausted.
    Fail,
    /// Anything else is a positive answer.
    Answer(&'a str),
}

impl<'a> Sentinel<'a> {
    pub fn parse(stdout: &'a str) -> Self {
        match stdout.trim() {
            "illegal-sexp-in-defn" => Self::IllegalSexpInDefn,
            "parse-error-in-defn" => Self::ParseErrorInDefn,
            "illegal-sexp-in-test/answer" => Self::IllegalSexpInTest,
            "parse-error-in-test/answer" => Self::ParseErrorInTest,
            "()" | "" => Self::NoAnswer,
            "fail" => Self::Fail,
            answer => Self::Answer(answer),
        }
    }
}

/// Map a finished evaluator run to the outcome of `kind`.
pub fn classify(kind: &CheckKind, exit: ProcessExit, stdout: &[u8], elapsed: Duration) -> Outcome {
    if exit.is_termination() {
        return Outcome::Killed;
    }
    // Any abnormal exit means the reader rejected the query file itself.
    if exit != ProcessExit::Exited(0) {
        return Outcome::IllegalSyntax;
    }

    let stdout = String::from_utf8_lossy(stdout);
    let sentinel = Sentinel::parse(&stdout);

    match kind {
        CheckKind::DefinitionCheck => match sentinel {
            Sentinel::IllegalSexpInDefn | Sentinel::IllegalSexpInTest => Outcome::IllegalSyntax,
            Sentinel::ParseErrorInDefn | Sentinel::ParseErrorInTest => Outcome::ParseError,
            Sentinel::NoAnswer | Sentinel::Fail => Outcome::EvaluationFailed { elapsed },
            Sentinel::Answer(answer) => Outcome::Succeeded {
                elapsed,
                result: Some(answer.to_string()),
            },
        },
        CheckKind::ExampleCheck(_) => match sentinel {
            Sentinel::IllegalSexpInTest => Outcome::IllegalSyntax,
            Sentinel::ParseErrorInTest => Outcome::ParseError,
            Sentinel::IllegalSexpInDefn | Sentinel::ParseErrorInDefn => Outcome::Inconclusive,
            Sentinel::NoAnswer | Sentinel::Fail => Outcome::EvaluationFailed { elapsed },
            Sentinel::Answer(answer) => Outcome::Succeeded {
                elapsed,
                result: Some(answer.to_string()),
            },
        },
        CheckKind::CombinedSearch => match sentinel {
            Sentinel::IllegalSexpInDefn
            | Sentinel::ParseErrorInDefn
            | Sentinel::IllegalSexpInTest
            | Sentinel::ParseErrorInTest => Outcome::Inconclusive,
            Sentinel::NoAnswer | Sentinel::Fail => Outcome::SearchFailed { elapsed },
            Sentinel::Answer(candidate) => Outcome::SearchSucceeded {
                candidate: candidate.to_string(),
                elapsed,
            },
        },
    }
}
