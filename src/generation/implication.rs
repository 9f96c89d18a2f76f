//! Implication rules between the outcomes of one generation's checks.
//!
//! The engine is a pure state machine: it is told about outcomes in whatever
//! order they arrive and answers with the outcomes to forward and the checks
//! to cancel. It never touches processes itself.
//!
//! # Invariants
//! - Each registered check is forwarded at most one outcome.
//! - Once cancellation of a check has been requested, the outcome forwarded
//!   for it is `Killed`, whatever the process reported.
//! - Replaying an outcome for a terminal check has no effect.
//! - A forwarded outcome is never retracted. An example that finished before
//!   the definition broke keeps the result it reported.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::check::{CheckKind, Outcome};

/// Lifecycle of one check as seen by the engine.
///
/// ```text
/// Pending -> Running -> Done(outcome)
///        \          \-> Cancelling -> Done(Killed)
///         \-> Cancelling
/// Running -> Abandoned   (environment failure, nothing forwarded)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Cancelling,
    Done(Outcome),
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Abandoned)
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// What the caller must do after an outcome has been applied.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Outcomes to emit, in order.
    pub forward: Vec<(CheckKind, Outcome)>,
    /// Checks whose processes must be cancelled.
    pub cancel: Vec<CheckKind>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.cancel.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ImplicationEngine {
    tasks: BTreeMap<CheckKind, TaskState>,
    definition_broken: bool,
    search_succeeded: bool,
}

impl ImplicationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. Registering a kind twice keeps the first entry.
    pub fn register(&mut self, kind: CheckKind) -> bool {
        if self.tasks.contains_key(&kind) {
            warn!(kind = %kind, "Check registered twice in one generation");
            return false;
        }
        self.tasks.insert(kind, TaskState::Pending);
        true
    }

    pub fn mark_running(&mut self, kind: CheckKind) {
        if let Some(state) = self.tasks.get_mut(&kind) {
            if *state == TaskState::Pending {
                *state = TaskState::Running;
            }
        }
    }

    /// The check's process could not be run; it ends without an outcome.
    pub fn abandon(&mut self, kind: CheckKind) {
        if let Some(state) = self.tasks.get_mut(&kind) {
            if !state.is_terminal() {
                *state = TaskState::Abandoned;
            }
        }
    }

    pub fn state(&self, kind: &CheckKind) -> Option<&TaskState> {
        self.tasks.get(kind)
    }

    /// Forwarded outcome of a finished check.
    pub fn outcome(&self, kind: &CheckKind) -> Option<&Outcome> {
        match self.tasks.get(kind) {
            Some(TaskState::Done(outcome)) => Some(outcome),
            _ => None,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &CheckKind> {
        self.tasks.keys()
    }

    /// Checks that have not reached a terminal state.
    pub fn unfinished(&self) -> Vec<CheckKind> {
        self.tasks
            .iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn is_settled(&self) -> bool {
        self.tasks.values().all(TaskState::is_terminal)
    }

    /// Mark every live check as being cancelled by generation teardown.
    pub fn begin_teardown(&mut self) -> Vec<CheckKind> {
        let mut cancelled = Vec::new();
        for (kind, state) in self.tasks.iter_mut() {
            if state.is_live() {
                *state = TaskState::Cancelling;
                cancelled.push(*kind);
            }
        }
        cancelled
    }

    /// Apply one check's terminal outcome.
    pub fn on_outcome(&mut self, kind: CheckKind, outcome: Outcome) -> Effects {
        let mut effects = Effects::default();
        let cancel_requested = match self.tasks.get(&kind) {
            None => {
                warn!(kind = %kind, "Outcome for a check this generation never registered");
                return effects;
            }
            Some(state) if state.is_terminal() => {
                debug!(kind = %kind, "Ignoring repeated outcome");
                return effects;
            }
            Some(state) => *state == TaskState::Cancelling,
        };

        if cancel_requested || outcome == Outcome::Killed {
            self.finish(kind, Outcome::Killed, &mut effects);
            return effects;
        }

        let presented = self.present(&kind, &outcome);
        self.finish(kind, presented, &mut effects);

        match (&kind, &outcome) {
            (CheckKind::DefinitionCheck, Outcome::IllegalSyntax | Outcome::ParseError) => {
                self.definition_broken = true;
                self.cancel_if_live(CheckKind::CombinedSearch, &mut effects);
            }
            (CheckKind::DefinitionCheck, Outcome::EvaluationFailed { .. }) => {
                // No search over this definition can succeed, but it still
                // reads and parses, so examples report their own results.
                self.cancel_if_live(CheckKind::CombinedSearch, &mut effects);
            }
            (
                CheckKind::ExampleCheck(_),
                Outcome::IllegalSyntax | Outcome::ParseError | Outcome::EvaluationFailed { .. },
            ) => {
                self.cancel_if_live(CheckKind::CombinedSearch, &mut effects);
            }
            (CheckKind::CombinedSearch, Outcome::SearchSucceeded { elapsed, .. }) => {
                self.search_succeeded = true;
                let elapsed = *elapsed;
                let others: Vec<CheckKind> = self
                    .tasks
                    .iter()
                    .filter(|(other, state)| **other != kind && !state.is_terminal())
                    .map(|(other, _)| *other)
                    .collect();
                for other in others {
                    if other.is_example() {
                        // Satisfying the combined query entails satisfying each example.
                        let synthesized = Outcome::Succeeded {
                            elapsed,
                            result: None,
                        };
                        self.finish(other, synthesized, &mut effects);
                    } else {
                        self.tasks.insert(other, TaskState::Cancelling);
                    }
                    effects.cancel.push(other);
                }
            }
            _ => {}
        }

        effects
    }

    /// How an organic outcome is presented given what is already known.
    fn present(&self, kind: &CheckKind, outcome: &Outcome) -> Outcome {
        if kind.is_example() && self.definition_broken {
            return Outcome::Inconclusive;
        }
        outcome.clone()
    }

    fn finish(&mut self, kind: CheckKind, outcome: Outcome, effects: &mut Effects) {
        self.tasks.insert(kind, TaskState::Done(outcome.clone()));
        effects.forward.push((kind, outcome));
    }

    fn cancel_if_live(&mut self, kind: CheckKind, effects: &mut Effects) {
        if let Some(state) = self.tasks.get_mut(&kind) {
            if state.is_live() {
                *state = TaskState::Cancelling;
                effects.cancel.push(kind);
            }
        }
    }

    pub fn definition_broken(&self) -> bool {
        self.definition_broken
    }

    pub fn search_succeeded(&self) -> bool {
        self.search_succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ExampleId;
    use std::time::Duration;

    const T: Duration = Duration::from_millis(40);

    fn engine_with(examples: usize) -> (ImplicationEngine, Vec<CheckKind>) {
        let mut engine = ImplicationEngine::new();
        let mut kinds = vec![CheckKind::DefinitionCheck, CheckKind::CombinedSearch];
        kinds.extend((0..examples).map(|_| CheckKind::ExampleCheck(ExampleId::new())));
        for kind in &kinds {
            engine.register(*kind);
            engine.mark_running(*kind);
        }
        let examples = kinds.split_off(2);
        (engine, examples)
    }

    fn search_success() -> Outcome {
        Outcome::SearchSucceeded {
            candidate: "(define f (lambda (x) (* x x)))".to_string(),
            elapsed: T,
        }
    }

    #[test]
    fn broken_definition_cancels_search_and_makes_examples_inconclusive() {
        let (mut engine, examples) = engine_with(1);

        let effects = engine.on_outcome(CheckKind::DefinitionCheck, Outcome::IllegalSyntax);
        assert_eq!(effects.cancel, vec![CheckKind::CombinedSearch]);
        assert_eq!(
            effects.forward,
            vec![(CheckKind::DefinitionCheck, Outcome::IllegalSyntax)]
        );
        assert!(engine.definition_broken());

        // The example still runs; its own result is masked when it lands.
        let effects = engine.on_outcome(
            examples[0],
            Outcome::Succeeded {
                elapsed: T,
                result: Some("25".into()),
            },
        );
        assert_eq!(effects.forward, vec![(examples[0], Outcome::Inconclusive)]);
        assert!(effects.cancel.is_empty());

        let effects = engine.on_outcome(CheckKind::CombinedSearch, Outcome::Killed);
        assert_eq!(effects.forward, vec![(CheckKind::CombinedSearch, Outcome::Killed)]);
        assert!(engine.is_settled());
    }

    #[test]
    fn parse_error_in_definition_also_breaks_it() {
        let (mut engine, _) = engine_with(0);
        let effects = engine.on_outcome(CheckKind::DefinitionCheck, Outcome::ParseError);
        assert_eq!(effects.cancel, vec![CheckKind::CombinedSearch]);
    }

    #[test]
    fn definition_without_answer_cancels_search_but_examples_stand() {
        let (mut engine, examples) = engine_with(1);
        let failed = Outcome::EvaluationFailed { elapsed: T };

        let effects = engine.on_outcome(CheckKind::DefinitionCheck, failed.clone());
        assert_eq!(effects.cancel, vec![CheckKind::CombinedSearch]);
        assert_eq!(effects.forward, vec![(CheckKind::DefinitionCheck, failed)]);
        assert!(!engine.definition_broken());

        let passed = Outcome::Succeeded {
            elapsed: T,
            result: Some("(_.0)".into()),
        };
        let effects = engine.on_outcome(examples[0], passed.clone());
        assert_eq!(effects.forward, vec![(examples[0], passed)]);
    }

    #[test]
    fn example_finished_before_definition_broke_keeps_its_result() {
        let (mut engine, examples) = engine_with(2);
        let passed = Outcome::Succeeded {
            elapsed: T,
            result: Some("(_.0)".into()),
        };
        engine.on_outcome(examples[0], passed.clone());

        let effects = engine.on_outcome(CheckKind::DefinitionCheck, Outcome::IllegalSyntax);
        assert_eq!(
            effects.forward,
            vec![(CheckKind::DefinitionCheck, Outcome::IllegalSyntax)]
        );
        assert_eq!(effects.cancel, vec![CheckKind::CombinedSearch]);
        assert_eq!(engine.outcome(&examples[0]), Some(&passed));

        // The example still running when the definition broke is masked.
        let effects = engine.on_outcome(examples[1], passed);
        assert_eq!(effects.forward, vec![(examples[1], Outcome::Inconclusive)]);
    }

    #[test]
    fn failing_example_cancels_search() {
        let (mut engine, examples) = engine_with(2);
        let effects = engine.on_outcome(examples[1], Outcome::EvaluationFailed { elapsed: T });
        assert_eq!(effects.cancel, vec![CheckKind::CombinedSearch]);
        assert_eq!(
            effects.forward,
            vec![(examples[1], Outcome::EvaluationFailed { elapsed: T })]
        );
        assert_eq!(engine.state(&CheckKind::CombinedSearch), Some(&TaskState::Cancelling));
    }

    #[test]
    fn search_success_racing_a_failed_example_is_reported_killed() {
        let (mut engine, examples) = engine_with(1);
        engine.on_outcome(examples[0], Outcome::EvaluationFailed { elapsed: T });

        // The search process exited with an answer before the signal landed.
        let effects = engine.on_outcome(CheckKind::CombinedSearch, search_success());
        assert_eq!(effects.forward, vec![(CheckKind::CombinedSearch, Outcome::Killed)]);
        assert!(effects.cancel.is_empty());
        assert!(!engine.search_succeeded());
    }

    #[test]
    fn search_success_synthesizes_example_successes_and_cancels_the_rest() {
        let (mut engine, examples) = engine_with(2);
        let effects = engine.on_outcome(CheckKind::CombinedSearch, search_success());

        assert_eq!(effects.forward[0], (CheckKind::CombinedSearch, search_success()));
        for example in &examples {
            assert!(effects.forward.contains(&(
                *example,
                Outcome::Succeeded {
                    elapsed: T,
                    result: None
                }
            )));
            assert!(effects.cancel.contains(example));
        }
        assert!(effects.cancel.contains(&CheckKind::DefinitionCheck));

        // Killed reports from the cancelled examples are absorbed.
        for example in &examples {
            assert!(engine.on_outcome(*example, Outcome::Killed).is_empty());
        }
        // A definition error landing late is neutralised.
        let effects = engine.on_outcome(CheckKind::DefinitionCheck, Outcome::ParseError);
        assert_eq!(effects.forward, vec![(CheckKind::DefinitionCheck, Outcome::Killed)]);
        assert!(engine.is_settled());
    }

    #[test]
    fn search_success_leaves_finished_checks_alone() {
        let (mut engine, examples) = engine_with(1);
        let organic = Outcome::Succeeded {
            elapsed: T,
            result: Some("(25)".into()),
        };
        engine.on_outcome(examples[0], organic.clone());
        engine.on_outcome(
            CheckKind::DefinitionCheck,
            Outcome::Succeeded {
                elapsed: T,
                result: None,
            },
        );

        let effects = engine.on_outcome(CheckKind::CombinedSearch, search_success());
        assert_eq!(effects.forward.len(), 1);
        assert!(effects.cancel.is_empty());
        assert_eq!(engine.outcome(&examples[0]), Some(&organic));
    }

    #[test]
    fn search_failure_cancels_nothing() {
        let (mut engine, _) = engine_with(2);
        let effects = engine.on_outcome(CheckKind::CombinedSearch, Outcome::SearchFailed { elapsed: T });
        assert!(effects.cancel.is_empty());
        assert_eq!(engine.unfinished().len(), 3);
    }

    #[test]
    fn replaying_an_outcome_is_a_no_op() {
        let (mut engine, examples) = engine_with(1);
        let failed = Outcome::EvaluationFailed { elapsed: T };
        let first = engine.on_outcome(examples[0], failed.clone());
        assert!(!first.is_empty());
        assert!(engine.on_outcome(examples[0], failed).is_empty());

        let first = engine.on_outcome(CheckKind::CombinedSearch, search_success());
        assert_eq!(first.forward.len(), 1);
        assert!(engine.on_outcome(CheckKind::CombinedSearch, search_success()).is_empty());
    }

    #[test]
    fn teardown_forces_killed_for_natural_results() {
        let (mut engine, examples) = engine_with(1);
        engine.on_outcome(CheckKind::DefinitionCheck, Outcome::Succeeded { elapsed: T, result: None });

        let cancelled = engine.begin_teardown();
        assert_eq!(cancelled.len(), 2);
        assert!(!cancelled.contains(&CheckKind::DefinitionCheck));

        let effects = engine.on_outcome(examples[0], Outcome::EvaluationFailed { elapsed: T });
        assert_eq!(effects.forward, vec![(examples[0], Outcome::Killed)]);
        assert!(effects.cancel.is_empty());
    }

    #[test]
    fn unregistered_and_abandoned_checks_forward_nothing() {
        let (mut engine, examples) = engine_with(1);
        assert!(engine
            .on_outcome(CheckKind::ExampleCheck(ExampleId::new()), Outcome::Killed)
            .is_empty());

        engine.abandon(examples[0]);
        assert!(engine.on_outcome(examples[0], Outcome::Killed).is_empty());
        assert_eq!(engine.state(&examples[0]), Some(&TaskState::Abandoned));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut engine = ImplicationEngine::new();
        assert!(engine.register(CheckKind::DefinitionCheck));
        assert!(!engine.register(CheckKind::DefinitionCheck));
        assert_eq!(engine.kinds().count(), 1);
    }
}
