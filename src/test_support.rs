//! Helpers shared by the async tests.
//!
//! Tests drive real subprocesses through `/bin/sh`: the evaluator is invoked
//! as `/bin/sh -c 'exec /bin/sh "$2"' evaluator --script <file>`, so each
//! staged query is simply a shell script.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::check::{CheckKind, Evaluator, Outcome};
use crate::config::Config;
use crate::events::SchedulerEvent;

const SH_ARGS: [&str; 3] = ["-c", "exec /bin/sh \"$2\"", "evaluator"];

pub(crate) fn sh_evaluator() -> Evaluator {
    Evaluator {
        program: "/bin/sh".into(),
        leading_args: SH_ARGS.iter().map(|s| s.to_string()).collect(),
        kill_grace: Duration::from_secs(1),
    }
}

pub(crate) fn sh_config(staging_dir: &Path) -> Config {
    let mut config = Config::new("/bin/sh", staging_dir)
        .with_evaluator_args(SH_ARGS)
        .with_debounce(Duration::from_millis(50));
    config.kill_grace = Duration::from_secs(1);
    config.shutdown_grace = Duration::from_secs(5);
    config
}

/// Receive events until `generation` reports `GenerationFinished`.
pub(crate) async fn collect_generation(
    rx: &mut mpsc::UnboundedReceiver<SchedulerEvent>,
    generation: u64,
) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for scheduler events")
            .expect("event channel closed");
        let done = matches!(event, SchedulerEvent::GenerationFinished { generation: g } if g == generation);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Outcomes reported for `kind`, in order.
pub(crate) fn outcomes_for(events: &[SchedulerEvent], kind: &CheckKind) -> Vec<Outcome> {
    events
        .iter()
        .filter_map(|event| match event {
            SchedulerEvent::Outcome { kind: k, outcome, .. } if k == kind => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}
