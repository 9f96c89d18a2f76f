//! One evaluator subprocess per check.
//!
//! The task spawns `<evaluator> [leading args] --script <query file>`, pumps
//! stdout and stderr concurrently with waiting for exit, and classifies the
//! result. Cancellation sends SIGTERM to the evaluator's process group and
//! still waits for the exit, escalating to SIGKILL after a grace period.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{classify, CheckKind, Outcome, ProcessExit};
use crate::config::Config;
use crate::util::preview;

/// Environment failures of a single task. These never become an [`Outcome`].
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to spawn evaluator '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to wait for evaluator: {0}")]
    Wait(std::io::Error),

    #[error("failed to stage query file {}: {source}", .path.display())]
    Stage {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// How to invoke the external evaluator.
#[derive(Debug, Clone)]
pub struct Evaluator {
    pub program: PathBuf,
    /// Arguments placed before `--script`.
    pub leading_args: Vec<String>,
    /// How long a cancelled evaluator may take to honour SIGTERM.
    pub kill_grace: Duration,
}

impl Evaluator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.evaluator.clone(),
            leading_args: config.evaluator_args.clone(),
            kill_grace: config.kill_grace,
        }
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("--script")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// A single check bound to its staged query file.
///
/// # State Machine
/// ```text
/// created -> running -> exited (classified)
///        \-> cancelled before start (Killed, nothing spawned)
///                   \-> cancelled (SIGTERM, awaited, Killed)
/// ```
#[derive(Debug)]
pub struct CheckTask {
    kind: CheckKind,
    script: PathBuf,
    cancel: CancellationToken,
}

impl CheckTask {
    pub fn new(kind: CheckKind, script: PathBuf) -> Self {
        Self {
            kind,
            script,
            cancel: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    /// Token that cancels this task. Cancelling is idempotent and safe at any
    /// point in the task's life.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the check to its single terminal outcome.
    pub async fn run(self, evaluator: &Evaluator) -> Result<Outcome, TaskError> {
        if self.cancel.is_cancelled() {
            debug!(kind = %self.kind, "Check cancelled before start");
            return Ok(Outcome::Killed);
        }

        let started = Instant::now();
        let mut child = evaluator.command(&self.script).spawn().map_err(|source| {
            warn!(kind = %self.kind, program = %evaluator.program.display(), "Failed to spawn evaluator: {}", source);
            TaskError::Spawn {
                program: evaluator.program.display().to_string(),
                source,
            }
        })?;
        let pid = child.id();
        let mut group = ProcessGroup::new(pid);
        debug!(kind = %self.kind, pid = ?pid, script = %self.script.display(), "Evaluator started");

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));
        let readers: Vec<AbortHandle> = stdout
            .iter()
            .chain(stderr.iter())
            .map(JoinHandle::abort_handle)
            .collect();

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };
        let status = match finished {
            Some(status) => status.map_err(TaskError::Wait)?,
            None => terminate(&mut child, &group, evaluator.kill_grace).await?,
        };
        let elapsed = started.elapsed();

        // The leader has exited, but anything it forked may still hold the pipes.
        let drained = async { (collect(stdout).await, collect(stderr).await) };
        tokio::pin!(drained);
        let output = tokio::select! {
            biased;
            output = &mut drained => Some(output),
            _ = self.cancel.cancelled() => None,
        };
        let Some((stdout, stderr)) = output else {
            debug!(kind = %self.kind, pid = ?pid, "Cancelled with evaluator output still open");
            group.signal(Signal::Term);
            if tokio::time::timeout(evaluator.kill_grace, &mut drained).await.is_err() {
                group.signal(Signal::Kill);
                for reader in &readers {
                    reader.abort();
                }
            }
            group.disarm();
            return Ok(Outcome::Killed);
        };
        group.disarm();
        if !stderr.is_empty() {
            debug!(
                kind = %self.kind,
                stderr = %preview(&String::from_utf8_lossy(&stderr), 200),
                "Evaluator stderr"
            );
        }

        let exit = ProcessExit::from_status(status);
        let outcome = classify(&self.kind, exit, &stdout, elapsed);
        debug!(
            kind = %self.kind,
            exit = ?exit,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout = %preview(&String::from_utf8_lossy(&stdout), 200),
            "Evaluator finished: {:?}",
            outcome
        );
        Ok(outcome)
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        warn!("Failed to read evaluator output: {}", e);
    }
    buf
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Stop a cancelled evaluator and wait until it is really gone.
async fn terminate(
    child: &mut Child,
    group: &ProcessGroup,
    grace: Duration,
) -> Result<ExitStatus, TaskError> {
    signal(child, group, Signal::Term);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(TaskError::Wait),
        Err(_) => {
            info!(pid = ?group.pid, grace_ms = grace.as_millis() as u64, "Evaluator ignored SIGTERM, killing");
            signal(child, group, Signal::Kill);
            child.wait().await.map_err(TaskError::Wait)
        }
    }
}

fn signal(child: &mut Child, group: &ProcessGroup, signal: Signal) {
    if !group.signal(signal) {
        let _ = child.start_kill();
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// The evaluator's process group, led by the evaluator itself.
///
/// While armed, dropping it SIGKILLs the whole group. A task aborted mid-run
/// therefore takes every process it forked with it, not just the leader that
/// `kill_on_drop` reaches.
struct ProcessGroup {
    pid: Option<u32>,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Signal every process in the group. Returns whether it was delivered.
    #[cfg(unix)]
    fn signal(&self, signal: Signal) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // Negative pid addresses the group.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
        if rc != 0 {
            debug!(pid, signo, "Failed to signal evaluator group: {}", std::io::Error::last_os_error());
        }
        rc == 0
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) -> bool {
        false
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.armed {
            self.signal(Signal::Kill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ExampleId;
    use crate::test_support::sh_evaluator;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("query.scm");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn classifies_successful_answer_with_elapsed_time() {
        let dir = tempfile::tempdir().unwrap();
        let task = CheckTask::new(CheckKind::DefinitionCheck, script(&dir, "printf '((_.0))'"));
        let outcome = task.run(&sh_evaluator()).await.unwrap();
        match outcome {
            Outcome::Succeeded { result, .. } => assert_eq!(result.as_deref(), Some("((_.0))")),
            other => panic!("Expected Succeeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_illegal_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let kind = CheckKind::ExampleCheck(ExampleId::new());
        let task = CheckTask::new(kind, script(&dir, "echo 'read error' >&2; exit 3"));
        assert_eq!(task.run(&sh_evaluator()).await.unwrap(), Outcome::IllegalSyntax);
    }

    #[tokio::test]
    async fn cancel_before_start_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let body = format!("touch '{}'", marker.display());
        let task = CheckTask::new(CheckKind::CombinedSearch, script(&dir, &body));
        task.cancel();
        task.cancel();
        assert_eq!(task.run(&sh_evaluator()).await.unwrap(), Outcome::Killed);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn cancel_terminates_running_evaluator_and_waits() {
        let dir = tempfile::tempdir().unwrap();
        let task = CheckTask::new(CheckKind::CombinedSearch, script(&dir, "sleep 30; printf fail"));
        let token = task.cancel_token();
        let evaluator = sh_evaluator();
        let run = tokio::spawn(async move { task.run(&evaluator).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("cancelled evaluator did not exit")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Killed);
    }

    #[tokio::test]
    async fn cancel_reaches_background_children_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let task = CheckTask::new(CheckKind::DefinitionCheck, script(&dir, "sleep 20 & printf '(ok)'"));
        let token = task.cancel_token();
        let evaluator = sh_evaluator();
        let run = tokio::spawn(async move { task.run(&evaluator).await });

        // The script itself exits at once; the backgrounded sleep keeps stdout open.
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancel did not reach the background child")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Killed);
    }

    #[tokio::test]
    async fn large_output_on_both_streams_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        let body = "head -c 300000 /dev/zero | tr '\\0' 'e' >&2\n\
                    head -c 300000 /dev/zero | tr '\\0' 'o'\n\
                    printf '(ok)'";
        let task = CheckTask::new(CheckKind::DefinitionCheck, script(&dir, body));
        let outcome = tokio::time::timeout(Duration::from_secs(10), task.run(&sh_evaluator()))
            .await
            .expect("evaluator run hung")
            .unwrap();
        assert!(matches!(outcome, Outcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn missing_evaluator_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Evaluator {
            program: PathBuf::from("/nonexistent/barliman-evaluator"),
            leading_args: Vec::new(),
            kill_grace: Duration::from_secs(1),
        };
        let task = CheckTask::new(CheckKind::DefinitionCheck, script(&dir, ""));
        let err = task.run(&evaluator).await.unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
    }
}
