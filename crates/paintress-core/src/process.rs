//! External process execution shared by the agent invoker, setup and review
//! commands, and the PR publisher.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; -1 when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl ProcessOutput {
    /// stdout followed by stderr, for pattern matching.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Last non-empty stderr line, falling back to the exit code.
    pub fn failure_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }
}

/// How a process run ended.
#[derive(Debug)]
pub enum ProcessRun {
    Finished(ProcessOutput),
    /// The cancel signal fired; the process was given `grace` to exit and
    /// killed afterwards if still running.
    Cancelled { reason: String },
}

/// A `sh -c` command rooted at `dir`.
pub fn shell_command(script: &str, dir: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).current_dir(dir);
    cmd
}

/// Spawn `cmd`, capture its output, and race it against `cancel`.
///
/// The child is spawned with `kill_on_drop`, so dropping this future (for
/// example when a deadline elapses) terminates the process.
pub async fn run_process(
    mut cmd: Command,
    cancel: &CancelSignal,
    grace: Duration,
) -> std::io::Result<ProcessRun> {
    let start = Instant::now();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = tokio::select! {
        status = child.wait() => status?,
        reason = cancel.cancelled() => {
            stop_child(&mut child, grace).await;
            return Ok(ProcessRun::Cancelled { reason });
        }
    };

    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();
    Ok(ProcessRun::Finished(finish(status, stdout, stderr, start)))
}

fn drain<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

async fn stop_child(child: &mut Child, grace: Duration) {
    terminate(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!("child exited within grace period"),
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "child ignored SIGTERM, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Ask `child` to exit with SIGTERM. No-op if it has already been reaped.
#[cfg(unix)]
pub(crate) fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn finish(status: ExitStatus, stdout: String, stderr: String, start: Instant) -> ProcessOutput {
    ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration_ms: start.elapsed().as_millis() as u64,
        success: status.success(),
    }
}
