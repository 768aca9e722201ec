//! Dev server started in the continent for the duration of a run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::domain::error::{PaintressError, Result};
use crate::process::terminate;

/// A running dev server. Killed on [`stop`](Self::stop) or when dropped.
#[derive(Debug)]
pub struct DevServer {
    command: String,
    log_path: PathBuf,
    child: Child,
}

impl DevServer {
    /// Spawn `sh -c <command>` in `dir`, sending its output to `log_path`.
    pub async fn start(command: &str, dir: &Path, log_path: &Path) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let log = std::fs::File::create(log_path)?;
        let log_err = log.try_clone()?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PaintressError::Config(format!("failed to start dev server: {e}")))?;

        info!(command = %command, pid = child.id(), log = %log_path.display(), "dev server started");
        Ok(Self {
            command: command.to_string(),
            log_path: log_path.to_path_buf(),
            child,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `false` once the process has exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send SIGTERM and wait up to `timeout` for the server to exit, then
    /// kill it.
    pub async fn stop(mut self, timeout: Duration) {
        if !self.is_running() {
            warn!(command = %self.command, "dev server had already exited");
            return;
        }
        terminate(&mut self.child);
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(_) => info!(command = %self.command, "dev server stopped"),
            Err(_) => {
                warn!(command = %self.command, "dev server ignored SIGTERM, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}
