//! Local process execution backend

use async_io::Timer;
use async_process::Stdio;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::process::ExitResult;

/// Launcher for executing processes locally
///
/// Every command runs to completion with stdout and stderr captured. When an
/// operation timeout is configured, a command that outlives it is killed and
/// reported as [`Error::TimedOut`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher {
    timeout: Option<Duration>,
}

impl LocalLauncher {
    /// Create a local launcher without an operation timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any command that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The configured operation timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        let mut async_cmd = command.prepare();
        async_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running: {}", command);

        let child = async_cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::spawn_failed(format!(
                    "command not found: {}",
                    command.get_program().to_string_lossy()
                ))
            } else {
                Error::spawn_failed(format!("Failed to spawn process: {}", e))
            }
        })?;

        let output = match self.timeout {
            // Dropping the losing `output` future drops the child, which kills it.
            Some(timeout) => futures_lite::future::or(async { Some(child.output().await) }, async {
                Timer::after(timeout).await;
                None
            })
            .await
            .ok_or_else(|| Error::TimedOut {
                command: command.to_string(),
                timeout,
            })?,
            None => child.output().await,
        }?;

        Ok(ExitResult {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn description(&self) -> String {
        "Local execution".to_string()
    }
}
