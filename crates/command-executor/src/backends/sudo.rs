//! Sudo launcher for privilege escalation
//!
//! Commands are run with `sudo -n`: sudo must be configured with NOPASSWD for
//! the connecting user (the default on most cloud images). A host that would
//! prompt for a password fails immediately instead of hanging.
//!
//! Wrap the sudo launcher *inside* an SSH launcher's view of the world, i.e.
//! `SudoLauncher<SshLauncher<LocalLauncher>>`, so that sudo runs on the remote
//! host:
//!
//! ```no_run
//! use command_executor::backends::{LocalLauncher, SshConfig, SshLauncher, SudoLauncher};
//! use command_executor::{Command, Launcher};
//!
//! # async fn example() -> command_executor::Result<()> {
//! let ssh = SshLauncher::new(LocalLauncher::new(), SshConfig::new("10.0.0.5"));
//! let sudo = SudoLauncher::new(ssh);
//!
//! // Runs: ssh 10.0.0.5 'sudo -n systemctl restart worker'
//! let cmd = Command::builder("systemctl").arg("restart").arg("worker").build();
//! let result = sudo.execute(cmd).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Command, error::Result, launcher::Launcher, process::ExitResult};
use async_trait::async_trait;

/// Launcher that wraps another launcher to execute commands with sudo
#[derive(Debug, Clone)]
pub struct SudoLauncher<L> {
    inner: L,
}

impl<L> SudoLauncher<L> {
    /// Create a new sudo launcher wrapping the given launcher
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    /// The wrapped launcher
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

/// Prefix `command` with `sudo -n`, keeping its environment and working directory
pub fn sudo_command(command: &Command) -> Command {
    let mut builder = Command::builder("sudo")
        .arg("-n")
        .arg(command.get_program())
        .args(command.get_args());

    for (key, val) in command.get_envs() {
        builder = builder.env(key, val);
    }

    if let Some(dir) = command.get_current_dir() {
        builder = builder.current_dir(dir);
    }

    builder.build()
}

#[async_trait]
impl<L> Launcher for SudoLauncher<L>
where
    L: Launcher,
{
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        self.inner
            .execute(sudo_command(&command))
            .await
            .map_err(|e| e.with_layer_context("Sudo"))
    }

    fn description(&self) -> String {
        format!("sudo via {}", self.inner.description())
    }
}
