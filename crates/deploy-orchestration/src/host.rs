//! Remote host channel: command execution and file transfer.

use crate::{DeploymentTarget, Error, Result};
use async_trait::async_trait;
use command_executor::{
    Command, ExitResult, Launcher,
    backends::{LocalLauncher, SshConfig, SshLauncher, SudoLauncher},
};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A reachable host the pipeline can run commands on and copy files to
///
/// All methods return channel-level errors only: a command that ran and
/// exited non-zero comes back as an [`ExitResult`] for the caller to
/// interpret.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Address used in log and diagnostic messages
    fn address(&self) -> &str;

    /// Run a command as the login user
    async fn run(&self, command: Command) -> command_executor::Result<ExitResult>;

    /// Run a command with `sudo -n` on the host
    async fn run_privileged(&self, command: Command) -> command_executor::Result<ExitResult>;

    /// Copy a local file to `remote_path`, which must be writable by the login user
    async fn upload(&self, local: &Path, remote_path: &str) -> command_executor::Result<ExitResult>;

    /// Make `remote_dir` an exact, checksum-compared mirror of `local_dir`
    async fn mirror(&self, local_dir: &Path, remote_dir: &str)
    -> command_executor::Result<ExitResult>;

    /// Whether [`RemoteHost::mirror`] can be used (rsync on both ends)
    async fn mirror_supported(&self) -> bool;
}

/// Options for the SSH channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Extra `-o` options for ssh, scp and rsync
    pub ssh_options: Vec<String>,
    /// Upper bound for any single remote operation
    pub operation_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ssh_options: Vec::new(),
            operation_timeout: Duration::from_secs(300),
        }
    }
}

/// [`RemoteHost`] backed by the OpenSSH client tools
pub struct SshHost {
    config: SshConfig,
    local: LocalLauncher,
    remote: SshLauncher<LocalLauncher>,
    privileged: SudoLauncher<SshLauncher<LocalLauncher>>,
}

impl SshHost {
    /// Prepare a channel to `target`
    ///
    /// Validates the target locally; no connection is opened until the first
    /// command runs.
    pub fn connect(target: &DeploymentTarget, options: &ChannelOptions) -> Result<Self> {
        target.validate()?;

        let mut config = SshConfig::new(&target.address)
            .with_user(&target.remote_user)
            .with_identity_file(target.credential.path());
        if let Some(port) = target.port {
            config = config.with_port(port);
        }
        for option in &options.ssh_options {
            config = config.with_option(option);
        }
        config
            .check_identity()
            .map_err(|e| Error::Precondition(e.to_string()))?;

        let local = LocalLauncher::new().with_timeout(options.operation_timeout);
        let remote = SshLauncher::new(local, config.clone());
        let privileged = SudoLauncher::new(remote.clone());

        Ok(Self {
            config,
            local,
            remote,
            privileged,
        })
    }

    /// SSH configuration in use
    pub fn ssh_config(&self) -> &SshConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteHost for SshHost {
    fn address(&self) -> &str {
        self.config.host()
    }

    async fn run(&self, command: Command) -> command_executor::Result<ExitResult> {
        self.remote.execute(command).await
    }

    async fn run_privileged(&self, command: Command) -> command_executor::Result<ExitResult> {
        self.privileged.execute(command).await
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> command_executor::Result<ExitResult> {
        debug!("Uploading {} to {}", local.display(), self.config.remote_spec(remote_path));
        self.local
            .execute(self.config.upload_command(local, remote_path))
            .await
    }

    async fn mirror(
        &self,
        local_dir: &Path,
        remote_dir: &str,
    ) -> command_executor::Result<ExitResult> {
        // Trailing slash: copy the directory's contents, not the directory itself.
        let source = format!("{}/", local_dir.display());
        let destination = format!("{}/", remote_dir.trim_end_matches('/'));

        let rsync = Command::builder("rsync")
            .arg("-rlptz")
            .arg("--checksum")
            .arg("--delete")
            .arg("--rsync-path")
            .arg("sudo -n rsync")
            .arg("-e")
            .arg(self.config.rsync_remote_shell())
            .arg(source)
            .arg(self.config.remote_spec(&destination))
            .build();

        self.local.execute(rsync).await
    }

    async fn mirror_supported(&self) -> bool {
        let local = self
            .local
            .execute(Command::builder("rsync").arg("--version").build())
            .await
            .map(|r| r.success())
            .unwrap_or(false);
        if !local {
            return false;
        }
        self.remote
            .execute(Command::shell("command -v rsync"))
            .await
            .map(|r| r.success())
            .unwrap_or(false)
    }
}
