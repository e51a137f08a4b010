//! SSH remote execution backend using the OpenSSH CLI

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::process::ExitResult;
use crate::shell::shell_escape;

/// Exit code the `ssh` client uses for its own failures (as opposed to the remote command's)
const SSH_CLIENT_FAILURE: i32 = 255;

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    host: String,
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Path to identity file (private key)
    identity_file: Option<PathBuf>,
    /// `-o` options passed to ssh, scp and rsync's remote shell
    options: Vec<String>,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    ///
    /// Batch mode is always on: a prompt for a password or host key would hang
    /// an unattended run, so ssh is told to fail instead.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            options: vec![
                "BatchMode=yes".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                "ConnectTimeout=15".to_string(),
                "ServerAliveInterval=15".to_string(),
            ],
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add an `-o` option such as `UserKnownHostsFile=/dev/null`
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// The bare host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The identity file, if one is configured
    pub fn identity_file(&self) -> Option<&Path> {
        self.identity_file.as_deref()
    }

    /// Get the destination string (user@host if user is specified)
    pub fn destination(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// Check that the configured identity file exists locally
    pub fn check_identity(&self) -> Result<()> {
        match &self.identity_file {
            Some(path) if !path.is_file() => Err(Error::SshKeyNotFound {
                path: path.display().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Common arguments shared by ssh and scp; `port_flag` is `-p` for ssh, `-P` for scp
    fn connection_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    /// Build the `ssh` invocation that runs `command` on the remote host
    pub fn wrap(&self, command: &Command) -> Command {
        let mut ssh_cmd = Command::new("ssh");
        ssh_cmd.args(self.connection_args("-p"));
        ssh_cmd.arg(self.destination());
        ssh_cmd.arg(command.to_shell_string());
        ssh_cmd
    }

    /// Build an `scp` invocation copying a local file to `remote_path`
    pub fn upload_command(&self, local: &Path, remote_path: &str) -> Command {
        let mut scp_cmd = Command::new("scp");
        scp_cmd.arg("-q");
        scp_cmd.args(self.connection_args("-P"));
        scp_cmd.arg(local);
        scp_cmd.arg(format!("{}:{}", self.destination(), remote_path));
        scp_cmd
    }

    /// The remote shell string handed to `rsync -e`
    pub fn rsync_remote_shell(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.connection_args("-p").iter().map(|a| shell_escape(a)));
        parts.join(" ")
    }

    /// `user@host:path` form used by scp and rsync
    pub fn remote_spec(&self, remote_path: &str) -> String {
        format!("{}:{}", self.destination(), remote_path)
    }
}

/// SSH launcher that wraps another launcher for remote execution
#[derive(Debug, Clone)]
pub struct SshLauncher<L> {
    inner: L,
    config: SshConfig,
}

impl<L> SshLauncher<L> {
    /// Create a new SSH launcher wrapping the given inner launcher
    pub fn new(inner: L, config: SshConfig) -> Self {
        Self { inner, config }
    }

    /// Connection configuration
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// The wrapped launcher
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L> Launcher for SshLauncher<L>
where
    L: Launcher,
{
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        let ssh_cmd = self.config.wrap(&command);

        let result = self
            .inner
            .execute(ssh_cmd)
            .await
            .map_err(|e| e.with_layer_context("SSH"))?;

        if result.status.code == Some(SSH_CLIENT_FAILURE) {
            return Err(Error::SshConnectionFailed {
                host: self.config.host.clone(),
                reason: result.output_tail(3),
            });
        }

        Ok(result)
    }

    fn description(&self) -> String {
        format!("SSH to {}", self.config.destination())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config() {
        let config = SshConfig::new("example.com")
            .with_user("alice")
            .with_port(2222)
            .with_identity_file("/home/alice/.ssh/id_ed25519");

        assert_eq!(config.destination(), "alice@example.com");
        assert_eq!(config.port, Some(2222));
    }

    #[test]
    fn test_wrap_quotes_remote_command() {
        let config = SshConfig::new("10.0.0.5").with_user("ubuntu").with_port(2222);
        let mut cmd = Command::new("ls");
        cmd.arg("-la").arg("/opt/my app");

        let wrapped = config.wrap(&cmd);
        let args: Vec<String> = wrapped
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(wrapped.get_program(), "ssh");
        assert_eq!(&args[..2], ["-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "ubuntu@10.0.0.5");
        assert_eq!(args[args.len() - 1], "ls -la '/opt/my app'");
    }

    #[test]
    fn test_upload_command_uses_capital_port_flag() {
        let config = SshConfig::new("host")
            .with_port(2200)
            .with_identity_file("/keys/deploy.pem");
        let cmd = config.upload_command(Path::new("/tmp/a.tar.gz"), "/tmp/remote.tar.gz");
        let line = cmd.to_shell_string();

        assert!(line.starts_with("scp -q -P 2200 -i /keys/deploy.pem"));
        assert!(line.ends_with("/tmp/a.tar.gz host:/tmp/remote.tar.gz"));
    }

    #[test]
    fn test_missing_identity_is_reported() {
        let config = SshConfig::new("host").with_identity_file("/definitely/not/here.pem");
        assert!(matches!(
            config.check_identity(),
            Err(Error::SshKeyNotFound { .. })
        ));
    }
}
