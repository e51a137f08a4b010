//! Launcher trait for executing commands in different contexts

use crate::command::Command;
use crate::error::Result;
use crate::process::ExitResult;
use async_trait::async_trait;

/// A launcher that can execute commands in a specific context
///
/// Launchers are composable: wrapping launchers ([`crate::backends::SshLauncher`],
/// [`crate::backends::SudoLauncher`]) rewrite the incoming command and delegate
/// to their inner launcher, which ultimately spawns a local process.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Execute a command and wait for it to complete, capturing output
    ///
    /// A non-zero exit is reported through [`ExitResult::status`], not as an
    /// error. Errors mean the command could not be run to completion at all.
    async fn execute(&self, command: Command) -> Result<ExitResult>;

    /// Short description of this launcher for logs
    fn description(&self) -> String;
}

#[async_trait]
impl<L: Launcher + ?Sized> Launcher for Box<L> {
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        (**self).execute(command).await
    }

    fn description(&self) -> String {
        (**self).description()
    }
}

#[async_trait]
impl<L: Launcher + ?Sized> Launcher for std::sync::Arc<L> {
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        (**self).execute(command).await
    }

    fn description(&self) -> String {
        (**self).description()
    }
}
