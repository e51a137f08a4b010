//! Runtime-agnostic command execution library
//!
//! This crate provides a unified interface for running one-shot commands either
//! on the local machine or on a remote host reached over SSH. Launchers compose
//! as decorators: a [`backends::SudoLauncher`] wrapped by a
//! [`backends::SshLauncher`] wrapped around a [`backends::LocalLauncher`] runs
//! `ssh host 'sudo -n <command>'` through a local child process.
//!
//! ```rust,no_run
//! use command_executor::backends::{LocalLauncher, SshConfig, SshLauncher, SudoLauncher};
//! use command_executor::{Command, Launcher};
//!
//! # async fn example() -> command_executor::Result<()> {
//! let ssh = SshLauncher::new(LocalLauncher::default(), SshConfig::new("10.0.0.5").with_user("ubuntu"));
//! let privileged = SudoLauncher::new(ssh);
//!
//! let result = privileged.execute(Command::builder("systemctl").arg("daemon-reload").build()).await?;
//! assert!(result.success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod launcher;
pub mod process;
pub mod shell;

pub use command::Command;
pub use error::{Error, Result};
pub use launcher::Launcher;
pub use process::{ExitResult, ExitStatus};
