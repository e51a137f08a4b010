//! Launcher backends: local processes, SSH wrapping and sudo wrapping

pub mod local;
pub mod ssh;
pub mod sudo;

pub use local::LocalLauncher;
pub use ssh::{SshConfig, SshLauncher};
pub use sudo::SudoLauncher;
