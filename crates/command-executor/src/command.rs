//! Command type for building executable commands

use async_process::Command as AsyncCommand;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// A command to be executed
///
/// This is a builder for creating commands that can be converted to `async_process::Command`
/// when needed. Unlike `AsyncCommand`, this type is `Clone` and can be reused multiple times,
/// which lets launchers rewrite it (prefixing `sudo`, wrapping in `ssh`) before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program to execute
    program: OsString,
    /// The arguments to pass to the program
    args: Vec<OsString>,
    /// Environment variables to set
    env: BTreeMap<OsString, OsString>,
    /// Working directory for the command
    current_dir: Option<PathBuf>,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    /// Create a command that runs `script` through `sh -c`
    ///
    /// Remote checks are often easier to express as a short shell pipeline
    /// (`test -d /opt/app && stat -c %U /opt/app`); the script is passed as a
    /// single argument so it survives SSH quoting intact.
    pub fn shell(script: impl AsRef<str>) -> Self {
        let mut cmd = Self::new("sh");
        cmd.arg("-c").arg(script.as_ref());
        cmd
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<std::path::Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Get the environment variables
    pub fn get_envs(&self) -> &BTreeMap<OsString, OsString> {
        &self.env
    }

    /// Get the current directory
    pub fn get_current_dir(&self) -> Option<&std::path::Path> {
        self.current_dir.as_deref()
    }

    /// Render the program and arguments as a single shell-escaped line
    pub fn to_shell_string(&self) -> String {
        crate::shell::command_to_shell_string(self)
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);

        cmd.args(&self.args);

        for (key, val) in &self.env {
            cmd.env(key, val);
        }

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Builder pattern helper
impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: AsRef<OsStr>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for more ergonomic command construction
#[derive(Debug)]
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.0.env(key, val);
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<std::path::Path>>(mut self, dir: P) -> Self {
        self.0.current_dir(dir);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_with_args() {
        let mut cmd = Command::new("ls");
        cmd.arg("-la").arg("/tmp");

        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[0], "-la");
        assert_eq!(cmd.get_args()[1], "/tmp");
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::builder("echo")
            .arg("hello")
            .arg("world")
            .env("TEST_VAR", "test_value")
            .current_dir("/tmp")
            .build();

        assert_eq!(cmd.get_program(), "echo");
        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(
            cmd.get_envs().get(OsStr::new("TEST_VAR")),
            Some(&OsString::from("test_value"))
        );
        assert_eq!(cmd.get_current_dir(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_shell_command_keeps_script_as_one_argument() {
        let cmd = Command::shell("test -d /opt/app && echo yes");

        assert_eq!(cmd.get_program(), "sh");
        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[1], "test -d /opt/app && echo yes");
        assert_eq!(cmd.to_string(), "sh -c 'test -d /opt/app && echo yes'");
    }
}
