//! Shell quoting helpers used when a command crosses a shell boundary (SSH).

use crate::Command;

/// Escape a string for safe inclusion in a POSIX shell command line
///
/// Strings made only of characters that no shell treats specially are passed
/// through untouched; everything else is single-quoted, with embedded single
/// quotes closed, escaped and reopened.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Convert a Command to a shell-escaped string
///
/// Environment variables are rendered as leading `KEY=value` assignments and a
/// working directory as a `cd dir &&` prefix, so the resulting line reproduces
/// the command faithfully when handed to a remote shell.
pub fn command_to_shell_string(command: &Command) -> String {
    let mut line = String::new();

    if let Some(dir) = command.get_current_dir() {
        line.push_str("cd ");
        line.push_str(&shell_escape(&dir.to_string_lossy()));
        line.push_str(" && ");
    }

    for (key, value) in command.get_envs() {
        line.push_str(&format!(
            "{}={} ",
            key.to_string_lossy(),
            shell_escape(&value.to_string_lossy())
        ));
    }

    line.push_str(&shell_escape(&command.get_program().to_string_lossy()));
    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&shell_escape(&arg.to_string_lossy()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("with'quote"), "'with'\"'\"'quote'");
        assert_eq!(shell_escape("$variable"), "'$variable'");
        assert_eq!(shell_escape("path/to/file"), "path/to/file");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_command_to_shell_string() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello world").arg("$HOME");
        assert_eq!(command_to_shell_string(&cmd), "echo 'hello world' '$HOME'");
    }

    #[test]
    fn test_env_and_dir_are_rendered() {
        let cmd = Command::builder("node")
            .arg("server.js")
            .env("NODE_ENV", "production")
            .current_dir("/opt/app")
            .build();
        assert_eq!(
            command_to_shell_string(&cmd),
            "cd /opt/app && NODE_ENV=production node server.js"
        );
    }
}
