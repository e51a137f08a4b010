//! Process exit types

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status of a process that exited with `code`
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        self.signal.is_some()
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Result of executing a command to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitResult {
    /// Exit status
    pub status: ExitStatus,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExitResult {
    /// Build a result from an exit code and captured output
    pub fn new(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::from_code(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Standard output with surrounding whitespace removed
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Last `lines` lines of combined output, for error messages
    pub fn output_tail(&self, lines: usize) -> String {
        let combined: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|line| !line.trim().is_empty())
            .collect();
        let start = combined.len().saturating_sub(lines);
        combined[start..].join("\n")
    }
}
