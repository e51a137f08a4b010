//! Shared fixtures for deploy-orchestration integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use command_executor::{Command, ExitResult};
use deploy_orchestration::RemoteHost;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Successful result with `stdout`
pub fn ok(stdout: &str) -> ExitResult {
    ExitResult::new(0, stdout, "")
}

/// Failed result with `stderr`
pub fn fail(code: i32, stderr: &str) -> ExitResult {
    ExitResult::new(code, "", stderr)
}

struct Rule {
    pattern: String,
    responses: VecDeque<ExitResult>,
}

impl Rule {
    fn next(&mut self) -> ExitResult {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_else(|| ok(""))
        } else {
            self.responses.front().cloned().unwrap_or_else(|| ok(""))
        }
    }
}

/// A file uploaded to the host
#[derive(Debug, Clone)]
pub struct Upload {
    pub remote_path: String,
    pub contents: Vec<u8>,
}

/// A mirror call, with the files present in the local dir at call time
#[derive(Debug, Clone)]
pub struct Mirror {
    pub remote_dir: String,
    pub files: Vec<PathBuf>,
}

/// In-memory host answering commands from substring rules
///
/// The first rule whose pattern occurs in the command text answers. Each rule
/// hands out its queued results in order and keeps repeating the last one.
/// Unmatched commands succeed with empty output. Privileged commands are
/// logged with a `sudo -n ` prefix.
pub struct ScriptedHost {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Upload>>,
    mirrors: Mutex<Vec<Mirror>>,
    mirror_supported: bool,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            mirrors: Mutex::new(Vec::new()),
            mirror_supported: false,
        }
    }

    pub fn with_mirror(mut self) -> Self {
        self.mirror_supported = true;
        self
    }

    /// Answer commands containing `pattern` with `responses`, in order
    pub fn respond(self, pattern: &str, responses: Vec<ExitResult>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: responses.into(),
        });
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn mirrors(&self) -> Vec<Mirror> {
        self.mirrors.lock().unwrap().clone()
    }

    fn answer(&self, line: String) -> ExitResult {
        let result = self
            .rules
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| line.contains(&r.pattern))
            .map(|r| r.next())
            .unwrap_or_else(|| ok(""));
        self.log.lock().unwrap().push(line);
        result
    }
}

/// Command text as a human would type it; `sh -c` scripts are shown bare
pub fn describe(command: &Command) -> String {
    let args = command.get_args();
    if command.get_program() == "sh" && args.len() == 2 && args[0] == "-c" {
        return args[1].to_string_lossy().into_owned();
    }
    command.to_shell_string()
}

/// Relative paths of all regular files under `root`, sorted
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

/// Write `files` (relative path, contents) under a fresh temp dir
pub fn source_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    dir
}

#[async_trait]
impl RemoteHost for ScriptedHost {
    fn address(&self) -> &str {
        "scripted.test"
    }

    async fn run(&self, command: Command) -> command_executor::Result<ExitResult> {
        Ok(self.answer(describe(&command)))
    }

    async fn run_privileged(&self, command: Command) -> command_executor::Result<ExitResult> {
        Ok(self.answer(format!("sudo -n {}", describe(&command))))
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> command_executor::Result<ExitResult> {
        self.uploads.lock().unwrap().push(Upload {
            remote_path: remote_path.to_string(),
            contents: fs::read(local)?,
        });
        Ok(self.answer(format!("scp {} {}", local.display(), remote_path)))
    }

    async fn mirror(
        &self,
        local_dir: &Path,
        remote_dir: &str,
    ) -> command_executor::Result<ExitResult> {
        self.mirrors.lock().unwrap().push(Mirror {
            remote_dir: remote_dir.to_string(),
            files: list_files(local_dir),
        });
        Ok(self.answer(format!("rsync {}/ {}/", local_dir.display(), remote_dir)))
    }

    async fn mirror_supported(&self) -> bool {
        self.mirror_supported
    }
}
