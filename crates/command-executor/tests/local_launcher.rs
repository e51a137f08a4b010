//! Integration tests for local launcher

use command_executor::{Command, Error, Launcher, backends::LocalLauncher};
use std::time::{Duration, Instant};

#[smol_potat::test]
async fn test_local_launcher_captures_stdout() {
    let launcher = LocalLauncher::new();
    let mut command = Command::new("echo");
    command.arg("hello world");

    let result = launcher.execute(command).await.unwrap();

    assert!(result.success());
    assert_eq!(result.stdout_trimmed(), "hello world");
}

#[smol_potat::test]
async fn test_local_launcher_reports_non_zero_exit_as_status() {
    let launcher = LocalLauncher::new();
    let command = Command::shell("echo boom >&2; exit 3");

    let result = launcher.execute(command).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.status.code, Some(3));
    assert_eq!(result.stderr.trim(), "boom");
}

#[smol_potat::test]
async fn test_local_launcher_applies_env_and_dir() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = LocalLauncher::new();
    let command = Command::builder("sh")
        .arg("-c")
        .arg("echo \"$GREETING\" && pwd")
        .env("GREETING", "hi")
        .current_dir(dir.path())
        .build();

    let result = launcher.execute(command).await.unwrap();
    let lines: Vec<&str> = result.stdout.lines().collect();

    assert_eq!(lines[0], "hi");
    assert!(lines[1].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
}

#[smol_potat::test]
async fn test_missing_program_is_spawn_failure() {
    let launcher = LocalLauncher::new();
    let err = launcher
        .execute(Command::new("definitely-not-a-real-binary-4711"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SpawnFailed { .. }));
    assert!(err.to_string().contains("command not found"));
}

#[smol_potat::test]
async fn test_operation_timeout_kills_command() {
    let launcher = LocalLauncher::new().with_timeout(Duration::from_millis(200));
    let start = Instant::now();

    let err = launcher
        .execute(Command::builder("sleep").arg("5").build())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TimedOut { .. }));
    assert!(start.elapsed() < Duration::from_secs(3));
}
