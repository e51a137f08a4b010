//! Invocation checks against the built binary

use std::process::{Command, Output};

fn deployer(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_deployer"))
        .args(args)
        .env_remove("DEPLOY_HOST")
        .env_remove("DEPLOY_KEY")
        .output()
        .unwrap()
}

#[test]
fn test_missing_target_prints_usage_before_reading_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("deploy.yaml");
    std::fs::write(&config, "service: [unclosed").unwrap();
    let config = config.to_str().unwrap();

    for command in ["deploy", "status", "restart", "health", "logs"] {
        let output = deployer(&["--config", config, command]);
        let stderr = String::from_utf8_lossy(&output.stderr);

        assert_eq!(output.status.code(), Some(1), "{command}: {stderr}");
        assert!(stderr.contains("Usage: deployer"), "{command}: {stderr}");
        assert!(stderr.contains("DEPLOY_KEY"), "{command}: {stderr}");
        assert!(!stderr.contains("configuration"), "{command}: {stderr}");
    }
}

#[test]
fn test_missing_key_alone_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("deploy.yaml");
    let output = deployer(&["--config", config.to_str().unwrap(), "deploy", "203.0.113.10"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("missing SSH key"), "{stderr}");
    assert!(!stderr.contains("missing target address"), "{stderr}");
}
