//! Subcommand implementations

pub mod deploy;
pub mod health;
pub mod logs;
pub mod plan;
pub mod restart;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use clap::Args;
use deploy_config::{Config, parser};
use deploy_orchestration::{DeploymentTarget, RemoteHost, SshHost};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TARGET_USAGE: &str = "\
Usage: deployer <COMMAND> <ADDRESS> --key <PATH>

The target address and SSH key may also be given through the
DEPLOY_HOST and DEPLOY_KEY environment variables.";

/// Where to connect
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target host address
    #[arg(env = "DEPLOY_HOST")]
    pub address: Option<String>,

    /// SSH private key used to log in
    #[arg(short, long, env = "DEPLOY_KEY")]
    pub key: Option<PathBuf>,
}

impl TargetArgs {
    /// Names of the required target inputs that were not supplied
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.address.as_deref().is_none_or(|a| a.trim().is_empty()) {
            missing.push("target address (ADDRESS or DEPLOY_HOST)");
        }
        if self.key.as_deref().is_none_or(|k| k.as_os_str().is_empty()) {
            missing.push("SSH key (--key or DEPLOY_KEY)");
        }
        missing
    }

    /// Usage error for an incomplete target, if any
    pub fn usage_error(&self) -> Option<String> {
        let missing = self.missing();
        if missing.is_empty() {
            return None;
        }
        Some(format!("error: missing {}\n\n{}", missing.join(" and "), TARGET_USAGE))
    }

    /// Exit with a usage message unless both address and key were given
    ///
    /// Called first by every remote command, before the configuration is
    /// read or any connection is attempted.
    pub fn ensure_present(&self) {
        if let Some(message) = self.usage_error() {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    }

    /// Target for `config`, or exit with a usage message if incomplete
    pub fn require(&self, config: &Config) -> DeploymentTarget {
        self.ensure_present();

        let address = self.address.clone().unwrap_or_default();
        let key = self.key.clone().unwrap_or_default();
        let target = DeploymentTarget::new(address, key, &config.ssh.user);
        match config.ssh.port {
            Some(port) => target.with_port(port),
            None => target,
        }
    }
}

/// Load the configuration and the directory relative paths resolve against
pub fn load_config(config_path: &Path) -> Result<(Config, PathBuf)> {
    let config = parser::load(config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    let base_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((config, base_dir))
}

/// Open the SSH channel to `target`
pub fn connect(config: &Config, target: &DeploymentTarget) -> Result<Arc<dyn RemoteHost>> {
    let host = SshHost::connect(target, &config.channel_options())
        .with_context(|| format!("Cannot reach {}", target.address))?;
    Ok(Arc::new(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reports_each_input() {
        let args = TargetArgs {
            address: None,
            key: None,
        };
        assert_eq!(args.missing().len(), 2);

        let args = TargetArgs {
            address: Some("10.0.0.5".into()),
            key: None,
        };
        assert_eq!(args.missing(), vec!["SSH key (--key or DEPLOY_KEY)"]);

        let args = TargetArgs {
            address: Some(" ".into()),
            key: Some(PathBuf::from("id.pem")),
        };
        assert_eq!(args.missing(), vec!["target address (ADDRESS or DEPLOY_HOST)"]);
    }

    #[test]
    fn test_usage_error_names_env_fallbacks() {
        let args = TargetArgs {
            address: None,
            key: Some(PathBuf::from("id.pem")),
        };
        let message = args.usage_error().unwrap();
        assert!(message.starts_with("error: missing target address"));
        assert!(message.contains("Usage: deployer"));
        assert!(message.contains("DEPLOY_HOST"));

        let args = TargetArgs {
            address: Some("10.0.0.5".into()),
            key: Some(PathBuf::from("id.pem")),
        };
        assert!(args.usage_error().is_none());
    }

    #[test]
    fn test_require_applies_ssh_settings() {
        let mut config = Config::default();
        config.ssh.user = "admin".into();
        config.ssh.port = Some(2222);
        let args = TargetArgs {
            address: Some("10.0.0.5".into()),
            key: Some(PathBuf::from("id.pem")),
        };

        let target = args.require(&config);

        assert_eq!(target.address, "10.0.0.5");
        assert_eq!(target.remote_user, "admin");
        assert_eq!(target.port, Some(2222));
        assert_eq!(target.credential.path(), Path::new("id.pem"));
    }

    #[test]
    fn test_load_config_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");

        let (config, base_dir) = load_config(&path).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(base_dir, dir.path());
        assert_eq!(
            load_config(Path::new("deploy.yaml")).map(|(_, b)| b).ok(),
            Some(PathBuf::from("."))
        );
    }
}
