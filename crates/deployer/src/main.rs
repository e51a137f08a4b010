//! `deployer`: push a service to a remote host and keep it running.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod commands;

use commands::TargetArgs;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Deploy a long-running service to a remote host over SSH")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "deploy.yaml")]
    config: PathBuf,

    /// Log individual remote commands
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync, bootstrap, configure, install, restart and verify
    Deploy {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the supervisor state of the service
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format (table or json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Restart the service and wait for it to report healthy
    Restart {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Poll the liveness endpoint until healthy or timed out
    Health {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show recent service log output
    Logs {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of journal lines
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: u32,
    },

    /// Show what a deploy would ship, without contacting the host
    Plan,

    /// Validate configuration file
    Validate {
        /// Strict mode - fail on unresolved environment variables
        #[arg(short, long)]
        strict: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .init();
}

fn main() -> Result<()> {
    smol::block_on(async {
        let cli = Cli::parse();
        init_logging(cli.verbose);

        match cli.command {
            Commands::Deploy { target } => commands::deploy::run(&cli.config, target).await,
            Commands::Status { target, format } => {
                commands::status::run(&cli.config, target, format).await
            }
            Commands::Restart { target } => commands::restart::run(&cli.config, target).await,
            Commands::Health { target } => commands::health::run(&cli.config, target).await,
            Commands::Logs { target, lines } => {
                commands::logs::run(&cli.config, target, lines).await
            }
            Commands::Plan => commands::plan::run(&cli.config).await,
            Commands::Validate { strict } => commands::validate::run(&cli.config, strict).await,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_takes_address_and_key() {
        let cli = Cli::try_parse_from([
            "deployer",
            "deploy",
            "203.0.113.10",
            "--key",
            "/home/ops/.ssh/deploy.pem",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("deploy.yaml"));
        match cli.command {
            Commands::Deploy { target } => {
                assert_eq!(target.address.as_deref(), Some("203.0.113.10"));
                assert_eq!(
                    target.key,
                    Some(PathBuf::from("/home/ops/.ssh/deploy.pem"))
                );
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "deployer",
            "logs",
            "host.internal",
            "-k",
            "id.pem",
            "-n",
            "200",
            "--config",
            "staging.yaml",
            "--verbose",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("staging.yaml"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Logs { lines: 200, .. }));
    }

    #[test]
    fn test_offline_commands_need_no_target() {
        let cli = Cli::try_parse_from(["deployer", "validate", "--strict"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { strict: true }));

        let cli = Cli::try_parse_from(["deployer", "plan"]).unwrap();
        assert!(matches!(cli.command, Commands::Plan));
    }
}
