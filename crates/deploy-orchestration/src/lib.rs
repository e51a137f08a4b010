//! # Deploy orchestration
//!
//! Idempotent deployment of a single long-running service to a remote host.
//!
//! A run is a fixed sequence of stages, each of which tolerates whatever state
//! a previous run left behind:
//!
//! 1. **Sync** the source tree, filtered by an [`ExclusionManifest`], into the
//!    install directory ([`FileSynchronizer`]).
//! 2. **Bootstrap** packages, the service account and the directory layout
//!    ([`RemoteBootstrapper`]).
//! 3. **Configure** the environment file from a declared schema
//!    ([`EnvironmentConfigurator`]).
//! 4. **Install** the systemd unit ([`ServiceManager`]).
//! 5. **Restart** the service.
//! 6. **Verify** it through its liveness endpoint ([`HealthVerifier`]).
//!
//! The [`DeploymentOrchestrator`] runs the stages in order, stops at the first
//! failure and returns a [`DeploymentResult`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use deploy_orchestration::{
//!     ChannelOptions, DeploymentOrchestrator, DeploymentPlan, DeploymentTarget, SshHost,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(plan: DeploymentPlan) -> deploy_orchestration::Result<()> {
//! let target = DeploymentTarget::new("203.0.113.10", "/home/me/.ssh/deploy.pem", "ubuntu");
//! let host = Arc::new(SshHost::connect(&target, &ChannelOptions::default())?);
//!
//! let mut orchestrator = DeploymentOrchestrator::standard(host, plan);
//! let result = orchestrator.run().await;
//! println!("{}", result.diagnostics);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod bootstrap;
mod env_config;
mod health;
mod host;
mod manifest;
mod orchestrator;
mod service;
mod stages;
mod sync;
mod target;

pub use bootstrap::{
    ActionOutcome, BootstrapAction, BootstrapPlan, BootstrapReport, LibraryRequirement,
    RemoteBootstrapper, RuntimeRequirement,
};
pub use env_config::{
    ConfigEntry, ConfigSchema, EnvironmentConfigurator, Requirement, RuntimeConfig, SettingSpec,
    ValueSource, is_placeholder, looks_sensitive, merge_settings, parse_env_file,
};
pub use health::{
    HealthProbe, HealthSettings, HealthSnapshot, HealthVerifier, RemoteHttpProbe,
    parse_health_response,
};
pub use host::{ChannelOptions, RemoteHost, SshHost};
pub use manifest::{ExclusionManifest, ExclusionMatcher};
pub use orchestrator::{
    CompletedStep, DeploymentOrchestrator, DeploymentPlan, DeploymentResult, DeploymentState,
    DeploymentStep, FailedStep, RunContext, Stage, StepReport,
};
pub use service::{
    ResourceLimits, RestartPolicy, SandboxFlags, ServiceDefinition, ServiceManager, ServiceState,
    UnitChange,
};
pub use stages::{
    BootstrapStage, ConfigureStage, InstallServiceStage, RestartStage, SyncStage, VerifyStage,
};
pub use sync::{
    ArchiveTransfer, FileSet, FileSynchronizer, IncrementalTransfer, SyncReport, TransferStrategy,
};
pub use target::{Credential, DeploymentTarget, RemoteLayout};

/// Error types for deployment operations
///
/// Every variant except [`Error::Channel`] and [`Error::Io`] corresponds to one
/// failure class of the pipeline; the orchestrator additionally records which
/// step produced it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad or missing target, credential or input; raised before any mutation
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// File synchronization failed
    #[error("Transfer failed during {stage}: {reason}")]
    Transfer {
        /// Sub-step that failed (stage, transfer, verify, promote)
        stage: String,
        /// What went wrong, including the offending path where known
        reason: String,
    },

    /// Remote environment setup failed
    #[error("Bootstrap failed at {action}: {reason}")]
    Bootstrap {
        /// Bootstrap sub-action that failed
        action: String,
        /// Package manager or shell output explaining the failure
        reason: String,
    },

    /// Required settings could not be resolved; lists key names only
    #[error("Missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<String>),

    /// Runtime configuration could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// The supervisor did not bring the service to an active state
    #[error("Service {service} failed: {status}")]
    Service {
        /// Unit name
        service: String,
        /// Supervisor status text
        status: String,
    },

    /// No successful liveness probe within the timeout
    #[error("Health check failed after {attempts} attempts: {last_error}")]
    HealthCheck {
        /// Number of probe attempts made
        attempts: u32,
        /// Raw error of the last attempt
        last_error: String,
    },

    /// Remote channel errors (spawn failure, timeout, SSH connection)
    #[error("Remote channel error: {0}")]
    Channel(#[from] command_executor::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transfer error for a sub-step
    pub fn transfer(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transfer {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Create a bootstrap error for a sub-action
    pub fn bootstrap(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bootstrap {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, Error>;
