//! # Deploy Configuration
//!
//! Parser for `deploy.yaml`, the optional file describing what the deployer
//! ships and how the service runs on the target.
//!
//! Every section is optional; an absent file yields the conventional layout
//! for a Node.js worker named `worker`.
//!
//! ```yaml
//! version: "1.0"
//! service:
//!   name: meeting-worker
//!   executable: /usr/bin/node
//!   args: ["server.js"]
//! source:
//!   root: .
//!   also_exclude: ["/scripts"]
//! settings:
//!   UPSTREAM_API_URL: "${UPSTREAM_API_URL:-https://api.example.com}"
//!   CREDENTIAL_KEY: "${CREDENTIAL_KEY}"
//! health:
//!   timeout_secs: 90
//! ```

#![warn(missing_docs)]

use deploy_orchestration::{
    BootstrapPlan, ChannelOptions, ConfigSchema, DeploymentPlan, ExclusionManifest,
    HealthSettings, LibraryRequirement, RemoteLayout, ResourceLimits, RestartPolicy,
    RuntimeRequirement, ServiceDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod parser;
pub mod resolver;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: String,

    /// The supervised service
    #[serde(default)]
    pub service: ServiceSection,

    /// Remote directory overrides
    #[serde(default)]
    pub layout: LayoutSection,

    /// What gets deployed
    #[serde(default)]
    pub source: SourceSection,

    /// Values for environment file settings; may reference `${VAR}`
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Supervisor limits and restart behaviour
    #[serde(default)]
    pub limits: LimitsSection,

    /// Liveness polling
    #[serde(default)]
    pub health: HealthSection,

    /// SSH channel
    #[serde(default)]
    pub ssh: SshSection,

    /// Host prerequisites
    #[serde(default)]
    pub bootstrap: BootstrapSection,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            service: ServiceSection::default(),
            layout: LayoutSection::default(),
            source: SourceSection::default(),
            settings: BTreeMap::new(),
            limits: LimitsSection::default(),
            health: HealthSection::default(),
            ssh: SshSection::default(),
            bootstrap: BootstrapSection::default(),
        }
    }
}

/// The supervised service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Unit name; also the default service account and directory name
    #[serde(default = "default_name")]
    pub name: String,
    /// Executable entry point
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Arguments
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Unit description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Service account, when it differs from the name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

fn default_name() -> String {
    "worker".to_string()
}

fn default_executable() -> String {
    "/usr/bin/node".to_string()
}

fn default_args() -> Vec<String> {
    vec!["server.js".to_string()]
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            executable: default_executable(),
            args: default_args(),
            description: None,
            user: None,
        }
    }
}

/// Overrides of the conventional remote layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSection {
    /// Install directory (default `/opt/<name>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
    /// Log directory (default `/var/log/<name>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    /// Screenshot directory (default `<log_dir>/screenshots`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<String>,
    /// Env file (default `<install_dir>/.env`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    /// Staging directory (default `<install_dir>.staging`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
}

/// What gets deployed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source tree, relative to the config file
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Exclusion patterns; replaces the built-in list when given
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    /// Patterns appended to `exclude`
    #[serde(default)]
    pub also_exclude: Vec<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_exclude() -> Vec<String> {
    ExclusionManifest::default_patterns().patterns().to_vec()
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            exclude: default_exclude(),
            also_exclude: Vec::new(),
        }
    }
}

/// Supervisor limits and restart behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// `MemoryMax=` value
    pub memory_max: String,
    /// Open file limit
    pub nofile: u64,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Seconds between automatic restarts
    pub restart_sec: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            memory_max: limits.memory_max,
            nofile: limits.nofile,
            restart: RestartPolicy::OnFailure,
            restart_sec: 10,
        }
    }
}

/// Liveness polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Overall deadline in seconds
    pub timeout_secs: u64,
    /// Seconds between attempts
    pub poll_interval_secs: u64,
    /// Endpoint path
    pub path: String,
    /// Port probed when the env file has no `PORT`
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        let settings = HealthSettings::default();
        Self {
            timeout_secs: settings.timeout.as_secs(),
            poll_interval_secs: settings.poll_interval.as_secs(),
            path: settings.path,
            port: settings.default_port,
        }
    }
}

/// SSH channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    /// Login user
    pub user: String,
    /// Port, when not 22
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Extra `-o` options
    pub options: Vec<String>,
    /// Upper bound for any single remote operation, in seconds
    pub operation_timeout_secs: u64,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            port: None,
            options: Vec::new(),
            operation_timeout_secs: ChannelOptions::default().operation_timeout.as_secs(),
        }
    }
}

/// Host prerequisites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSection {
    /// Runtime engine
    pub runtime: RuntimeRequirement,
    /// Shared libraries
    pub libraries: Vec<LibraryRequirement>,
}

impl Default for BootstrapSection {
    fn default() -> Self {
        let plan = BootstrapPlan::default();
        Self {
            runtime: plan.runtime,
            libraries: plan.libraries,
        }
    }
}

impl Config {
    /// Remote layout with overrides applied
    pub fn layout(&self) -> RemoteLayout {
        let mut layout = RemoteLayout::for_service(&self.service.name);
        if let Some(user) = &self.service.user {
            layout.service_user = user.clone();
        }
        let l = &self.layout;
        if let Some(dir) = &l.install_dir {
            layout.install_dir = dir.clone();
            layout.env_file = format!("{}/.env", dir.trim_end_matches('/'));
            layout.staging_dir = format!("{}.staging", dir.trim_end_matches('/'));
        }
        if let Some(dir) = &l.log_dir {
            layout.log_dir = dir.clone();
            layout.screenshot_dir = format!("{}/screenshots", dir.trim_end_matches('/'));
        }
        if let Some(dir) = &l.screenshot_dir {
            layout.screenshot_dir = dir.clone();
        }
        if let Some(file) = &l.env_file {
            layout.env_file = file.clone();
        }
        if let Some(dir) = &l.staging_dir {
            layout.staging_dir = dir.clone();
        }
        layout
    }

    /// Exclusion manifest from `source.exclude` and `source.also_exclude`
    pub fn manifest(&self) -> Result<ExclusionManifest> {
        ExclusionManifest::new(&self.source.exclude)
            .and_then(|m| m.with_patterns(&self.source.also_exclude))
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Supervisor unit definition for `layout`
    pub fn service_definition(&self, layout: &RemoteLayout) -> ServiceDefinition {
        let mut definition = ServiceDefinition::for_layout(
            &self.service.name,
            &self.service.executable,
            self.service.args.clone(),
            layout,
        );
        if let Some(description) = &self.service.description {
            definition.description = description.clone();
        }
        definition.restart = self.limits.restart;
        definition.restart_sec = self.limits.restart_sec;
        definition.limits = ResourceLimits {
            memory_max: self.limits.memory_max.clone(),
            nofile: self.limits.nofile,
        };
        definition
    }

    /// Health polling settings
    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            timeout: Duration::from_secs(self.health.timeout_secs),
            poll_interval: Duration::from_secs(self.health.poll_interval_secs),
            path: self.health.path.clone(),
            default_port: self.health.port,
        }
    }

    /// SSH channel options
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            ssh_options: self.ssh.options.clone(),
            operation_timeout: Duration::from_secs(self.ssh.operation_timeout_secs),
        }
    }

    /// Source root, resolved against the directory holding the config file
    pub fn source_root(&self, base_dir: &Path) -> PathBuf {
        if self.source.root.is_absolute() {
            self.source.root.clone()
        } else {
            base_dir.join(&self.source.root)
        }
    }

    /// Build the deployment plan, with settings resolved from `context`
    ///
    /// Settings whose `${VAR}` cannot be resolved are left out, so the env
    /// file merge decides whether they are really missing.
    pub fn to_plan(
        &self,
        base_dir: &Path,
        context: &resolver::ResolutionContext,
    ) -> Result<DeploymentPlan> {
        let layout = self.layout();
        let resolution = resolver::resolve_settings(&self.settings, context);
        Ok(DeploymentPlan {
            source_root: self.source_root(base_dir),
            manifest: self.manifest()?,
            bootstrap: BootstrapPlan {
                runtime: self.bootstrap.runtime.clone(),
                libraries: self.bootstrap.libraries.clone(),
            },
            schema: ConfigSchema::worker_defaults(),
            overrides: resolution.values,
            service: self.service_definition(&layout),
            health: self.health_settings(),
            layout,
        })
    }
}
