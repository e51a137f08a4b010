//! The six standard pipeline stages.

use crate::orchestrator::{DeploymentStep, RunContext, Stage, StepReport};
use crate::{
    BootstrapPlan, ConfigSchema, EnvironmentConfigurator, ExclusionManifest, FileSynchronizer,
    HealthSettings, HealthVerifier, RemoteBootstrapper, RemoteHost, RemoteHttpProbe,
    RemoteLayout, Result, ServiceDefinition, ServiceManager, UnitChange, ValueSource,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const JOURNAL_LINES: u32 = 20;

async fn journal_tail(host: &dyn RemoteHost, manager: &ServiceManager) -> Option<String> {
    match manager.journal(host, JOURNAL_LINES).await {
        Ok(lines) if !lines.trim().is_empty() => Some(format!(
            "Last {} journal lines of {}:\n{}",
            JOURNAL_LINES,
            manager.definition().name,
            lines
        )),
        Ok(_) => None,
        Err(e) => {
            warn!("Could not read journal: {}", e);
            None
        }
    }
}

/// Mirrors the source tree into the install directory
pub struct SyncStage {
    host: Arc<dyn RemoteHost>,
    synchronizer: FileSynchronizer,
    source_root: PathBuf,
}

impl SyncStage {
    /// Stage syncing `source_root` filtered by `manifest`
    pub fn new(
        host: Arc<dyn RemoteHost>,
        manifest: ExclusionManifest,
        layout: RemoteLayout,
        source_root: PathBuf,
    ) -> Self {
        Self {
            host,
            synchronizer: FileSynchronizer::new(manifest, layout),
            source_root,
        }
    }
}

#[async_trait]
impl Stage for SyncStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::Sync
    }

    async fn run(&self, _ctx: &mut RunContext) -> Result<StepReport> {
        let report = self
            .synchronizer
            .sync(self.host.as_ref(), &self.source_root)
            .await?;
        Ok(StepReport::new(format!(
            "{} files to {} ({})",
            report.files, report.install_dir, report.strategy
        )))
    }
}

/// Prepares packages, account and directories
pub struct BootstrapStage {
    host: Arc<dyn RemoteHost>,
    bootstrapper: RemoteBootstrapper,
}

impl BootstrapStage {
    /// Stage ensuring `plan` on the host
    pub fn new(host: Arc<dyn RemoteHost>, plan: BootstrapPlan, layout: RemoteLayout) -> Self {
        Self {
            host,
            bootstrapper: RemoteBootstrapper::new(plan, layout),
        }
    }
}

#[async_trait]
impl Stage for BootstrapStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::Bootstrap
    }

    async fn run(&self, _ctx: &mut RunContext) -> Result<StepReport> {
        let report = self.bootstrapper.ensure(self.host.as_ref()).await?;
        let summary = if report.is_noop() {
            "already bootstrapped".to_string()
        } else {
            let names: Vec<&str> = report
                .mutations()
                .iter()
                .map(|a| a.name.as_str())
                .collect();
            format!("changed {}", names.join(", "))
        };
        Ok(StepReport::new(summary))
    }
}

/// Writes the environment file and shares it with later stages
pub struct ConfigureStage {
    host: Arc<dyn RemoteHost>,
    configurator: EnvironmentConfigurator,
    overrides: BTreeMap<String, String>,
}

impl ConfigureStage {
    /// Stage materializing `schema` with `overrides`
    pub fn new(
        host: Arc<dyn RemoteHost>,
        schema: ConfigSchema,
        layout: RemoteLayout,
        overrides: BTreeMap<String, String>,
    ) -> Self {
        Self {
            host,
            configurator: EnvironmentConfigurator::new(schema, layout),
            overrides,
        }
    }
}

#[async_trait]
impl Stage for ConfigureStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::Configure
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<StepReport> {
        let config = self
            .configurator
            .materialize(self.host.as_ref(), &self.overrides)
            .await?;
        let kept = config
            .entries()
            .iter()
            .filter(|e| e.source == ValueSource::Existing)
            .count();
        let summary = format!(
            "{} settings ({} kept from the host)",
            config.entries().len(),
            kept
        );
        ctx.runtime_config = Some(config);
        Ok(StepReport::new(summary))
    }
}

/// Installs the supervisor unit
pub struct InstallServiceStage {
    host: Arc<dyn RemoteHost>,
    manager: ServiceManager,
}

impl InstallServiceStage {
    /// Stage installing `definition`
    pub fn new(host: Arc<dyn RemoteHost>, definition: ServiceDefinition) -> Self {
        Self {
            host,
            manager: ServiceManager::new(definition),
        }
    }
}

#[async_trait]
impl Stage for InstallServiceStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::InstallService
    }

    async fn run(&self, _ctx: &mut RunContext) -> Result<StepReport> {
        let change = self.manager.install(self.host.as_ref()).await?;
        let what = match change {
            UnitChange::Created => "created",
            UnitChange::Updated => "updated",
            UnitChange::Unchanged => "unchanged",
        };
        Ok(StepReport::new(format!(
            "{} {}",
            self.manager.definition().unit_path(),
            what
        )))
    }
}

/// Enables the unit on boot and restarts it
pub struct RestartStage {
    host: Arc<dyn RemoteHost>,
    manager: ServiceManager,
}

impl RestartStage {
    /// Stage restarting `definition`
    pub fn new(host: Arc<dyn RemoteHost>, definition: ServiceDefinition) -> Self {
        Self {
            host,
            manager: ServiceManager::new(definition),
        }
    }
}

#[async_trait]
impl Stage for RestartStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::Restart
    }

    async fn run(&self, _ctx: &mut RunContext) -> Result<StepReport> {
        let host = self.host.as_ref();
        let enabled = self.manager.enable_on_boot(host).await?;
        let state = self.manager.restart(host).await?;
        let mut summary = format!("{} is {}", self.manager.definition().name, state);
        if enabled {
            summary.push_str(", enabled on boot");
        }
        Ok(StepReport::new(summary))
    }

    async fn diagnose(&self) -> Option<String> {
        journal_tail(self.host.as_ref(), &self.manager).await
    }
}

/// Polls the liveness endpoint
pub struct VerifyStage {
    host: Arc<dyn RemoteHost>,
    settings: HealthSettings,
    manager: ServiceManager,
}

impl VerifyStage {
    /// Stage verifying the service of `definition`
    pub fn new(
        host: Arc<dyn RemoteHost>,
        settings: HealthSettings,
        definition: ServiceDefinition,
    ) -> Self {
        Self {
            host,
            settings,
            manager: ServiceManager::new(definition),
        }
    }
}

#[async_trait]
impl Stage for VerifyStage {
    fn step(&self) -> DeploymentStep {
        DeploymentStep::Verify
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<StepReport> {
        let port = ctx
            .runtime_config
            .as_ref()
            .and_then(|c| c.get("PORT"))
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.settings.default_port);

        let probe = RemoteHttpProbe::new(Arc::clone(&self.host), port, &self.settings.path);
        let snapshot = HealthVerifier::from_settings(&self.settings)
            .verify(&probe)
            .await?;
        let summary = format!(
            "{} with {} active meetings",
            snapshot.status, snapshot.active_meetings
        );
        ctx.health = Some(snapshot);
        Ok(StepReport::new(summary))
    }

    async fn diagnose(&self) -> Option<String> {
        journal_tail(self.host.as_ref(), &self.manager).await
    }
}
