//! Sequencing of the deployment stages into one run.

use crate::stages::{
    BootstrapStage, ConfigureStage, InstallServiceStage, RestartStage, SyncStage, VerifyStage,
};
use crate::{
    BootstrapPlan, ConfigSchema, Error, ExclusionManifest, HealthSettings, HealthSnapshot,
    RemoteHost, RemoteLayout, Result, RuntimeConfig, ServiceDefinition,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// The steps of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeploymentStep {
    /// File synchronization
    Sync,
    /// Host preparation
    Bootstrap,
    /// Environment file
    Configure,
    /// Supervisor unit
    InstallService,
    /// Service restart
    Restart,
    /// Liveness verification
    Verify,
}

impl DeploymentStep {
    /// Every step in order
    pub const ALL: [DeploymentStep; 6] = [
        DeploymentStep::Sync,
        DeploymentStep::Bootstrap,
        DeploymentStep::Configure,
        DeploymentStep::InstallService,
        DeploymentStep::Restart,
        DeploymentStep::Verify,
    ];

    /// State the orchestrator is in while this step runs
    pub fn running_state(&self) -> DeploymentState {
        match self {
            DeploymentStep::Sync => DeploymentState::Syncing,
            DeploymentStep::Bootstrap => DeploymentState::Bootstrapping,
            DeploymentStep::Configure => DeploymentState::Configuring,
            DeploymentStep::InstallService => DeploymentState::InstallingService,
            DeploymentStep::Restart => DeploymentState::Restarting,
            DeploymentStep::Verify => DeploymentState::Verifying,
        }
    }
}

impl fmt::Display for DeploymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStep::Sync => "SYNC",
            DeploymentStep::Bootstrap => "BOOTSTRAP",
            DeploymentStep::Configure => "CONFIGURE",
            DeploymentStep::InstallService => "INSTALL_SERVICE",
            DeploymentStep::Restart => "RESTART",
            DeploymentStep::Verify => "VERIFY",
        };
        f.write_str(s)
    }
}

/// Orchestrator state machine; transitions are forward-only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    /// Not started
    Pending,
    /// Running the sync step
    Syncing,
    /// Running the bootstrap step
    Bootstrapping,
    /// Running the configure step
    Configuring,
    /// Running the install step
    InstallingService,
    /// Running the restart step
    Restarting,
    /// Running the verify step
    Verifying,
    /// Every step succeeded
    Succeeded,
    /// A step failed; later steps were skipped
    Failed,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Pending => "PENDING",
            DeploymentState::Syncing => "SYNCING",
            DeploymentState::Bootstrapping => "BOOTSTRAPPING",
            DeploymentState::Configuring => "CONFIGURING",
            DeploymentState::InstallingService => "INSTALLING_SERVICE",
            DeploymentState::Restarting => "RESTARTING",
            DeploymentState::Verifying => "VERIFYING",
            DeploymentState::Succeeded => "SUCCEEDED",
            DeploymentState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a stage reports on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// One-line human summary
    pub summary: String,
}

impl StepReport {
    /// Report with a summary line
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

/// State handed from one stage to the next
#[derive(Debug, Default)]
pub struct RunContext {
    /// Environment written by the configure stage
    pub runtime_config: Option<RuntimeConfig>,
    /// Snapshot observed by the verify stage
    pub health: Option<HealthSnapshot>,
}

/// One typed step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which step this stage implements
    fn step(&self) -> DeploymentStep;

    /// Perform the step
    async fn run(&self, ctx: &mut RunContext) -> Result<StepReport>;

    /// Extra context gathered after a failure of this stage
    async fn diagnose(&self) -> Option<String> {
        None
    }
}

/// A step that succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedStep {
    /// Step
    pub step: DeploymentStep,
    /// Stage summary
    pub summary: String,
    /// Wall time
    pub duration: Duration,
}

/// The step that stopped the run
#[derive(Debug)]
pub struct FailedStep {
    /// Step
    pub step: DeploymentStep,
    /// Its error
    pub error: Error,
    /// Wall time until the failure
    pub duration: Duration,
}

/// Verdict of one orchestrator run
#[derive(Debug)]
pub struct DeploymentResult {
    /// Steps that completed, in order
    pub succeeded_steps: Vec<CompletedStep>,
    /// The failed step, if any
    pub failed_step: Option<FailedStep>,
    /// Human-readable account of the run and, on failure, what to do next
    pub diagnostics: String,
    /// Health observed by the verify step
    pub final_health: Option<HealthSnapshot>,
}

impl DeploymentResult {
    /// Whether every step succeeded
    pub fn is_success(&self) -> bool {
        self.failed_step.is_none()
    }

    /// Terminal state of the run
    pub fn state(&self) -> DeploymentState {
        if self.is_success() {
            DeploymentState::Succeeded
        } else {
            DeploymentState::Failed
        }
    }

    /// The succeeded steps without their reports
    pub fn succeeded(&self) -> Vec<DeploymentStep> {
        self.succeeded_steps.iter().map(|s| s.step).collect()
    }
}

/// Everything a standard run needs besides the host
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Local source tree
    pub source_root: PathBuf,
    /// Paths never deployed
    pub manifest: ExclusionManifest,
    /// Remote directory layout
    pub layout: RemoteLayout,
    /// Packages and libraries
    pub bootstrap: BootstrapPlan,
    /// Recognized settings
    pub schema: ConfigSchema,
    /// Invoker-supplied setting values
    pub overrides: BTreeMap<String, String>,
    /// Supervisor unit
    pub service: ServiceDefinition,
    /// Liveness polling
    pub health: HealthSettings,
}

impl DeploymentPlan {
    /// Plan with conventional defaults for a service named `name`
    pub fn new(
        source_root: impl Into<PathBuf>,
        name: &str,
        executable: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        let layout = RemoteLayout::for_service(name);
        Self {
            source_root: source_root.into(),
            manifest: ExclusionManifest::default(),
            bootstrap: BootstrapPlan::default(),
            schema: ConfigSchema::default(),
            overrides: BTreeMap::new(),
            service: ServiceDefinition::for_layout(name, executable, args, &layout),
            health: HealthSettings::default(),
            layout,
        }
    }
}

/// Runs stages in step order, stopping at the first failure
pub struct DeploymentOrchestrator {
    stages: Vec<Box<dyn Stage>>,
    state: DeploymentState,
}

impl DeploymentOrchestrator {
    /// Orchestrator over `stages`, which must be in strictly increasing step order
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        for pair in stages.windows(2) {
            if pair[0].step() >= pair[1].step() {
                return Err(Error::Precondition(format!(
                    "stage {} cannot run after {}",
                    pair[1].step(),
                    pair[0].step()
                )));
            }
        }
        Ok(Self {
            stages,
            state: DeploymentState::Pending,
        })
    }

    /// The full six-stage pipeline against `host`
    pub fn standard(host: Arc<dyn RemoteHost>, plan: DeploymentPlan) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(SyncStage::new(
                Arc::clone(&host),
                plan.manifest,
                plan.layout.clone(),
                plan.source_root,
            )),
            Box::new(BootstrapStage::new(
                Arc::clone(&host),
                plan.bootstrap,
                plan.layout.clone(),
            )),
            Box::new(ConfigureStage::new(
                Arc::clone(&host),
                plan.schema,
                plan.layout,
                plan.overrides,
            )),
            Box::new(InstallServiceStage::new(
                Arc::clone(&host),
                plan.service.clone(),
            )),
            Box::new(RestartStage::new(Arc::clone(&host), plan.service.clone())),
            Box::new(VerifyStage::new(host, plan.health, plan.service)),
        ];
        Self {
            stages,
            state: DeploymentState::Pending,
        }
    }

    /// Current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Steps this orchestrator will run
    pub fn steps(&self) -> Vec<DeploymentStep> {
        self.stages.iter().map(|s| s.step()).collect()
    }

    /// Execute the pipeline once
    pub async fn run(&mut self) -> DeploymentResult {
        let mut ctx = RunContext::default();
        let mut succeeded_steps = Vec::new();
        let mut failed_step = None;
        let mut diagnostics = String::new();

        for stage in &self.stages {
            let step = stage.step();
            self.state = step.running_state();
            info!("==> {}", step);
            let started = Instant::now();

            match stage.run(&mut ctx).await {
                Ok(report) => {
                    let duration = started.elapsed();
                    info!("{} done in {:.1?}: {}", step, duration, report.summary);
                    diagnostics.push_str(&format!("{}: {}\n", step, report.summary));
                    succeeded_steps.push(CompletedStep {
                        step,
                        summary: report.summary,
                        duration,
                    });
                }
                Err(error) => {
                    let duration = started.elapsed();
                    error!("{} failed: {}", step, error);
                    diagnostics.push_str(&format!("{} failed: {}\n", step, error));
                    diagnostics.push_str(&format!("Hint: {}\n", remediation(&error)));
                    if let Some(extra) = stage.diagnose().await {
                        diagnostics.push_str(&extra);
                        if !extra.ends_with('\n') {
                            diagnostics.push('\n');
                        }
                    }
                    failed_step = Some(FailedStep {
                        step,
                        error,
                        duration,
                    });
                    break;
                }
            }
        }

        self.state = if failed_step.is_some() {
            DeploymentState::Failed
        } else {
            DeploymentState::Succeeded
        };
        info!("Deployment {}", self.state);

        DeploymentResult {
            succeeded_steps,
            failed_step,
            diagnostics,
            final_health: ctx.health,
        }
    }
}

fn remediation(error: &Error) -> &'static str {
    match error {
        Error::Precondition(_) => {
            "check the target address, the key file and passwordless sudo for the login user"
        }
        Error::Transfer { .. } => {
            "check connectivity and free disk space on the target; the live install directory was not modified before verification"
        }
        Error::Bootstrap { .. } => {
            "fix the package manager problem shown above on the host, then re-run"
        }
        Error::MissingSettings(_) => {
            "set the missing keys under `settings` in deploy.yaml or in the environment, then re-run"
        }
        Error::Config(_) => "check that the env file location is writable, then re-run",
        Error::Service { .. } => "inspect the service journal below, fix the cause and re-run",
        Error::HealthCheck { .. } => {
            "the service was started but never reported healthy; inspect the journal below"
        }
        Error::Channel(_) => "the remote channel failed; check SSH reachability and re-run",
        Error::Io(_) => "a local IO operation failed; check the source directory and temp space",
    }
}
