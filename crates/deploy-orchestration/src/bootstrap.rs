//! Idempotent preparation of the target host.
//!
//! Every action checks current state before mutating it, so running the
//! bootstrapper against an already prepared host changes nothing.

use crate::{Error, RemoteHost, RemoteLayout, Result};
use command_executor::shell::shell_escape;
use command_executor::{Command, ExitResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Package manager output that means retrying cannot help
const FATAL_PACKAGE_ERRORS: &[&str] = &[
    "No space left on device",
    "Could not resolve",
    "Failed to fetch",
    "Unable to acquire the dpkg frontend lock",
];

/// The language runtime the service needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRequirement {
    /// Executable whose presence means the runtime is installed
    pub probe: String,
    /// Packages that provide it
    pub packages: Vec<String>,
}

impl Default for RuntimeRequirement {
    fn default() -> Self {
        Self {
            probe: "node".into(),
            packages: vec!["nodejs".into()],
        }
    }
}

/// A shared library package, possibly renamed across OS releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRequirement {
    /// Acceptable package names, preferred first
    pub alternatives: Vec<String>,
    /// Whether the library may be absent without failing the run
    #[serde(default)]
    pub optional: bool,
}

impl LibraryRequirement {
    /// Required library with a single package name
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            alternatives: vec![package.into()],
            optional: false,
        }
    }

    /// Required library satisfied by any of `alternatives`
    pub fn any_of<I, S>(alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            alternatives: alternatives.into_iter().map(Into::into).collect(),
            optional: false,
        }
    }

    /// Mark the library optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn label(&self) -> String {
        self.alternatives.join("|")
    }
}

/// What the bootstrapper ensures on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPlan {
    /// Runtime engine
    pub runtime: RuntimeRequirement,
    /// Libraries the headless browser engine links against
    pub libraries: Vec<LibraryRequirement>,
}

impl BootstrapPlan {
    /// Libraries a headless Chromium needs on Debian and Ubuntu
    pub fn headless_browser_libraries() -> Vec<LibraryRequirement> {
        let mut libraries: Vec<LibraryRequirement> = [
            "libnss3",
            "libatk1.0-0",
            "libatk-bridge2.0-0",
            "libcups2",
            "libdrm2",
            "libxkbcommon0",
            "libxcomposite1",
            "libxdamage1",
            "libxrandr2",
            "libgbm1",
            "libpango-1.0-0",
            "libcairo2",
        ]
        .into_iter()
        .map(LibraryRequirement::new)
        .collect();
        libraries.push(LibraryRequirement::any_of(["libasound2t64", "libasound2"]));
        libraries.push(LibraryRequirement::new("fonts-liberation").optional());
        libraries
    }
}

impl Default for BootstrapPlan {
    fn default() -> Self {
        Self {
            runtime: RuntimeRequirement::default(),
            libraries: Self::headless_browser_libraries(),
        }
    }
}

/// How a bootstrap action ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The state was already as required; nothing was changed
    AlreadySatisfied,
    /// The host was changed
    Applied {
        /// What was done
        detail: String,
    },
    /// An optional action was not carried out
    Skipped {
        /// Why
        reason: String,
    },
}

impl ActionOutcome {
    /// Whether this outcome mutated the host
    pub fn is_mutation(&self) -> bool {
        matches!(self, ActionOutcome::Applied { .. })
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::AlreadySatisfied => write!(f, "already satisfied"),
            ActionOutcome::Applied { detail } => write!(f, "applied: {}", detail),
            ActionOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// One entry of a [`BootstrapReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAction {
    /// Action name
    pub name: String,
    /// What happened
    pub outcome: ActionOutcome,
}

/// Per-action audit trail of one bootstrap run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Actions in execution order
    pub actions: Vec<BootstrapAction>,
}

impl BootstrapReport {
    fn record(&mut self, name: impl Into<String>, outcome: ActionOutcome) {
        let name = name.into();
        debug!("bootstrap {}: {}", name, outcome);
        self.actions.push(BootstrapAction { name, outcome });
    }

    /// Actions that changed the host
    pub fn mutations(&self) -> Vec<&BootstrapAction> {
        self.actions
            .iter()
            .filter(|a| a.outcome.is_mutation())
            .collect()
    }

    /// Whether the run changed nothing
    pub fn is_noop(&self) -> bool {
        self.mutations().is_empty()
    }

    /// Outcome of the named action
    pub fn outcome(&self, name: &str) -> Option<&ActionOutcome> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.outcome)
    }
}

/// Ensures packages, service account and directory layout on the host
pub struct RemoteBootstrapper {
    plan: BootstrapPlan,
    layout: RemoteLayout,
}

impl RemoteBootstrapper {
    /// Create a bootstrapper
    pub fn new(plan: BootstrapPlan, layout: RemoteLayout) -> Self {
        Self { plan, layout }
    }

    /// Bring the host to the planned state
    pub async fn ensure(&self, host: &dyn RemoteHost) -> Result<BootstrapReport> {
        self.layout.validate()?;
        self.check_privileges(host).await?;

        let mut report = BootstrapReport::default();

        let runtime_present = self.runtime_present(host).await?;
        let mut missing_libraries = Vec::new();
        for library in &self.plan.libraries {
            if self.installed_alternative(host, library).await?.is_none() {
                missing_libraries.push(library);
            }
        }

        if runtime_present && missing_libraries.is_empty() {
            report.record("package-index", ActionOutcome::AlreadySatisfied);
        } else {
            self.apt(host, "package-index", "apt-get update -q").await?;
            report.record(
                "package-index",
                ActionOutcome::Applied {
                    detail: "refreshed".into(),
                },
            );
        }

        if runtime_present {
            report.record("runtime", ActionOutcome::AlreadySatisfied);
        } else {
            let packages = self.plan.runtime.packages.join(" ");
            self.apt(host, "runtime", &install_command(&packages)).await?;
            report.record(
                "runtime",
                ActionOutcome::Applied {
                    detail: format!("installed {}", packages),
                },
            );
        }

        for library in &self.plan.libraries {
            let name = format!("library:{}", library.label());
            if !missing_libraries.contains(&library) {
                report.record(name, ActionOutcome::AlreadySatisfied);
                continue;
            }
            let outcome = self.install_library(host, library).await?;
            report.record(name, outcome);
        }

        report.record("service-account", self.ensure_account(host).await?);
        report.record(
            "install-dir",
            self.ensure_owned_dir(host, "install-dir", &self.layout.install_dir, true)
                .await?,
        );
        report.record(
            "log-dir",
            self.ensure_owned_dir(host, "log-dir", &self.layout.log_dir, false)
                .await?,
        );
        report.record(
            "screenshot-dir",
            self.ensure_owned_dir(host, "screenshot-dir", &self.layout.screenshot_dir, false)
                .await?,
        );

        info!(
            "Bootstrap of {} complete: {} of {} actions changed the host",
            host.address(),
            report.mutations().len(),
            report.actions.len()
        );
        Ok(report)
    }

    async fn check_privileges(&self, host: &dyn RemoteHost) -> Result<()> {
        let result = host.run_privileged(Command::new("true")).await?;
        if !result.success() {
            return Err(Error::Precondition(format!(
                "passwordless sudo is not available for the login user on {}: {}",
                host.address(),
                result.output_tail(3)
            )));
        }
        Ok(())
    }

    async fn runtime_present(&self, host: &dyn RemoteHost) -> Result<bool> {
        let probe = shell_escape(&self.plan.runtime.probe);
        let result = host
            .run(Command::shell(format!("command -v {} >/dev/null 2>&1", probe)))
            .await?;
        Ok(result.success())
    }

    async fn installed_alternative(
        &self,
        host: &dyn RemoteHost,
        library: &LibraryRequirement,
    ) -> Result<Option<String>> {
        for package in &library.alternatives {
            if package_installed(host, package).await? {
                return Ok(Some(package.clone()));
            }
        }
        Ok(None)
    }

    async fn install_library(
        &self,
        host: &dyn RemoteHost,
        library: &LibraryRequirement,
    ) -> Result<ActionOutcome> {
        let mut last_failure = String::new();
        for package in &library.alternatives {
            let result = host
                .run_privileged(Command::shell(install_command(package)))
                .await?;
            if result.success() {
                return Ok(ActionOutcome::Applied {
                    detail: format!("installed {}", package),
                });
            }
            check_fatal("library", &result)?;
            last_failure = result.output_tail(5);
            debug!("Package {} not installable, trying next alternative", package);
        }

        // apt may report failure for a package superseded on newer releases.
        if let Some(package) = self.installed_alternative(host, library).await? {
            return Ok(ActionOutcome::Skipped {
                reason: format!("{} already provided by the OS release", package),
            });
        }
        if library.optional {
            return Ok(ActionOutcome::Skipped {
                reason: format!("optional package unavailable: {}", last_failure),
            });
        }
        Err(Error::bootstrap(
            format!("library:{}", library.label()),
            last_failure,
        ))
    }

    async fn ensure_account(&self, host: &dyn RemoteHost) -> Result<ActionOutcome> {
        let user = shell_escape(&self.layout.service_user);
        let exists = host
            .run(Command::shell(format!("id -u {} >/dev/null 2>&1", user)))
            .await?;
        if exists.success() {
            return Ok(ActionOutcome::AlreadySatisfied);
        }

        let result = host
            .run_privileged(Command::shell(format!(
                "useradd --system --create-home --shell /usr/sbin/nologin {}",
                user
            )))
            .await?;
        if !result.success() {
            return Err(Error::bootstrap("service-account", result.output_tail(5)));
        }
        Ok(ActionOutcome::Applied {
            detail: format!("created system user {}", self.layout.service_user),
        })
    }

    /// Ensure `dir` exists and belongs to the service account
    ///
    /// With `recursive`, every entry below `dir` must belong to the account too.
    async fn ensure_owned_dir(
        &self,
        host: &dyn RemoteHost,
        action: &str,
        dir: &str,
        recursive: bool,
    ) -> Result<ActionOutcome> {
        let user = shell_escape(&self.layout.service_user);
        let path = shell_escape(dir);
        let check = if recursive {
            format!(
                "test -d {path} && test -z \"$(find {path} ! -user {user} -print -quit)\""
            )
        } else {
            format!("test -d {path} && test \"$(stat -c %U {path})\" = {user}")
        };
        let satisfied = host.run_privileged(Command::shell(check)).await?;
        if satisfied.success() {
            return Ok(ActionOutcome::AlreadySatisfied);
        }

        let chown = if recursive { "chown -R" } else { "chown" };
        let result = host
            .run_privileged(Command::shell(format!(
                "mkdir -p {path} && {chown} {user}:{user} {path}"
            )))
            .await?;
        if !result.success() {
            return Err(Error::bootstrap(action, result.output_tail(5)));
        }
        Ok(ActionOutcome::Applied {
            detail: format!("{} owned by {}", dir, self.layout.service_user),
        })
    }

    async fn apt(&self, host: &dyn RemoteHost, action: &str, script: &str) -> Result<()> {
        let result = host.run_privileged(Command::shell(script)).await?;
        if !result.success() {
            check_fatal(action, &result)?;
            return Err(Error::bootstrap(action, result.output_tail(5)));
        }
        Ok(())
    }
}

fn install_command(packages: &str) -> String {
    format!(
        "DEBIAN_FRONTEND=noninteractive apt-get install -y -q --no-install-recommends {}",
        packages
    )
}

async fn package_installed(host: &dyn RemoteHost, package: &str) -> Result<bool> {
    let result = host
        .run(Command::shell(format!(
            "dpkg-query -W -f='${{Status}}' {} 2>/dev/null | grep -q 'install ok installed'",
            shell_escape(package)
        )))
        .await?;
    Ok(result.success())
}

fn check_fatal(action: &str, result: &ExitResult) -> Result<()> {
    let output = format!("{}\n{}", result.stdout, result.stderr);
    match FATAL_PACKAGE_ERRORS.iter().find(|m| output.contains(*m)) {
        Some(marker) => Err(Error::bootstrap(
            action,
            format!("{}: {}", marker, result.output_tail(5)),
        )),
        None => Ok(()),
    }
}
