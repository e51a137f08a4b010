//! systemd unit management for the deployed service.

use crate::{Error, RemoteHost, RemoteLayout, Result};
use command_executor::shell::shell_escape;
use command_executor::{Command, ExitResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNIT_DIR: &str = "/etc/systemd/system";

/// When systemd restarts the service after it exits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart on any exit
    Always,
    /// Restart on non-zero exit, signal or watchdog timeout
    #[default]
    OnFailure,
    /// Never restart
    Never,
}

impl RestartPolicy {
    fn unit_value(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Never => "no",
        }
    }
}

/// Resource ceilings enforced by the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// `MemoryMax=` value, e.g. `2G`
    pub memory_max: String,
    /// `LimitNOFILE=` value
    pub nofile: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_max: "2G".into(),
            nofile: 65536,
        }
    }
}

/// Supervisor-level sandboxing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFlags {
    /// `NoNewPrivileges=true`
    pub no_new_privileges: bool,
    /// `ProtectSystem=strict`
    pub protect_system_strict: bool,
    /// `PrivateTmp=true`
    pub private_tmp: bool,
    /// Paths left writable under `ProtectSystem=strict`
    pub read_write_paths: Vec<String>,
}

impl SandboxFlags {
    /// All protections on, writes limited to `paths`
    pub fn strict(paths: Vec<String>) -> Self {
        Self {
            no_new_privileges: true,
            protect_system_strict: true,
            private_tmp: true,
            read_write_paths: paths,
        }
    }
}

/// Declarative description of the supervised service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Unit name without the `.service` suffix
    pub name: String,
    /// `Description=`
    pub description: String,
    /// Account the process runs as
    pub user: String,
    /// Executable entry point
    pub executable: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_dir: String,
    /// Environment file loaded by systemd
    pub env_file: String,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Backoff between restarts, in seconds
    pub restart_sec: u64,
    /// Resource ceilings
    pub limits: ResourceLimits,
    /// Sandboxing
    pub sandbox: SandboxFlags,
}

impl ServiceDefinition {
    /// Definition running `executable args..` from the install dir of `layout`
    pub fn for_layout(
        name: impl Into<String>,
        executable: impl Into<String>,
        args: Vec<String>,
        layout: &RemoteLayout,
    ) -> Self {
        let name = name.into();
        Self {
            description: format!("{} service", name),
            name,
            user: layout.service_user.clone(),
            executable: executable.into(),
            args,
            working_dir: layout.install_dir.clone(),
            env_file: layout.env_file.clone(),
            restart: RestartPolicy::OnFailure,
            restart_sec: 10,
            limits: ResourceLimits::default(),
            sandbox: SandboxFlags::strict(vec![layout.log_dir.clone()]),
        }
    }

    /// Where the unit file is installed
    pub fn unit_path(&self) -> String {
        format!("{}/{}.service", UNIT_DIR, self.name)
    }

    /// Unit file contents
    pub fn render_unit(&self) -> String {
        let mut exec = vec![self.executable.as_str()];
        exec.extend(self.args.iter().map(String::as_str));
        let exec_start = exec
            .iter()
            .map(|part| systemd_quote(part))
            .collect::<Vec<_>>()
            .join(" ");

        let mut unit = String::new();
        unit.push_str("[Unit]\n");
        unit.push_str(&format!("Description={}\n", self.description));
        unit.push_str("After=network-online.target\n");
        unit.push_str("Wants=network-online.target\n");
        unit.push('\n');

        unit.push_str("[Service]\n");
        unit.push_str("Type=simple\n");
        unit.push_str(&format!("User={}\n", self.user));
        unit.push_str(&format!("Group={}\n", self.user));
        unit.push_str(&format!("WorkingDirectory={}\n", self.working_dir));
        unit.push_str(&format!("EnvironmentFile={}\n", self.env_file));
        unit.push_str(&format!("ExecStart={}\n", exec_start));
        unit.push_str(&format!("Restart={}\n", self.restart.unit_value()));
        unit.push_str(&format!("RestartSec={}\n", self.restart_sec));
        unit.push_str(&format!("MemoryMax={}\n", self.limits.memory_max));
        unit.push_str(&format!("LimitNOFILE={}\n", self.limits.nofile));
        if self.sandbox.no_new_privileges {
            unit.push_str("NoNewPrivileges=true\n");
        }
        if self.sandbox.protect_system_strict {
            unit.push_str("ProtectSystem=strict\n");
        }
        if self.sandbox.private_tmp {
            unit.push_str("PrivateTmp=true\n");
        }
        if !self.sandbox.read_write_paths.is_empty() {
            unit.push_str(&format!(
                "ReadWritePaths={}\n",
                self.sandbox.read_write_paths.join(" ")
            ));
        }
        unit.push_str("StandardOutput=journal\n");
        unit.push_str("StandardError=journal\n");
        unit.push('\n');

        unit.push_str("[Install]\n");
        unit.push_str("WantedBy=multi-user.target\n");
        unit
    }
}

fn systemd_quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return word.to_string();
    }
    format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Supervisor state of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Running
    Active,
    /// Starting up
    Activating,
    /// Stopped
    Inactive,
    /// Exited with failure
    Failed,
    /// Any other state reported by systemd
    Unknown(String),
}

impl ServiceState {
    /// Parse `systemctl is-active` output
    pub fn parse(output: &str) -> Self {
        match output.trim() {
            "active" | "reloading" => ServiceState::Active,
            "activating" => ServiceState::Activating,
            "inactive" | "deactivating" => ServiceState::Inactive,
            "failed" => ServiceState::Failed,
            other => ServiceState::Unknown(other.to_string()),
        }
    }

    /// Whether the unit counts as started
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Active | ServiceState::Activating)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Active => write!(f, "active"),
            ServiceState::Activating => write!(f, "activating"),
            ServiceState::Inactive => write!(f, "inactive"),
            ServiceState::Failed => write!(f, "failed"),
            ServiceState::Unknown(raw) => write!(f, "unknown ({})", raw),
        }
    }
}

/// What [`ServiceManager::install`] did to the unit file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitChange {
    /// No unit existed
    Created,
    /// The unit differed and was replaced
    Updated,
    /// Identical unit already installed
    Unchanged,
}

/// Installs and controls one systemd unit
pub struct ServiceManager {
    definition: ServiceDefinition,
}

impl ServiceManager {
    /// Manager for `definition`
    pub fn new(definition: ServiceDefinition) -> Self {
        Self { definition }
    }

    /// Definition being managed
    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    fn unit(&self) -> String {
        format!("{}.service", self.definition.name)
    }

    /// Write the unit if it changed, then reload the supervisor
    ///
    /// A running instance keeps running; only [`ServiceManager::restart`]
    /// picks up the new definition.
    pub async fn install(&self, host: &dyn RemoteHost) -> Result<UnitChange> {
        let path = self.definition.unit_path();
        let rendered = self.definition.render_unit();

        let existing = host
            .run_privileged(Command::shell(format!(
                "if [ -f {p} ]; then cat {p}; else printf __absent__; fi",
                p = shell_escape(&path)
            )))
            .await?;
        if !existing.success() {
            return Err(self.failure("read unit", &existing));
        }

        let change = match existing.stdout.as_str() {
            "__absent__" => UnitChange::Created,
            current if current == rendered => UnitChange::Unchanged,
            _ => UnitChange::Updated,
        };

        if change != UnitChange::Unchanged {
            self.write_unit(host, &path, &rendered).await?;
        }

        let reload = host
            .run_privileged(Command::builder("systemctl").arg("daemon-reload").build())
            .await?;
        if !reload.success() {
            return Err(self.failure("daemon-reload", &reload));
        }

        info!("Unit {}: {:?}", self.unit(), change);
        Ok(change)
    }

    async fn write_unit(&self, host: &dyn RemoteHost, path: &str, rendered: &str) -> Result<()> {
        let mut local = tempfile::NamedTempFile::new()?;
        local.write_all(rendered.as_bytes())?;
        local.flush()?;

        let remote_tmp = format!("/tmp/deploy-unit-{}", Uuid::new_v4());
        let upload = host.upload(local.path(), &remote_tmp).await?;
        if !upload.success() {
            return Err(self.failure("upload unit", &upload));
        }

        let next = format!("{}.new", path);
        let result = host
            .run_privileged(Command::shell(format!(
                "install -m 644 -o root -g root {tmp} {next} && mv -f {next} {path}; status=$?; rm -f {tmp}; exit $status",
                tmp = shell_escape(&remote_tmp),
                next = shell_escape(&next),
                path = shell_escape(path),
            )))
            .await?;
        if !result.success() {
            return Err(self.failure("install unit", &result));
        }
        Ok(())
    }

    /// Start the service
    pub async fn start(&self, host: &dyn RemoteHost) -> Result<ServiceState> {
        self.systemctl(host, "start").await?;
        self.require_running(host).await
    }

    /// Stop the service
    pub async fn stop(&self, host: &dyn RemoteHost) -> Result<()> {
        self.systemctl(host, "stop").await
    }

    /// Stop-then-start the service; does not wait for readiness
    pub async fn restart(&self, host: &dyn RemoteHost) -> Result<ServiceState> {
        self.systemctl(host, "restart").await?;
        self.require_running(host).await
    }

    /// Enable start on boot, if not already enabled
    pub async fn enable_on_boot(&self, host: &dyn RemoteHost) -> Result<bool> {
        let enabled = host
            .run(
                Command::builder("systemctl")
                    .arg("is-enabled")
                    .arg("--quiet")
                    .arg(self.unit())
                    .build(),
            )
            .await?;
        if enabled.success() {
            return Ok(false);
        }
        self.systemctl(host, "enable").await?;
        Ok(true)
    }

    /// Current supervisor state
    ///
    /// Errors only when the host cannot be reached.
    pub async fn status(&self, host: &dyn RemoteHost) -> Result<ServiceState> {
        // is-active exits non-zero for every state but active; the text is what matters.
        let result = host
            .run(
                Command::builder("systemctl")
                    .arg("is-active")
                    .arg(self.unit())
                    .build(),
            )
            .await?;
        Ok(ServiceState::parse(&result.stdout))
    }

    /// Tail of `systemctl status`, for diagnostics
    pub async fn status_text(&self, host: &dyn RemoteHost) -> Result<String> {
        let result = host
            .run(
                Command::builder("systemctl")
                    .arg("status")
                    .arg("--no-pager")
                    .arg("--lines")
                    .arg("10")
                    .arg(self.unit())
                    .build(),
            )
            .await?;
        Ok(result.output_tail(20))
    }

    /// Recent journal lines of the service
    pub async fn journal(&self, host: &dyn RemoteHost, lines: u32) -> Result<String> {
        let result = host
            .run_privileged(
                Command::builder("journalctl")
                    .arg("-u")
                    .arg(self.unit())
                    .arg("-n")
                    .arg(lines.to_string())
                    .arg("--no-pager")
                    .build(),
            )
            .await?;
        Ok(result.stdout)
    }

    async fn systemctl(&self, host: &dyn RemoteHost, verb: &str) -> Result<()> {
        debug!("systemctl {} {}", verb, self.unit());
        let result = host
            .run_privileged(Command::builder("systemctl").arg(verb).arg(self.unit()).build())
            .await?;
        if !result.success() {
            return Err(self.failure(verb, &result));
        }
        Ok(())
    }

    async fn require_running(&self, host: &dyn RemoteHost) -> Result<ServiceState> {
        let state = self.status(host).await?;
        if state.is_running() {
            return Ok(state);
        }
        let status = match self.status_text(host).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => state.to_string(),
            Err(e) => {
                warn!("Could not read status of {}: {}", self.unit(), e);
                state.to_string()
            }
        };
        Err(Error::Service {
            service: self.definition.name.clone(),
            status,
        })
    }

    fn failure(&self, action: &str, result: &ExitResult) -> Error {
        Error::Service {
            service: self.definition.name.clone(),
            status: format!("{} failed: {}", action, result.output_tail(10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ServiceDefinition {
        ServiceDefinition::for_layout(
            "worker",
            "/usr/bin/node",
            vec!["server.js".into()],
            &RemoteLayout::for_service("worker"),
        )
    }

    #[test]
    fn test_unit_encodes_sandbox_and_limits() {
        let unit = definition().render_unit();
        for line in [
            "User=worker",
            "WorkingDirectory=/opt/worker",
            "EnvironmentFile=/opt/worker/.env",
            "ExecStart=/usr/bin/node server.js",
            "Restart=on-failure",
            "RestartSec=10",
            "MemoryMax=2G",
            "LimitNOFILE=65536",
            "NoNewPrivileges=true",
            "ProtectSystem=strict",
            "PrivateTmp=true",
            "ReadWritePaths=/var/log/worker",
        ] {
            assert!(unit.lines().any(|l| l == line), "missing {line}\n{unit}");
        }
        assert_eq!(definition().unit_path(), "/etc/systemd/system/worker.service");
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(definition().render_unit(), definition().render_unit());
    }

    #[test]
    fn test_restart_policy_values() {
        let mut def = definition();
        def.restart = RestartPolicy::Never;
        assert!(def.render_unit().contains("Restart=no\n"));
        def.restart = RestartPolicy::Always;
        assert!(def.render_unit().contains("Restart=always\n"));

        let policy: RestartPolicy = serde_json::from_str("\"on-failure\"").unwrap();
        assert_eq!(policy, RestartPolicy::OnFailure);
    }

    #[test]
    fn test_exec_start_quotes_arguments_with_spaces() {
        let mut def = definition();
        def.args = vec!["--name".into(), "meeting bot".into()];
        assert!(
            def.render_unit()
                .contains("ExecStart=/usr/bin/node --name \"meeting bot\"\n")
        );
    }

    #[test]
    fn test_service_state_parse() {
        assert_eq!(ServiceState::parse("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::parse("activating"), ServiceState::Activating);
        assert_eq!(ServiceState::parse("failed"), ServiceState::Failed);
        assert_eq!(ServiceState::parse("inactive"), ServiceState::Inactive);
        assert_eq!(
            ServiceState::parse("maintenance"),
            ServiceState::Unknown("maintenance".into())
        );
        assert!(ServiceState::Activating.is_running());
        assert!(!ServiceState::Failed.is_running());
    }
}
