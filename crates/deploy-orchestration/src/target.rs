//! Where a deployment goes: the host to reach and the directory layout on it.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Key material used to authenticate to the target
///
/// Held as a path to an SSH identity file; the key itself is never read into
/// memory by the deployer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    identity_file: PathBuf,
}

impl Credential {
    /// Credential backed by an SSH private key file
    pub fn identity_file(path: impl Into<PathBuf>) -> Self {
        Self {
            identity_file: path.into(),
        }
    }

    /// Path to the identity file
    pub fn path(&self) -> &Path {
        &self.identity_file
    }
}

/// The host a run deploys to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    /// Hostname or IP address
    pub address: String,
    /// Authentication material
    pub credential: Credential,
    /// User the SSH session logs in as
    pub remote_user: String,
    /// SSH port, when not 22
    pub port: Option<u16>,
}

impl DeploymentTarget {
    /// Create a target reached as `remote_user@address` with the given key file
    pub fn new(
        address: impl Into<String>,
        identity_file: impl Into<PathBuf>,
        remote_user: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            credential: Credential::identity_file(identity_file),
            remote_user: remote_user.into(),
            port: None,
        }
    }

    /// Use a non-default SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Check the target is usable without touching the network
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Precondition("target address is empty".into()));
        }
        if self.remote_user.trim().is_empty() {
            return Err(Error::Precondition("remote user is empty".into()));
        }
        if !self.credential.path().is_file() {
            return Err(Error::Precondition(format!(
                "credential file not found: {}",
                self.credential.path().display()
            )));
        }
        Ok(())
    }
}

/// Directory layout of the service on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLayout {
    /// Account the service runs as
    pub service_user: String,
    /// Live install directory
    pub install_dir: String,
    /// Directory the service writes logs to
    pub log_dir: String,
    /// Screenshot capture directory, normally inside the log directory
    pub screenshot_dir: String,
    /// Runtime environment file
    pub env_file: String,
    /// Where synced files land before promotion into `install_dir`
    pub staging_dir: String,
}

impl RemoteLayout {
    /// Conventional layout for a service named `service`
    pub fn for_service(service: &str) -> Self {
        let install_dir = format!("/opt/{}", service);
        let log_dir = format!("/var/log/{}", service);
        Self {
            service_user: service.to_string(),
            screenshot_dir: format!("{}/screenshots", log_dir),
            env_file: format!("{}/.env", install_dir),
            staging_dir: format!("{}.staging", install_dir),
            install_dir,
            log_dir,
        }
    }

    /// Reject layouts that would make destructive commands dangerous
    ///
    /// The staging directory is emptied with `rm -rf` by the archive transfer,
    /// so every path must be absolute, and staging must sit next to the
    /// install directory without overlapping any directory the service uses.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("install_dir", &self.install_dir),
            ("log_dir", &self.log_dir),
            ("screenshot_dir", &self.screenshot_dir),
            ("env_file", &self.env_file),
            ("staging_dir", &self.staging_dir),
        ] {
            let trimmed = path.trim_end_matches('/');
            if !path.starts_with('/') || trimmed.is_empty() {
                return Err(Error::Precondition(format!(
                    "{} must be an absolute path below /, got '{}'",
                    name, path
                )));
            }
        }
        let staging = self.staging_dir.trim_end_matches('/');
        let install = self.install_dir.trim_end_matches('/');
        if parent_of(staging) != parent_of(install) || staging == install {
            return Err(Error::Precondition(format!(
                "staging_dir '{}' must be a sibling of install_dir '{}'",
                self.staging_dir, self.install_dir
            )));
        }
        let env_dir = parent_of(self.env_file.trim_end_matches('/'));
        for (name, path) in [
            ("install_dir", install),
            ("log_dir", self.log_dir.trim_end_matches('/')),
            ("screenshot_dir", self.screenshot_dir.trim_end_matches('/')),
            ("env_file directory", env_dir),
        ] {
            if overlaps(staging, path) {
                return Err(Error::Precondition(format!(
                    "staging_dir '{}' overlaps {} '{}'",
                    self.staging_dir, name, path
                )));
            }
        }
        for reserved in [self.promote_next_dir(), self.promote_previous_dir()] {
            if staging == reserved {
                return Err(Error::Precondition(format!(
                    "staging_dir '{}' is reserved for promotion",
                    self.staging_dir
                )));
            }
        }
        if self.service_user.trim().is_empty() {
            return Err(Error::Precondition("service_user is empty".into()));
        }
        Ok(())
    }

    /// Scratch copy of the install directory assembled during promotion
    pub fn promote_next_dir(&self) -> String {
        format!("{}.next", self.install_dir.trim_end_matches('/'))
    }

    /// Where the previous install directory is parked while the new one is swapped in
    pub fn promote_previous_dir(&self) -> String {
        format!("{}.prev", self.install_dir.trim_end_matches('/'))
    }

    /// Relative path of the env file inside the install directory, if it lives there
    pub fn env_file_in_install_dir(&self) -> Option<String> {
        let prefix = format!("{}/", self.install_dir.trim_end_matches('/'));
        self.env_file.strip_prefix(&prefix).map(str::to_string)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

/// Whether one path equals the other or contains it
fn overlaps(a: &str, b: &str) -> bool {
    let contains = |outer: &str, inner: &str| {
        outer == "/" || inner.strip_prefix(outer).is_some_and(|rest| rest.starts_with('/'))
    };
    a == b || contains(a, b) || contains(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_service() {
        let layout = RemoteLayout::for_service("worker");
        assert_eq!(layout.install_dir, "/opt/worker");
        assert_eq!(layout.log_dir, "/var/log/worker");
        assert_eq!(layout.screenshot_dir, "/var/log/worker/screenshots");
        assert_eq!(layout.env_file, "/opt/worker/.env");
        assert_eq!(layout.staging_dir, "/opt/worker.staging");
        assert_eq!(layout.env_file_in_install_dir().as_deref(), Some(".env"));
        layout.validate().unwrap();
    }

    #[test]
    fn test_layout_rejects_root_and_relative_paths() {
        let mut layout = RemoteLayout::for_service("worker");
        layout.staging_dir = "/".into();
        assert!(matches!(layout.validate(), Err(Error::Precondition(_))));

        let mut layout = RemoteLayout::for_service("worker");
        layout.install_dir = "opt/worker".into();
        assert!(matches!(layout.validate(), Err(Error::Precondition(_))));
    }

    #[test]
    fn test_staging_must_not_cover_live_directories() {
        for staging in ["/opt", "/opt/worker/staging", "/usr", "/etc", "/var/log/worker"] {
            let mut layout = RemoteLayout::for_service("worker");
            layout.staging_dir = staging.into();
            let err = layout.validate().unwrap_err();
            assert!(matches!(err, Error::Precondition(_)), "{staging}");
            assert!(err.to_string().contains("staging_dir"), "{staging}: {err}");
        }

        let mut layout = RemoteLayout::for_service("worker");
        layout.staging_dir = "/opt/worker.next".into();
        assert!(layout.validate().is_err());

        let mut layout = RemoteLayout::for_service("worker");
        layout.log_dir = "/opt/logs".into();
        layout.screenshot_dir = "/opt/logs/screenshots".into();
        layout.staging_dir = "/opt/logs".into();
        assert!(layout.validate().is_err());

        let mut layout = RemoteLayout::for_service("worker");
        layout.staging_dir = "/opt/worker-incoming".into();
        layout.validate().unwrap();
    }

    #[test]
    fn test_overlap() {
        assert!(overlaps("/opt", "/opt/worker"));
        assert!(overlaps("/opt/worker/a", "/opt/worker"));
        assert!(overlaps("/", "/opt/worker"));
        assert!(!overlaps("/opt/worker.staging", "/opt/worker"));
        assert_eq!(parent_of("/opt/worker"), "/opt");
        assert_eq!(parent_of("/opt"), "/");
    }

    #[test]
    fn test_target_requires_existing_key() {
        let target = DeploymentTarget::new("10.0.0.5", "/no/such/key.pem", "ubuntu");
        let err = target.validate().unwrap_err();
        assert!(err.to_string().contains("credential file not found"));

        let key = tempfile::NamedTempFile::new().unwrap();
        let target = DeploymentTarget::new("10.0.0.5", key.path(), "ubuntu").with_port(2222);
        target.validate().unwrap();
        assert_eq!(target.port, Some(2222));
    }
}
