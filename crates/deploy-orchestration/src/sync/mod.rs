//! File synchronization from the local source tree to the target.
//!
//! The filtered tree is first staged into a local temporary directory, then
//! transferred into the remote staging directory with the first available
//! [`TransferStrategy`], verified, and finally promoted into the install
//! directory. The runtime env file is never part of the file set, so a sync can
//! never overwrite the secrets already on the host.

mod archive;
mod incremental;

pub use archive::ArchiveTransfer;
pub use incremental::IncrementalTransfer;

use crate::{Error, ExclusionManifest, RemoteHost, RemoteLayout, Result};
use async_trait::async_trait;
use command_executor::Command;
use command_executor::shell::shell_escape;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The filtered source tree, materialized in a local temporary directory
///
/// The directory is removed when the value is dropped.
#[derive(Debug)]
pub struct FileSet {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl FileSet {
    /// Copy every file of `source_root` not excluded by `manifest` into a fresh temp dir
    pub fn stage(source_root: &Path, manifest: &ExclusionManifest) -> Result<Self> {
        let files = manifest.collect(source_root)?;
        let dir = tempfile::Builder::new()
            .prefix("deploy-stage-")
            .tempdir()
            .map_err(|e| Error::transfer("stage", format!("cannot create temp dir: {}", e)))?;

        for relative in &files {
            let from = source_root.join(relative);
            let to = dir.path().join(relative);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::transfer("stage", format!("{}: {}", parent.display(), e))
                })?;
            }
            fs::copy(&from, &to)
                .map_err(|e| Error::transfer("stage", format!("{}: {}", from.display(), e)))?;
        }

        debug!(
            "Staged {} files from {} into {}",
            files.len(),
            source_root.display(),
            dir.path().display()
        );
        Ok(Self { dir, files })
    }

    /// Root of the staged tree
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Relative paths of the staged files, sorted
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing survived the exclusion manifest
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A way of moving a [`FileSet`] into a remote directory
#[async_trait]
pub trait TransferStrategy: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &'static str;

    /// Whether the strategy can be used against `host`
    async fn is_available(&self, host: &dyn RemoteHost) -> bool;

    /// Make `remote_dir` contain exactly the files of `files`
    async fn transfer(&self, host: &dyn RemoteHost, files: &FileSet, remote_dir: &str)
    -> Result<()>;
}

/// Outcome of a successful sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Strategy that moved the files
    pub strategy: String,
    /// Number of files deployed
    pub files: usize,
    /// Directory the files were promoted into
    pub install_dir: String,
}

/// Mirrors the filtered source tree into the install directory on the target
pub struct FileSynchronizer {
    manifest: ExclusionManifest,
    layout: RemoteLayout,
    strategies: Vec<Box<dyn TransferStrategy>>,
}

impl FileSynchronizer {
    /// Synchronizer trying incremental transfer first, then a full archive
    pub fn new(manifest: ExclusionManifest, layout: RemoteLayout) -> Self {
        Self::with_strategies(
            manifest,
            layout,
            vec![Box::new(IncrementalTransfer), Box::new(ArchiveTransfer)],
        )
    }

    /// Synchronizer with an explicit strategy order
    pub fn with_strategies(
        manifest: ExclusionManifest,
        layout: RemoteLayout,
        strategies: Vec<Box<dyn TransferStrategy>>,
    ) -> Self {
        Self {
            manifest,
            layout,
            strategies,
        }
    }

    /// Manifest with the env file added as a protected path
    fn effective_manifest(&self) -> Result<ExclusionManifest> {
        match self.layout.env_file_in_install_dir() {
            Some(relative) => self
                .manifest
                .clone()
                .with_patterns([format!("/{}", relative)]),
            None => Ok(self.manifest.clone()),
        }
    }

    /// Stage the filtered tree locally without touching the host
    pub fn stage(&self, source_root: &Path) -> Result<FileSet> {
        FileSet::stage(source_root, &self.effective_manifest()?)
    }

    /// Synchronize `source_root` into the install directory
    pub async fn sync(&self, host: &dyn RemoteHost, source_root: &Path) -> Result<SyncReport> {
        self.layout.validate()?;
        let files = self.stage(source_root)?;
        if files.is_empty() {
            return Err(Error::transfer(
                "stage",
                format!("nothing to deploy from {}", source_root.display()),
            ));
        }

        let strategy = self.transfer(host, &files).await?;
        self.verify(host, &files).await?;
        self.promote(host).await?;

        info!(
            "Synced {} files to {}:{} via {}",
            files.len(),
            host.address(),
            self.layout.install_dir,
            strategy
        );
        Ok(SyncReport {
            strategy: strategy.to_string(),
            files: files.len(),
            install_dir: self.layout.install_dir.clone(),
        })
    }

    async fn transfer(&self, host: &dyn RemoteHost, files: &FileSet) -> Result<&'static str> {
        let mut last_error = None;
        for strategy in &self.strategies {
            if !strategy.is_available(host).await {
                debug!("Transfer strategy {} unavailable", strategy.name());
                continue;
            }
            match strategy
                .transfer(host, files, &self.layout.staging_dir)
                .await
            {
                Ok(()) => return Ok(strategy.name()),
                Err(e) => {
                    warn!("Transfer via {} failed: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(Error::Transfer { stage, reason }) => Error::Transfer { stage, reason },
            Some(other) => Error::transfer("transfer", other.to_string()),
            None => Error::transfer("transfer", "no transfer strategy available"),
        })
    }

    async fn verify(&self, host: &dyn RemoteHost, files: &FileSet) -> Result<()> {
        let staging = shell_escape(&self.layout.staging_dir);
        let result = host
            .run_privileged(Command::shell(format!(
                "find {} -type f | wc -l",
                staging
            )))
            .await
            .map_err(|e| Error::transfer("verify", e.to_string()))?;
        if !result.success() {
            return Err(Error::transfer("verify", result.output_tail(5)));
        }

        let count: usize = result.stdout_trimmed().parse().map_err(|_| {
            Error::transfer(
                "verify",
                format!("unexpected file count output '{}'", result.stdout_trimmed()),
            )
        })?;
        if count != files.len() {
            return Err(Error::transfer(
                "verify",
                format!(
                    "{} holds {} files, expected {}",
                    self.layout.staging_dir,
                    count,
                    files.len()
                ),
            ));
        }
        Ok(())
    }

    /// Swap a merged copy of staging and the live tree into place
    ///
    /// The new tree is assembled next to the install dir, starting from a copy
    /// of the live one so the env file and other files outside the set carry
    /// over. Only two renames touch the live path; a failure before them
    /// leaves it as it was.
    async fn promote(&self, host: &dyn RemoteHost) -> Result<()> {
        let staging = shell_escape(&self.layout.staging_dir);
        let install = shell_escape(&self.layout.install_dir);
        let next = shell_escape(&self.layout.promote_next_dir());
        let prev = shell_escape(&self.layout.promote_previous_dir());
        let user = shell_escape(&self.layout.service_user);

        // On a first run the account does not exist yet; bootstrap takes
        // ownership of the install dir once it has created it.
        let script = format!(
            "set -e; rm -rf {next} {prev}; \
             if [ -d {install} ]; then cp -a {install} {next}; else mkdir -p {next}; fi; \
             cp -a {staging}/. {next}/; \
             if id -u {user} >/dev/null 2>&1; then chown -R {user}:{user} {next}; fi; \
             if [ -d {install} ]; then mv {install} {prev}; fi; \
             if ! mv {next} {install}; then if [ -d {prev} ]; then mv {prev} {install}; fi; exit 1; fi; \
             rm -rf {prev}"
        );

        let result = host
            .run_privileged(Command::shell(script))
            .await
            .map_err(|e| Error::transfer("promote", e.to_string()))?;
        if !result.success() {
            return Err(Error::transfer(
                "promote",
                format!(
                    "{} left unchanged: {}",
                    self.layout.install_dir,
                    result.output_tail(5)
                ),
            ));
        }
        debug!("Promoted {} into {}", self.layout.staging_dir, self.layout.install_dir);
        Ok(())
    }
}
