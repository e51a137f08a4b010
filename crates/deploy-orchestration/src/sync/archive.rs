use super::{FileSet, TransferStrategy};
use crate::{Error, RemoteHost, Result};
use async_trait::async_trait;
use command_executor::Command;
use command_executor::shell::shell_escape;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

/// Full transfer as a single tar.gz, replacing the remote directory
///
/// Works on any host with `tar`; used when rsync is not available.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveTransfer;

impl ArchiveTransfer {
    fn build_archive(files: &FileSet) -> Result<NamedTempFile> {
        let archive = tempfile::Builder::new()
            .prefix("deploy-")
            .suffix(".tar.gz")
            .tempfile()
            .map_err(|e| Error::transfer("transfer", format!("cannot create archive: {}", e)))?;

        let encoder = GzEncoder::new(archive.as_file().try_clone()?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for relative in files.files() {
            append(&mut builder, files.root(), relative)?;
        }
        let encoder = builder
            .into_inner()
            .map_err(|e| Error::transfer("transfer", format!("cannot write archive: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| Error::transfer("transfer", format!("cannot write archive: {}", e)))?;
        Ok(archive)
    }
}

fn append(
    builder: &mut tar::Builder<GzEncoder<File>>,
    root: &Path,
    relative: &Path,
) -> Result<()> {
    builder
        .append_path_with_name(root.join(relative), relative)
        .map_err(|e| Error::transfer("transfer", format!("{}: {}", relative.display(), e)))
}

#[async_trait]
impl TransferStrategy for ArchiveTransfer {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn is_available(&self, _host: &dyn RemoteHost) -> bool {
        true
    }

    async fn transfer(&self, host: &dyn RemoteHost, files: &FileSet, remote_dir: &str) -> Result<()> {
        let archive = Self::build_archive(files)?;
        let remote_archive = format!("/tmp/deploy-{}.tar.gz", Uuid::new_v4());
        debug!("Uploading {} files as {}", files.len(), remote_archive);

        let upload = host
            .upload(archive.path(), &remote_archive)
            .await
            .map_err(|e| Error::transfer("transfer", e.to_string()))?;
        if !upload.success() {
            return Err(Error::transfer(
                "transfer",
                format!("upload failed: {}", upload.output_tail(5)),
            ));
        }

        let dir = shell_escape(remote_dir);
        let tmp = shell_escape(&remote_archive);
        let unpack = host
            .run_privileged(Command::shell(format!(
                "rm -rf {dir} && mkdir -p {dir} && tar -xzf {tmp} -C {dir}; status=$?; rm -f {tmp}; exit $status"
            )))
            .await
            .map_err(|e| Error::transfer("transfer", e.to_string()))?;
        if !unpack.success() {
            return Err(Error::transfer(
                "transfer",
                format!("unpack failed: {}", unpack.output_tail(10)),
            ));
        }
        Ok(())
    }
}
