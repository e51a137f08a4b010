use super::{FileSet, TransferStrategy};
use crate::{Error, RemoteHost, Result};
use async_trait::async_trait;
use command_executor::Command;
use command_executor::shell::shell_escape;

/// Checksum-based mirror with rsync; only changed files cross the wire
#[derive(Debug, Default, Clone, Copy)]
pub struct IncrementalTransfer;

#[async_trait]
impl TransferStrategy for IncrementalTransfer {
    fn name(&self) -> &'static str {
        "incremental"
    }

    async fn is_available(&self, host: &dyn RemoteHost) -> bool {
        host.mirror_supported().await
    }

    async fn transfer(&self, host: &dyn RemoteHost, files: &FileSet, remote_dir: &str) -> Result<()> {
        let mkdir = host
            .run_privileged(Command::shell(format!("mkdir -p {}", shell_escape(remote_dir))))
            .await
            .map_err(|e| Error::transfer("transfer", e.to_string()))?;
        if !mkdir.success() {
            return Err(Error::transfer("transfer", mkdir.output_tail(5)));
        }

        let result = host
            .mirror(files.root(), remote_dir)
            .await
            .map_err(|e| Error::transfer("transfer", e.to_string()))?;
        if !result.success() {
            return Err(Error::transfer(
                "transfer",
                format!("rsync failed: {}", result.output_tail(10)),
            ));
        }
        Ok(())
    }
}
