use crate::commands::{TargetArgs, connect, load_config};
use anyhow::{Context, Result};
use deploy_orchestration::ServiceManager;
use std::path::Path;

pub async fn run(config_path: &Path, target: TargetArgs, lines: u32) -> Result<()> {
    if lines == 0 {
        anyhow::bail!("--lines must be at least 1");
    }

    target.ensure_present();
    let (config, _) = load_config(config_path)?;
    let target = target.require(&config);
    let manager = ServiceManager::new(config.service_definition(&config.layout()));
    let host = connect(&config, &target)?;

    let journal = manager
        .journal(host.as_ref(), lines)
        .await
        .context("Failed to read the service journal")?;
    println!("{}", journal.trim_end());
    Ok(())
}
