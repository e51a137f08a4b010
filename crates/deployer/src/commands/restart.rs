use crate::commands::health::{print_snapshot, wait_healthy};
use crate::commands::{TargetArgs, connect, load_config};
use anyhow::{Context, Result};
use deploy_orchestration::ServiceManager;
use std::path::Path;

pub async fn run(config_path: &Path, target: TargetArgs) -> Result<()> {
    target.ensure_present();
    let (config, _) = load_config(config_path)?;
    let target = target.require(&config);
    let manager = ServiceManager::new(config.service_definition(&config.layout()));
    let host = connect(&config, &target)?;

    println!("Restarting {} on {}...", manager.definition().name, target.address);
    let restarted = manager.restart(host.as_ref()).await;
    if let Err(e) = restarted {
        let journal = manager.journal(host.as_ref(), 20).await.unwrap_or_default();
        if !journal.trim().is_empty() {
            eprintln!("{}", journal.trim_end());
        }
        return Err(e).context("Restart failed");
    }

    let snapshot = wait_healthy(&config, host).await?;
    print_snapshot(&config.service.name, &snapshot);
    Ok(())
}
