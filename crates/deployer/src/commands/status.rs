use crate::commands::{TargetArgs, connect, load_config};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use deploy_orchestration::{ServiceManager, ServiceState};
use std::path::Path;

pub async fn run(config_path: &Path, target: TargetArgs, format: String) -> Result<()> {
    if format != "table" && format != "json" {
        anyhow::bail!("Invalid format: {}. Must be 'table' or 'json'", format);
    }

    target.ensure_present();
    let (config, _) = load_config(config_path)?;
    let target = target.require(&config);
    let layout = config.layout();
    let manager = ServiceManager::new(config.service_definition(&layout));

    let host = connect(&config, &target)?;
    let state = manager
        .status(host.as_ref())
        .await
        .context("Failed to query service status")?;

    if format == "json" {
        let report = serde_json::json!({
            "host": target.address,
            "service": manager.definition().name,
            "state": state.to_string(),
            "install_dir": layout.install_dir,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let color = match &state {
        ServiceState::Active => Color::Green,
        ServiceState::Activating => Color::Yellow,
        ServiceState::Inactive | ServiceState::Unknown(_) => Color::DarkGrey,
        ServiceState::Failed => Color::Red,
    };

    let mut table = Table::new();
    table.set_header(vec!["HOST", "SERVICE", "STATE", "INSTALL DIR"]);
    table.add_row(vec![
        Cell::new(&target.address),
        Cell::new(&manager.definition().name),
        Cell::new(state.to_string()).fg(color),
        Cell::new(&layout.install_dir),
    ]);
    println!("{}", table);

    if !state.is_running() {
        let details = manager.status_text(host.as_ref()).await?;
        if !details.trim().is_empty() {
            println!("{}", details.trim_end());
        }
    }

    Ok(())
}
