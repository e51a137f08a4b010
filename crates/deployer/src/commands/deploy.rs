use crate::commands::{TargetArgs, connect, load_config};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use deploy_config::resolver::{ResolutionContext, validate_references};
use deploy_orchestration::{DeploymentOrchestrator, DeploymentResult, DeploymentStep};
use std::path::Path;
use tracing::warn;

pub async fn run(config_path: &Path, target: TargetArgs) -> Result<()> {
    target.ensure_present();
    let (config, base_dir) = load_config(config_path)?;
    let target = target.require(&config);

    let context = ResolutionContext::new();
    for problem in validate_references(&config, &context) {
        warn!("{}", problem);
    }
    let plan = config
        .to_plan(&base_dir, &context)
        .context("Failed to build deployment plan")?;

    let host = connect(&config, &target)?;
    println!(
        "Deploying {} to {}@{}",
        config.service.name, target.remote_user, target.address
    );

    let mut orchestrator = DeploymentOrchestrator::standard(host, plan);
    let result = orchestrator.run().await;

    print_summary(&result);

    match &result.failed_step {
        None => {
            if let Some(health) = &result.final_health {
                println!(
                    "✓ {} is {} ({} active meetings)",
                    config.service.name, health.status, health.active_meetings
                );
            }
            Ok(())
        }
        Some(failed) => {
            eprintln!();
            eprintln!("{}", result.diagnostics.trim_end());
            anyhow::bail!("Deployment failed at {}: {}", failed.step, failed.error)
        }
    }
}

fn print_summary(result: &DeploymentResult) {
    let mut table = Table::new();
    table.set_header(vec!["STEP", "RESULT", "TIME", "DETAIL"]);

    for step in DeploymentStep::ALL {
        if let Some(done) = result.succeeded_steps.iter().find(|s| s.step == step) {
            table.add_row(vec![
                Cell::new(step),
                Cell::new("✓ ok").fg(Color::Green),
                Cell::new(format!("{:.1?}", done.duration)),
                Cell::new(&done.summary),
            ]);
        } else if let Some(failed) = result.failed_step.as_ref().filter(|f| f.step == step) {
            table.add_row(vec![
                Cell::new(step),
                Cell::new("✗ failed").fg(Color::Red),
                Cell::new(format!("{:.1?}", failed.duration)),
                Cell::new(failed.error.to_string()),
            ]);
        } else {
            table.add_row(vec![
                Cell::new(step),
                Cell::new("skipped").fg(Color::DarkGrey),
                Cell::new("-"),
                Cell::new(""),
            ]);
        }
    }

    println!("{}", table);
}
