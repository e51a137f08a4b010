use crate::commands::load_config;
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use deploy_config::resolver::ResolutionContext;
use deploy_orchestration::{DeploymentPlan, FileSynchronizer, Requirement, is_placeholder};
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let plan = config
        .to_plan(&base_dir, &ResolutionContext::new())
        .context("Failed to build deployment plan")?;

    print_files(&plan)?;
    println!();
    print_settings(&plan);
    println!();
    println!("# {}", plan.service.unit_path());
    print!("{}", plan.service.render_unit());
    Ok(())
}

fn print_files(plan: &DeploymentPlan) -> Result<()> {
    let synchronizer = FileSynchronizer::new(plan.manifest.clone(), plan.layout.clone());
    let files = synchronizer
        .stage(&plan.source_root)
        .with_context(|| format!("Failed to scan {}", plan.source_root.display()))?;

    println!(
        "{} files from {} -> {}",
        files.len(),
        plan.source_root.display(),
        plan.layout.install_dir
    );
    for file in files.files() {
        println!("  {}", file.display());
    }
    Ok(())
}

fn print_settings(plan: &DeploymentPlan) {
    let mut table = Table::new();
    table.set_header(vec!["SETTING", "VALUE", "SOURCE"]);

    for spec in &plan.schema.settings {
        let override_value = plan
            .overrides
            .get(&spec.key)
            .filter(|v| !is_placeholder(v));

        let (value, source, color) = match (override_value, &spec.requirement) {
            (Some(value), _) => (value.as_str(), "override", Color::Green),
            (None, Requirement::Optional { default }) => {
                (default.as_str(), "default unless set on host", Color::Reset)
            }
            (None, Requirement::Required) => ("-", "must already be set on host", Color::Yellow),
        };
        let shown = if spec.sensitive && value != "-" {
            "<redacted>"
        } else {
            value
        };

        table.add_row(vec![
            Cell::new(&spec.key),
            Cell::new(shown),
            Cell::new(source).fg(color),
        ]);
    }

    println!("Environment file {}", plan.layout.env_file);
    println!("{}", table);
}
