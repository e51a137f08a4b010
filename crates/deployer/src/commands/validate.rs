use anyhow::{Context, Result};
use deploy_config::parser;
use deploy_config::resolver::{ResolutionContext, validate_references};
use std::path::Path;

pub async fn run(config_path: &Path, strict: bool) -> Result<()> {
    println!("Validating {}...", config_path.display());

    if !config_path.exists() {
        println!("✓ No configuration file, built-in defaults apply");
        return Ok(());
    }

    let config = parser::parse_file(config_path).context("Failed to parse configuration")?;

    println!("✓ Configuration valid");
    println!("  Version: {}", config.version);
    println!("  Service: {}", config.service.name);
    println!("  Install dir: {}", config.layout().install_dir);
    println!("  Exclusions: {}", config.manifest()?.patterns().len());
    println!("  Settings: {}", config.settings.len());

    let problems = validate_references(&config, &ResolutionContext::new());
    for problem in &problems {
        println!("  ⚠ {}", problem);
    }

    if strict && !problems.is_empty() {
        anyhow::bail!(
            "{} setting(s) reference unset environment variables",
            problems.len()
        );
    }

    Ok(())
}
