use crate::commands::{TargetArgs, connect, load_config};
use anyhow::{Context, Result};
use deploy_config::Config;
use deploy_orchestration::{
    ConfigSchema, EnvironmentConfigurator, HealthSnapshot, HealthVerifier, RemoteHost,
    RemoteHttpProbe, parse_env_file,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub async fn run(config_path: &Path, target: TargetArgs) -> Result<()> {
    target.ensure_present();
    let (config, _) = load_config(config_path)?;
    let target = target.require(&config);
    let host = connect(&config, &target)?;

    let snapshot = wait_healthy(&config, host).await?;
    print_snapshot(&config.service.name, &snapshot);
    Ok(())
}

/// Poll the service's liveness endpoint on `host` until it reports healthy
pub async fn wait_healthy(config: &Config, host: Arc<dyn RemoteHost>) -> Result<HealthSnapshot> {
    let settings = config.health_settings();
    let port = service_port(config, host.as_ref()).await;
    let probe = RemoteHttpProbe::new(host, port, &settings.path);

    HealthVerifier::from_settings(&settings)
        .verify(&probe)
        .await
        .context("Service did not become healthy")
}

pub fn print_snapshot(service: &str, snapshot: &HealthSnapshot) {
    println!(
        "✓ {} is {} ({} active meetings, reported at {})",
        service,
        snapshot.status,
        snapshot.active_meetings,
        snapshot.timestamp.to_rfc3339()
    );
}

/// The port the service listens on, read from the env file on the host
async fn service_port(config: &Config, host: &dyn RemoteHost) -> u16 {
    let fallback = config.health.port;
    let configurator = EnvironmentConfigurator::new(ConfigSchema::worker_defaults(), config.layout());
    let contents = match configurator.read_existing(host).await {
        Ok(contents) => contents,
        Err(e) => {
            debug!("Could not read env file, probing port {}: {}", fallback, e);
            return fallback;
        }
    };
    parse_env_file(&contents)
        .into_iter()
        .rev()
        .find(|(key, _)| key == "PORT")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(fallback)
}
