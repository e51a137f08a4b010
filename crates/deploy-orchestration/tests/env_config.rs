//! Environment file materialization against a scripted host

mod common;

use common::{ScriptedHost, ok};
use deploy_orchestration::{
    ConfigSchema, EnvironmentConfigurator, Error, RemoteLayout, ValueSource, merge_settings,
    parse_env_file,
};
use std::collections::BTreeMap;

const READ_ENV: &str = "cat /opt/worker/.env";

fn configurator() -> EnvironmentConfigurator {
    EnvironmentConfigurator::new(
        ConfigSchema::worker_defaults(),
        RemoteLayout::for_service("worker"),
    )
}

fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn uploaded_env(host: &ScriptedHost, index: usize) -> Vec<(String, String)> {
    let upload = &host.uploads()[index];
    assert!(upload.remote_path.starts_with("/tmp/deploy-env-"));
    parse_env_file(&String::from_utf8(upload.contents.clone()).unwrap())
}

fn value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[smol_potat::test]
async fn test_existing_value_is_preserved_and_defaults_fill_gaps() {
    let host = ScriptedHost::new().respond(
        READ_ENV,
        vec![ok(
            "LOG_LEVEL=debug\nUPSTREAM_API_URL=https://api.example.com\nCREDENTIAL_KEY=k-1\n",
        )],
    );

    let config = configurator()
        .materialize(&host, &overrides(&[("LOG_LEVEL", "warn")]))
        .await
        .unwrap();

    assert_eq!(config.get("LOG_LEVEL"), Some("debug"));
    assert_eq!(config.source("NAVIGATION_TIMEOUT_MS"), Some(ValueSource::Default));
    let written = uploaded_env(&host, 0);
    assert_eq!(value(&written, "LOG_LEVEL"), Some("debug"));
    assert_eq!(value(&written, "PORT"), Some("3001"));
    assert_eq!(value(&written, "HEADLESS"), Some("true"));
}

#[smol_potat::test]
async fn test_missing_required_setting_writes_nothing() {
    let host = ScriptedHost::new();

    let err = configurator()
        .materialize(&host, &overrides(&[("UPSTREAM_API_URL", "https://api.example.com")]))
        .await
        .unwrap_err();

    match err {
        Error::MissingSettings(keys) => assert_eq!(keys, vec!["CREDENTIAL_KEY".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(host.uploads().is_empty());
    assert!(!host.ran("install -m 600"));
}

#[smol_potat::test]
async fn test_hand_edited_secret_survives_redeploy() {
    let host = ScriptedHost::new().respond(
        READ_ENV,
        vec![
            ok(""),
            ok("UPSTREAM_API_URL=https://api.example.com\nCREDENTIAL_KEY=rotated-by-operator\n"),
        ],
    );
    let supplied = overrides(&[
        ("UPSTREAM_API_URL", "https://api.example.com"),
        ("CREDENTIAL_KEY", "initial-key"),
    ]);

    configurator().materialize(&host, &supplied).await.unwrap();
    assert_eq!(value(&uploaded_env(&host, 0), "CREDENTIAL_KEY"), Some("initial-key"));

    let config = configurator().materialize(&host, &supplied).await.unwrap();

    assert_eq!(config.get("CREDENTIAL_KEY"), Some("rotated-by-operator"));
    assert_eq!(
        value(&uploaded_env(&host, 1), "CREDENTIAL_KEY"),
        Some("rotated-by-operator")
    );
}

#[smol_potat::test]
async fn test_placeholder_on_host_is_replaced_by_override() {
    let host = ScriptedHost::new().respond(
        READ_ENV,
        vec![ok("UPSTREAM_API_URL=https://api.example.com\nCREDENTIAL_KEY=your-key-here\n")],
    );

    let config = configurator()
        .materialize(&host, &overrides(&[("CREDENTIAL_KEY", "real-key")]))
        .await
        .unwrap();

    assert_eq!(config.get("CREDENTIAL_KEY"), Some("real-key"));
    assert_eq!(config.source("CREDENTIAL_KEY"), Some(ValueSource::Override));
}

#[smol_potat::test]
async fn test_identical_file_is_not_rewritten() {
    let current = merge_settings(
        &ConfigSchema::worker_defaults(),
        &[],
        &overrides(&[
            ("UPSTREAM_API_URL", "https://api.example.com"),
            ("CREDENTIAL_KEY", "k-1"),
        ]),
    )
    .unwrap()
    .render();
    let host = ScriptedHost::new().respond(READ_ENV, vec![ok(&current)]);

    configurator()
        .materialize(&host, &BTreeMap::new())
        .await
        .unwrap();

    assert!(host.uploads().is_empty());
}

#[smol_potat::test]
async fn test_file_is_installed_atomically_with_restrictive_mode() {
    let host = ScriptedHost::new();

    configurator()
        .materialize(
            &host,
            &overrides(&[
                ("UPSTREAM_API_URL", "https://api.example.com"),
                ("CREDENTIAL_KEY", "sk-never-logged"),
            ]),
        )
        .await
        .unwrap();

    assert!(host.ran("install -m 600 -o worker -g worker"));
    assert!(host.ran("mv -f /opt/worker/.env.new /opt/worker/.env"));
    assert!(!host.commands().iter().any(|c| c.contains("sk-never-logged")));
}
