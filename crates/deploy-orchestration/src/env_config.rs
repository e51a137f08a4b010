//! Runtime environment file management.
//!
//! The service reads its settings from a `KEY=value` file on the target. The
//! file is produced from a [`ConfigSchema`], merged with whatever the host
//! already has so that hand-edited secrets survive every deployment.

use crate::{Error, RemoteHost, RemoteLayout, Result};
use command_executor::Command;
use command_executor::shell::shell_escape;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::{debug, info};
use uuid::Uuid;

/// Whether a setting must be resolved for the service to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Deployment fails if no value resolves
    Required,
    /// Falls back to a documented default
    Optional {
        /// Default value
        default: String,
    },
}

/// One recognized setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingSpec {
    /// Environment variable name
    pub key: String,
    /// Required or optional with default
    pub requirement: Requirement,
    /// Human description
    pub description: String,
    /// Value must never be logged or printed
    #[serde(default)]
    pub sensitive: bool,
}

impl SettingSpec {
    /// A required setting
    pub fn required(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            requirement: Requirement::Required,
            description: description.into(),
            sensitive: false,
        }
    }

    /// An optional setting with a default
    pub fn optional(
        key: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            requirement: Requirement::Optional {
                default: default.into(),
            },
            description: description.into(),
            sensitive: false,
        }
    }

    /// Mark the setting sensitive
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Default value, if optional
    pub fn default_value(&self) -> Option<&str> {
        match &self.requirement {
            Requirement::Required => None,
            Requirement::Optional { default } => Some(default),
        }
    }
}

/// Ordered list of recognized settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSchema {
    /// Settings in file order
    pub settings: Vec<SettingSpec>,
}

impl ConfigSchema {
    /// Create a schema
    pub fn new(settings: Vec<SettingSpec>) -> Self {
        Self { settings }
    }

    /// Settings of the meeting worker service
    pub fn worker_defaults() -> Self {
        Self::new(vec![
            SettingSpec::optional("PORT", "3001", "TCP port the service binds"),
            SettingSpec::optional("NODE_ENV", "production", "production|development"),
            SettingSpec::required("UPSTREAM_API_URL", "Base URL of the upstream API"),
            SettingSpec::required("CREDENTIAL_KEY", "Key used to authenticate upstream")
                .sensitive(),
            SettingSpec::optional("LOG_LEVEL", "info", "Log verbosity"),
            SettingSpec::optional("HEADLESS", "true", "Run the browser without a display"),
            SettingSpec::optional("BROWSER_ENGINE", "chromium", "Browser engine to launch"),
            SettingSpec::optional("LOCALE", "en-US", "Browser locale"),
            SettingSpec::optional(
                "NAVIGATION_TIMEOUT_MS",
                "45000",
                "Page navigation timeout in milliseconds",
            ),
            SettingSpec::optional(
                "SEND_STATUS_UPDATES",
                "false",
                "Report status transitions upstream",
            ),
        ])
    }

    /// Look up a setting
    pub fn get(&self, key: &str) -> Option<&SettingSpec> {
        self.settings.iter().find(|s| s.key == key)
    }
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self::worker_defaults()
    }
}

/// Where a value in the produced file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Kept from the file already on the host
    Existing,
    /// Supplied by the invoker
    Override,
    /// Schema default
    Default,
    /// Key unknown to the schema, kept verbatim
    Unmanaged,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueSource::Existing => "existing",
            ValueSource::Override => "override",
            ValueSource::Default => "default",
            ValueSource::Unmanaged => "unmanaged",
        };
        f.write_str(s)
    }
}

/// One line of the produced file
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Setting name
    pub key: String,
    /// Resolved value
    pub value: String,
    /// Where the value came from
    pub source: ValueSource,
    /// Whether the value must be redacted
    pub sensitive: bool,
}

impl ConfigEntry {
    fn display_value(&self) -> &str {
        if self.sensitive { "<redacted>" } else { &self.value }
    }
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEntry")
            .field("key", &self.key)
            .field("value", &self.display_value())
            .field("source", &self.source)
            .finish()
    }
}

/// The resolved contents of the environment file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    entries: Vec<ConfigEntry>,
}

impl RuntimeConfig {
    /// Entries in file order
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Where the value of `key` came from
    pub fn source(&self, key: &str) -> Option<ValueSource> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.source)
    }

    /// File contents, one `KEY=value` line per entry
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.key);
            out.push('=');
            out.push_str(&quote_value(&entry.value));
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{}={} ({})",
                entry.key,
                entry.display_value(),
                entry.source
            )?;
        }
        Ok(())
    }
}

/// Whether `value` is an unfilled template value rather than a real setting
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    v.is_empty()
        || v == "changeme"
        || v == "change-me"
        || (v.starts_with("your-") && v.ends_with("-here"))
        || (v.starts_with("your_") && v.ends_with("_here"))
        || (v.starts_with('<') && v.ends_with('>'))
        || (v.len() >= 3 && v.chars().all(|c| c == 'x'))
}

/// Name fragments that mark a setting nobody declared as a secret
const SENSITIVE_NAME_PARTS: &[&str] = &[
    "KEY",
    "SECRET",
    "TOKEN",
    "PASSWORD",
    "PASSWD",
    "CREDENTIAL",
    "PRIVATE",
];

/// Whether a key outside the schema should be treated as sensitive
pub fn looks_sensitive(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_NAME_PARTS.iter().any(|part| upper.contains(part))
}

/// Parse `KEY=value` lines, skipping blanks and comments
///
/// Accepts an optional `export ` prefix and single- or double-quoted values.
/// Later duplicates win, matching how the service's loader reads the file.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote_value(value.trim());
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => pairs.push((key.to_string(), value)),
        }
    }
    pairs
}

fn unquote_value(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some(other) => out.push(other),
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@,+%=".contains(c));
    if plain {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Resolve every schema setting against the existing file and the overrides
///
/// Per setting: an existing non-placeholder value is kept, else a
/// non-placeholder override is used, else the default. Required settings
/// that resolve to nothing are collected and reported together.
pub fn merge_settings(
    schema: &ConfigSchema,
    existing: &[(String, String)],
    overrides: &BTreeMap<String, String>,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| {
        existing
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let mut entries = Vec::with_capacity(schema.settings.len());
    let mut missing = Vec::new();

    for spec in &schema.settings {
        let resolved = if let Some(value) = lookup(&spec.key).filter(|v| !is_placeholder(v)) {
            Some((value.to_string(), ValueSource::Existing))
        } else if let Some(value) = overrides.get(&spec.key).filter(|v| !is_placeholder(v)) {
            Some((value.clone(), ValueSource::Override))
        } else {
            spec.default_value()
                .map(|d| (d.to_string(), ValueSource::Default))
        };

        match resolved {
            Some((value, source)) => entries.push(ConfigEntry {
                key: spec.key.clone(),
                value,
                source,
                sensitive: spec.sensitive,
            }),
            None => missing.push(spec.key.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingSettings(missing));
    }

    for (key, value) in existing {
        if schema.get(key).is_none() {
            entries.push(ConfigEntry {
                key: key.clone(),
                value: value.clone(),
                source: ValueSource::Unmanaged,
                sensitive: looks_sensitive(key),
            });
        }
    }

    Ok(RuntimeConfig { entries })
}

/// Produces the environment file on the target
pub struct EnvironmentConfigurator {
    schema: ConfigSchema,
    layout: RemoteLayout,
}

impl EnvironmentConfigurator {
    /// Create a configurator writing to `layout.env_file`
    pub fn new(schema: ConfigSchema, layout: RemoteLayout) -> Self {
        Self { schema, layout }
    }

    /// Schema in use
    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Read the current env file; empty when it does not exist yet
    pub async fn read_existing(&self, host: &dyn RemoteHost) -> Result<String> {
        let path = shell_escape(&self.layout.env_file);
        let result = host
            .run_privileged(Command::shell(format!(
                "if [ -f {path} ]; then cat {path}; fi"
            )))
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {}", self.layout.env_file, e)))?;
        if !result.success() {
            return Err(Error::Config(format!(
                "cannot read {}: {}",
                self.layout.env_file,
                result.output_tail(3)
            )));
        }
        Ok(result.stdout)
    }

    /// Merge and write the env file, returning what was written
    ///
    /// Nothing is written when a required setting is unresolved, or when the
    /// merged content equals the file already on the host.
    pub async fn materialize(
        &self,
        host: &dyn RemoteHost,
        overrides: &BTreeMap<String, String>,
    ) -> Result<RuntimeConfig> {
        let current = self.read_existing(host).await?;
        let config = merge_settings(&self.schema, &parse_env_file(&current), overrides)?;

        for entry in config.entries() {
            debug!("{} <- {}", entry.key, entry.source);
        }

        let rendered = config.render();
        if rendered == current {
            info!("{} is up to date", self.layout.env_file);
            return Ok(config);
        }

        self.write(host, &rendered).await?;
        info!(
            "Wrote {} ({} settings)",
            self.layout.env_file,
            config.entries().len()
        );
        Ok(config)
    }

    async fn write(&self, host: &dyn RemoteHost, contents: &str) -> Result<()> {
        let mut local = tempfile::NamedTempFile::new()
            .map_err(|e| Error::Config(format!("cannot create temp file: {}", e)))?;
        local
            .write_all(contents.as_bytes())
            .and_then(|_| local.flush())
            .map_err(|e| Error::Config(format!("cannot write temp file: {}", e)))?;

        let remote_tmp = format!("/tmp/deploy-env-{}", Uuid::new_v4());
        let upload = host
            .upload(local.path(), &remote_tmp)
            .await
            .map_err(|e| Error::Config(format!("cannot upload env file: {}", e)))?;
        if !upload.success() {
            return Err(Error::Config(format!(
                "cannot upload env file: {}",
                upload.output_tail(3)
            )));
        }

        let user = shell_escape(&self.layout.service_user);
        let target = shell_escape(&self.layout.env_file);
        let next = shell_escape(&format!("{}.new", self.layout.env_file));
        let tmp = shell_escape(&remote_tmp);
        let result = host
            .run_privileged(Command::shell(format!(
                "install -m 600 -o {user} -g {user} {tmp} {next} && mv -f {next} {target}; status=$?; rm -f {tmp}; exit $status"
            )))
            .await
            .map_err(|e| Error::Config(format!("cannot install env file: {}", e)))?;
        if !result.success() {
            return Err(Error::Config(format!(
                "cannot install {}: {}",
                self.layout.env_file,
                result.output_tail(3)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholders() {
        for value in ["", "  ", "your-key-here", "YOUR-API-KEY-HERE", "changeme", "<token>", "xxxx"] {
            assert!(is_placeholder(value), "{value:?} should be a placeholder");
        }
        for value in ["sk-live-123", "https://api.example.com", "x", "0"] {
            assert!(!is_placeholder(value), "{value:?} should be real");
        }
    }

    #[test]
    fn test_parse_env_file() {
        let pairs = parse_env_file(
            "# comment\nexport PORT=4000\nLOG_LEVEL = debug # noisy\nNAME=\"a \\\"b\\\"\"\nRAW='x y'\n\nPORT=4001\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("PORT".to_string(), "4001".to_string()),
                ("LOG_LEVEL".to_string(), "debug".to_string()),
                ("NAME".to_string(), "a \"b\"".to_string()),
                ("RAW".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn test_existing_value_beats_default_and_override() {
        let existing = vec![("LOG_LEVEL".to_string(), "debug".to_string())];
        let config = merge_settings(
            &ConfigSchema::worker_defaults(),
            &existing,
            &overrides(&[
                ("LOG_LEVEL", "warn"),
                ("UPSTREAM_API_URL", "https://api.example.com"),
                ("CREDENTIAL_KEY", "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.get("LOG_LEVEL"), Some("debug"));
        assert_eq!(config.source("LOG_LEVEL"), Some(ValueSource::Existing));
        assert_eq!(config.get("PORT"), Some("3001"));
        assert_eq!(config.source("PORT"), Some(ValueSource::Default));
        assert_eq!(config.source("CREDENTIAL_KEY"), Some(ValueSource::Override));
    }

    #[test]
    fn test_placeholder_existing_value_is_replaced() {
        let existing = vec![
            ("CREDENTIAL_KEY".to_string(), "your-key-here".to_string()),
            ("UPSTREAM_API_URL".to_string(), "https://api.example.com".to_string()),
        ];
        let config = merge_settings(
            &ConfigSchema::worker_defaults(),
            &existing,
            &overrides(&[("CREDENTIAL_KEY", "real-key")]),
        )
        .unwrap();
        assert_eq!(config.get("CREDENTIAL_KEY"), Some("real-key"));
    }

    #[test]
    fn test_missing_required_settings_are_named() {
        let err = merge_settings(
            &ConfigSchema::worker_defaults(),
            &[],
            &overrides(&[("CREDENTIAL_KEY", "your-key-here")]),
        )
        .unwrap_err();
        match err {
            Error::MissingSettings(keys) => {
                assert_eq!(keys, vec!["UPSTREAM_API_URL", "CREDENTIAL_KEY"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unmanaged_keys_are_kept_after_schema_keys() {
        let existing = vec![
            ("EXTRA_FLAG".to_string(), "on".to_string()),
            ("UPSTREAM_API_URL".to_string(), "https://api.example.com".to_string()),
            ("CREDENTIAL_KEY".to_string(), "k".to_string()),
        ];
        let config =
            merge_settings(&ConfigSchema::worker_defaults(), &existing, &BTreeMap::new()).unwrap();
        let last = config.entries().last().unwrap();
        assert_eq!(last.key, "EXTRA_FLAG");
        assert_eq!(last.source, ValueSource::Unmanaged);
    }

    #[test]
    fn test_render_round_trips_through_parser() {
        let config = merge_settings(
            &ConfigSchema::worker_defaults(),
            &[],
            &overrides(&[
                ("UPSTREAM_API_URL", "https://api.example.com/v1"),
                ("CREDENTIAL_KEY", "has space \"and quotes\""),
            ]),
        )
        .unwrap();
        let parsed = parse_env_file(&config.render());
        let key = parsed.iter().find(|(k, _)| k == "CREDENTIAL_KEY").unwrap();
        assert_eq!(key.1, "has space \"and quotes\"");
        assert!(config.render().starts_with("PORT=3001\nNODE_ENV=production\n"));
    }

    #[test]
    fn test_sensitive_values_are_redacted() {
        let config = merge_settings(
            &ConfigSchema::worker_defaults(),
            &[],
            &overrides(&[
                ("UPSTREAM_API_URL", "https://api.example.com"),
                ("CREDENTIAL_KEY", "sk-very-secret"),
            ]),
        )
        .unwrap();
        assert!(!config.to_string().contains("sk-very-secret"));
        assert!(!format!("{:?}", config).contains("sk-very-secret"));
        assert!(config.to_string().contains("CREDENTIAL_KEY=<redacted>"));
    }

    #[test]
    fn test_hand_added_secrets_are_redacted() {
        let existing = vec![
            ("UPSTREAM_API_URL".to_string(), "https://api.example.com".to_string()),
            ("CREDENTIAL_KEY".to_string(), "k".to_string()),
            ("STRIPE_KEY".to_string(), "sk_live_abc123".to_string()),
            ("db_password".to_string(), "hunter2".to_string()),
            ("EXTRA_FLAG".to_string(), "on".to_string()),
        ];
        let config =
            merge_settings(&ConfigSchema::worker_defaults(), &existing, &BTreeMap::new()).unwrap();

        let shown = config.to_string();
        let debug = format!("{:?}", config);
        for secret in ["sk_live_abc123", "hunter2"] {
            assert!(!shown.contains(secret));
            assert!(!debug.contains(secret));
        }
        assert!(shown.contains("STRIPE_KEY=<redacted> (unmanaged)"));
        assert!(shown.contains("EXTRA_FLAG=on"));
        assert!(config.render().contains("STRIPE_KEY=sk_live_abc123\n"));
        assert!(looks_sensitive("api_token"));
        assert!(!looks_sensitive("LOG_FORMAT"));
    }
}
