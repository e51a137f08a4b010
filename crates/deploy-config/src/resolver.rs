//! Environment variable resolver
//!
//! Setting values may reference the deployer's own environment with
//! `${VAR}` or `${VAR:-default}`.

use crate::{Config, ConfigError, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Context for resolving variables
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    /// Variables visible to `${VAR}` references
    pub env_vars: HashMap<String, String>,
}

impl ResolutionContext {
    /// Context over the current process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Context with no variables at all
    pub fn empty() -> Self {
        Self {
            env_vars: HashMap::new(),
        }
    }

    /// Add or update a variable
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve all `${VAR}` references in a string
///
/// Fails with [`ConfigError::EnvVarNotFound`] listing every variable that has
/// neither a value nor a default.
pub fn resolve_string(input: &str, context: &ResolutionContext) -> Result<String> {
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in VAR_REF.captures_iter(input) {
        let full_match = &cap[0];
        let var_expr = &cap[1];

        let (var_name, default_value) = match var_expr.find(":-") {
            Some(pos) => (&var_expr[..pos], Some(&var_expr[pos + 2..])),
            None => (var_expr, None),
        };

        if let Some(value) = context.env_vars.get(var_name) {
            result = result.replace(full_match, value);
        } else if let Some(default) = default_value {
            result = result.replace(full_match, default);
        } else {
            errors.push(var_name.to_string());
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::EnvVarNotFound(errors.join(", ")));
    }

    Ok(result)
}

/// Outcome of resolving the `settings` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsResolution {
    /// Settings that resolved
    pub values: BTreeMap<String, String>,
    /// Settings left out, with the variables they were missing
    pub unresolved: BTreeMap<String, String>,
}

/// Resolve every setting, leaving out the ones that reference unset variables
pub fn resolve_settings(
    settings: &BTreeMap<String, String>,
    context: &ResolutionContext,
) -> SettingsResolution {
    let mut resolution = SettingsResolution::default();
    for (key, raw) in settings {
        match resolve_string(raw, context) {
            Ok(value) => {
                resolution.values.insert(key.clone(), value);
            }
            Err(ConfigError::EnvVarNotFound(vars)) => {
                resolution.unresolved.insert(key.clone(), vars);
            }
            Err(other) => {
                resolution.unresolved.insert(key.clone(), other.to_string());
            }
        }
    }
    resolution
}

/// Describe every unresolvable reference in the configuration
pub fn validate_references(config: &Config, context: &ResolutionContext) -> Vec<String> {
    resolve_settings(&config.settings, context)
        .unresolved
        .into_iter()
        .map(|(key, vars)| format!("settings.{} references unset variable(s): {}", key, vars))
        .collect()
}
