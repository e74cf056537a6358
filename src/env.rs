//! Environment access
//!
//! All reads of the process environment go through the [`Environment`]
//! trait so that configuration can be built from a fixed map in tests.
//! Configuration files may also reference variables with `${VAR_NAME}`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ConfigError;

/// Client debug level (0-3, 4 and above for everything)
pub const DEBUG_VAR: &str = "Davix_Debug";
/// Proxy certificate used as both certificate and key
pub const X509_USER_PROXY: &str = "X509_USER_PROXY";
pub const X509_USER_CERT: &str = "X509_USER_CERT";
/// Only consulted once a certificate path has been found
pub const X509_USER_KEY: &str = "X509_USER_KEY";
/// Directory of trusted CA certificates
pub const X509_CERT_DIR: &str = "X509_CERT_DIR";

/// Source of environment variables
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl Environment for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Regex pattern for matching environment variable references: ${VAR_NAME}
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
});

/// Substitute `${VAR_NAME}` references in `input` from `env`.
///
/// Returns an error listing every missing variable.
pub fn substitute_env_vars(input: &str, env: &dyn Environment) -> Result<String, ConfigError> {
    let mut missing_vars: Vec<String> = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        match env.var(var_name) {
            Some(value) => value,
            None => {
                if !missing_vars.iter().any(|v| v == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing_vars.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}
