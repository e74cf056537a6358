//! Configuration parsing and structures
//!
//! An [`AdapterConfig`] is built once at the boundary, either from the
//! process environment ([`AdapterConfig::from_env`]) or from a YAML file,
//! and then shared by every open file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::env::{self, Environment, ProcessEnv};

/// Trusted CA directory used when none is configured
pub const DEFAULT_CERT_DIR: &str = "/etc/grid-security/certificates";

/// Default number of byte ranges sent in a single request
pub const DEFAULT_MAX_RANGES_PER_REQUEST: usize = 64;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdapterConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Raw client debug level, parsed by the log-level configurator
    #[serde(default, deserialize_with = "deserialize_debug")]
    pub debug: Option<String>,

    /// X.509 credential locations
    #[serde(default)]
    pub x509: X509Settings,

    /// Storage client tuning
    #[serde(default)]
    pub client: ClientConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Locations of X.509 credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct X509Settings {
    /// Proxy certificate, used as both certificate and key
    pub user_proxy: Option<PathBuf>,

    /// User certificate
    pub user_cert: Option<PathBuf>,

    /// User key
    pub user_key: Option<PathBuf>,

    /// Trusted CA directory
    pub cert_dir: Option<PathBuf>,
}

impl X509Settings {
    /// Configured CA directory, or the grid-security default
    pub fn cert_dir_or_default(&self) -> PathBuf {
        self.cert_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_DIR))
    }
}

/// Storage client tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Connect timeout for new sessions (e.g. "30s")
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum byte ranges per vectored request
    #[serde(default = "default_max_ranges")]
    pub max_ranges_per_request: usize,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_ranges() -> usize {
    DEFAULT_MAX_RANGES_PER_REQUEST
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            max_ranges_per_request: default_max_ranges(),
        }
    }
}

/// Accept `debug: 2` as well as `debug: "0x2"`
fn deserialize_debug<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDebug {
        Number(i64),
        Text(String),
    }

    Ok(Option::<RawDebug>::deserialize(deserializer)?.map(|raw| match raw {
        RawDebug::Number(n) => n.to_string(),
        RawDebug::Text(s) => s,
    }))
}

impl AdapterConfig {
    /// Build configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_environment(&ProcessEnv)
    }

    /// Build configuration from an explicit environment
    pub fn from_environment(env: &dyn Environment) -> Self {
        let mut config = Self::default();
        config.apply_environment(env);
        config
    }

    /// Overlay variables that are set in `env` onto this configuration
    pub fn apply_environment(&mut self, env: &dyn Environment) {
        if let Some(debug) = env.var(env::DEBUG_VAR) {
            self.debug = Some(debug);
        }
        if let Some(proxy) = env.var(env::X509_USER_PROXY) {
            self.x509.user_proxy = Some(PathBuf::from(proxy));
        }
        if let Some(cert) = env.var(env::X509_USER_CERT) {
            self.x509.user_cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = env.var(env::X509_USER_KEY) {
            self.x509.user_key = Some(PathBuf::from(key));
        }
        if let Some(dir) = env.var(env::X509_CERT_DIR) {
            self.x509.cert_dir = Some(PathBuf::from(dir));
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_yaml(&content, &ProcessEnv)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}` from `env`
    pub fn from_yaml(content: &str, env: &dyn Environment) -> Result<Self, ConfigError> {
        let content = env::substitute_env_vars(content, env)?;
        let config: AdapterConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.max_ranges_per_request == 0 {
            return Err(ConfigError::ValidationError(
                "client.max_ranges_per_request must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    #[test]
    fn test_from_environment_reads_every_variable() {
        let env = MapEnv::new()
            .with("Davix_Debug", "3")
            .with("X509_USER_PROXY", "/tmp/x509up_u1000")
            .with("X509_USER_CERT", "/home/u/.globus/usercert.pem")
            .with("X509_USER_KEY", "/home/u/.globus/userkey.pem")
            .with("X509_CERT_DIR", "/opt/certs");

        let config = AdapterConfig::from_environment(&env);
        assert_eq!(config.debug.as_deref(), Some("3"));
        assert_eq!(
            config.x509.user_proxy,
            Some(PathBuf::from("/tmp/x509up_u1000"))
        );
        assert_eq!(
            config.x509.user_cert,
            Some(PathBuf::from("/home/u/.globus/usercert.pem"))
        );
        assert_eq!(
            config.x509.user_key,
            Some(PathBuf::from("/home/u/.globus/userkey.pem"))
        );
        assert_eq!(config.x509.cert_dir_or_default(), PathBuf::from("/opt/certs"));
    }

    #[test]
    fn test_cert_dir_default() {
        let config = AdapterConfig::from_environment(&MapEnv::new());
        assert_eq!(
            config.x509.cert_dir_or_default(),
            PathBuf::from(DEFAULT_CERT_DIR)
        );
        assert!(config.debug.is_none());
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
logging:
  level: debug
debug: 2
x509:
  user_proxy: ${GRID_HOME}/proxy.pem
  cert_dir: /etc/certs
client:
  connect_timeout: 5s
  max_ranges_per_request: 16
"#;
        let env = MapEnv::new().with("GRID_HOME", "/opt/grid");
        let config = AdapterConfig::from_yaml(yaml, &env).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.debug.as_deref(), Some("2"));
        assert_eq!(
            config.x509.user_proxy,
            Some(PathBuf::from("/opt/grid/proxy.pem"))
        );
        assert_eq!(config.client.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.client.max_ranges_per_request, 16);
    }

    #[test]
    fn test_debug_accepts_string() {
        let config = AdapterConfig::from_yaml("debug: \"0x3\"\n", &MapEnv::new()).unwrap();
        assert_eq!(config.debug.as_deref(), Some("0x3"));
    }

    #[test]
    fn test_environment_overlays_file() {
        let mut config =
            AdapterConfig::from_yaml("x509:\n  user_cert: /from/file.pem\n", &MapEnv::new())
                .unwrap();
        config.apply_environment(&MapEnv::new().with("X509_USER_CERT", "/from/env.pem"));
        assert_eq!(config.x509.user_cert, Some(PathBuf::from("/from/env.pem")));
    }

    #[test]
    fn test_zero_ranges_rejected() {
        let result = AdapterConfig::from_yaml(
            "client:\n  max_ranges_per_request: 0\n",
            &MapEnv::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_substitution_variable() {
        let err = AdapterConfig::from_yaml("x509:\n  user_proxy: ${NOPE_12345}\n", &MapEnv::new())
            .unwrap_err();
        assert!(err.to_string().contains("NOPE_12345"));
    }
}
