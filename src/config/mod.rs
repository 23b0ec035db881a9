//! Configuration for fleetroll
//!
//! Loaded from `~/.fleetroll/config.yaml`. A missing file means defaults.
//!
//! ```yaml
//! regions: [us-east-1, eu-west-1]
//! production-accounts: ["111122223333"]
//! production-margin: 4
//! timing:
//!   poll-interval-secs: 90
//! default-profile: staging
//! profiles:
//!   staging:
//!     backend: gateway
//!     url: https://fleet-gateway.internal
//!     api-key-env: FLEET_GATEWAY_TOKEN
//!   rehearsal:
//!     backend: inventory
//!     path: ~/fleets/rehearsal.yaml
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::{CloudError, CloudHandles, GatewayClient, InMemoryCloud};
use crate::scaling::{ScalingSettings, DEFAULT_SUSPENDED_PROCESSES};
use crate::wait::RetryPolicy;

/// Default config file location: ~/.fleetroll/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetroll")
        .join("config.yaml")
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("No profile selected and no default-profile configured")]
    NoProfile,

    #[error("Environment variable {0} holding the gateway API key is not set")]
    MissingApiKey(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Backend error: {0}")]
    Backend(#[from] CloudError),
}

/// Sleep intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Timing {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            step_delay_secs: default_step_delay(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

fn default_poll_interval() -> u64 {
    90
}

fn default_step_delay() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    30
}

/// Where a profile's cloud calls go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum BackendConfig {
    /// HTTP fleet-control gateway
    Gateway {
        url: String,
        /// Environment variable holding the bearer token
        #[serde(rename = "api-key-env", skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
    },
    /// Simulated cloud seeded from an inventory file
    Inventory { path: String },
}

impl BackendConfig {
    /// Build the capability handles for this backend
    pub fn connect(&self) -> Result<CloudHandles, ConfigError> {
        match self {
            BackendConfig::Gateway { url, api_key_env } => {
                let api_key = match api_key_env {
                    Some(var) => Some(
                        std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var.clone()))?,
                    ),
                    None => None,
                };
                let client = GatewayClient::new(url, api_key)?;
                Ok(CloudHandles::from_backend(Arc::new(client)))
            }
            BackendConfig::Inventory { path } => {
                let cloud = InMemoryCloud::from_inventory_file(&expand_path(path))?;
                Ok(CloudHandles::from_backend(Arc::new(cloud)))
            }
        }
    }
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    /// Account ids that switch on production safety margins
    #[serde(default)]
    pub production_accounts: Vec<String>,

    #[serde(default = "default_production_margin")]
    pub production_margin: u32,

    #[serde(default = "default_suspended_processes")]
    pub suspended_processes: Vec<String>,

    #[serde(default)]
    pub timing: Timing,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub profiles: HashMap<String, BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            production_accounts: Vec::new(),
            production_margin: default_production_margin(),
            suspended_processes: default_suspended_processes(),
            timing: Timing::default(),
            default_profile: None,
            profiles: HashMap::new(),
        }
    }
}

fn default_regions() -> Vec<String> {
    vec!["us-east-1".to_string(), "eu-west-1".to_string()]
}

fn default_production_margin() -> u32 {
    4
}

fn default_suspended_processes() -> Vec<String> {
    DEFAULT_SUSPENDED_PROCESSES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.regions.is_empty() {
        return Err(ConfigError::Invalid("regions must not be empty".to_string()));
    }
    if config.timing.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "poll-interval-secs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Pick the backend for `--profile`, falling back to `default-profile`
    pub fn profile(&self, requested: Option<&str>) -> Result<&BackendConfig, ConfigError> {
        let name = requested
            .or(self.default_profile.as_deref())
            .ok_or(ConfigError::NoProfile)?;
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))
    }

    /// Controller settings with a CLI-supplied step size
    pub fn scaling_settings(&self, scaler: u32) -> ScalingSettings {
        ScalingSettings {
            scaler,
            step_delay: Duration::from_secs(self.timing.step_delay_secs),
            settle_delay: Duration::from_secs(self.timing.settle_delay_secs),
            production_margin: self.production_margin,
            suspended_processes: self.suspended_processes.clone(),
        }
    }

    /// Gate retry policy; `max_polls` bounds the number of passes
    pub fn retry_policy(&self, max_polls: Option<u32>) -> RetryPolicy {
        let interval = Duration::from_secs(self.timing.poll_interval_secs);
        match max_polls {
            Some(max) => RetryPolicy::bounded(interval, max),
            None => RetryPolicy::unbounded(interval),
        }
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load config from a specific path
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.regions, vec!["us-east-1", "eu-west-1"]);
        assert_eq!(config.production_margin, 4);
        assert_eq!(config.timing.poll_interval_secs, 90);
        assert_eq!(
            config.suspended_processes,
            vec!["ScheduledActions", "AlarmNotification", "AZRebalance"]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
regions: [ap-southeast-2]
production-accounts: ["111122223333"]
production-margin: 2
timing:
  poll-interval-secs: 15
default-profile: staging
profiles:
  staging:
    backend: gateway
    url: https://gateway.example.com
    api-key-env: FLEET_TOKEN
  rehearsal:
    backend: inventory
    path: ~/fleets.yaml
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.regions, vec!["ap-southeast-2"]);
        assert_eq!(config.production_accounts, vec!["111122223333"]);
        assert_eq!(config.timing.poll_interval_secs, 15);
        assert_eq!(config.timing.step_delay_secs, 30);

        assert_eq!(
            config.profile(None).unwrap(),
            &BackendConfig::Gateway {
                url: "https://gateway.example.com".to_string(),
                api_key_env: Some("FLEET_TOKEN".to_string()),
            }
        );
        assert_eq!(
            config.profile(Some("rehearsal")).unwrap(),
            &BackendConfig::Inventory {
                path: "~/fleets.yaml".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_profile() {
        let config = Config::default();
        assert!(matches!(config.profile(None), Err(ConfigError::NoProfile)));
        assert!(matches!(
            config.profile(Some("prod")),
            Err(ConfigError::ProfileNotFound(name)) if name == "prod"
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            parse_config("regions: []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("timing:\n  poll-interval-secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("regions: 5"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_settings_and_policy() {
        let config = parse_config("production-margin: 6\ntiming:\n  step-delay-secs: 5").unwrap();
        let settings = config.scaling_settings(3);
        assert_eq!(settings.scaler, 3);
        assert_eq!(settings.production_margin, 6);
        assert_eq!(settings.step_delay, Duration::from_secs(5));

        assert_eq!(config.retry_policy(None).max_attempts, None);
        assert_eq!(config.retry_policy(Some(4)).max_attempts, Some(4));
        assert_eq!(config.retry_policy(None).interval, Duration::from_secs(90));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config_from(Path::new("/nonexistent/fleetroll/config.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "regions: [us-west-2]").unwrap();
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.regions, vec!["us-west-2"]);
    }

    #[test]
    fn test_inventory_backend_connects() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "account-id: \"123456789012\"\nfleets:\n  - name: web\n    region: us-east-1\n    capacity: {{min: 1, desired: 2, max: 4}}"
        )
        .unwrap();
        let backend = BackendConfig::Inventory {
            path: file.path().display().to_string(),
        };
        let handles = backend.connect().unwrap();
        let account = tokio_test::block_on(handles.identity.account_id()).unwrap();
        assert_eq!(account, "123456789012");
    }

    #[test]
    fn test_gateway_backend_requires_key_env() {
        let backend = BackendConfig::Gateway {
            url: "https://gateway.example.com".to_string(),
            api_key_env: Some("FLEETROLL_TEST_UNSET_TOKEN_VAR".to_string()),
        };
        assert!(matches!(
            backend.connect(),
            Err(ConfigError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/etc/fleets.yaml"), PathBuf::from("/etc/fleets.yaml"));
        assert!(!expand_path("~/fleets.yaml").to_string_lossy().starts_with('~'));
    }
}
