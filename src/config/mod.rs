// ABOUTME: Configuration types and parsing for pdo.yml.
// ABOUTME: Handles YAML parsing, discovery, and the per-rollout settings block.

mod deserialize;
mod driver;
mod env_value;
mod init;
mod metrics;
mod retry;
mod rollout;
mod smoke;

pub use driver::DriverConfig;
pub use env_value::{EnvValue, resolve_env_map};
pub use init::init_config;
pub use metrics::MetricsConfig;
pub use retry::RetryPolicy;
pub use rollout::{RolloutConfig, ValidationError};
pub use smoke::{SmokeAssertion, SmokeConfig};

use crate::error::{Error, Result};
use crate::types::ServiceName;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "pdo.yml";
pub const CONFIG_FILENAME_ALT: &str = "pdo.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".pdo/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceName,

    /// Replica count for every variant of this service.
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_hooks_dir")]
    pub hooks_dir: PathBuf,

    #[serde(default)]
    pub rollout: RolloutConfig,

    pub driver: DriverConfig,

    pub metrics: MetricsConfig,

    pub smoke: SmokeConfig,
}

fn default_replicas() -> u32 {
    2
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pdo/state")
}

fn default_hooks_dir() -> PathBuf {
    PathBuf::from(".pdo/hooks")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        // Relative directories are relative to the config file, not the cwd
        if let Some(base) = path.parent() {
            config.state_dir = base.join(&config.state_dir);
            config.hooks_dir = base.join(&config.hooks_dir);
        }
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn check(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(Error::InvalidConfig("replicas must be at least 1".to_string()));
        }
        self.rollout
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn template() -> Self {
        Config {
            service: ServiceName::new("my-service").expect("template service name is valid"),
            replicas: default_replicas(),
            state_dir: default_state_dir(),
            hooks_dir: default_hooks_dir(),
            rollout: RolloutConfig::default(),
            driver: DriverConfig::template(),
            metrics: MetricsConfig::template(),
            smoke: SmokeConfig::template(),
        }
    }
}
