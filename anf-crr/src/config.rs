//! Workflow configuration loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ReplicationSchedule;
use crate::resource_uri::build_path;
use crate::wait::{DEFAULT_INTERVAL, DEFAULT_RETRIES, PollSpec};

const NETWORK_PROVIDER: &str = "Microsoft.Network";

/// 4 TiB, the smallest capacity pool the service accepts.
pub const MIN_POOL_SIZE: u64 = 4 << 40;
/// 100 GiB, the smallest volume quota the service accepts.
pub const MIN_VOLUME_SIZE: u64 = 100 << 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One side of the replication pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub resource_group: String,
    pub location: String,
    pub vnet: String,
    pub subnet: String,
    pub account: String,
    pub pool: String,
    pub volume: String,
}

impl RegionConfig {
    /// Delegated subnet the volume is placed in.
    pub fn subnet_id(&self, subscription_id: &str) -> String {
        build_path(
            subscription_id,
            &self.resource_group,
            NETWORK_PROVIDER,
            &format!("virtualNetworks/{}/subnets/{}", self.vnet, self.subnet),
        )
    }

    fn validate(&self, side: &str) -> Result<(), ConfigError> {
        let fields = [
            ("resourceGroup", &self.resource_group),
            ("location", &self.location),
            ("vnet", &self.vnet),
            ("subnet", &self.subnet),
            ("account", &self.account),
            ("pool", &self.pool),
            ("volume", &self.volume),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("{side}.{name} is empty"))),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    pub interval_secs: u64,
    pub retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            retries: DEFAULT_RETRIES,
        }
    }
}

impl PollConfig {
    pub fn spec(&self) -> PollSpec {
        PollSpec::new(Duration::from_secs(self.interval_secs), self.retries)
    }
}

fn default_service_level() -> String {
    "Standard".to_string()
}

fn default_pool_size() -> u64 {
    MIN_POOL_SIZE
}

fn default_volume_size() -> u64 {
    MIN_VOLUME_SIZE
}

fn default_schedule() -> ReplicationSchedule {
    ReplicationSchedule::Hourly
}

/// Cross-region replication setup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrrConfig {
    pub subscription_id: String,
    pub primary: RegionConfig,
    pub secondary: RegionConfig,
    #[serde(default = "default_service_level")]
    pub service_level: String,
    /// Capacity pool size in bytes.
    #[serde(default = "default_pool_size")]
    pub pool_size: u64,
    /// Volume quota in bytes.
    #[serde(default = "default_volume_size")]
    pub volume_size: u64,
    #[serde(default = "default_schedule")]
    pub replication_schedule: ReplicationSchedule,
    /// Break the mirror once it is established.
    #[serde(default)]
    pub break_replication: bool,
    /// Delete everything that was created before exiting.
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub poll: PollConfig,
}

impl CrrConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_id.trim().is_empty() {
            return Err(ConfigError::Invalid("subscriptionId is empty".to_string()));
        }
        self.primary.validate("primary")?;
        self.secondary.validate("secondary")?;

        if self.pool_size < MIN_POOL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "poolSize {} is below the minimum of {MIN_POOL_SIZE} bytes",
                self.pool_size
            )));
        }
        if self.volume_size < MIN_VOLUME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "volumeSize {} is below the minimum of {MIN_VOLUME_SIZE} bytes",
                self.volume_size
            )));
        }
        if self.volume_size > self.pool_size {
            return Err(ConfigError::Invalid(
                "volumeSize does not fit in the capacity pool".to_string(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid("poll.intervalSecs must be positive".to_string()));
        }
        Ok(())
    }
}
