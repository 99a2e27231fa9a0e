use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Configuration store URL cannot be empty")]
    EmptyConfigStoreUrl,

    #[error("Cluster-metrics key prefix cannot be empty")]
    EmptyClusterMetricPrefix,

    #[error("Alias refresh interval cannot be 0")]
    InvalidAliasRefresh,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3200,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConfigStore {
    /// Base URL of the external configuration store.
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tsdb {
    pub address: Url,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub chunk_size: u32,
}

fn default_content_type() -> String {
    "application/json".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterMetrics {
    pub redis_url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "plexus".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub config_store: ConfigStore,
    /// Optional raw time-series-DB passthrough endpoint.
    pub tsdb: Option<Tsdb>,
    /// Optional direct-query backend for pre-aggregated cluster metrics.
    pub cluster_metrics: Option<ClusterMetrics>,
    #[serde(default = "default_alias_refresh_secs")]
    pub alias_refresh_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    pub metrics: Option<MetricsConfig>,
}

fn default_alias_refresh_secs() -> u64 {
    60
}

fn default_query_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.config_store.url.is_empty() {
            return Err(ValidationError::EmptyConfigStoreUrl);
        }
        if let Some(cluster_metrics) = &self.cluster_metrics
            && cluster_metrics.prefix.is_empty()
        {
            return Err(ValidationError::EmptyClusterMetricPrefix);
        }
        if self.alias_refresh_secs == 0 {
            return Err(ValidationError::InvalidAliasRefresh);
        }
        Ok(())
    }
}
