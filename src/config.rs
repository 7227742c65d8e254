//! Cluster configuration.
//!
//! A broker is configured from a TOML, YAML or JSON file (chosen by file
//! extension), after which a handful of `CLUSTERQ_*` environment variables
//! may override individual values. Every field has a default, so a file only
//! needs to name what differs.
//!
//! ```toml
//! [broker]
//! component_id = "broker-1"
//! port = 20001
//! domain = "broker-1.cluster"
//!
//! [election]
//! mode = "bully"
//! id = 1
//! port = 20101
//! domain = "leader.cluster"
//! peer_hosts = ["127.0.0.1", "127.0.0.1"]
//! peer_ports = [20102, 20103]
//! peer_ids = [2, 3]
//! heartbeat_timeout_ms = 2000
//! ```

use crate::broker::leader::peer::Peer;
use crate::broker::leader::state::ElectionMode;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Unsupported config extension: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub component_id: String,
    pub host: String,
    /// Messaging port.
    pub port: u16,
    /// Domain registered when election is disabled.
    pub domain: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            component_id: "broker-0".to_string(),
            host: "127.0.0.1".to_string(),
            port: 20000,
            domain: "broker.cluster".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElectionConfig {
    pub mode: ElectionMode,
    pub id: i64,
    pub port: u16,
    /// Domain registered by the elected leader.
    pub domain: String,
    pub peer_hosts: Vec<String>,
    pub peer_ports: Vec<u16>,
    pub peer_ids: Vec<i64>,
    pub heartbeat_timeout_ms: u64,
    /// Leader ping interval; a third of the heartbeat timeout when unset.
    pub ping_interval_ms: Option<u64>,
    pub poll_interval_ms: u64,
    /// Bound for one peer round trip; 0 waits indefinitely.
    pub peer_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            mode: ElectionMode::None,
            id: 0,
            port: 20100,
            domain: "leader.cluster".to_string(),
            peer_hosts: Vec::new(),
            peer_ports: Vec::new(),
            peer_ids: Vec::new(),
            heartbeat_timeout_ms: 2000,
            ping_interval_ms: None,
            poll_interval_ms: 50,
            peer_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NameServiceConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for NameServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 18000,
        }
    }
}

/// UDP endpoint receiving one datagram per published message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl MonitoringConfig {
    pub fn endpoint(&self) -> Option<(String, u16)> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some((host.clone(), port)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub broker: BrokerConfig,
    pub election: ElectionConfig,
    pub name_service: NameServiceConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

impl ClusterConfig {
    /// Reads a configuration file, picking the format from its extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        let config = match ext.as_str() {
            "toml" => toml::from_str::<ClusterConfig>(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str::<ClusterConfig>(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            "json" => serde_json::from_str::<ClusterConfig>(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(ext)),
        };
        Ok(config)
    }

    /// Reads, overrides from the environment and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `CLUSTERQ_*` overrides looked up through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("CLUSTERQ_ELECTION_ID").and_then(|v| v.parse().ok()) {
            self.election.id = id;
        }
        if let Some(mode) = lookup("CLUSTERQ_ELECTION_MODE") {
            self.election.mode = ElectionMode::from(mode);
        }
        if let Some(port) = lookup("CLUSTERQ_PORT").and_then(|v| v.parse().ok()) {
            self.broker.port = port;
        }
        if let Some(port) = lookup("CLUSTERQ_ELECTION_PORT").and_then(|v| v.parse().ok()) {
            self.election.port = port;
        }
        if let Some(timeout) =
            lookup("CLUSTERQ_HEARTBEAT_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.election.heartbeat_timeout_ms = timeout;
        }
        if let Some(level) = lookup("CLUSTERQ_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Checks the configuration and lists every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let election = &self.election;

        if election.heartbeat_timeout_ms == 0 {
            errors.push("Heartbeat timeout must be greater than zero".to_string());
        }
        if election.poll_interval_ms == 0 {
            errors.push("Poll interval must be greater than zero".to_string());
        }
        if election.ping_interval_ms == Some(0) {
            errors.push("Ping interval must be greater than zero".to_string());
        }
        if election.peer_hosts.len() != election.peer_ports.len()
            || election.peer_hosts.len() != election.peer_ids.len()
        {
            errors.push(format!(
                "Peer lists differ in length: {} hosts, {} ports, {} ids",
                election.peer_hosts.len(),
                election.peer_ports.len(),
                election.peer_ids.len()
            ));
        }

        let mut seen = HashSet::new();
        for id in &election.peer_ids {
            if *id == election.id {
                errors.push(format!("Peer id {} is this broker's own election id", id));
            }
            if !seen.insert(*id) {
                errors.push(format!("Duplicate peer id {}", id));
            }
        }

        if election.mode.is_enabled() && election.domain.trim().is_empty() {
            errors.push("Election domain is required when election is enabled".to_string());
        }
        if self.name_service.enabled && !election.mode.is_enabled() && self.broker.domain.trim().is_empty() {
            errors.push("Broker domain is required for name service registration".to_string());
        }
        if LevelFilter::from_str(&self.logging.level).is_err() {
            errors.push(format!("Unknown log level '{}'", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Peers in configured order, truncated to the shortest of the three peer lists.
    pub fn peers(&self) -> Vec<Peer> {
        self.election
            .peer_hosts
            .iter()
            .zip(&self.election.peer_ports)
            .zip(&self.election.peer_ids)
            .map(|((host, port), id)| Peer::new(*id, host, *port))
            .collect()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.election.heartbeat_timeout_ms)
    }

    /// Interval between two leader pings; followers get three pings per
    /// heartbeat timeout unless it is configured.
    pub fn ping_interval(&self) -> Duration {
        let ms = self
            .election
            .ping_interval_ms
            .unwrap_or(self.election.heartbeat_timeout_ms / 3);
        Duration::from_millis(ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.election.poll_interval_ms)
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        match self.election.peer_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.logging.level).unwrap_or(LevelFilter::Info)
    }
}
