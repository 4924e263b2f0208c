//! Cache topology settings
//!
//! Exactly one topology must be configured: a single `address`, a set of
//! `cluster_addresses`, or `sentinel_addresses` together with a
//! `master_name`. Addresses use the `redis://host:port` form.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_DATABASE: i64 = 0;
pub const DEFAULT_CONNECTION_POOL_SIZE: u32 = 150;
pub const DEFAULT_CONNECTION_MINIMUM_IDLE_SIZE: u32 = 10;
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MASTER_CONNECTION_POOL_SIZE: u32 = 300;
pub const DEFAULT_SLAVE_CONNECTION_POOL_SIZE: u32 = 300;

/// Settings for the shared cache backing locks and queues
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Single-node address
    pub address: Option<String>,
    /// Cluster node addresses
    pub cluster_addresses: Vec<String>,
    /// Sentinel addresses
    pub sentinel_addresses: Vec<String>,
    /// Master name monitored by the sentinels
    pub master_name: Option<String>,
    pub password: Option<String>,
    /// Connection and response timeout in milliseconds
    pub timeout_ms: u64,
    /// Database index (ignored by clusters)
    pub database: i64,
    pub connection_pool_size: u32,
    pub connection_minimum_idle_size: u32,
    /// Topology scan interval in milliseconds
    pub scan_interval_ms: u64,
    pub master_connection_pool_size: u32,
    pub slave_connection_pool_size: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            address: None,
            cluster_addresses: Vec::new(),
            sentinel_addresses: Vec::new(),
            master_name: None,
            password: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            database: DEFAULT_DATABASE,
            connection_pool_size: DEFAULT_CONNECTION_POOL_SIZE,
            connection_minimum_idle_size: DEFAULT_CONNECTION_MINIMUM_IDLE_SIZE,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            master_connection_pool_size: DEFAULT_MASTER_CONNECTION_POOL_SIZE,
            slave_connection_pool_size: DEFAULT_SLAVE_CONNECTION_POOL_SIZE,
        }
    }
}

/// Resolved deployment shape of the cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    Single {
        address: String,
    },
    Cluster {
        nodes: Vec<String>,
    },
    Sentinel {
        sentinels: Vec<String>,
        master_name: String,
    },
}

impl Topology {
    pub fn name(&self) -> &'static str {
        match self {
            Topology::Single { .. } => "single",
            Topology::Cluster { .. } => "cluster",
            Topology::Sentinel { .. } => "sentinel",
        }
    }
}

impl CacheSettings {
    /// Create settings for a single node
    pub fn single(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            ..Default::default()
        }
    }

    /// Create settings for a cluster
    pub fn cluster(nodes: Vec<String>) -> Self {
        Self {
            cluster_addresses: nodes,
            ..Default::default()
        }
    }

    /// Create settings for a sentinel-supervised master
    pub fn sentinel(sentinels: Vec<String>, master_name: &str) -> Self {
        Self {
            sentinel_addresses: sentinels,
            master_name: Some(master_name.to_string()),
            ..Default::default()
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Password, treating a blank value as absent
    pub fn password(&self) -> Option<String> {
        self.password
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    /// Validate the settings and resolve the single configured topology.
    pub fn topology(&self) -> Result<Topology> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let cluster = non_blank(&self.cluster_addresses);
        let sentinels = non_blank(&self.sentinel_addresses);

        let configured = [
            address.is_some(),
            !cluster.is_empty(),
            !sentinels.is_empty(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        match configured {
            0 => {
                return Err(CacheError::Misconfigured(
                    "one of address, cluster_addresses or sentinel_addresses is required"
                        .to_string(),
                ));
            }
            1 => {}
            _ => {
                return Err(CacheError::Misconfigured(
                    "address, cluster_addresses and sentinel_addresses are mutually exclusive"
                        .to_string(),
                ));
            }
        }

        self.validate_pools()?;

        if let Some(address) = address {
            return Ok(Topology::Single {
                address: address.to_string(),
            });
        }

        if !cluster.is_empty() {
            return Ok(Topology::Cluster { nodes: cluster });
        }

        let master_name = self
            .master_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CacheError::Misconfigured("sentinel topology requires master_name".to_string())
            })?;

        Ok(Topology::Sentinel {
            sentinels,
            master_name: master_name.to_string(),
        })
    }

    fn validate_pools(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(CacheError::Misconfigured(
                "timeout_ms must be positive".to_string(),
            ));
        }
        if self.connection_pool_size == 0
            || self.master_connection_pool_size == 0
            || self.slave_connection_pool_size == 0
        {
            return Err(CacheError::Misconfigured(
                "connection pool sizes must be positive".to_string(),
            ));
        }
        if self.connection_minimum_idle_size > self.connection_pool_size {
            return Err(CacheError::Misconfigured(format!(
                "connection_minimum_idle_size ({}) exceeds connection_pool_size ({})",
                self.connection_minimum_idle_size, self.connection_pool_size
            )));
        }
        if self.database < 0 {
            return Err(CacheError::Misconfigured(format!(
                "database index {} is negative",
                self.database
            )));
        }
        Ok(())
    }
}

fn non_blank(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
