//! Connection to the shared cache, whatever its topology
//!
//! All three variants wrap multiplexed connections, so cloning a
//! `CacheConnection` is cheap and clones share the underlying sockets.
//! The sentinel variant follows failovers, see [`SentinelConnection`].
//! Pool sizes in [`CacheSettings`] are validated but only bound how many
//! independent connections a caller may open; a single multiplexed
//! connection serves all concurrent commands.

use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{Cmd, IntoConnectionInfo, Pipeline, RedisConnectionInfo, RedisFuture, Value};
use tracing::{info, warn};

use crate::config::{CacheSettings, Topology};
use crate::error::Result;
use crate::sentinel::SentinelConnection;

#[derive(Clone)]
pub enum CacheConnection {
    /// Single node; reconnects transparently
    Single(ConnectionManager),
    /// Cluster; routes by key slot and follows redirects
    Cluster(ClusterConnection),
    /// Current master resolved through the sentinels, re-resolved on failover
    Sentinel(SentinelConnection),
}

impl CacheConnection {
    /// Connect using the topology selected by `settings`.
    pub async fn connect(settings: &CacheSettings) -> Result<Self> {
        let topology = settings.topology()?;
        let timeout = settings.timeout();
        let password = settings.password();

        let connection = match &topology {
            Topology::Single { address } => {
                let mut info = address.as_str().into_connection_info()?;
                info.redis.db = settings.database;
                if password.is_some() {
                    info.redis.password = password;
                }

                let client = redis::Client::open(info)?;
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(timeout)
                    .set_response_timeout(timeout);
                CacheConnection::Single(ConnectionManager::new_with_config(client, config).await?)
            }
            Topology::Cluster { nodes } => {
                if settings.database != 0 {
                    warn!(
                        database = settings.database,
                        "Cluster topology ignores the database index"
                    );
                }

                let mut builder = ClusterClientBuilder::new(nodes.clone())
                    .connection_timeout(timeout)
                    .response_timeout(timeout);
                if let Some(password) = password {
                    builder = builder.password(password);
                }
                let client = builder.build()?;
                CacheConnection::Cluster(client.get_async_connection().await?)
            }
            Topology::Sentinel {
                sentinels,
                master_name,
            } => {
                let node_info = SentinelNodeConnectionInfo {
                    tls_mode: None,
                    redis_connection_info: Some(RedisConnectionInfo {
                        db: settings.database,
                        password,
                        ..Default::default()
                    }),
                };
                let client = SentinelClient::build(
                    sentinels.clone(),
                    master_name.clone(),
                    Some(node_info),
                    SentinelServerType::Master,
                )?;
                CacheConnection::Sentinel(
                    SentinelConnection::connect(client, settings.database).await?,
                )
            }
        };

        info!(
            topology = topology.name(),
            timeout_ms = settings.timeout_ms,
            "Connected to cache"
        );

        Ok(connection)
    }

    pub fn topology_name(&self) -> &'static str {
        match self {
            CacheConnection::Single(_) => "single",
            CacheConnection::Cluster(_) => "cluster",
            CacheConnection::Sentinel(_) => "sentinel",
        }
    }
}

impl ConnectionLike for CacheConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            CacheConnection::Single(conn) => conn.req_packed_command(cmd),
            CacheConnection::Cluster(conn) => conn.req_packed_command(cmd),
            CacheConnection::Sentinel(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            CacheConnection::Single(conn) => conn.req_packed_commands(cmd, offset, count),
            CacheConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
            CacheConnection::Sentinel(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            CacheConnection::Single(conn) => conn.get_db(),
            CacheConnection::Cluster(conn) => conn.get_db(),
            CacheConnection::Sentinel(conn) => conn.get_db(),
        }
    }
}
