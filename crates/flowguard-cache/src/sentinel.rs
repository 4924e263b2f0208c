//! Sentinel-supervised connection that follows master changes
//!
//! The master is resolved through the sentinels at connect time. When a
//! command is refused with `READONLY` (the node was demoted) or the
//! connection to it breaks, the master is resolved again and later commands
//! go to the new one. Only the `READONLY` case resends the command, since
//! the old node rejected it without applying it.

use std::sync::Arc;

use parking_lot::RwLock;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::sentinel::SentinelClient;
use redis::{Cmd, ErrorKind, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Resolve the master and resend
    Retry,
    /// Resolve the master, report the original error
    Reconnect,
    None,
}

fn recovery_for(err: &RedisError) -> Recovery {
    if err.kind() == ErrorKind::ReadOnly {
        Recovery::Retry
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        Recovery::Reconnect
    } else {
        Recovery::None
    }
}

struct Master {
    generation: u64,
    connection: MultiplexedConnection,
}

#[derive(Clone)]
pub struct SentinelConnection {
    client: Arc<Mutex<SentinelClient>>,
    master: Arc<RwLock<Master>>,
    db: i64,
}

impl SentinelConnection {
    pub(crate) async fn connect(mut client: SentinelClient, db: i64) -> RedisResult<Self> {
        let connection = client.get_async_connection().await?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            master: Arc::new(RwLock::new(Master {
                generation: 0,
                connection,
            })),
            db,
        })
    }

    fn current(&self) -> (u64, MultiplexedConnection) {
        let master = self.master.read();
        (master.generation, master.connection.clone())
    }

    /// Switch to the master the sentinels report now. Callers that saw
    /// `seen_generation` share one switch.
    async fn reresolve(&self, seen_generation: u64) -> RedisResult<MultiplexedConnection> {
        let mut client = self.client.lock().await;

        let (generation, connection) = self.current();
        if generation != seen_generation {
            return Ok(connection);
        }

        let connection = client.get_async_connection().await?;
        let mut master = self.master.write();
        master.generation += 1;
        master.connection = connection.clone();
        info!(generation = master.generation, "Switched to master reported by sentinels");
        Ok(connection)
    }

    async fn recover(&self, seen_generation: u64, err: &RedisError) -> Option<MultiplexedConnection> {
        match recovery_for(err) {
            Recovery::None => None,
            recovery => {
                warn!(error = %err, "Master unavailable, asking sentinels for the current master");
                match self.reresolve(seen_generation).await {
                    Ok(connection) if recovery == Recovery::Retry => Some(connection),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve master through sentinels");
                        None
                    }
                }
            }
        }
    }
}

impl ConnectionLike for SentinelConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        Box::pin(async move {
            let (generation, mut connection) = self.current();
            match connection.req_packed_command(cmd).await {
                Err(e) => match self.recover(generation, &e).await {
                    Some(mut connection) => connection.req_packed_command(cmd).await,
                    None => Err(e),
                },
                reply => reply,
            }
        })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        Box::pin(async move {
            let (generation, mut connection) = self.current();
            match connection.req_packed_commands(cmd, offset, count).await {
                Err(e) => match self.recover(generation, &e).await {
                    Some(mut connection) => connection.req_packed_commands(cmd, offset, count).await,
                    None => Err(e),
                },
                reply => reply,
            }
        })
    }

    fn get_db(&self) -> i64 {
        self.db
    }
}
