//! SQL Server connections and the run-scoped migration lock.
//!
//! The engine holds exactly one connection for a run so that explicit
//! transactions stay coherent across every batch. The pool exists for
//! lifecycle management (validation, reconnect on a fresh run), not for
//! concurrency; it is sized 1.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config as TdsConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{MigrateError, Result};

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A live SQL Server connection.
pub type MssqlConnection = Client<Compat<TcpStream>>;

/// Connection manager for bb8 with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> TdsConfig {
        let mut config = TdsConfig::new();
        config.host(&self.config.server);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if self.config.encrypt {
            if self.config.trust_server_certificate {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlConnection;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        // Keepalives matter here: a long-running batch can leave the socket
        // silent for minutes.
        if let Ok(std_tcp) = tcp.into_std() {
            let socket = socket2::Socket::from(std_tcp);

            let keepalive = socket2::TcpKeepalive::new()
                .with_time(TCP_KEEPALIVE_INTERVAL)
                .with_interval(TCP_KEEPALIVE_INTERVAL);

            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                warn!("Failed to set TCP keepalive: {}", e);
            }

            let std_tcp: std::net::TcpStream = socket.into();
            std_tcp.set_nonblocking(true).ok();
            let tcp = TcpStream::from_std(std_tcp).map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: format!("Failed to convert socket: {}", e),
            })?;

            Client::connect(config, tcp.compat_write()).await
        } else {
            warn!("Failed to configure TCP keepalives");
            let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
                tiberius::error::Error::Io {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            })?;
            tcp.set_nodelay(true).ok();
            Client::connect(config, tcp.compat_write()).await
        }
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Single-connection pool for a migration run.
pub struct MigratePool {
    pool: Pool<TiberiusConnectionManager>,
}

impl MigratePool {
    /// Connect and verify the connection.
    pub async fn new(config: &ConnectionConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating SQL Server connection pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "testing SQL Server connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to SQL Server: {}:{}/{}",
            config.server, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Get the run's connection.
    pub async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting SQL Server connection"))
    }
}

/// Acquire a session-owned application lock named after the history table.
///
/// Serializes concurrent migration runs against the same database. Must be
/// taken right after the history table is ensured and held until the run's
/// transaction resolves.
pub async fn acquire_app_lock(conn: &mut MssqlConnection, resource: &str) -> Result<()> {
    let row = conn
        .query(
            "DECLARE @r INT; \
             EXEC @r = sp_getapplock @Resource = @P1, @LockMode = 'Exclusive', \
                 @LockOwner = 'Session', @LockTimeout = 10000; \
             SELECT @r",
            &[&resource],
        )
        .await?
        .into_row()
        .await?;

    // sp_getapplock returns >= 0 on success.
    let status: i32 = row.as_ref().and_then(|r| r.get(0)).unwrap_or(-999);
    if status < 0 {
        return Err(MigrateError::Lock(resource.to_string()));
    }
    debug!("Acquired migration lock on {}", resource);
    Ok(())
}

/// Release the application lock taken by [`acquire_app_lock`].
pub async fn release_app_lock(conn: &mut MssqlConnection, resource: &str) -> Result<()> {
    conn.execute(
        "EXEC sp_releaseapplock @Resource = @P1, @LockOwner = 'Session'",
        &[&resource],
    )
    .await?;
    debug!("Released migration lock on {}", resource);
    Ok(())
}
