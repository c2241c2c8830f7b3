//! MySQL protocol driver

use super::{Db, Driver, Session};
use crate::connection::{
    Connection, ConnectionConfig, ConnectionState, QueryResult, TlsConfig, TlsMode, Transport,
};
use crate::dsn::{DsnInfo, TransportType, DEFAULT_MYSQL_PORT};
use crate::metrics::labels;
use crate::{Error, Result};
use tokio::sync::Mutex;

/// Driver for MySQL-compatible servers (MySQL, TiDB, MariaDB)
#[derive(Debug, Clone, Default)]
pub struct MySqlDriver {
    tls: Option<TlsConfig>,
}

impl MySqlDriver {
    /// Driver whose TLS settings come from the DSN `tls` parameter
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `tls` (custom CA, etc.) whenever the DSN enables TLS
    pub fn with_tls_config(tls: TlsConfig) -> Self {
        Self { tls: Some(tls) }
    }
}

impl Driver for MySqlDriver {
    type Db = MySqlDb;

    fn name(&self) -> &'static str {
        "mysql"
    }

    /// Parse and validate the DSN; no connection is made until `ping` or `session`.
    async fn open(&self, dsn: &str) -> Result<MySqlDb> {
        let info = DsnInfo::parse(dsn)?;
        let tls = match &self.tls {
            Some(tls) if info.tls != TlsMode::Disabled && info.transport == TransportType::Tcp => {
                Some(tls.clone())
            }
            _ => info.to_tls_config()?,
        };
        let config = info.to_config();

        Ok(MySqlDb {
            info,
            config,
            tls,
            idle: Mutex::new(None),
        })
    }
}

/// Opened MySQL database handle
///
/// Keeps at most one idle connection: the one that answered the last probe.
/// The next `session` call takes it over instead of dialing again.
pub struct MySqlDb {
    info: DsnInfo,
    config: ConnectionConfig,
    tls: Option<TlsConfig>,
    idle: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for MySqlDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlDb")
            .field("target", &self.info.target().to_string())
            .field("user", &self.info.user)
            .field("tls", &self.info.tls)
            .finish()
    }
}

impl MySqlDb {
    /// Parsed DSN
    pub fn info(&self) -> &DsnInfo {
        &self.info
    }

    /// Connection settings derived from the DSN
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn dial(&self) -> Result<Connection> {
        let transport = match self.info.transport {
            TransportType::Tcp => {
                let host = self.info.host.as_deref().unwrap_or("127.0.0.1");
                let port = self.info.port.unwrap_or(DEFAULT_MYSQL_PORT);
                tracing::debug!(host, port, "dialing");
                Transport::connect_tcp(host, port, self.config.connect_timeout).await?
            }
            TransportType::Unix => {
                let path = self.info.unix_socket.as_deref().ok_or_else(|| {
                    Error::Config("unix transport without a socket path".into())
                })?;
                tracing::debug!(path = %path.display(), "dialing");
                Transport::connect_unix(path, self.config.connect_timeout).await?
            }
        };

        let mut conn = Connection::new(transport);
        conn.startup(&self.config, self.tls.as_ref(), self.info.host.as_deref())
            .await?;
        Ok(conn)
    }
}

impl Db for MySqlDb {
    type Session = MySqlSession;

    async fn ping(&self) -> Result<()> {
        let mut idle = self.idle.lock().await;
        let mut conn = match idle.take() {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        match conn.ping().await {
            Ok(()) => {
                *idle = Some(conn);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    crate::metrics::counters::close_failed(labels::CLOSE_PROBE_CLEANUP);
                    tracing::warn!(error = %close_err, "failed to close connection after failed ping");
                }
                Err(e)
            }
        }
    }

    async fn session(&self) -> Result<MySqlSession> {
        let cached = self.idle.lock().await.take();
        let conn = match cached {
            Some(conn) => conn,
            None => self.dial().await?,
        };
        Ok(MySqlSession { conn })
    }

    async fn close(&self) -> Result<()> {
        let cached = self.idle.lock().await.take();
        if let Some(conn) = cached {
            conn.close().await?;
        }
        Ok(())
    }
}

/// Dedicated MySQL session
#[derive(Debug)]
pub struct MySqlSession {
    conn: Connection,
}

impl MySqlSession {
    /// Run a text-protocol query, returning every result set
    pub async fn query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.conn.query(sql).await
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await
    }

    /// Change the default schema
    pub async fn use_database(&mut self, database: &str) -> Result<()> {
        self.conn.init_db(database).await
    }

    /// Server version from the greeting
    pub fn server_version(&self) -> &str {
        self.conn.server_version()
    }

    /// Server thread id
    pub fn connection_id(&self) -> u32 {
        self.conn.connection_id()
    }

    /// Whether the session runs over TLS or a Unix socket
    pub fn is_secure(&self) -> bool {
        self.conn.is_secure()
    }
}

impl Session for MySqlSession {
    async fn close(self) -> Result<()> {
        self.conn.close().await
    }

    /// False once a transport or protocol failure has closed the connection
    fn is_alive(&self) -> bool {
        self.conn.state() != ConnectionState::Closed
    }
}
