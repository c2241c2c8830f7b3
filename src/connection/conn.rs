//! Core connection type

use super::state::ConnectionState;
use super::tls::TlsMode;
use super::transport::Transport;
use crate::auth::{clear_password, AuthPlugin};
use crate::protocol::constants::{
    auth, capabilities, DEFAULT_COLLATION, HEADER_LEN, MAX_PACKET_SIZE,
};
use crate::protocol::decode::{
    decode_auth_message, decode_column_definition, decode_command_response, decode_eof,
    decode_err, decode_handshake, decode_row, has_more_results,
};
use crate::protocol::{
    decode_packet, encode_message, frame_packets, AuthMessage, ColumnDefinition,
    CommandResponse, FrontendMessage, Handshake, HandshakeResponse, OkPacket, RowMessage,
};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::Instrument;

/// Size of each LOCAL INFILE data packet
const INFILE_CHUNK_SIZE: usize = 16 * 1024;

/// Connection configuration
///
/// Stores login parameters, negotiated options and I/O timeouts.
/// Usually produced by `DsnInfo::to_config`; use `ConnectionConfig::builder()`
/// to assemble one by hand.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Initial schema (empty for none)
    pub database: String,
    /// Username
    pub user: String,
    /// Password (empty for none)
    pub password: String,
    /// Connection collation id
    pub collation: u8,
    /// TLS mode
    pub tls: TlsMode,
    /// Serve `LOAD DATA LOCAL INFILE` requests
    pub allow_local_infile: bool,
    /// Allow several statements per query
    pub multi_statements: bool,
    /// Report matched rows instead of changed rows
    pub client_found_rows: bool,
    /// Max packet size announced to the server
    pub max_allowed_packet: u32,
    /// Dial timeout
    pub connect_timeout: Option<Duration>,
    /// Per-read timeout
    pub read_timeout: Option<Duration>,
    /// Per-write timeout
    pub write_timeout: Option<Duration>,
    /// Session variables applied with `SET` after login
    pub system_vars: Vec<(String, String)>,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mysqltest_conn::connection::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::builder("test", "root")
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .system_var("time_zone", "'Asia/Shanghai'")
    ///     .build();
    /// assert_eq!(config.system_vars.len(), 1);
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                database: database.into(),
                user: user.into(),
                password: String::new(),
                collation: DEFAULT_COLLATION,
                tls: TlsMode::default(),
                allow_local_infile: false,
                multi_statements: false,
                client_found_rows: false,
                max_allowed_packet: MAX_PACKET_SIZE as u32,
                connect_timeout: None,
                read_timeout: None,
                write_timeout: None,
                system_vars: Vec::new(),
            },
        }
    }

    /// Capability flags the client asks for, before masking with the server's
    fn client_capabilities(&self) -> u32 {
        let mut caps = capabilities::LONG_PASSWORD
            | capabilities::LONG_FLAG
            | capabilities::PROTOCOL_41
            | capabilities::TRANSACTIONS
            | capabilities::SECURE_CONNECTION
            | capabilities::MULTI_RESULTS
            | capabilities::PLUGIN_AUTH
            | capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA;
        if !self.database.is_empty() {
            caps |= capabilities::CONNECT_WITH_DB;
        }
        if self.allow_local_infile {
            caps |= capabilities::LOCAL_FILES;
        }
        if self.multi_statements {
            caps |= capabilities::MULTI_STATEMENTS;
        }
        if self.client_found_rows {
            caps |= capabilities::FOUND_ROWS;
        }
        caps
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Set the connection collation id
    pub fn collation(mut self, collation: u8) -> Self {
        self.config.collation = collation;
        self
    }

    /// Set the TLS mode
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.config.tls = mode;
        self
    }

    /// Serve `LOAD DATA LOCAL INFILE` requests from the local filesystem
    pub fn allow_local_infile(mut self, allow: bool) -> Self {
        self.config.allow_local_infile = allow;
        self
    }

    /// Allow several statements per query
    pub fn multi_statements(mut self, enable: bool) -> Self {
        self.config.multi_statements = enable;
        self
    }

    /// Report matched rows instead of changed rows
    pub fn client_found_rows(mut self, enable: bool) -> Self {
        self.config.client_found_rows = enable;
        self
    }

    /// Set the max packet size announced to the server
    pub fn max_allowed_packet(mut self, size: u32) -> Self {
        self.config.max_allowed_packet = size;
        self
    }

    /// Set the dial timeout
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the per-read timeout
    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.config.read_timeout = Some(duration);
        self
    }

    /// Set the per-write timeout
    pub fn write_timeout(mut self, duration: Duration) -> Self {
        self.config.write_timeout = Some(duration);
        self
    }

    /// Add a session variable, applied as `SET name=value` after login
    pub fn system_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.system_vars.push((name.into(), value.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// One result of a text-protocol query
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column definitions (empty for statements without a result set)
    pub columns: Vec<ColumnDefinition>,
    /// Rows; `None` is SQL NULL
    pub rows: Vec<Vec<Option<Bytes>>>,
    /// Rows affected
    pub affected_rows: u64,
    /// Last AUTO_INCREMENT id
    pub last_insert_id: u64,
    /// Warning count
    pub warnings: u16,
}

impl QueryResult {
    fn from_ok(ok: &OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            ..Self::default()
        }
    }

    /// Value at (`row`, `column`) as UTF-8 text; `None` for NULL or out of range
    pub fn text(&self, row: usize, column: usize) -> Option<&str> {
        let value = self.rows.get(row)?.get(column)?.as_ref()?;
        std::str::from_utf8(value).ok()
    }
}

async fn io_timeout<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

/// MySQL connection
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    seq: u8,
    capabilities: u32,
    server_version: String,
    connection_id: u32,
    allow_local_infile: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            seq: 0,
            capabilities: 0,
            server_version: String::new(),
            connection_id: 0,
            allow_local_infile: false,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Server version from the greeting
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Server thread id from the greeting
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Whether the transport is TLS or a Unix socket
    pub fn is_secure(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_secure)
    }

    /// Perform handshake, optional TLS upgrade, authentication and session setup
    pub async fn startup(
        &mut self,
        config: &ConnectionConfig,
        tls_config: Option<&super::TlsConfig>,
        hostname: Option<&str>,
    ) -> Result<()> {
        self.read_timeout = config.read_timeout;
        self.write_timeout = config.write_timeout;
        self.allow_local_infile = config.allow_local_infile;

        async {
            let greeting = self.read_payload().await?;
            if greeting.first() == Some(&crate::protocol::constants::headers::ERR) {
                return Err(decode_err(&greeting)?.into());
            }
            let handshake = decode_handshake(&greeting)?;
            if handshake.capabilities & capabilities::PROTOCOL_41 == 0 {
                return Err(Error::Protocol(
                    "server does not support protocol 4.1".into(),
                ));
            }

            self.server_version = handshake.server_version.clone();
            self.connection_id = handshake.connection_id;
            tracing::debug!(
                server_version = %handshake.server_version,
                connection_id = handshake.connection_id,
                auth_plugin = %handshake.auth_plugin,
                "received server greeting"
            );

            let mut caps = config.client_capabilities() & handshake.capabilities;
            let server_tls = handshake.capabilities & capabilities::SSL != 0;

            if config.tls != TlsMode::Disabled {
                if server_tls {
                    let tls = tls_config.ok_or_else(|| {
                        Error::Config(format!(
                            "tls={} requires TlsConfig but none was provided",
                            config.tls
                        ))
                    })?;
                    let host = hostname.ok_or_else(|| {
                        Error::Config("TLS negotiation requires a hostname".into())
                    })?;
                    caps |= capabilities::SSL;
                    self.negotiate_tls(tls, host, caps, config).await?;
                } else if config.tls.is_required() {
                    return Err(Error::Config(format!(
                        "server does not support TLS (tls={})",
                        config.tls
                    )));
                } else {
                    tracing::debug!("server lacks TLS support, continuing in plaintext");
                }
            }

            self.capabilities = caps;
            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(config, &handshake, caps).await?;
            self.state.transition(ConnectionState::Idle)?;

            for (name, value) in &config.system_vars {
                self.query(&format!("SET {}={}", name, value)).await?;
            }

            tracing::info!("startup complete");
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %config.user,
            database = %config.database
        ))
        .await
    }

    /// Send the SSLRequest packet and upgrade the transport.
    async fn negotiate_tls(
        &mut self,
        tls_config: &super::TlsConfig,
        hostname: &str,
        caps: u32,
        config: &ConnectionConfig,
    ) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;

        let request = FrontendMessage::SslRequest {
            capabilities: caps,
            max_packet_size: config.max_allowed_packet,
            collation: config.collation,
        };
        self.send_message(&request).await?;

        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
        self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
        tracing::info!("TLS connection established");
        Ok(())
    }

    /// Handle authentication
    async fn authenticate(
        &mut self,
        config: &ConnectionConfig,
        handshake: &Handshake,
        caps: u32,
    ) -> Result<()> {
        let auth_start = std::time::Instant::now();
        // Unknown default plugins get a native response; the server switches us
        let mut plugin = handshake
            .auth_plugin
            .parse::<AuthPlugin>()
            .unwrap_or(AuthPlugin::NativePassword);
        crate::metrics::counters::auth_attempted(plugin.name());
        self.check_cleartext_allowed(plugin)?;

        let response = HandshakeResponse {
            capabilities: caps,
            max_packet_size: config.max_allowed_packet,
            collation: config.collation,
            user: config.user.clone(),
            auth_response: plugin.scramble(&config.password, &handshake.scramble),
            database: (!config.database.is_empty()).then(|| config.database.clone()),
            auth_plugin: plugin.name().to_string(),
        };
        self.send_message(&FrontendMessage::HandshakeResponse(response))
            .await?;

        loop {
            let payload = self.read_payload().await?;

            match decode_auth_message(&payload)? {
                AuthMessage::Ok(_) => {
                    tracing::debug!(plugin = plugin.name(), "authentication successful");
                    crate::metrics::histograms::auth_duration(
                        plugin.name(),
                        auth_start.elapsed().as_millis() as u64,
                    );
                    return Ok(());
                }
                AuthMessage::Error(err) => {
                    crate::metrics::counters::auth_failed(plugin.name(), "server_error");
                    return Err(err.into());
                }
                AuthMessage::Switch {
                    plugin: name,
                    data,
                } => {
                    plugin = name.parse::<AuthPlugin>().map_err(|e| {
                        crate::metrics::counters::auth_failed(plugin.name(), "unsupported_plugin");
                        e
                    })?;
                    tracing::debug!(plugin = plugin.name(), "server requested auth switch");
                    crate::metrics::counters::auth_attempted(plugin.name());
                    self.check_cleartext_allowed(plugin)?;

                    let response = plugin.scramble(&config.password, &data);
                    self.send_message(&FrontendMessage::AuthData(response))
                        .await?;
                }
                AuthMessage::MoreData(data) => {
                    if plugin != AuthPlugin::CachingSha2Password {
                        return Err(Error::Protocol(format!(
                            "unexpected auth continuation for {}",
                            plugin
                        )));
                    }
                    match data.first().copied() {
                        Some(auth::FAST_AUTH_SUCCESS) => {
                            tracing::debug!("caching_sha2_password fast auth succeeded");
                        }
                        Some(auth::PERFORM_FULL_AUTH) => {
                            if !self.is_secure() {
                                crate::metrics::counters::auth_failed(
                                    plugin.name(),
                                    "insecure_transport",
                                );
                                return Err(Error::Authentication(
                                    "caching_sha2_password full authentication requires TLS \
                                     or a Unix socket"
                                        .into(),
                                ));
                            }
                            let response = clear_password(&config.password);
                            self.send_message(&FrontendMessage::AuthData(response))
                                .await?;
                        }
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected caching_sha2_password status: {:?}",
                                other
                            )));
                        }
                    }
                }
            }
        }
    }

    fn check_cleartext_allowed(&self, plugin: AuthPlugin) -> Result<()> {
        if plugin.sends_cleartext() && !self.is_secure() {
            crate::metrics::counters::auth_failed(plugin.name(), "insecure_transport");
            return Err(Error::Authentication(format!(
                "{} requires TLS or a Unix socket",
                plugin
            )));
        }
        Ok(())
    }

    /// Liveness check (COM_PING)
    pub async fn ping(&mut self) -> Result<()> {
        self.begin_command()?;
        let result = self.simple_command(&FrontendMessage::Ping).await;
        self.finish_command(&result);
        result.map(|_| ())
    }

    /// Change the default schema (COM_INIT_DB)
    pub async fn init_db(&mut self, database: &str) -> Result<()> {
        self.begin_command()?;
        let result = self
            .simple_command(&FrontendMessage::InitDb(database.to_string()))
            .await;
        self.finish_command(&result);
        result.map(|_| ())
    }

    /// Execute a text-protocol query and collect every result set
    pub async fn query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.begin_command()?;
        let result = self.run_query(sql).await;
        self.finish_command(&result);
        result
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        let was_idle = self.state == ConnectionState::Idle;
        self.state.transition(ConnectionState::Closed)?;
        if was_idle {
            self.seq = 0;
            let _ = self.send_message(&FrontendMessage::Quit).await;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.shutdown().await?;
        }
        Ok(())
    }

    fn begin_command(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            other => {
                return Err(Error::ConnectionBusy(format!(
                    "connection in state: {}",
                    other
                )))
            }
        }
        self.state.transition(ConnectionState::CommandInProgress)?;
        self.seq = 0;
        Ok(())
    }

    /// Server-reported errors leave the connection usable; anything else
    /// leaves the stream position unknown.
    fn finish_command<T>(&mut self, result: &Result<T>) {
        let next = match result {
            Ok(_) | Err(Error::Server { .. }) | Err(Error::Config(_)) => ConnectionState::Idle,
            Err(_) => ConnectionState::Closed,
        };
        // Both targets are reachable from CommandInProgress
        let _ = self.state.transition(next);
    }

    async fn simple_command(&mut self, msg: &FrontendMessage) -> Result<OkPacket> {
        self.send_message(msg).await?;
        self.read_ok().await
    }

    async fn read_ok(&mut self) -> Result<OkPacket> {
        let payload = self.read_payload().await?;
        match decode_command_response(&payload)? {
            CommandResponse::Ok(ok) => Ok(ok),
            CommandResponse::Error(err) => Err(err.into()),
            other => Err(Error::Protocol(format!(
                "expected OK packet, got {:?}",
                other
            ))),
        }
    }

    async fn run_query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.send_message(&FrontendMessage::Query(sql.to_string()))
            .await?;

        let mut results = Vec::new();
        loop {
            let payload = self.read_payload().await?;
            let status = match decode_command_response(&payload)? {
                CommandResponse::Ok(ok) => {
                    results.push(QueryResult::from_ok(&ok));
                    ok.status
                }
                CommandResponse::Error(err) => return Err(err.into()),
                CommandResponse::LocalInfile(file_name) => {
                    let ok = self.send_local_infile(&file_name).await?;
                    results.push(QueryResult::from_ok(&ok));
                    ok.status
                }
                CommandResponse::ResultSet { column_count } => {
                    let (result, status) = self.read_result_set(column_count).await?;
                    results.push(result);
                    status
                }
            };

            if !has_more_results(status) {
                return Ok(results);
            }
        }
    }

    async fn read_result_set(&mut self, column_count: u64) -> Result<(QueryResult, u16)> {
        let column_count = usize::try_from(column_count)
            .map_err(|_| Error::Protocol("column count overflow".into()))?;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let payload = self.read_payload().await?;
            columns.push(decode_column_definition(&payload)?);
        }

        // Column definitions are terminated by EOF (CLIENT_DEPRECATE_EOF is not negotiated)
        let payload = self.read_payload().await?;
        if payload.first() != Some(&crate::protocol::constants::headers::EOF) {
            return Err(Error::Protocol(
                "expected EOF after column definitions".into(),
            ));
        }
        decode_eof(&payload)?;

        let mut rows = Vec::new();
        loop {
            let payload = self.read_payload().await?;
            match decode_row(&payload, column_count)? {
                RowMessage::Row(values) => rows.push(values),
                RowMessage::Eof(eof) => {
                    let result = QueryResult {
                        columns,
                        rows,
                        warnings: eof.warnings,
                        ..QueryResult::default()
                    };
                    return Ok((result, eof.status));
                }
                RowMessage::Error(err) => return Err(err.into()),
            }
        }
    }

    async fn send_local_infile(&mut self, file_name: &str) -> Result<OkPacket> {
        let span = tracing::debug_span!("local_infile", file = %file_name);
        async {
            if !self.allow_local_infile {
                self.skip_local_infile().await?;
                return Err(Error::Config(format!(
                    "LOAD DATA LOCAL INFILE '{}' refused: allowAllFiles is disabled",
                    file_name
                )));
            }

            let mut file = match tokio::fs::File::open(file_name).await {
                Ok(file) => file,
                Err(e) => {
                    self.skip_local_infile().await?;
                    return Err(Error::Config(format!(
                        "cannot open LOAD DATA LOCAL INFILE '{}': {}",
                        file_name, e
                    )));
                }
            };

            let mut sent = 0usize;
            let mut chunk = vec![0u8; INFILE_CHUNK_SIZE];
            loop {
                let n = file.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                sent += n;
                self.send_message(&FrontendMessage::InfileData(Bytes::copy_from_slice(
                    &chunk[..n],
                )))
                .await?;
            }
            self.send_message(&FrontendMessage::InfileData(Bytes::new()))
                .await?;
            tracing::debug!(bytes = sent, "local infile sent");

            self.read_ok().await
        }
        .instrument(span)
        .await
    }

    /// End an upload without data. The server's reply to the empty upload
    /// (OK or ERR) is consumed so the stream stays in step; transport
    /// failures are returned.
    async fn skip_local_infile(&mut self) -> Result<()> {
        self.send_message(&FrontendMessage::InfileData(Bytes::new()))
            .await?;
        match self.read_ok().await {
            Ok(_) | Err(Error::Server { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send a frontend message, continuing the current sequence
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let payload = encode_message(msg)?;
        let mut buf = BytesMut::with_capacity(payload.len() + HEADER_LEN);
        frame_packets(&mut buf, &mut self.seq, &payload);

        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        io_timeout(self.write_timeout, async {
            transport.write_all(&buf).await?;
            transport.flush().await
        })
        .await
    }

    /// Receive one logical payload, joining packets split at the size limit
    async fn read_payload(&mut self) -> Result<Bytes> {
        let first = self.read_packet().await?;
        if first.len() < MAX_PACKET_SIZE {
            return Ok(first);
        }

        let mut payload = BytesMut::from(&first[..]);
        loop {
            let next = self.read_packet().await?;
            payload.extend_from_slice(&next);
            if next.len() < MAX_PACKET_SIZE {
                return Ok(payload.freeze());
            }
        }
    }

    async fn read_packet(&mut self) -> Result<Bytes> {
        loop {
            if let Ok((packet, consumed)) = decode_packet(&self.read_buf) {
                self.read_buf.advance(consumed);
                if packet.seq != self.seq {
                    return Err(Error::Protocol(format!(
                        "packets out of order: expected sequence {}, got {}",
                        self.seq, packet.seq
                    )));
                }
                self.seq = self.seq.wrapping_add(1);
                return Ok(packet.payload);
            }

            // Need more data
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = io_timeout(self.read_timeout, transport.read_buf(&mut self.read_buf)).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}
