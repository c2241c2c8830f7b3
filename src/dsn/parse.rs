//! DSN parsing
//!
//! Supports the MySQL driver format:
//! * user:password@tcp(host:port)/database?param=value&...
//! * user@unix(/path/to/mysql.sock)/database
//! * /database (TCP to 127.0.0.1:3306)

use crate::connection::{ConnectionConfig, TlsConfig, TlsMode};
use crate::protocol::constants::{collation_id, DEFAULT_COLLATION, MAX_PACKET_SIZE};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::Target;

/// Port used when the address carries none
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP socket
    Tcp,
    /// Unix domain socket
    Unix,
}

/// Parsed DSN
#[derive(Debug, Clone)]
pub struct DsnInfo {
    /// Transport type
    pub transport: TransportType,
    /// Host (for TCP)
    pub host: Option<String>,
    /// Port (for TCP)
    pub port: Option<u16>,
    /// Unix socket path
    pub unix_socket: Option<PathBuf>,
    /// Database name (may be empty)
    pub database: String,
    /// Username
    pub user: String,
    /// Password (empty when omitted)
    pub password: String,
    /// TLS mode (`tls` param)
    pub tls: TlsMode,
    /// Allow `LOAD DATA LOCAL INFILE` for any file (`allowAllFiles` param)
    pub allow_all_files: bool,
    /// Dial timeout (`timeout` param)
    pub timeout: Option<Duration>,
    /// I/O read timeout (`readTimeout` param)
    pub read_timeout: Option<Duration>,
    /// I/O write timeout (`writeTimeout` param)
    pub write_timeout: Option<Duration>,
    /// Connection collation id (`collation` param)
    pub collation: u8,
    /// Allow multiple statements per query (`multiStatements` param)
    pub multi_statements: bool,
    /// Report found rows instead of changed rows (`clientFoundRows` param)
    pub client_found_rows: bool,
    /// Max packet size announced to the server (`maxAllowedPacket` param)
    pub max_allowed_packet: u32,
    /// Remaining params, applied as `SET name=value` after login
    pub system_vars: Vec<(String, String)>,
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid boolean value '{}' for {}",
            value, key
        ))),
    }
}

fn parse_timeout(key: &str, value: &str) -> Result<Option<Duration>> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("invalid duration '{}' for {}: {}", value, key, e)))?;
    if duration.is_zero() {
        Ok(None)
    } else {
        Ok(Some(duration))
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals
fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::Config(format!("invalid address '{}'", addr)))?;
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in '{}'", addr)))?,
            None => DEFAULT_MYSQL_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in '{}'", addr)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), DEFAULT_MYSQL_PORT)),
    }
}

impl DsnInfo {
    /// Parse a DSN
    pub fn parse(s: &str) -> Result<Self> {
        // The query string may itself contain '/' (time zones), so cut it first
        let (head, query) = match s.find('?') {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => (s, ""),
        };

        let slash = head
            .rfind('/')
            .ok_or_else(|| Error::Config("DSN is missing the '/' before the database name".into()))?;
        let database = head[slash + 1..].to_string();
        let prefix = &head[..slash];

        let (auth, net_addr) = match prefix.rfind('@') {
            Some(pos) => (Some(&prefix[..pos]), &prefix[pos + 1..]),
            None => (None, prefix),
        };

        let (user, password) = match auth {
            Some(auth) => match auth.split_once(':') {
                Some((user, pass)) => (user.to_string(), pass.to_string()),
                None => (auth.to_string(), String::new()),
            },
            None => (whoami::username(), String::new()),
        };

        let (net, addr) = match net_addr.find('(') {
            Some(pos) => {
                let addr = net_addr[pos + 1..].strip_suffix(')').ok_or_else(|| {
                    Error::Config(format!("unclosed address in '{}'", net_addr))
                })?;
                (&net_addr[..pos], addr)
            }
            None => (net_addr, ""),
        };

        let mut info = match net {
            "" | "tcp" => {
                let addr = if addr.is_empty() { "127.0.0.1" } else { addr };
                let (host, port) = split_host_port(addr)?;
                Self::empty(TransportType::Tcp, Some(host), Some(port), None)
            }
            "unix" => {
                let path = if addr.is_empty() { "/tmp/mysql.sock" } else { addr };
                Self::empty(TransportType::Unix, None, None, Some(PathBuf::from(path)))
            }
            other => {
                return Err(Error::Config(format!(
                    "unsupported network '{}': expected tcp or unix",
                    other
                )))
            }
        };
        info.user = user;
        info.password = password;
        info.database = database;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            info.apply_param(&key, &value)?;
        }

        Ok(info)
    }

    fn empty(
        transport: TransportType,
        host: Option<String>,
        port: Option<u16>,
        unix_socket: Option<PathBuf>,
    ) -> Self {
        Self {
            transport,
            host,
            port,
            unix_socket,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            tls: TlsMode::default(),
            allow_all_files: false,
            timeout: None,
            read_timeout: None,
            write_timeout: None,
            collation: DEFAULT_COLLATION,
            multi_statements: false,
            client_found_rows: false,
            max_allowed_packet: MAX_PACKET_SIZE as u32,
            system_vars: Vec::new(),
        }
    }

    fn apply_param(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "allowAllFiles" => self.allow_all_files = parse_bool(key, value)?,
            "tls" => self.tls = value.parse()?,
            "timeout" => self.timeout = parse_timeout(key, value)?,
            "readTimeout" => self.read_timeout = parse_timeout(key, value)?,
            "writeTimeout" => self.write_timeout = parse_timeout(key, value)?,
            "collation" => {
                self.collation = collation_id(value)
                    .ok_or_else(|| Error::Config(format!("unknown collation '{}'", value)))?
            }
            "multiStatements" => self.multi_statements = parse_bool(key, value)?,
            "clientFoundRows" => self.client_found_rows = parse_bool(key, value)?,
            "maxAllowedPacket" => {
                self.max_allowed_packet = value.parse().map_err(|_| {
                    Error::Config(format!("invalid maxAllowedPacket '{}'", value))
                })?
            }
            _ => self.system_vars.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Host, port and database for diagnostics
    pub fn target(&self) -> Target {
        match self.transport {
            TransportType::Tcp => Target {
                host: self.host.clone().unwrap_or_default(),
                port: self.port.map(|p| p.to_string()).unwrap_or_default(),
                database: self.database.clone(),
            },
            TransportType::Unix => Target {
                host: self
                    .unix_socket
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                port: String::new(),
                database: self.database.clone(),
            },
        }
    }

    /// Build a `TlsConfig` from the parsed `tls` mode.
    ///
    /// Returns `None` for `tls=false` and for Unix sockets.
    pub fn to_tls_config(&self) -> Result<Option<TlsConfig>> {
        if self.transport == TransportType::Unix {
            return Ok(None);
        }
        TlsConfig::for_mode(self.tls)
    }

    /// Convert to ConnectionConfig
    pub fn to_config(&self) -> ConnectionConfig {
        let mut builder = ConnectionConfig::builder(&self.database, &self.user)
            .password(&self.password)
            .collation(self.collation)
            .tls(if self.transport == TransportType::Unix {
                TlsMode::Disabled
            } else {
                self.tls
            })
            .allow_local_infile(self.allow_all_files)
            .multi_statements(self.multi_statements)
            .client_found_rows(self.client_found_rows)
            .max_allowed_packet(self.max_allowed_packet);

        if let Some(timeout) = self.timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        if let Some(timeout) = self.write_timeout {
            builder = builder.write_timeout(timeout);
        }
        for (name, value) in &self.system_vars {
            builder = builder.system_var(name, value);
        }

        builder.build()
    }
}
