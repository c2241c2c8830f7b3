//! Data source names
//!
//! This module handles:
//! * Building DSNs from credentials and harness defaults
//! * Parsing DSNs back into typed connection options
//! * Extracting host/port/database for diagnostics

mod builder;
mod parse;

pub use builder::{DsnBuilder, DEFAULT_PORT, DEFAULT_TIME_ZONE};
pub use parse::{DsnInfo, TransportType, DEFAULT_MYSQL_PORT};

use std::fmt;

/// Host, port and database a DSN points at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Host name, address, or socket path
    pub host: String,
    /// Port as written in the DSN (empty for sockets)
    pub port: String,
    /// Database name
    pub database: String,
}

impl Target {
    /// Best-effort extraction; never fails.
    ///
    /// Falls back to scanning for `@tcp(` and `)/` when the DSN does not parse,
    /// so diagnostics still name the server for malformed strings.
    pub fn from_dsn(dsn: &str) -> Self {
        if let Ok(info) = DsnInfo::parse(dsn) {
            return info.target();
        }

        let mut target = Target::default();
        if let Some((_, rest)) = dsn.split_once("@tcp(") {
            if let Some((host_port, _)) = rest.split_once(')') {
                if let Some((host, port)) = host_port.rsplit_once(':') {
                    target.host = host.to_string();
                    target.port = port.to_string();
                }
            }
        }
        if let Some((_, rest)) = dsn.split_once(")/") {
            target.database = rest.split('?').next().unwrap_or_default().to_string();
        }
        target
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port.is_empty() {
            write!(f, "{}/{}", self.host, self.database)
        } else {
            write!(f, "{}:{}/{}", self.host, self.port, self.database)
        }
    }
}
