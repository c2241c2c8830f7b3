//! mysqltest-conn: connection lifecycle management for SQL test harnesses
//!
//! A test runner talks to a MySQL-compatible server through a set of named
//! connections, one of which is current. This crate provides:
//!
//! * A DSN builder that bakes in the harness defaults (port, session time
//!   zone, `allowAllFiles`, extra parameters)
//! * Open-and-probe with a bounded, cancellable retry budget
//! * A [`Registry`] of named [`ConnHandle`]s with a reuse rule: a new entry
//!   whose host, user and password match the current entry shares its
//!   database handle instead of opening another
//! * A MySQL client protocol driver ([`MySqlDriver`]) over tokio, with TLS
//!   via rustls
//!
//! Failures that the caller did not declare as expected come back as
//! [`Error::Unrecoverable`]; check [`Error::is_unrecoverable`] and abort.
//!
//! # Example
//!
//! ```no_run
//! use mysqltest_conn::{MySqlDriver, Registry, RegistryConfig};
//!
//! # async fn run() -> mysqltest_conn::Result<()> {
//! let config = RegistryConfig::builder().default_port(3306).retry_count(10).build();
//! let mut registry = Registry::new(MySqlDriver::new(), config);
//!
//! let conn = registry.add("default", "127.0.0.1", "root", "", "test", None).await?;
//! if let Some(session) = conn.session_mut() {
//!     let results = session.query("SELECT 1").await?;
//!     assert_eq!(results[0].text(0, 0), Some("1"));
//! }
//!
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod connection;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;

pub use driver::{Db, Driver, MySqlDriver, Session};
pub use dsn::{DsnBuilder, DsnInfo, Target};
pub use error::{Error, Result};
pub use registry::{
    open_with_retry, ConnHandle, HandleState, Opened, Registry, RegistryConfig, RetryPolicy,
    SharedRegistry,
};
