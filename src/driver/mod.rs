//! SQL driver abstraction
//!
//! A driver turns a DSN into a [`Db`]: a database handle that can be probed and
//! from which single [`Session`]s are derived. Several registry entries may
//! share one `Db` (see the reuse rule in [`crate::Registry::add`]); each entry
//! owns its session exclusively.
//!
//! [`MySqlDriver`] speaks the MySQL client protocol. Tests inject their own
//! drivers to count opens and script failures.

mod mysql;

pub use mysql::{MySqlDb, MySqlDriver, MySqlSession};

use crate::Result;
use std::future::Future;

/// Opens database handles from DSNs
pub trait Driver: Send + Sync + 'static {
    /// Database handle type
    type Db: Db;

    /// Driver name for logs
    fn name(&self) -> &'static str;

    /// Open a database handle.
    ///
    /// May or may not touch the network; liveness is established separately
    /// with [`Db::ping`].
    fn open(&self, dsn: &str) -> impl Future<Output = Result<Self::Db>> + Send;
}

/// Opened database handle
pub trait Db: Send + Sync + 'static {
    /// Session type derived from this handle
    type Session: Session;

    /// Liveness probe
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Derive one dedicated session
    fn session(&self) -> impl Future<Output = Result<Self::Session>> + Send;

    /// Release the handle's own resources (sessions are closed separately)
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Single live session
pub trait Session: Send + 'static {
    /// Close the session
    fn close(self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the session can still carry commands. Drivers report a
    /// transport they know to be broken here.
    fn is_alive(&self) -> bool {
        true
    }
}
