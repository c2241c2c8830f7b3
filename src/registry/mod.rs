//! Connection registry
//!
//! This module handles:
//! * Named connection handles and the current-connection marker
//! * The reuse-versus-reopen decision when adding a connection
//! * Open-and-probe with bounded, cancellable retry
//! * Disconnect and teardown

mod config;
mod handle;
mod retry;

pub use config::{RegistryConfig, RegistryConfigBuilder, DEFAULT_RETRY_COUNT};
pub use handle::{ConnHandle, HandleState};
pub use retry::{open_with_retry, Opened, RetryPolicy, DEFAULT_BACKOFF};

use crate::driver::{Db, Driver};
use crate::dsn::DsnBuilder;
use crate::metrics::labels;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Registry shared between tasks; each operation holds the lock throughout
pub type SharedRegistry<D> = Arc<tokio::sync::Mutex<Registry<D>>>;

/// Named connections plus the current-connection marker
///
/// The marker stores the name of the current entry and is resolved on every
/// access; it never names a missing entry.
pub struct Registry<D: Driver> {
    driver: D,
    config: RegistryConfig,
    dsn: DsnBuilder,
    conns: HashMap<String, ConnHandle<D::Db>>,
    current: Option<String>,
    cancel: CancellationToken,
}

impl<D: Driver> std::fmt::Debug for Registry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("driver", &self.driver.name())
            .field("connections", &self.names())
            .field("current", &self.current)
            .finish()
    }
}

impl<D: Driver> Registry<D> {
    /// Create an empty registry
    pub fn new(driver: D, config: RegistryConfig) -> Self {
        let dsn = config.dsn_builder();
        Self {
            driver,
            config,
            dsn,
            conns: HashMap::new(),
            current: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Open (or reuse) a connection, store it under `name` and make it current.
    ///
    /// The current connection's database handle is reused when host, user and
    /// password all match and `expected_errors` is `None`; the database name is
    /// not compared. Otherwise a DSN is built and opened with retry, using the
    /// configured budget, or a single attempt when `expected_errors` is given.
    ///
    /// # Errors
    ///
    /// With `expected_errors` set, the underlying failure is returned as is so
    /// the caller can match it. Without, failures are logged and wrapped in
    /// [`Error::Unrecoverable`].
    pub async fn add(
        &mut self,
        name: &str,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
        expected_errors: Option<&[String]>,
    ) -> Result<&mut ConnHandle<D::Db>> {
        let span = tracing::info_span!("add", name, host, user, database);
        self.insert_new(name, host, user, password, database, expected_errors.is_some())
            .instrument(span)
            .await?;
        self.conns
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn insert_new(
        &mut self,
        name: &str,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
        expects_error: bool,
    ) -> Result<()> {
        let reusable = match self.current() {
            Some(current) if !expects_error && current.matches_credentials(host, user, password) => {
                Some(current.db().clone())
            }
            _ => None,
        };

        let (db, fresh) = match reusable {
            Some(db) => {
                crate::metrics::counters::handle_reused();
                tracing::debug!("reusing current database handle");
                (db, false)
            }
            None => {
                let dsn = self.dsn.build(user, password, host, database);
                let budget = if expects_error {
                    1
                } else {
                    self.config.retry_count
                };
                match open_with_retry(&self.driver, &dsn, budget, &self.config.retry, &self.cancel)
                    .await
                {
                    Ok(opened) => (Arc::new(opened.db), true),
                    Err(e) => return Err(escalate(e, expects_error)),
                }
            }
        };

        let mut handle =
            ConnHandle::new(host, self.config.default_port, user, password, database, db);
        if let Err(e) = handle.establish().await {
            if fresh {
                if let Err(close_err) = handle.db().close().await {
                    tracing::warn!(error = %close_err, "failed to close database handle");
                }
            }
            return Err(escalate(e, expects_error));
        }

        if let Some(mut replaced) = self.conns.insert(name.to_string(), handle) {
            if let Err(e) = replaced.close().await {
                crate::metrics::counters::close_failed(labels::CLOSE_REPLACED);
                tracing::warn!(error = %e, "failed to close replaced connection");
            }
        }
        self.current = Some(name.to_string());

        tracing::info!(reused = !fresh, "connection added");
        Ok(())
    }

    /// Look up a connection
    pub fn get(&self, name: &str) -> Option<&ConnHandle<D::Db>> {
        self.conns.get(name)
    }

    /// Look up a connection for issuing commands
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ConnHandle<D::Db>> {
        self.conns.get_mut(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.conns.contains_key(name)
    }

    /// The current connection
    pub fn current(&self) -> Option<&ConnHandle<D::Db>> {
        self.current.as_deref().and_then(|name| self.conns.get(name))
    }

    /// The current connection for issuing commands
    pub fn current_mut(&mut self) -> Option<&mut ConnHandle<D::Db>> {
        match self.current.as_deref() {
            Some(name) => self.conns.get_mut(name),
            None => None,
        }
    }

    /// Name of the current connection
    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Mark `name` current, or clear the marker with `None`
    pub fn set_current(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) if !self.conns.contains_key(name) => Err(Error::NotFound(name.to_string())),
            Some(name) => {
                self.current = Some(name.to_string());
                Ok(())
            }
            None => {
                self.current = None;
                Ok(())
            }
        }
    }

    /// Make `name` current without re-probing it
    pub fn switch_to(&mut self, name: &str) -> Result<&mut ConnHandle<D::Db>> {
        let handle = self
            .conns
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.current = Some(name.to_string());
        tracing::debug!(name, "switched connection");
        Ok(handle)
    }

    /// Close and remove `name`.
    ///
    /// The entry is removed even when closing fails; the failure comes back as
    /// [`Error::CloseFailed`].
    pub async fn disconnect(&mut self, name: &str) -> Result<()> {
        let Some(mut handle) = self.conns.remove(name) else {
            return Err(Error::NotFound(name.to_string()));
        };
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        crate::metrics::counters::disconnected();

        let result = if handle.is_open() {
            handle.close().await
        } else {
            Ok(())
        };
        match result {
            Ok(()) => {
                tracing::info!(name, "connection closed");
                Ok(())
            }
            Err(e) => {
                crate::metrics::counters::close_failed(labels::CLOSE_DISCONNECT);
                tracing::warn!(name, error = %e, "failed to close connection");
                Err(Error::CloseFailed {
                    name: name.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Close every connection and empty the registry. Close errors are logged.
    pub async fn close_all(&mut self) {
        self.current = None;
        let mut handles: Vec<_> = self.conns.drain().collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        // Handles are dropped one by one so the last user of a shared
        // database handle sees itself as the only owner and closes it.
        for (name, mut handle) in handles {
            if let Err(e) = handle.close().await {
                crate::metrics::counters::close_failed(labels::CLOSE_ALL);
                tracing::warn!(name = %name, error = %e, "failed to close connection");
            }
        }
        tracing::debug!("all connections closed");
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.conns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Whether no connection is registered
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// DSN `add` would open for these credentials
    pub fn dsn_for(&self, user: &str, password: &str, host: &str, database: &str) -> String {
        self.dsn.build(user, password, host, database)
    }

    /// Token that aborts in-flight opens and backoff sleeps
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Wrap for use from several tasks
    pub fn into_shared(self) -> SharedRegistry<D> {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}

fn escalate(e: Error, expects_error: bool) -> Error {
    if expects_error {
        return e;
    }
    tracing::error!(error = %e, "connection failed and no error was expected");
    Error::Unrecoverable(Box::new(e))
}

