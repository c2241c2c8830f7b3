//! Connection handle

use crate::driver::{Db, Session};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Handle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Built, no session yet
    Created,
    /// Session established
    Open,
    /// Session released; terminal
    Closed,
}

impl HandleState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: HandleState) -> bool {
        use HandleState::*;

        matches!(
            (self, next),
            (Created, Open) | (Created, Closed) | (Open, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: HandleState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One live session plus the credentials used to establish it
///
/// The database handle is shared with every other handle opened through the
/// reuse path; the session belongs to this handle alone.
pub struct ConnHandle<D: Db> {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    db: Arc<D>,
    session: Option<D::Session>,
    state: HandleState,
}

impl<D: Db> ConnHandle<D> {
    pub(crate) fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        db: Arc<D>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            db,
            session: None,
            state: HandleState::Created,
        }
    }

    /// Derive this handle's session from the database handle
    pub(crate) async fn establish(&mut self) -> Result<()> {
        if self.state != HandleState::Created {
            return Err(Error::InvalidState {
                expected: HandleState::Created.to_string(),
                actual: self.state.to_string(),
            });
        }
        let session = self.db.session().await?;
        self.session = Some(session);
        self.state.transition(HandleState::Open)
    }

    /// Close the session, and the database handle when no other handle shares it.
    ///
    /// A no-op unless the handle is open.
    pub(crate) async fn close(&mut self) -> Result<()> {
        if self.state != HandleState::Open {
            return Ok(());
        }
        self.state.transition(HandleState::Closed)?;

        let session_result = match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        let db_result = if Arc::strong_count(&self.db) == 1 {
            self.db.close().await
        } else {
            Ok(())
        };
        session_result.and(db_result)
    }

    /// Server host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Login user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Login password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Database named when the handle was added
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Lifecycle state
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Whether the registry still holds this handle open.
    ///
    /// Tracks the handle's own lifecycle only; a session whose transport
    /// broke stays open until closed. See [`ConnHandle::is_usable`].
    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// Open, and the session still reports itself alive
    pub fn is_usable(&self) -> bool {
        self.is_open() && self.session.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Shared database handle
    pub fn db(&self) -> &Arc<D> {
        &self.db
    }

    /// Whether both handles use the same database handle
    pub fn shares_db_with(&self, other: &ConnHandle<D>) -> bool {
        Arc::ptr_eq(&self.db, &other.db)
    }

    /// The live session, `None` once closed
    pub fn session(&self) -> Option<&D::Session> {
        self.session.as_ref()
    }

    /// The live session for issuing commands
    pub fn session_mut(&mut self) -> Option<&mut D::Session> {
        self.session.as_mut()
    }

    /// Host, user and password all equal
    pub fn matches_credentials(&self, host: &str, user: &str, password: &str) -> bool {
        self.host == host && self.user == user && self.password == password
    }
}

impl<D: Db> fmt::Debug for ConnHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("state", &self.state)
            .finish()
    }
}
