use std::sync::{Arc, RwLock};

use crate::errors::{AuthError, Result};
use crate::session::Session;

/// Durable home of the single launcher session
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the saved session. Missing, cleared or unreadable data is `None`.
    async fn load(&self) -> Option<Session>;

    /// Replace the saved session as one unit
    async fn save(&self, session: &Session) -> Result<()>;

    /// Blank every session field and persist that
    async fn clear(&self) -> Result<()>;

    /// Whether a session usable for silent refresh is saved
    async fn has_valid(&self) -> bool {
        self.load()
            .await
            .is_some_and(|session| session.is_valid_for_refresh())
    }
}

/// In-memory session store for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<RwLock<Option<Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(session))),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Option<Session> {
        self.session
            .read()
            .ok()?
            .clone()
            .filter(Session::is_valid_for_refresh)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        *self
            .session
            .write()
            .map_err(|_| AuthError::Io(std::io::Error::other("Lock poisoned")))? = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self
            .session
            .write()
            .map_err(|_| AuthError::Io(std::io::Error::other("Lock poisoned")))? = None;
        Ok(())
    }
}
