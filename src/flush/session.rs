//! Repository sessions.
//!
//! Flushing runs under a short-lived, service-scoped session that is opened
//! per event and released when dropped, whatever the outcome of the batch.

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, trace};

/// Subservice name used when no other is configured.
pub const DEFAULT_SUBSERVICE: &str = "dispatcher-flush";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no service user is mapped to subservice `{subservice}`")]
    UnmappedSubservice { subservice: String },
    #[error("repository login failed for `{user_id}`: {reason}")]
    Login { user_id: String, reason: String },
}

/// An open repository session.
///
/// Implementations release their underlying resources on `Drop`.
pub trait RepositorySession {
    /// Identity the session acts as.
    fn user_id(&self) -> &str;
}

/// Opens service-scoped sessions.
pub trait SessionProvider: Send + Sync {
    type Session: RepositorySession;

    fn service_session(&self, subservice: &str) -> Result<Self::Session, SessionError>;
}

/// Session provider backed by a subservice → service user mapping.
#[derive(Debug, Clone, Default)]
pub struct ServiceUserSessions {
    users: HashMap<String, String>,
}

impl ServiceUserSessions {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn with_user(mut self, subservice: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.users.insert(subservice.into(), user_id.into());
        self
    }
}

impl SessionProvider for ServiceUserSessions {
    type Session = ServiceSession;

    fn service_session(&self, subservice: &str) -> Result<ServiceSession, SessionError> {
        let user_id = self
            .users
            .get(subservice)
            .ok_or_else(|| SessionError::UnmappedSubservice {
                subservice: subservice.to_string(),
            })?;

        trace!(subservice, user_id = %user_id, "Service session opened");
        Ok(ServiceSession {
            subservice: subservice.to_string(),
            user_id: user_id.clone(),
            opened_at: Instant::now(),
        })
    }
}

#[derive(Debug)]
pub struct ServiceSession {
    subservice: String,
    user_id: String,
    opened_at: Instant,
}

impl ServiceSession {
    pub fn subservice(&self) -> &str {
        &self.subservice
    }
}

impl RepositorySession for ServiceSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ServiceSession {
    fn drop(&mut self) {
        debug!(
            subservice = %self.subservice,
            user_id = %self.user_id,
            held_ms = self.opened_at.elapsed().as_secs_f64() * 1000.0,
            "Service session released"
        );
    }
}
