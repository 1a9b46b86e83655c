//! Flush capability seam.
//!
//! The dispatcher flusher notifies the front-end cache that paths must be
//! invalidated. Transports live in [`crate::infra`].

use std::str::FromStr;

use thiserror::Error;

use super::events::ActionType;
use super::session::{RepositorySession, SessionError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlushError {
    #[error("could not acquire repository session: {0}")]
    SessionAcquisition(#[from] SessionError),
    #[error("flush of `{path}` failed: {reason}")]
    Invocation { path: String, reason: String },
}

impl FlushError {
    pub fn invocation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invocation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Which flush agents a request is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentFilter {
    /// Every enabled agent; the dispatcher may invalidate dependent content.
    All,
    /// Agents flagged resource-only; only the named resource is invalidated.
    #[default]
    ResourceOnly,
}

impl AgentFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ResourceOnly => "resource-only",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown agent filter `{0}`; expected resource-only or all")]
pub struct UnknownAgentFilter(pub String);

impl FromStr for AgentFilter {
    type Err = UnknownAgentFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "resource-only" | "resource_only" => Ok(Self::ResourceOnly),
            _ => Err(UnknownAgentFilter(s.to_string())),
        }
    }
}

/// Notifies the front-end cache layer to invalidate paths.
pub trait DispatcherFlusher: Send + Sync {
    /// Issue one flush request covering `paths`.
    fn flush(
        &self,
        session: &dyn RepositorySession,
        action: ActionType,
        synchronous: bool,
        filter: AgentFilter,
        paths: &[&str],
    ) -> Result<(), FlushError>;
}
