//! Replication-driven dispatcher flushing.
//!
//! Configured rules map trigger patterns to flush paths:
//!
//! ```toml
//! [rules]
//! rules = [
//!   "/content/mysite/triggeredcontent/*=/content/mysite/flushedcontent/somepage",
//!   "/content/mysite/*/news/*=/content/mysite/$1/news&/content/mysite/$1",
//! ]
//! ```
//!
//! - [`RuleTable`] parses the rules, in configuration order.
//! - [`FlushRuleRegistrar`] registers one [`FlushingEventHandler`] per rule on
//!   an [`EventBus`], filtered on the trigger pattern.
//! - The handler confirms the match with [`PathPattern`], expands captures
//!   and hands the flush paths to the [`FlushDispatcher`], which opens one
//!   repository session per event and calls the [`DispatcherFlusher`] once
//!   per path.

mod bus;
mod config;
mod dispatcher;
mod events;
mod flusher;
mod handler;
mod lock;
mod matcher;
mod registrar;
mod rules;
mod session;

pub use bus::{
    BusError, EventBus, EventHandler, ListenerRegistration, LocalEventBus, PathFilter,
    Subscription,
};
pub use config::{FlushAction, FlushConfig, UnknownFlushAction};
pub use dispatcher::{DispatchReport, FlushDispatcher};
pub use events::{ActionType, REPLICATION_TOPIC, ReplicationEvent, UnknownAction};
pub use flusher::{AgentFilter, DispatcherFlusher, FlushError, UnknownAgentFilter};
pub use handler::FlushingEventHandler;
pub use matcher::{PathMatch, PathPattern, PatternError, match_path};
pub use registrar::{ActivationError, FlushRuleRegistrar, Resolution};
pub use rules::{FlushRule, RuleError, RuleTable, split_entries};
pub use session::{
    DEFAULT_SUBSERVICE, RepositorySession, ServiceSession, ServiceUserSessions, SessionError,
    SessionProvider,
};

/// Metric names emitted by this module.
pub mod metric_names {
    pub use super::dispatcher::{METRIC_DISPATCH_MS, METRIC_FLUSH_REQUESTS, METRIC_SESSION_FAILURES};
    pub use super::handler::{METRIC_EVENTS_HANDLED, METRIC_EVENTS_IGNORED};
    pub use super::registrar::METRIC_LISTENERS_ACTIVE;
}
