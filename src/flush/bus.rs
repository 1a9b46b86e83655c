//! Event bus seam and an in-process implementation.
//!
//! Listeners subscribe to a topic with an optional `(paths=<glob>)` filter.
//! The bus evaluates the filter cheaply, without regular expressions;
//! handlers confirm the match themselves.

use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use super::events::{REPLICATION_TOPIC, ReplicationEvent};
use super::lock::RecoverPoisoned;

const SOURCE: &str = "flush::bus";
const PATHS_ATTRIBUTE: &str = "paths";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid event filter `{filter}`: {reason}")]
    InvalidFilter { filter: String, reason: &'static str },
    #[error("listener registration {0} is not known to the bus")]
    UnknownRegistration(Uuid),
}

/// Receives events delivered by the bus.
///
/// Handlers run on the publishing thread and must not fail outward.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &ReplicationEvent);
}

/// What a listener wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    /// Filter expression evaluated by the bus, e.g. `(paths=/content/*)`.
    pub filter: Option<String>,
}

impl Subscription {
    /// Replication events whose path matches `pattern`.
    ///
    /// Backslashes in `pattern` are literal path characters and are escaped
    /// for the filter; `*` stays a wildcard.
    pub fn replication_paths(pattern: &str) -> Self {
        let glob = pattern.replace('\\', "\\\\");
        Self {
            topic: REPLICATION_TOPIC.to_string(),
            filter: Some(format!("({PATHS_ATTRIBUTE}={glob})")),
        }
    }
}

/// Handle returned by [`EventBus::register`], released with
/// [`EventBus::unregister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRegistration {
    id: Uuid,
    subscription: Subscription,
}

impl ListenerRegistration {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.subscription.topic
    }

    pub fn filter(&self) -> Option<&str> {
        self.subscription.filter.as_deref()
    }
}

impl fmt::Display for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} topic={} filter={}",
            self.id,
            self.subscription.topic,
            self.subscription.filter.as_deref().unwrap_or("*")
        )
    }
}

pub trait EventBus: Send + Sync {
    fn register(
        &self,
        subscription: Subscription,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ListenerRegistration, BusError>;

    /// Release a registration. Each handle is released at most once.
    fn unregister(&self, registration: ListenerRegistration) -> Result<(), BusError>;
}

/// Parsed `(paths=<glob>)` filter.
///
/// `*` matches any run of characters; `\` escapes the next character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    parts: Vec<String>,
}

impl PathFilter {
    pub fn parse(expression: &str) -> Result<Self, BusError> {
        let invalid = |reason| BusError::InvalidFilter {
            filter: expression.to_string(),
            reason,
        };

        let inner = expression
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| invalid("filter must be wrapped in parentheses"))?;
        let (attribute, glob) = inner
            .split_once('=')
            .ok_or_else(|| invalid("filter must have the form (attribute=value)"))?;
        if attribute.trim() != PATHS_ATTRIBUTE {
            return Err(invalid("only the `paths` attribute is supported"));
        }

        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = glob.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| invalid("dangling escape"))?;
                    current.push(escaped);
                }
                '*' => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);

        Ok(Self { parts })
    }

    pub fn matches(&self, path: &str) -> bool {
        let Some((first, rest)) = self.parts.split_first() else {
            return path.is_empty();
        };
        let Some((last, middle)) = rest.split_last() else {
            return path == first.as_str();
        };

        if path.len() < first.len() + last.len()
            || !path.starts_with(first.as_str())
            || !path.ends_with(last.as_str())
        {
            return false;
        }

        let mut window = &path[first.len()..path.len() - last.len()];
        for part in middle {
            match window.find(part.as_str()) {
                Some(pos) => window = &window[pos + part.len()..],
                None => return false,
            }
        }
        true
    }
}

struct Listener {
    registration: ListenerRegistration,
    filter: Option<PathFilter>,
    handler: Arc<dyn EventHandler>,
}

impl Listener {
    fn accepts(&self, topic: &str, event: &ReplicationEvent) -> bool {
        self.registration.subscription.topic == topic
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&event.path))
    }
}

/// Synchronous in-process event bus.
///
/// Events are delivered on the publishing thread, in registration order.
#[derive(Default)]
pub struct LocalEventBus {
    listeners: RwLock<Vec<Listener>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every listener whose subscription accepts it.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, event: &ReplicationEvent) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .listeners
            .read_or_recover(SOURCE, "publish")
            .iter()
            .filter(|listener| listener.accepts(topic, event))
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        trace!(
            event_id = %event.id,
            path = %event.path,
            topic,
            listeners = handlers.len(),
            "Delivering event"
        );

        for handler in &handlers {
            handler.handle_event(event);
        }
        handlers.len()
    }

    /// Publish a replication event on the replication topic.
    pub fn publish_replication(&self, event: &ReplicationEvent) -> usize {
        self.publish(REPLICATION_TOPIC, event)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read_or_recover(SOURCE, "listener_count").len()
    }
}

impl EventBus for LocalEventBus {
    fn register(
        &self,
        subscription: Subscription,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ListenerRegistration, BusError> {
        let filter = subscription
            .filter
            .as_deref()
            .map(PathFilter::parse)
            .transpose()?;
        let registration = ListenerRegistration {
            id: Uuid::new_v4(),
            subscription,
        };

        debug!(registration = %registration, "Listener registered");
        self.listeners.write_or_recover(SOURCE, "register").push(Listener {
            registration: registration.clone(),
            filter,
            handler,
        });
        Ok(registration)
    }

    fn unregister(&self, registration: ListenerRegistration) -> Result<(), BusError> {
        let mut listeners = self.listeners.write_or_recover(SOURCE, "unregister");
        let position = listeners
            .iter()
            .position(|listener| listener.registration.id == registration.id)
            .ok_or(BusError::UnknownRegistration(registration.id))?;
        listeners.remove(position);

        debug!(registration = %registration, "Listener unregistered");
        Ok(())
    }
}
