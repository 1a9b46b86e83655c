//! Listener registrar.
//!
//! Owns the lifecycle of the flush listeners: one listener per configured
//! rule while active, none while inactive.

use std::sync::Arc;

use metrics::gauge;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bus::{BusError, EventBus, ListenerRegistration, Subscription};
use super::config::FlushConfig;
use super::dispatcher::FlushDispatcher;
use super::flusher::DispatcherFlusher;
use super::handler::FlushingEventHandler;
use super::matcher::{PathPattern, PatternError};
use super::rules::{RuleError, RuleTable};
use super::session::SessionProvider;

pub const METRIC_LISTENERS_ACTIVE: &str = "flushd_listeners_active";

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("failed to register listener for `{pattern}`: {source}")]
    Registration {
        pattern: String,
        #[source]
        source: BusError,
    },
}

/// Flush targets a rule produces for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub pattern: String,
    pub flush_paths: Vec<String>,
}

struct ActiveRules<P: SessionProvider> {
    table: RuleTable,
    registrations: Vec<ListenerRegistration>,
    handlers: Vec<Arc<FlushingEventHandler<P>>>,
}

/// Registers one filtered listener per flush rule and releases them all on
/// deactivation.
pub struct FlushRuleRegistrar<B: EventBus, P: SessionProvider + 'static> {
    bus: Arc<B>,
    sessions: Arc<P>,
    flusher: Arc<dyn DispatcherFlusher>,
    active: Option<ActiveRules<P>>,
}

impl<B: EventBus, P: SessionProvider + 'static> FlushRuleRegistrar<B, P> {
    pub fn new(bus: Arc<B>, sessions: Arc<P>, flusher: Arc<dyn DispatcherFlusher>) -> Self {
        Self {
            bus,
            sessions,
            flusher,
            active: None,
        }
    }

    /// Build the rule table and register one listener per rule.
    ///
    /// An already active registrar is deactivated first. If any listener
    /// fails to register, the ones registered so far are released and the
    /// registrar stays inactive.
    pub fn activate(&mut self, config: &FlushConfig) -> Result<usize, ActivationError> {
        if self.is_active() {
            self.deactivate();
        }

        let table = RuleTable::from_config_entries(&config.rules)?;
        debug!(rules = ?config.rules, "Activating with flush rules");

        let dispatcher = Arc::new(
            FlushDispatcher::new(
                Arc::clone(&self.sessions),
                Arc::clone(&self.flusher),
                config.subservice.clone(),
            )
            .synchronous(config.synchronous)
            .agent_filter(config.agent_filter),
        );

        let mut active = ActiveRules {
            table: RuleTable::default(),
            registrations: Vec::with_capacity(table.len()),
            handlers: Vec::with_capacity(table.len()),
        };

        for rule in &table {
            let registered = PathPattern::compile(rule.trigger_pattern())
                .map_err(ActivationError::from)
                .and_then(|pattern| {
                    let handler = Arc::new(FlushingEventHandler::new(
                        pattern,
                        rule.targets().to_vec(),
                        config.action,
                        Arc::clone(&dispatcher),
                    ));
                    debug!(
                        pattern = rule.trigger_pattern(),
                        "Registering handler with event filter"
                    );
                    self.bus
                        .register(
                            Subscription::replication_paths(rule.trigger_pattern()),
                            handler.clone(),
                        )
                        .map(|registration| (registration, handler))
                        .map_err(|source| ActivationError::Registration {
                            pattern: rule.trigger_pattern().to_string(),
                            source,
                        })
                });

            match registered {
                Ok((registration, handler)) => {
                    active.registrations.push(registration);
                    active.handlers.push(handler);
                }
                Err(err) => {
                    release_all(self.bus.as_ref(), active.registrations);
                    return Err(err);
                }
            }
        }

        let count = active.registrations.len();
        for registration in &active.registrations {
            debug!(registration = %registration, "Flush listener active");
        }
        active.table = table;
        self.active = Some(active);

        gauge!(METRIC_LISTENERS_ACTIVE).set(count as f64);
        info!(listeners = count, "Dispatcher flush rules activated");
        Ok(count)
    }

    /// Replace the active rules wholesale.
    pub fn reconfigure(&mut self, config: &FlushConfig) -> Result<usize, ActivationError> {
        self.activate(config)
    }

    /// Release every registration obtained during activation.
    ///
    /// A failed release is logged and does not stop the others. Returns the
    /// number of handles processed.
    pub fn deactivate(&mut self) -> usize {
        let Some(active) = self.active.take() else {
            return 0;
        };

        let released = release_all(self.bus.as_ref(), active.registrations);
        gauge!(METRIC_LISTENERS_ACTIVE).set(0.0);
        info!(listeners = released, "Dispatcher flush rules deactivated");
        released
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn rule_table(&self) -> Option<&RuleTable> {
        self.active.as_ref().map(|active| &active.table)
    }

    pub fn registrations(&self) -> &[ListenerRegistration] {
        self.active
            .as_ref()
            .map(|active| active.registrations.as_slice())
            .unwrap_or_default()
    }

    /// Flush paths every active rule would request for `path`, in rule order.
    pub fn resolve(&self, path: &str) -> Vec<Resolution> {
        let Some(active) = &self.active else {
            return Vec::new();
        };

        active
            .handlers
            .iter()
            .filter_map(|handler| {
                handler.resolve(path).map(|flush_paths| Resolution {
                    pattern: handler.pattern().to_string(),
                    flush_paths,
                })
            })
            .collect()
    }
}

impl<B: EventBus, P: SessionProvider + 'static> Drop for FlushRuleRegistrar<B, P> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn release_all<B: EventBus + ?Sized>(bus: &B, registrations: Vec<ListenerRegistration>) -> usize {
    let mut processed = 0;
    for registration in registrations {
        processed += 1;
        let id = registration.id();
        if let Err(err) = bus.unregister(registration) {
            warn!(registration = %id, error = %err, "Failed to unregister flush listener");
        }
    }
    processed
}
