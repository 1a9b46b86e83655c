//! Listener body for one flush rule.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, info, instrument};

use super::bus::EventHandler;
use super::config::FlushAction;
use super::dispatcher::FlushDispatcher;
use super::events::ReplicationEvent;
use super::matcher::PathPattern;
use super::session::SessionProvider;

pub const METRIC_EVENTS_HANDLED: &str = "flushd_events_handled_total";
pub const METRIC_EVENTS_IGNORED: &str = "flushd_events_ignored_total";

/// Flushes the targets of one rule when a matching replication event arrives.
///
/// The event bus pre-filters on the trigger pattern; the handler confirms
/// the match and expands captures into the target templates. Nothing is
/// ever propagated back to the bus: a failing flush must not hold up the
/// replication that produced the event.
pub struct FlushingEventHandler<P: SessionProvider> {
    pattern: PathPattern,
    targets: Vec<String>,
    action: FlushAction,
    dispatcher: Arc<FlushDispatcher<P>>,
}

impl<P: SessionProvider> FlushingEventHandler<P> {
    pub fn new(
        pattern: PathPattern,
        targets: Vec<String>,
        action: FlushAction,
        dispatcher: Arc<FlushDispatcher<P>>,
    ) -> Self {
        Self {
            pattern,
            targets,
            action,
            dispatcher,
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Flush paths this handler would request for `path`, if it matches.
    pub fn resolve(&self, path: &str) -> Option<Vec<String>> {
        let matched = self.pattern.matches(path)?;
        Some(
            self.targets
                .iter()
                .map(|template| matched.expand(template))
                .collect(),
        )
    }
}

impl<P: SessionProvider> EventHandler for FlushingEventHandler<P> {
    #[instrument(
        skip_all,
        fields(event_id = %event.id, path = %event.path, pattern = %self.pattern)
    )]
    fn handle_event(&self, event: &ReplicationEvent) {
        if !event.action.triggers_flush() {
            debug!(action = %event.action, "Replication action does not flush");
            counter!(METRIC_EVENTS_IGNORED, "reason" => "action").increment(1);
            return;
        }

        let Some(flush_paths) = self.resolve(&event.path) else {
            debug!("Event passed the bus filter but not the trigger pattern");
            counter!(METRIC_EVENTS_IGNORED, "reason" => "pattern").increment(1);
            return;
        };

        let action = self.action.resolve(event.action);
        counter!(METRIC_EVENTS_HANDLED).increment(1);

        match self.dispatcher.flush_batch(action, &flush_paths) {
            Ok(report) => info!(
                action = %action,
                flush_paths = ?flush_paths,
                attempted = report.attempted,
                failed = report.failures.len(),
                "Dispatcher flush rules applied"
            ),
            Err(err) => error!(
                action = %action,
                error = %err,
                "Error issuing dispatcher flush rules; no paths were flushed for this event"
            ),
        }
    }
}
