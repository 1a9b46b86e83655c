//! Flush dispatch.
//!
//! Issues one flush call per resolved target path. Failures are isolated per
//! path; only a failure to open the repository session aborts a batch.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, error};

use super::events::ActionType;
use super::flusher::{AgentFilter, DispatcherFlusher, FlushError};
use super::session::{RepositorySession, SessionProvider};

pub const METRIC_FLUSH_REQUESTS: &str = "flushd_flush_requests_total";
pub const METRIC_SESSION_FAILURES: &str = "flushd_session_failures_total";
pub const METRIC_DISPATCH_MS: &str = "flushd_dispatch_ms";

/// Outcome of one dispatch batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failures: Vec<FlushError>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct FlushDispatcher<P: SessionProvider> {
    sessions: Arc<P>,
    flusher: Arc<dyn DispatcherFlusher>,
    subservice: String,
    synchronous: bool,
    filter: AgentFilter,
}

impl<P: SessionProvider> FlushDispatcher<P> {
    pub fn new(
        sessions: Arc<P>,
        flusher: Arc<dyn DispatcherFlusher>,
        subservice: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            flusher,
            subservice: subservice.into(),
            synchronous: false,
            filter: AgentFilter::ResourceOnly,
        }
    }

    /// Wait for the cache to confirm each flush before issuing the next.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn agent_filter(mut self, filter: AgentFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Flush every target in order under one freshly opened session.
    ///
    /// The session is dropped before returning, on every path.
    pub fn flush_batch(
        &self,
        action: ActionType,
        targets: &[String],
    ) -> Result<DispatchReport, FlushError> {
        let session = self.sessions.service_session(&self.subservice).map_err(|err| {
            counter!(METRIC_SESSION_FAILURES).increment(1);
            FlushError::from(err)
        })?;

        Ok(self.dispatch(&session, targets, action))
    }

    /// Flush every target in order; one failing target does not stop the rest.
    pub fn dispatch(
        &self,
        session: &dyn RepositorySession,
        targets: &[String],
        action: ActionType,
    ) -> DispatchReport {
        let started_at = Instant::now();
        let mut report = DispatchReport::default();

        for target in targets {
            report.attempted += 1;
            debug!(
                flush_path = %target,
                action = %action,
                user_id = session.user_id(),
                filter = self.filter.as_str(),
                "Requesting dispatcher flush"
            );

            match self
                .flusher
                .flush(session, action, self.synchronous, self.filter, &[target.as_str()])
            {
                Ok(()) => {
                    counter!(METRIC_FLUSH_REQUESTS, "result" => "ok").increment(1);
                }
                Err(err) => {
                    counter!(METRIC_FLUSH_REQUESTS, "result" => "error").increment(1);
                    error!(
                        flush_path = %target,
                        action = %action,
                        error = %err,
                        "Dispatcher flush failed; continuing with remaining targets"
                    );
                    report.failures.push(err);
                }
            }
        }

        histogram!(METRIC_DISPATCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        report
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{ErrorEvents, RecordingFlusher, RecordingSessions};
    use super::*;

    fn targets(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn flushes_each_target_once_in_order() {
        let flusher = Arc::new(RecordingFlusher::default());
        let sessions = Arc::new(RecordingSessions::default());
        let dispatcher = FlushDispatcher::new(sessions.clone(), flusher.clone(), "dispatcher-flush");

        let report = dispatcher
            .flush_batch(ActionType::Activate, &targets(&["/a", "/b", "/c"]))
            .expect("session available");

        assert_eq!(flusher.paths(), ["/a", "/b", "/c"]);
        assert_eq!(report.attempted, 3);
        assert!(report.is_clean());
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_on_first_target_does_not_stop_second() {
        let flusher = Arc::new(RecordingFlusher::failing_on(&["/first"]));
        let sessions = Arc::new(RecordingSessions::default());
        let dispatcher = FlushDispatcher::new(sessions, flusher.clone(), "dispatcher-flush");

        let report = dispatcher
            .flush_batch(ActionType::Activate, &targets(&["/first", "/second"]))
            .expect("session available");

        assert_eq!(flusher.paths(), ["/first", "/second"]);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(
            report.failures,
            [FlushError::invocation("/first", "agent returned 503")]
        );
    }

    #[test]
    fn session_failure_aborts_batch_without_flushing() {
        let flusher = Arc::new(RecordingFlusher::default());
        let sessions = Arc::new(RecordingSessions {
            fail: true,
            ..Default::default()
        });
        let dispatcher = FlushDispatcher::new(sessions, flusher.clone(), "dispatcher-flush");

        let err = dispatcher
            .flush_batch(ActionType::Activate, &targets(&["/a", "/b"]))
            .expect_err("login fails");

        assert!(matches!(err, FlushError::SessionAcquisition(_)));
        assert!(flusher.paths().is_empty());
    }

    #[test]
    fn session_is_released_after_partial_failure() {
        let flusher = Arc::new(RecordingFlusher::failing_on(&["/a", "/b"]));
        let sessions = Arc::new(RecordingSessions::default());
        let dispatcher = FlushDispatcher::new(sessions.clone(), flusher, "dispatcher-flush");

        let report = dispatcher
            .flush_batch(ActionType::Delete, &targets(&["/a", "/b"]))
            .expect("session available");

        assert_eq!(report.failures.len(), 2);
        assert_eq!(sessions.opened.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_failing_target_logs_one_error() {
        let flusher = Arc::new(RecordingFlusher::failing_on(&["/a", "/c"]));
        let sessions = Arc::new(RecordingSessions::default());
        let dispatcher = FlushDispatcher::new(sessions, flusher.clone(), "dispatcher-flush");
        let errors = ErrorEvents::default();

        let report = errors.capture(|| {
            dispatcher
                .flush_batch(ActionType::Activate, &targets(&["/a", "/b", "/c"]))
                .expect("session available")
        });

        assert_eq!(flusher.paths(), ["/a", "/b", "/c"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(errors.count(), 2);
        assert_eq!(errors.field("flush_path"), ["/a", "/c"]);
    }

    #[test]
    fn clean_batch_logs_no_error() {
        let dispatcher = FlushDispatcher::new(
            Arc::new(RecordingSessions::default()),
            Arc::new(RecordingFlusher::default()),
            "dispatcher-flush",
        );
        let errors = ErrorEvents::default();

        errors.capture(|| {
            dispatcher
                .flush_batch(ActionType::Delete, &targets(&["/a", "/b"]))
                .expect("session available")
        });

        assert_eq!(errors.count(), 0);
    }
}
