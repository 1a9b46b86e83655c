use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::flush::metric_names::{
    METRIC_DISPATCH_MS, METRIC_EVENTS_HANDLED, METRIC_EVENTS_IGNORED, METRIC_FLUSH_REQUESTS,
    METRIC_LISTENERS_ACTIVE, METRIC_SESSION_FAILURES,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_FLUSH_REQUESTS,
            Unit::Count,
            "Total number of dispatcher flush requests, labelled by result."
        );
        describe_counter!(
            METRIC_SESSION_FAILURES,
            Unit::Count,
            "Total number of events dropped because no repository session could be opened."
        );
        describe_counter!(
            METRIC_EVENTS_HANDLED,
            Unit::Count,
            "Total number of replication events that matched a flush rule."
        );
        describe_counter!(
            METRIC_EVENTS_IGNORED,
            Unit::Count,
            "Total number of delivered events ignored by a flush listener."
        );
        describe_histogram!(
            METRIC_DISPATCH_MS,
            Unit::Milliseconds,
            "Time spent flushing the targets of one event, in milliseconds."
        );
        describe_gauge!(
            METRIC_LISTENERS_ACTIVE,
            Unit::Count,
            "Current number of registered flush listeners."
        );
    });
}
