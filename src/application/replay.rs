//! Replay of recorded replication events.
//!
//! Input is JSON lines, one [`ReplicationEvent`] per line:
//!
//! ```json
//! {"path":"/content/site/en/news/launch","type":"ACTIVATE","user_id":"admin"}
//! ```
//!
//! Blank lines are ignored; malformed lines are logged and skipped.

use std::io::BufRead;

use serde::Serialize;
use tracing::{debug, warn};

use crate::flush::{LocalEventBus, ReplicationEvent};
use crate::infra::error::InfraError;

use super::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Non-blank input lines.
    pub lines: usize,
    pub published: usize,
    pub skipped: usize,
    /// Listener invocations across all published events.
    pub deliveries: usize,
    /// Published events no listener accepted.
    pub unmatched: usize,
}

/// Publish every event read from `reader` on the replication topic.
pub fn replay_events<R: BufRead>(
    bus: &LocalEventBus,
    reader: R,
) -> Result<ReplaySummary, AppError> {
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(InfraError::from)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let event: ReplicationEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(line = index + 1, error = %err, "Skipping malformed replication event");
                summary.skipped += 1;
                continue;
            }
        };

        let delivered = bus.publish_replication(&event);
        debug!(event_id = %event.id, path = %event.path, delivered, "Replayed event");
        summary.published += 1;
        summary.deliveries += delivered;
        if delivered == 0 {
            summary.unmatched += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::flush::{ActionType, EventBus, EventHandler, Subscription};

    #[derive(Default)]
    struct Seen(Mutex<Vec<(String, ActionType)>>);

    impl EventHandler for Seen {
        fn handle_event(&self, event: &ReplicationEvent) {
            self.0
                .lock()
                .expect("seen lock")
                .push((event.path.clone(), event.action));
        }
    }

    #[test]
    fn publishes_valid_lines_and_skips_the_rest() {
        let bus = LocalEventBus::new();
        let seen = Arc::new(Seen::default());
        bus.register(Subscription::replication_paths("/content/x/*"), seen.clone())
            .expect("registration succeeds");

        let input = concat!(
            "{\"path\":\"/content/x/page1\",\"type\":\"ACTIVATE\"}\n",
            "\n",
            "not json\n",
            "{\"path\":\"/content/y/page1\",\"type\":\"DELETE\"}\n",
            "{\"path\":\"/content/x/page2\",\"action\":\"DEACTIVATE\"}\n",
        );

        let summary = replay_events(&bus, Cursor::new(input)).expect("replay succeeds");

        assert_eq!(
            summary,
            ReplaySummary {
                lines: 4,
                published: 3,
                skipped: 1,
                deliveries: 2,
                unmatched: 1,
            }
        );
        assert_eq!(
            *seen.0.lock().expect("seen lock"),
            [
                ("/content/x/page1".to_string(), ActionType::Activate),
                ("/content/x/page2".to_string(), ActionType::Deactivate),
            ]
        );
    }

    #[test]
    fn empty_input_is_an_empty_summary() {
        let summary =
            replay_events(&LocalEventBus::new(), Cursor::new("")).expect("replay succeeds");

        assert_eq!(summary, ReplaySummary::default());
    }
}
