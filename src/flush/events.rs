//! Replication events.
//!
//! A replication event is emitted by the publishing pipeline whenever a
//! content path is activated, deactivated or deleted on the delivery tier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Topic under which replication events are published on the event bus.
pub const REPLICATION_TOPIC: &str = "content/replication";

/// Replication action carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum ActionType {
    /// Content was published.
    Activate,
    /// Content was unpublished.
    Deactivate,
    /// Content was removed.
    Delete,
    /// Connectivity test, never flushes.
    Test,
}

impl ActionType {
    /// Whether this action should invalidate cached content downstream.
    pub fn triggers_flush(self) -> bool {
        matches!(self, Self::Activate | Self::Deactivate | Self::Delete)
    }

    /// Name used by the dispatcher invalidation request (`CQ-Action`).
    pub fn as_header_value(self) -> &'static str {
        match self {
            Self::Activate => "Activate",
            Self::Deactivate => "Deactivate",
            Self::Delete => "Delete",
            Self::Test => "Test",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Activate => "ACTIVATE",
            Self::Deactivate => "DEACTIVATE",
            Self::Delete => "DELETE",
            Self::Test => "TEST",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown replication action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for ActionType {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVATE" => Ok(Self::Activate),
            "DEACTIVATE" => Ok(Self::Deactivate),
            "DELETE" => Ok(Self::Delete),
            "TEST" => Ok(Self::Test),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for ActionType {
    type Error = UnknownAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single replication notification.
///
/// Events are transient: they are handed to listeners and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    /// Identifier used to correlate log lines for one event.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Replicated content path.
    pub path: String,
    /// What happened to the content.
    #[serde(rename = "type", alias = "action")]
    pub action: ActionType,
    /// User that requested the replication, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ReplicationEvent {
    pub fn new(path: impl Into<String>, action: ActionType) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            action,
            user_id: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn only_content_changes_trigger_flush() {
        assert!(ActionType::Activate.triggers_flush());
        assert!(ActionType::Deactivate.triggers_flush());
        assert!(ActionType::Delete.triggers_flush());
        assert!(!ActionType::Test.triggers_flush());
    }

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("activate".parse(), Ok(ActionType::Activate));
        assert_eq!(" Delete ".parse(), Ok(ActionType::Delete));
        assert_eq!(
            "publish".parse::<ActionType>(),
            Err(UnknownAction("publish".to_string()))
        );
    }

    #[test]
    fn event_deserializes_from_minimal_json() {
        let event: ReplicationEvent =
            serde_json::from_str(r#"{"path":"/content/site/en","type":"ACTIVATE"}"#)
                .expect("minimal event should parse");

        assert_eq!(event.path, "/content/site/en");
        assert_eq!(event.action, ActionType::Activate);
        assert!(event.user_id.is_none());
        assert!(!event.id.is_nil());
    }

    #[test]
    fn event_action_accepts_any_case() {
        let event: ReplicationEvent =
            serde_json::from_str(r#"{"path":"/content/a","type":"Activate"}"#)
                .expect("mixed-case action should parse");
        assert_eq!(event.action, ActionType::Activate);

        let err = serde_json::from_str::<ReplicationEvent>(r#"{"path":"/content/a","type":"publish"}"#)
            .expect_err("unknown action is rejected");
        assert!(err.to_string().contains("unknown replication action"), "{err}");
    }

    #[test]
    fn event_accepts_action_alias_and_user() {
        let event: ReplicationEvent = serde_json::from_str(
            r#"{"path":"/content/a","action":"DEACTIVATE","user_id":"author","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("event should parse");

        assert_eq!(event.action, ActionType::Deactivate);
        assert_eq!(event.user_id.as_deref(), Some("author"));
        assert_eq!(event.timestamp, datetime!(2024-05-01 10:00 UTC));
    }

    #[test]
    fn header_value_matches_dispatcher_vocabulary() {
        assert_eq!(ActionType::Deactivate.as_header_value(), "Deactivate");
        assert_eq!(ActionType::Activate.to_string(), "ACTIVATE");
    }
}
