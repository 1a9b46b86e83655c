//! Flush rule configuration.
//!
//! The runtime view of the `[rules]` and `[repository]` settings, handed to
//! the registrar on every activation.

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use super::events::ActionType;
use super::flusher::AgentFilter;
use super::session::DEFAULT_SUBSERVICE;

/// Action used for the flush requests a rule issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushAction {
    /// Reuse the action of the replication event.
    #[default]
    Inherit,
    /// Always request an activation flush.
    Activate,
    /// Always request a delete flush.
    Delete,
}

impl FlushAction {
    pub fn resolve(self, event_action: ActionType) -> ActionType {
        match self {
            Self::Inherit => event_action,
            Self::Activate => ActionType::Activate,
            Self::Delete => ActionType::Delete,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown flush action `{0}`; expected inherit, activate or delete")]
pub struct UnknownFlushAction(pub String);

impl FromStr for FlushAction {
    type Err = UnknownFlushAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inherit" => Ok(Self::Inherit),
            "activate" => Ok(Self::Activate),
            "delete" => Ok(Self::Delete),
            _ => Err(UnknownFlushAction(s.to_string())),
        }
    }
}

/// Configuration consumed by [`super::FlushRuleRegistrar::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushConfig {
    /// Raw `<pattern>=<path>[&<path>...]` entries.
    pub rules: Vec<String>,
    pub action: FlushAction,
    /// Wait for each flush to be acknowledged before continuing.
    pub synchronous: bool,
    /// Agents that receive the flush requests.
    pub agent_filter: AgentFilter,
    /// Subservice used to open repository sessions.
    pub subservice: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            action: FlushAction::Inherit,
            synchronous: false,
            agent_filter: AgentFilter::ResourceOnly,
            subservice: DEFAULT_SUBSERVICE.to_string(),
        }
    }
}

impl FlushConfig {
    pub fn with_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rules: rules.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl From<&crate::config::Settings> for FlushConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            rules: settings.rules.rules.clone(),
            action: settings.rules.action,
            synchronous: settings.rules.synchronous,
            agent_filter: settings.rules.agent_filter,
            subservice: settings.repository.subservice.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = FlushConfig::default();
        assert!(config.rules.is_empty());
        assert_eq!(config.action, FlushAction::Inherit);
        assert!(!config.synchronous);
        assert_eq!(config.agent_filter, AgentFilter::ResourceOnly);
        assert_eq!(config.subservice, "dispatcher-flush");
    }

    #[test]
    fn inherit_keeps_event_action() {
        assert_eq!(
            FlushAction::Inherit.resolve(ActionType::Deactivate),
            ActionType::Deactivate
        );
    }

    #[test]
    fn override_forces_action() {
        assert_eq!(
            FlushAction::Activate.resolve(ActionType::Delete),
            ActionType::Activate
        );
        assert_eq!(
            FlushAction::Delete.resolve(ActionType::Activate),
            ActionType::Delete
        );
    }

    #[test]
    fn parses_flush_action_names() {
        assert_eq!("INHERIT".parse(), Ok(FlushAction::Inherit));
        assert_eq!(
            "replicate".parse::<FlushAction>(),
            Err(UnknownFlushAction("replicate".to_string()))
        );
    }
}
