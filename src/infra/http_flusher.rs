//! Dispatcher flush transports.

use reqwest::{StatusCode, Url, blocking::Client, header::CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::config::{AgentSettings, DispatcherSettings};
use crate::flush::{ActionType, AgentFilter, DispatcherFlusher, FlushError, RepositorySession};

use super::error::InfraError;

const INVALIDATE_PATH: &str = "/dispatcher/invalidate.cache";
const HEADER_ACTION: &str = "CQ-Action";
const HEADER_HANDLE: &str = "CQ-Handle";
const HEADER_PATH: &str = "CQ-Path";
const HEADER_ACTION_SCOPE: &str = "CQ-Action-Scope";
const SCOPE_RESOURCE_ONLY: &str = "ResourceOnly";

#[derive(Debug, Clone)]
struct FlushAgent {
    name: String,
    endpoint: Url,
    resource_only: bool,
}

impl FlushAgent {
    fn accepts(&self, filter: AgentFilter) -> bool {
        match filter {
            AgentFilter::All => true,
            AgentFilter::ResourceOnly => self.resource_only,
        }
    }
}

/// Sends invalidation requests to the configured dispatcher agents.
#[derive(Debug, Clone)]
pub struct HttpDispatcherFlusher {
    client: Client,
    agents: Vec<FlushAgent>,
}

impl HttpDispatcherFlusher {
    pub fn new(settings: &DispatcherSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()?;

        let agents = settings
            .agents
            .iter()
            .filter(|agent| agent.enabled)
            .map(flush_agent)
            .collect::<Result<Vec<_>, _>>()?;

        if agents.is_empty() {
            warn!("No enabled dispatcher flush agents are configured");
        }

        Ok(Self { client, agents })
    }

    pub fn user_agent() -> &'static str {
        concat!("flushd/", env!("CARGO_PKG_VERSION"))
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn invalidate(
        &self,
        agent: &FlushAgent,
        action: ActionType,
        filter: AgentFilter,
        path: &str,
    ) -> Result<(), String> {
        let mut request = self
            .client
            .post(agent.endpoint.clone())
            .header(HEADER_ACTION, action.as_header_value())
            .header(HEADER_HANDLE, path)
            .header(HEADER_PATH, path)
            .header(CONTENT_TYPE, "application/octet-stream");
        if filter == AgentFilter::ResourceOnly {
            request = request.header(HEADER_ACTION_SCOPE, SCOPE_RESOURCE_ONLY);
        }

        let response = request
            .send()
            .map_err(|err| format!("agent `{}` unreachable: {err}", agent.name))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(format!(
                "agent `{}` returned {}{}",
                agent.name,
                status_label(status),
                if text.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", text.trim())
                }
            ));
        }
        Ok(())
    }
}

impl DispatcherFlusher for HttpDispatcherFlusher {
    fn flush(
        &self,
        session: &dyn RepositorySession,
        action: ActionType,
        synchronous: bool,
        filter: AgentFilter,
        paths: &[&str],
    ) -> Result<(), FlushError> {
        let agents: Vec<&FlushAgent> = self
            .agents
            .iter()
            .filter(|agent| agent.accepts(filter))
            .collect();

        for path in paths {
            if agents.is_empty() {
                return Err(FlushError::invocation(
                    *path,
                    format!("no enabled flush agent accepts filter `{}`", filter.as_str()),
                ));
            }

            let failures: Vec<String> = agents
                .iter()
                .filter_map(|agent| {
                    debug!(
                        agent = %agent.name,
                        endpoint = %agent.endpoint,
                        flush_path = %path,
                        action = %action,
                        user_id = session.user_id(),
                        synchronous,
                        "Sending dispatcher invalidation"
                    );
                    self.invalidate(agent, action, filter, path).err()
                })
                .collect();

            if !failures.is_empty() {
                return Err(FlushError::invocation(*path, failures.join("; ")));
            }
        }
        Ok(())
    }
}

fn flush_agent(agent: &AgentSettings) -> Result<FlushAgent, InfraError> {
    let endpoint = agent.url.join(INVALIDATE_PATH).map_err(|err| {
        InfraError::configuration(format!(
            "agent `{}` has no usable invalidation endpoint: {err}",
            agent.name
        ))
    })?;

    Ok(FlushAgent {
        name: agent.name.clone(),
        endpoint,
        resource_only: agent.resource_only,
    })
}

fn status_label(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

/// Logs flush requests without sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunFlusher;

impl DispatcherFlusher for DryRunFlusher {
    fn flush(
        &self,
        session: &dyn RepositorySession,
        action: ActionType,
        synchronous: bool,
        filter: AgentFilter,
        paths: &[&str],
    ) -> Result<(), FlushError> {
        for path in paths {
            info!(
                flush_path = %path,
                action = %action,
                user_id = session.user_id(),
                synchronous,
                filter = filter.as_str(),
                "Dry run: dispatcher flush not sent"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct User;

    impl RepositorySession for User {
        fn user_id(&self) -> &str {
            "flush-service"
        }
    }

    fn agent(name: &str, url: &str, resource_only: bool, enabled: bool) -> AgentSettings {
        AgentSettings {
            name: name.to_string(),
            url: Url::parse(url).expect("valid url"),
            resource_only,
            enabled,
        }
    }

    fn settings(agents: Vec<AgentSettings>) -> DispatcherSettings {
        DispatcherSettings {
            timeout: Duration::from_secs(1),
            agents,
        }
    }

    #[test]
    fn disabled_agents_are_skipped() {
        let flusher = HttpDispatcherFlusher::new(&settings(vec![
            agent("a", "http://a.example", true, true),
            agent("b", "http://b.example", true, false),
        ]))
        .expect("flusher builds");

        assert_eq!(flusher.agent_count(), 1);
    }

    #[test]
    fn endpoint_replaces_agent_path() {
        let agent = flush_agent(&agent("a", "http://a.example/base/", true, true))
            .expect("endpoint resolves");

        assert_eq!(
            agent.endpoint.as_str(),
            "http://a.example/dispatcher/invalidate.cache"
        );
    }

    #[test]
    fn resource_only_filter_excludes_full_agents() {
        let full = FlushAgent {
            name: "full".to_string(),
            endpoint: Url::parse("http://full.example/dispatcher/invalidate.cache")
                .expect("valid url"),
            resource_only: false,
        };

        assert!(full.accepts(AgentFilter::All));
        assert!(!full.accepts(AgentFilter::ResourceOnly));
    }

    #[test]
    fn no_matching_agent_is_an_invocation_error() {
        let flusher = HttpDispatcherFlusher::new(&settings(vec![agent(
            "full",
            "http://full.example",
            false,
            true,
        )]))
        .expect("flusher builds");

        let result = flusher.flush(
            &User,
            ActionType::Activate,
            false,
            AgentFilter::ResourceOnly,
            &["/content/a"],
        );

        assert!(matches!(result, Err(FlushError::Invocation { path, .. }) if path == "/content/a"));
    }

    #[test]
    fn dry_run_always_succeeds() {
        let result = DryRunFlusher.flush(
            &User,
            ActionType::Delete,
            true,
            AgentFilter::All,
            &["/content/a", "/content/b"],
        );

        assert_eq!(result, Ok(()));
    }
}
