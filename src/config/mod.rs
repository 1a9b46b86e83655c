//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::flush::{AgentFilter, DEFAULT_SUBSERVICE, FlushAction};

mod cli;

pub use cli::{CliArgs, Command, GlobalOverrides, ReplayArgs, ResolveArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "flushd";
const ENV_PREFIX: &str = "FLUSHD";
const DEFAULT_DISPATCHER_TIMEOUT_SECS: u64 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub rules: RulesSettings,
    pub repository: RepositorySettings,
    pub dispatcher: DispatcherSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RulesSettings {
    /// Raw `<pattern>=<path>[&<path>...]` entries, in order.
    pub rules: Vec<String>,
    pub action: FlushAction,
    pub synchronous: bool,
    pub agent_filter: AgentFilter,
}

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub subservice: String,
    /// Subservice name → service user id.
    pub service_users: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub timeout: Duration,
    pub agents: Vec<AgentSettings>,
}

/// One dispatcher flush agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub name: String,
    pub url: Url,
    /// Agent only invalidates the named resource.
    pub resource_only: bool,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("rules.rules"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Replay(args)) = cli.command.as_ref() {
        raw.apply_replay_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    rules: RawRulesSettings,
    repository: RawRepositorySettings,
    dispatcher: RawDispatcherSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_replay_overrides(&mut self, overrides: &ReplayArgs) {
        if let Some(action) = overrides.action_type.as_ref() {
            self.rules.action_type = Some(action.clone());
        }
        if let Some(synchronous) = overrides.synchronous {
            self.rules.synchronous = Some(synchronous);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            rules,
            repository,
            dispatcher,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let rules = build_rules_settings(rules)?;
        let repository = build_repository_settings(repository)?;
        let dispatcher = build_dispatcher_settings(dispatcher)?;

        Ok(Self {
            logging,
            rules,
            repository,
            dispatcher,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_rules_settings(rules: RawRulesSettings) -> Result<RulesSettings, LoadError> {
    let action = match rules.action_type {
        Some(value) => FlushAction::from_str(&value)
            .map_err(|err| LoadError::invalid("rules.action_type", err.to_string()))?,
        None => FlushAction::default(),
    };
    let agent_filter = match rules.agent_filter {
        Some(value) => AgentFilter::from_str(&value)
            .map_err(|err| LoadError::invalid("rules.agent_filter", err.to_string()))?,
        None => AgentFilter::default(),
    };

    Ok(RulesSettings {
        rules: rules.rules.unwrap_or_default(),
        action,
        synchronous: rules.synchronous.unwrap_or(false),
        agent_filter,
    })
}

fn build_repository_settings(
    repository: RawRepositorySettings,
) -> Result<RepositorySettings, LoadError> {
    let subservice = repository
        .subservice
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SUBSERVICE.to_string());
    if subservice.is_empty() {
        return Err(LoadError::invalid(
            "repository.subservice",
            "subservice must not be empty",
        ));
    }

    let service_users = repository.service_users.unwrap_or_default();
    if let Some((subservice, _)) = service_users
        .iter()
        .find(|(_, user_id)| user_id.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "repository.service_users",
            format!("service user for `{subservice}` must not be empty"),
        ));
    }

    Ok(RepositorySettings {
        subservice,
        service_users,
    })
}

fn build_dispatcher_settings(
    dispatcher: RawDispatcherSettings,
) -> Result<DispatcherSettings, LoadError> {
    let timeout_seconds = dispatcher
        .timeout_seconds
        .unwrap_or(DEFAULT_DISPATCHER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "dispatcher.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let agents = dispatcher
        .agents
        .unwrap_or_default()
        .into_iter()
        .map(build_agent_settings)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DispatcherSettings {
        timeout: Duration::from_secs(timeout_seconds),
        agents,
    })
}

fn build_agent_settings(agent: RawAgentSettings) -> Result<AgentSettings, LoadError> {
    let raw_url = agent
        .url
        .ok_or_else(|| LoadError::invalid("dispatcher.agents.url", "url is required"))?;
    let url = Url::parse(raw_url.trim()).map_err(|err| {
        LoadError::invalid("dispatcher.agents.url", format!("`{raw_url}`: {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "dispatcher.agents.url",
            format!("`{raw_url}` must use http or https"),
        ));
    }

    let name = agent
        .name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());

    Ok(AgentSettings {
        name,
        url,
        resource_only: agent.resource_only.unwrap_or(true),
        enabled: agent.enabled.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRulesSettings {
    rules: Option<Vec<String>>,
    action_type: Option<String>,
    synchronous: Option<bool>,
    agent_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRepositorySettings {
    subservice: Option<String>,
    service_users: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDispatcherSettings {
    timeout_seconds: Option<u64>,
    agents: Option<Vec<RawAgentSettings>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAgentSettings {
    name: Option<String>,
    url: Option<String>,
    resource_only: Option<bool>,
    enabled: Option<bool>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
