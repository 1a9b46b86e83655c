use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the flushd binary.
#[derive(Debug, Parser)]
#[command(
    name = "flushd",
    version,
    about = "Replication-driven dispatcher cache flushing"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FLUSHD_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the resolved flush rules and their event filters.
    Rules,
    /// Print the flush paths a replicated path would produce.
    Resolve(ResolveArgs),
    /// Replay JSON-lines replication events through the flush listeners.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Replicated content path to resolve.
    #[arg(value_name = "PATH")]
    pub path: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReplayArgs {
    /// File of JSON-lines replication events; stdin when omitted.
    #[arg(long = "events", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub events: Option<PathBuf>,

    /// Log flush requests instead of sending them to the dispatcher agents.
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Override the flush action (inherit|activate|delete).
    #[arg(long = "action-type", value_name = "ACTION")]
    pub action_type: Option<String>,

    /// Override whether flushes wait for acknowledgement.
    #[arg(
        long = "synchronous",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub synchronous: Option<bool>,
}
