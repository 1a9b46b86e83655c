use std::{
    fs::File,
    io::{self, BufReader, Write},
    process,
};

use flushd::{
    application::{error::AppError, service::FlushService},
    config,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command.unwrap_or(config::Command::Rules) {
        config::Command::Rules => run_rules(&settings),
        config::Command::Resolve(args) => run_resolve(&settings, args),
        config::Command::Replay(args) => run_replay(&settings, args),
    }
}

fn run_rules(settings: &config::Settings) -> Result<(), AppError> {
    let mut service = FlushService::from_settings(settings, true)?;
    service.activate()?;

    let mut out = io::stdout().lock();
    let rules = service.rules();
    if rules.is_empty() {
        writeln!(out, "no flush rules configured").map_err(InfraError::from)?;
    }
    for (rule, registration) in rules {
        writeln!(
            out,
            "{rule}\n    filter: {}",
            registration.filter().unwrap_or("*")
        )
        .map_err(InfraError::from)?;
    }
    Ok(())
}

fn run_resolve(settings: &config::Settings, args: config::ResolveArgs) -> Result<(), AppError> {
    let path = args.path.trim();
    if path.is_empty() {
        return Err(AppError::validation("resolve requires a non-empty path"));
    }

    let mut service = FlushService::from_settings(settings, true)?;
    service.activate()?;

    let resolutions = service.resolve(path);
    if resolutions.is_empty() {
        info!(path, "No flush rule matches path");
    }

    let mut out = io::stdout().lock();
    for resolution in resolutions {
        writeln!(
            out,
            "{} => {}",
            resolution.pattern,
            resolution.flush_paths.join(" & ")
        )
        .map_err(InfraError::from)?;
    }
    Ok(())
}

fn run_replay(settings: &config::Settings, args: config::ReplayArgs) -> Result<(), AppError> {
    let mut service = FlushService::from_settings(settings, args.dry_run)?;
    service.activate()?;

    let summary = match args.events.as_ref() {
        Some(path) => {
            let file = File::open(path).map_err(|err| {
                AppError::validation(format!(
                    "failed to open events file {}: {err}",
                    path.display()
                ))
            })?;
            service.replay(BufReader::new(file))?
        }
        None => service.replay(io::stdin().lock())?,
    };

    service.shutdown();
    info!(
        published = summary.published,
        skipped = summary.skipped,
        deliveries = summary.deliveries,
        dry_run = args.dry_run,
        "Replay finished"
    );

    let rendered = serde_json::to_string_pretty(&summary)
        .map_err(|err| AppError::unexpected(format!("failed to render summary: {err}")))?;
    writeln!(io::stdout().lock(), "{rendered}").map_err(InfraError::from)?;
    Ok(())
}
