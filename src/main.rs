use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dropcatch::remote::{DryRunRemote, LoopiaRpc, RemoteService};
use dropcatch::scheduler::{
    DispatchMode, DropSchedule, Orchestrator, RetryPolicy, RunSummary, SystemClock, spawn_keep_awake,
};
use dropcatch::target::collect_targets;
use dropcatch::{RateLimitedClient, Target};

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, DropcatchArgs};
use config::Config;

fn setup_logging(default_filter: &str) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dropcatch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("dropcatch.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(default_filter);
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<bool> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled, logging at debug".yellow());
    }

    match &cli.command {
        Commands::Dropcatch(args) => handle_dropcatch_command(args, config).await,
        Commands::NextDrop => handle_next_drop_command(config).map(|_| true),
    }
}

fn handle_next_drop_command(config: &Config) -> Result<()> {
    let schedule = config.drop_schedule()?;
    let now = chrono::Utc::now();
    println!("{} {}", "Next drop:".cyan(), schedule.next_trigger_instant(now).to_rfc3339());
    println!("{} {}", "First shot:".cyan(), schedule.first_shot(now).to_rfc3339());
    Ok(())
}

async fn handle_dropcatch_command(args: &DropcatchArgs, config: &Config) -> Result<bool> {
    let targets = collect_targets(config.domains.iter().chain(args.domains.iter())).context("Invalid domain list")?;
    if targets.is_empty() {
        bail!("No domains to catch; pass --domain or set `domains` in the config file");
    }

    let schedule = config.drop_schedule()?;
    let policy = config.retry_policy()?;
    let mode = if args.sequential {
        DispatchMode::Sequential
    } else {
        config.dispatch
    };

    info!(
        "Catching {} domain(s): {}",
        targets.len(),
        targets.iter().map(Target::as_str).collect::<Vec<_>>().join(", ")
    );

    let summary = if args.dry {
        println!("{}", "[DRY-RUN] No registrar calls will be made".yellow());
        catch(DryRunRemote::new(), &targets, &schedule, policy, mode, args, config).await
    } else {
        if !config.has_credentials() {
            bail!("Missing registrar credentials; set username/password in the config file or LOOPIA_USERNAME/LOOPIA_PASSWORD");
        }
        let remote = LoopiaRpc::new(config.username.clone(), config.password.clone(), config.loopia())
            .context("Failed to create registrar client")?;
        catch(remote, &targets, &schedule, policy, mode, args, config).await
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?);
    } else {
        print_summary(&summary);
    }

    Ok(summary.all_succeeded())
}

async fn catch<R: RemoteService + 'static>(
    remote: R,
    targets: &[Target],
    schedule: &DropSchedule,
    policy: RetryPolicy,
    mode: DispatchMode,
    args: &DropcatchArgs,
    config: &Config,
) -> RunSummary {
    let client = Arc::new(RateLimitedClient::with_quota(remote, config.client.hourly_quota));
    let orchestrator = Orchestrator::new(client)
        .with_policy(policy)
        .with_window(config.purchasing_window())
        .with_mode(mode);

    let keep_awake = CancellationToken::new();
    let heartbeat = args
        .keep_awake
        .then(|| spawn_keep_awake(config.keep_awake_interval(), keep_awake.clone()));

    let report = if args.now {
        schedule.start_now(&SystemClock)
    } else {
        let now = chrono::Utc::now();
        println!(
            "{} {} (first shot {})",
            "Waiting for drop at".cyan(),
            schedule.next_trigger_instant(now).to_rfc3339(),
            schedule.first_shot(now).to_rfc3339()
        );
        schedule.wait_for_drop(&SystemClock).await
    };

    keep_awake.cancel();
    if let Some(handle) = heartbeat
        && let Err(e) = handle.await
    {
        log::warn!("Keep-awake task failed: {}", e);
    }

    info!(
        "Drop reached (trigger {}, {} recheck(s)); starting acquisition",
        report.trigger.to_rfc3339(),
        report.rechecks
    );
    orchestrator.run(targets, Instant::now()).await
}

fn print_summary(summary: &RunSummary) {
    for result in &summary.results {
        if result.success {
            println!("{} {} after {} attempt(s)", "✓".green(), result.target, result.attempts);
        } else {
            let reason = result.error.as_ref().map(ToString::to_string).unwrap_or_default();
            println!("{} {} - {}", "✗".red(), result.target, reason);
            if let Some(last) = &result.last_failure {
                println!("    last failure: {}", last);
            }
        }
    }

    let line = format!(
        "{} of {} domain(s) acquired, {} failed",
        summary.succeeded, summary.total, summary.failed
    );
    if summary.all_succeeded() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration before logging so its level applies
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_filter(cli.is_verbose())).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    let all_succeeded = run_application(&cli, &config).await.context("Application failed")?;

    Ok(if all_succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
