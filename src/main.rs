use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use pr_monitor::monitor::Monitor;
use pr_monitor::store::{PrKey, PullRequestRecord};
use std::fs;
use std::path::PathBuf;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pr-monitor")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pr-monitor.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn parse_key(raw: &str) -> Result<PrKey> {
    raw.parse::<PrKey>()
        .context(format!("Expected a PR key like owner/repo#42, got {:?}", raw))
}

fn print_prs(monitor: &Monitor) -> Result<()> {
    let prs = monitor.active_prs();
    let ignored = monitor.ignored_count()?;
    let muted = monitor.muted_count()?;

    if prs.is_empty() {
        println!("{}", "Nothing needs your attention".green());
    } else {
        println!("{}", format!("{} PRs need attention", prs.len()).bold());
        for pr in &prs {
            print_pr(pr);
        }
    }
    if ignored + muted > 0 {
        println!("{}", format!("({} ignored, {} muted)", ignored, muted).dimmed());
    }
    Ok(())
}

fn print_pr(pr: &PullRequestRecord) {
    let label = if pr.needs_reapproval {
        pr.status_label().yellow()
    } else {
        pr.status_label().cyan()
    };
    println!("  {} {} [{}] by {}", pr.key().to_string().bold(), pr.title, label, pr.author);
    println!("    {}", pr.url.dimmed());
}

async fn run_monitor(monitor: &Monitor, recheck: Option<PrKey>) -> Result<()> {
    let mode = monitor.start().await.context("Failed to start monitor")?;
    println!("{} {}", "Monitoring in".green(), mode.to_string().bold());

    if let Some(key) = recheck {
        monitor.recheck(&key).context("Failed to schedule recheck")?;
        println!("{} {}", "Rechecking:".green(), key);
    }

    print_prs(monitor)?;
    let mut changes = monitor.subscribe();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_prs(monitor)?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Stopping...".yellow());
                break;
            }
        }
    }

    monitor.stop();
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    config.validate().context("Invalid configuration")?;
    let monitor = Monitor::open(config.monitor_settings(), config.client_pool()?).context("Failed to open store")?;

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => run_monitor(&monitor, None).await,
        Commands::Recheck { key } => run_monitor(&monitor, Some(parse_key(&key)?)).await,
        Commands::List => print_prs(&monitor),
        Commands::Ignore { key } => {
            let key = parse_key(&key)?;
            monitor.ignore(&key)?;
            println!("{} {}", "Ignored:".yellow(), key);
            Ok(())
        }
        Commands::Mute { key } => {
            let key = parse_key(&key)?;
            monitor.mute(&key)?;
            println!("{} {}", "Muted:".yellow(), key);
            Ok(())
        }
        Commands::ClearIgnored => {
            let cleared = monitor.clear_ignored().await?;
            println!("{} {} ignored PRs", "Cleared".green(), cleared);
            print_prs(&monitor)
        }
        Commands::ClearMuted => {
            let cleared = monitor.clear_muted().await?;
            println!("{} {} muted PRs", "Cleared".green(), cleared);
            print_prs(&monitor)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
