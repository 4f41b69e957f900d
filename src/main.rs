use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use gator::aggregator::{Aggregator, CycleOutcome};
use gator::config::Config;
use gator::feed::build_client;
use gator::shutdown;
use gator::storage::{Database, DatabaseError};

mod commands;

/// Get the config directory path (~/.config/gator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gator"))
}

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "RSS/Atom feed aggregator")]
struct Args {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// Show the current user
    Whoami,
    /// List all users
    Users,
    /// Delete all users and their follows
    Reset,
    /// Add a feed owned by the current user, who also follows it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// List all feeds with their owners
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// List feeds the current user follows
    Following,
    /// Stop following a feed by URL
    Unfollow { url: String },
    /// Show recent posts from followed feeds
    Browse {
        #[arg(default_value_t = commands::DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
    /// Fetch feeds on an interval until interrupted
    Agg {
        /// Seconds between fetches
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
        /// Per-fetch timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Concurrent workers
        #[arg(long)]
        workers: Option<usize>,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.db_path_in(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.exists()) {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)) {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to set directory permissions to 0700");
            }
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database is locked by another gator process. Try again later.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::Register { name } => {
            commands::register(&db, &mut config, &config_path, &name, &mut out).await
        }
        Command::Login { name } => {
            commands::login(&db, &mut config, &config_path, &name, &mut out).await
        }
        Command::Whoami => commands::whoami(&db, &config, &mut out).await,
        Command::Users => commands::users(&db, &config, &mut out).await,
        Command::Reset => commands::reset(&db, &mut out).await,
        Command::AddFeed { name, url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::add_feed(&db, &user, &name, &url, &mut out).await
        }
        Command::Feeds => commands::feeds(&db, &mut out).await,
        Command::Follow { url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::follow(&db, &user, &url, &mut out).await
        }
        Command::Following => {
            let user = commands::require_user(&db, &config).await?;
            commands::following(&db, &user, &mut out).await
        }
        Command::Unfollow { url } => {
            let user = commands::require_user(&db, &config).await?;
            commands::unfollow(&db, &user, &url, &mut out).await
        }
        Command::Browse { limit } => {
            let user = commands::require_user(&db, &config).await?;
            commands::browse(&db, &user, limit, &mut out).await
        }
        Command::Agg {
            interval,
            timeout,
            workers,
            once,
        } => {
            if let Some(secs) = interval {
                config.fetch_interval_secs = secs;
            }
            if let Some(secs) = timeout {
                config.fetch_timeout_secs = secs;
            }
            if let Some(n) = workers {
                config.workers = n;
            }
            run_aggregator(db, &config, once).await
        }
    }
}

async fn run_aggregator(db: Database, config: &Config, once: bool) -> Result<()> {
    let settings = config.aggregator_settings()?;
    let client = build_client(&config.user_agent).context("Failed to build HTTP client")?;
    let aggregator = Aggregator::new(db, client, settings);

    if once {
        let (trigger, mut signal) = shutdown::channel();
        // Cancels the fetch on a signal; a persist already under way still completes
        let watcher = tokio::spawn(async move {
            match wait_for_termination().await {
                Ok(()) => trigger.trigger(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install signal handlers");
                    std::future::pending::<()>().await;
                }
            }
        });
        let outcome = aggregator.run_cycle(&mut signal).await;
        watcher.abort();

        return match outcome {
            CycleOutcome::NoFeeds => {
                println!("No feeds registered");
                Ok(())
            }
            CycleOutcome::SelectionFailed(e) => Err(e).context("Failed to select a feed"),
            CycleOutcome::Fetched { summary, .. } => {
                println!("Stored {} new post(s), {} skipped", summary.inserted, summary.skipped);
                Ok(())
            }
            CycleOutcome::Failed { error, .. } => Err(error).context("Feed aggregation failed"),
            CycleOutcome::Cancelled { .. } => Ok(()),
        };
    }

    println!(
        "Collecting feeds every {}s, Ctrl+C to stop",
        settings.interval().as_secs()
    );
    let handle = aggregator.spawn();
    wait_for_termination().await?;

    tracing::info!("Shutdown requested");
    match tokio::time::timeout(Duration::from_secs(30), handle.stop()).await {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Aggregation did not stop within 30s"),
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C only on non-Unix platforms).
async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::debug!("Received SIGTERM"),
            _ = sigint.recv() => tracing::debug!("Received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
