//! redboard - Energy usage coordination and analytics dashboard

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use redboard_core::{
    Coordinator, CoordinatorConfig, CoordinatorEvent, CoreError, Credentials, ExportFormat,
    FixtureFetcher, StateManager, StaticAuthenticator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "redboard",
    version,
    about = "Energy usage coordination and analytics dashboard",
    long_about = "Polls per-service electricity and gas usage, derives daily and monthly\n\
                  averages, peaks and efficiency ratings, and keeps serving the last good\n\
                  snapshot when the provider misbehaves.\n\
                  \n\
                  Examples:\n\
                    redboard run                        # Refresh on schedule until Ctrl-C\n\
                    redboard refresh                    # Run one cycle now\n\
                    redboard snapshot --json            # Print the published snapshot\n\
                    redboard export --format csv --days 7 --output usage.csv\n\
                    redboard configure --interval 15    # Change the polling cadence\n\
                  \n\
                  Environment Variables:\n\
                    REDBOARD_CONFIG                     # Config file (TOML)\n\
                    REDBOARD_STATE_DIR                  # Directory of the state database\n\
                    REDBOARD_FIXTURES                   # Directory of provider payloads\n\
                    RUST_LOG                            # Log filter (default: warn)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/redboard/config.toml)
    #[arg(long, global = true, env = "REDBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// State directory (default: <data dir>/redboard)
    #[arg(long, global = true, env = "REDBOARD_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Provider payload directory (default: fixtures/ next to the config file)
    #[arg(long, global = true, env = "REDBOARD_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Restore state and refresh on schedule until Ctrl-C
    Run,
    /// Run one refresh cycle and print the result
    Refresh,
    /// Print the published snapshot
    Snapshot {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export usage records and metrics for a trailing window
    Export {
        /// Output format: json or csv
        #[arg(long, short, default_value = "json")]
        format: String,
        /// Days to include, ending today (1-365)
        #[arg(long, short, default_value = "30")]
        days: u32,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print a sanitized diagnostics report as JSON
    Diagnostics,
    /// Change the polling interval (1, 5, 15, 30 or 60 minutes)
    Configure {
        #[arg(long)]
        interval: u32,
    },
    /// Replace provider credentials and reset the circuit breaker
    Credentials {
        #[arg(long)]
        username: String,
        #[arg(long)]
        client_id: String,
        #[arg(long, env = "REDBOARD_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Delete the persisted state of this configuration
    ClearState,
}

struct Paths {
    config: PathBuf,
    state_dir: PathBuf,
    fixtures: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => path.clone(),
            None => dirs::config_dir()
                .map(|d| d.join("redboard").join("config.toml"))
                .context("Could not determine config directory")?,
        };
        let state_dir = match &cli.state_dir {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("redboard"))
                .context("Could not determine data directory")?,
        };
        let fixtures = cli.fixtures.clone().unwrap_or_else(|| {
            config
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("fixtures")
        });
        Ok(Self {
            config,
            state_dir,
            fixtures,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = Paths::resolve(&cli)?;
    debug!(
        config = %paths.config.display(),
        state_dir = %paths.state_dir.display(),
        fixtures = %paths.fixtures.display(),
        "Resolved paths"
    );

    let result = match cli.command {
        Command::Run => run_scheduler(&paths).await,
        Command::Refresh => run_refresh(&paths).await,
        Command::Snapshot { json } => run_snapshot(&paths, json),
        Command::Export {
            format,
            days,
            output,
        } => run_export(&paths, &format, days, output),
        Command::Diagnostics => run_diagnostics(&paths),
        Command::Configure { interval } => run_configure(&paths, interval).await,
        Command::Credentials {
            username,
            client_id,
            secret,
        } => run_credentials(&paths, Credentials::new(username, client_id, secret)).await,
        Command::ClearState => run_clear_state(&paths),
    };

    if let Err(e) = &result {
        if let Some(hint) = e.downcast_ref::<CoreError>().and_then(CoreError::suggestion) {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_coordinator(paths: &Paths) -> Result<Arc<Coordinator>> {
    let config = CoordinatorConfig::load(&paths.config)?;
    let state = StateManager::open(&paths.state_dir)?;
    let auth = StaticAuthenticator::new(config.credentials.clone());
    let coordinator = Coordinator::new(
        config,
        Arc::new(FixtureFetcher::new(&paths.fixtures)),
        Arc::new(auth),
        Arc::new(state),
    )?;
    Ok(coordinator)
}

async fn run_scheduler(paths: &Paths) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    let mut events = coordinator.subscribe();
    let scheduler = coordinator.spawn_scheduler();

    println!(
        "Refreshing '{}' every {} (Ctrl-C to stop)",
        coordinator.config_id(),
        coordinator.polling_interval()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&coordinator, &event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

fn print_event(coordinator: &Coordinator, event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::SnapshotPublished { outcome, .. } => {
            let now = chrono::Utc::now().format("%H:%M:%S");
            println!(
                "[{}] cycle {} ({} services)",
                now,
                outcome,
                coordinator.get_snapshot().service_count()
            );
        }
        CoordinatorEvent::BreakerStateChanged { state, .. } => {
            println!("circuit breaker {}", state);
        }
        CoordinatorEvent::AuthFailed { message, .. } => {
            eprintln!("authentication failed: {}", message);
            eprintln!("hint: update credentials with 'redboard credentials'");
        }
        _ => {}
    }
}

async fn run_refresh(paths: &Paths) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    let report = coordinator.run_cycle().await?;
    println!("{}", cli::format_report(&report));
    println!("{}", cli::format_status(&coordinator.status()));
    Ok(())
}

fn run_snapshot(paths: &Paths, json: bool) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    println!("{}", cli::format_snapshot(&coordinator.get_snapshot(), json));
    if !json {
        println!("{}", cli::format_status(&coordinator.status()));
    }
    Ok(())
}

fn run_export(paths: &Paths, format: &str, days: u32, output: Option<PathBuf>) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let coordinator = open_coordinator(paths)?;
    let content = coordinator.export(format, days)?;

    match output {
        Some(path) => {
            redboard_core::write_export(&content, &path)?;
            println!("Exported {} days to {}", days, path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn run_diagnostics(paths: &Paths) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    let report = coordinator.diagnostics();
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize diagnostics")?
    );
    eprintln!("{}", cli::format_error_stats(&coordinator.error_statistics()));
    Ok(())
}

async fn run_configure(paths: &Paths, minutes: u32) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    let interval = coordinator.configure(minutes).await?;
    println!("Polling interval set to {}", interval);
    Ok(())
}

async fn run_credentials(paths: &Paths, credentials: Credentials) -> Result<()> {
    let coordinator = open_coordinator(paths)?;
    coordinator.update_credentials(credentials.clone()).await?;

    let mut config = coordinator.config().clone();
    config.credentials = credentials;
    let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    std::fs::write(&paths.config, content)
        .with_context(|| format!("Failed to write config: {}", paths.config.display()))?;

    println!("Credentials updated, circuit breaker reset");
    Ok(())
}

fn run_clear_state(paths: &Paths) -> Result<()> {
    let config = CoordinatorConfig::load(&paths.config)?;
    let state = StateManager::open(&paths.state_dir)?;
    if state.clear(&config.config_id)? {
        println!("Cleared state of '{}'", config.config_id);
    } else {
        println!("No state stored for '{}'", config.config_id);
    }
    Ok(())
}
