mod config;
mod console;
mod data_dir;
mod exec;
mod monitor;
mod status;
mod store;
mod toggle;

use chrono::Utc;
use clap::Parser;
use config::WatchdogConfig;
use data_dir::DataDir;
use monitor::Monitor;
use rusqlite::Connection;
use status::{StatusData, StatusFile};
use std::path::PathBuf;
use store::CountdownRecord;
use toggle::CommandToggle;

/// Privilege-timeout watchdog: watches the console session and walks an
/// elevated user back to standard tier once a persisted countdown expires.
/// Invoked once per scheduler firing by default; `--watch` runs the timer
/// in-process.
#[derive(Parser, Debug)]
#[command(name = "tierdown", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "tierdown.toml")]
    config: PathBuf,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Countdown timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Keep running, ticking on the configured interval
    #[arg(long)]
    watch: bool,

    /// Tick interval in seconds for --watch (overrides config)
    #[arg(long)]
    interval: Option<u64>,

    /// Create the data directory and a default config, then exit
    #[arg(long)]
    init: bool,

    /// Print persisted countdowns and the last tick snapshot
    #[arg(long)]
    status: bool,

    /// Validate config and print resolved settings, don't tick
    #[arg(long)]
    dry_run: bool,

    /// Grant admin tier to a user and start its countdown
    #[arg(long, value_name = "USER")]
    grant: Option<String>,

    /// Revoke a user's admin tier and clear its countdown
    #[arg(long, value_name = "USER")]
    revoke: Option<String>,

    /// Extra logging (per-tick decisions, command invocations)
    #[arg(short, long)]
    verbose: bool,

    /// Errors and warnings only
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "tierdown failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = WatchdogConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(timeout) = cli.timeout {
        config.monitor.timeout_seconds = timeout;
    }
    if let Some(interval) = cli.interval {
        config.monitor.tick_interval_seconds = interval;
    }
    config.check();

    let data_dir = DataDir::new(config.storage.data_dir.clone());

    if cli.init {
        if data_dir.init()? {
            println!("Initialized {}", data_dir.root().display());
        } else {
            println!("Already initialized: {}", data_dir.root().display());
        }
        return Ok(());
    }

    if cli.dry_run {
        println!("tierdown v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file:   {}", cli.config.display());
        println!("Data dir:      {}", data_dir.root().display());
        println!("Timeout:       {}s", config.effective_timeout_secs());
        println!("Tick interval: {}s", config.monitor.tick_interval_seconds);
        println!("Console query: {}", config.console.command);
        println!("Toggle:        {}", config.toggle.command);
        return Ok(());
    }

    if cli.status {
        return print_status(&data_dir);
    }

    data_dir.init()?;
    let conn = store::open_or_create(&data_dir.db())?;

    if let Some(user) = cli.grant {
        return grant_user(&config, &conn, &user).await;
    }
    if let Some(user) = cli.revoke {
        return revoke_user(&config, &conn, &user).await;
    }

    // The scheduling adapter should already serialize invocations; the lock
    // backstops that guarantee locally
    let Some(_lock) = data_dir.acquire_lock()? else {
        tracing::warn!("another tierdown instance holds the lock, exiting");
        return Ok(());
    };

    let monitor = Monitor::new(&config, &conn);
    let status_file = StatusFile::new(data_dir.status());

    if cli.watch {
        watch_loop(&config, &conn, &monitor, &status_file).await?;
        status_file.remove();
    } else {
        let outcome = monitor.tick().await;
        write_status(&conn, &status_file, outcome);
    }

    Ok(())
}

/// Tick on an interval until SIGINT or SIGTERM.
async fn watch_loop(
    config: &WatchdogConfig,
    conn: &Connection,
    monitor: &Monitor<'_>,
    status_file: &StatusFile,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let interval_secs = config.monitor.tick_interval_seconds.max(1);
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sigterm = signal(SignalKind::terminate())?;

    tracing::info!(interval_secs, "watch mode started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = monitor.tick().await;
                write_status(conn, status_file, outcome);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
        }
    }
}

/// Write the post-tick snapshot; failures are logged, never fatal.
fn write_status(conn: &Connection, status_file: &StatusFile, outcome: monitor::TickOutcome) {
    let countdowns = match store::list(conn) {
        Ok(countdowns) => countdowns,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list countdowns for status snapshot");
            Vec::new()
        }
    };
    let data = StatusData {
        pid: std::process::id(),
        last_tick: Utc::now(),
        outcome,
        countdowns,
    };
    if let Err(e) = status_file.write(&data) {
        tracing::warn!(error = %e, "failed to write status snapshot");
    }
}

/// Operator passthrough: grant admin tier and schedule its revocation
/// immediately, without waiting for the monitor to observe the elevation.
async fn grant_user(
    config: &WatchdogConfig,
    conn: &Connection,
    user: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let toggle = CommandToggle::new(&config.toggle, config.command_timeout());
    toggle.grant(user).await?;

    let now = Utc::now();
    let record = CountdownRecord {
        user: user.to_string(),
        started_at: now,
        deadline: now + chrono::Duration::seconds(config.effective_timeout_secs() as i64),
    };
    match store::begin(conn, &record) {
        Ok(true) => {
            println!("Granted admin to {user}; revocation at {}", record.deadline);
        }
        Ok(false) => {
            // A countdown was already running; its earlier deadline stands
            println!("Granted admin to {user}; existing countdown kept");
        }
        Err(e) => {
            // The monitor will start a countdown on its next tick
            tracing::error!(user, error = %e, "granted but failed to persist countdown");
        }
    }
    Ok(())
}

/// Operator passthrough: revoke now and drop any pending countdown.
async fn revoke_user(
    config: &WatchdogConfig,
    conn: &Connection,
    user: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let toggle = CommandToggle::new(&config.toggle, config.command_timeout());
    toggle.revoke(user).await?;

    match store::clear(conn, user) {
        Ok(true) => println!("Revoked admin from {user}; countdown cleared"),
        Ok(false) => println!("Revoked admin from {user}"),
        Err(e) => {
            // Harmless leftover: the next tick observes standard tier and
            // discards the record
            tracing::warn!(user, error = %e, "revoked but failed to clear countdown");
        }
    }
    Ok(())
}

/// Print persisted countdowns and the last tick snapshot.
fn print_status(data_dir: &DataDir) -> Result<(), Box<dyn std::error::Error>> {
    if !data_dir.root().exists() {
        println!("Not initialized: {} (run --init)", data_dir.root().display());
        return Ok(());
    }

    let conn = store::open_or_create(&data_dir.db())?;
    let countdowns = store::list(&conn)?;
    if countdowns.is_empty() {
        println!("No active countdowns.");
    } else {
        for record in &countdowns {
            println!(
                "{}  started {}  deadline {}",
                record.user, record.started_at, record.deadline
            );
        }
    }

    let status_file = StatusFile::new(data_dir.status());
    match status_file.load() {
        Ok(Some(snapshot)) => {
            println!(
                "Last tick: {} (pid {}) {}",
                snapshot.last_tick,
                snapshot.pid,
                serde_json::to_string(&snapshot.outcome)?
            );
        }
        Ok(None) => println!("No tick snapshot yet: {}", status_file.path().display()),
        Err(e) => println!("Tick snapshot unreadable: {e}"),
    }

    Ok(())
}
