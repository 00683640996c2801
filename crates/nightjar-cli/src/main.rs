#![deny(unsafe_code)]

//! Nightjar device daemon launcher.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nightjar_config::AppConfig;
use nightjar_core::daemon::Daemon;
use nightjar_core::device::GenericDevice;
use nightjar_core::lifecycle;
use nightjar_core::server::DeviceServer;

/// Exit code for daemon bring-up failures (lock, bind).
const EXIT_INIT_DAEMON: i32 = 10;
/// Exit code for value initialization failures (files, seeds, audit).
const EXIT_INIT_VALUES: i32 = 11;

/// Nightjar — observatory device daemon.
#[derive(Parser)]
#[command(name = "nightjar", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "nightjar.toml")]
    config: PathBuf,

    /// Run interactively: stay in the foreground instead of detaching.
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Supervise the daemon, restarting it this many seconds after it
    /// dies.
    #[arg(long, value_name = "SECONDS")]
    autorestart: Option<u64>,

    /// Device name (overrides the configuration).
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Listen port (overrides the configuration).
    #[arg(long)]
    local_port: Option<u16>,

    /// Directory for the exclusive lock file.
    #[arg(long)]
    lock_prefix: Option<PathBuf>,

    /// Drop privileges to this user (or user.group) after binding.
    #[arg(long)]
    run_as: Option<String>,

    /// Value file creating writable values at startup.
    #[arg(long)]
    valuefile: Option<PathBuf>,

    /// Mode file exposing a MODE selection.
    #[arg(long)]
    modefile: Option<PathBuf>,

    /// Autosave file, rewritten whenever autosave-flagged values change.
    #[arg(long)]
    autosave: Option<PathBuf>,

    /// Defaults file seeding values before the daemon goes on-line.
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Initial value seeds, written as NAME=VALUE.
    #[arg(value_name = "NAME=VALUE")]
    seeds: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing subscriber with verbosity level
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let mut config = load_config(&cli.config)?;
    apply_overrides(&mut config, &cli);
    let seeds = parse_seeds(&cli.seeds)?;

    // Forks must happen before the runtime spawns threads.
    if !cli.interactive {
        if let Err(e) = lifecycle::daemonize() {
            fail(e.exit_code(), &e);
        }
    }
    if let Some(delay) = cli.autorestart {
        if let Err(e) = lifecycle::autorestart(std::time::Duration::from_secs(delay)) {
            fail(e.exit_code(), &e);
        }
    }
    let _lock = match lifecycle::acquire_lock(&config.daemon.lock_prefix, &config.device.name) {
        Ok(lock) => lock,
        Err(e) => fail(e.exit_code(), &e),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config, cli.run_as.as_deref(), seeds))
}

async fn run(config: AppConfig, run_as: Option<&str>, seeds: Vec<(String, String)>) -> Result<()> {
    if config.device.device_type != "generic" {
        tracing::warn!(
            device_type = %config.device.device_type,
            "no driver registered for this device type, running generic"
        );
    }
    let mut daemon = match Daemon::new(GenericDevice, config.device.name.clone()) {
        Ok(daemon) => daemon,
        Err(e) => fail(EXIT_INIT_DAEMON, &e),
    };
    if let Err(e) = daemon.init_values(
        config.files.valuefile.as_deref(),
        config.files.modefile.as_deref(),
        config.files.defaults.as_deref(),
        config.files.autosave.as_deref(),
        &seeds,
    ) {
        fail(EXIT_INIT_VALUES, &e);
    }

    let addr = SocketAddr::new(config.daemon.listen_addr, config.daemon.listen_port);
    let server = match DeviceServer::bind(daemon, addr, config.daemon.idle_info_secs).await {
        Ok(server) => server,
        Err(e) => fail(EXIT_INIT_DAEMON, &e),
    };
    // bind first, then shed root
    if let Some(spec) = run_as {
        if let Err(e) = lifecycle::run_as(spec) {
            fail(e.exit_code(), &e);
        }
    }

    info!(device = %config.device.name, "daemon ready");
    server.run().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn fail(code: i32, err: &dyn std::fmt::Display) -> ! {
    error!("{err}");
    std::process::exit(code);
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(name) = &cli.device {
        config.device.name = name.clone();
    }
    if let Some(port) = cli.local_port {
        config.daemon.listen_port = port;
    }
    if let Some(prefix) = &cli.lock_prefix {
        config.daemon.lock_prefix = prefix.clone();
    }
    if cli.valuefile.is_some() {
        config.files.valuefile = cli.valuefile.clone();
    }
    if cli.modefile.is_some() {
        config.files.modefile = cli.modefile.clone();
    }
    if cli.autosave.is_some() {
        config.files.autosave = cli.autosave.clone();
    }
    if cli.defaults.is_some() {
        config.files.defaults = cli.defaults.clone();
    }
}

fn parse_seeds(args: &[String]) -> Result<Vec<(String, String)>> {
    let mut seeds = Vec::with_capacity(args.len());
    for arg in args {
        let Some((name, payload)) = arg.split_once('=') else {
            anyhow::bail!("seed '{arg}' must be written as NAME=VALUE");
        };
        seeds.push((name.trim().to_string(), payload.trim().to_string()));
    }
    Ok(seeds)
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).map_err(|e| anyhow::anyhow!(e))
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_seeds() {
        let seeds = parse_seeds(&["exposure=1.5".to_string(), "OBJECT=M 31".to_string()]).unwrap();
        assert_eq!(
            seeds,
            vec![
                ("exposure".to_string(), "1.5".to_string()),
                ("OBJECT".to_string(), "M 31".to_string()),
            ]
        );
        assert!(parse_seeds(&["no-equals".to_string()]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "nightjar",
            "-i",
            "--device",
            "C0",
            "--local-port",
            "617",
            "--valuefile",
            "/etc/nightjar/c0.values",
        ]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.device.name, "C0");
        assert_eq!(config.daemon.listen_port, 617);
        assert_eq!(
            config.files.valuefile.as_deref(),
            Some(Path::new("/etc/nightjar/c0.values"))
        );
        // unset flags leave the configuration alone
        assert!(config.files.modefile.is_none());
    }

    #[test]
    fn test_seed_positionals_parse() {
        let cli = Cli::parse_from(["nightjar", "-i", "exposure=1.5", "BIN=2"]);
        assert_eq!(cli.seeds, vec!["exposure=1.5", "BIN=2"]);
        assert!(cli.interactive);
    }
}
