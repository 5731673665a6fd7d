//! geosteer agent
//!
//! Daemon running on each bonded Wi-Fi station.
//!
//! - Validates that the primary connection is a bond with a wireless slave
//! - Locates this station in the geolocation catalog
//! - Periodically pins the wireless slave to the nearest known access point
//! - Halts (but keeps running) when the host configuration is unsupported,
//!   so a supervisor does not restart-loop it

mod identity;
mod nmcli;

use std::path::PathBuf;

use clap::Parser;
use clap::builder::BoolishValueParser;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing_subscriber::EnvFilter;

use geosteer_core::{GeoCatalog, InitError, RoamConfig, RoamConfigInput, RoamingController};

/// Geolocation-driven BSSID steering daemon.
#[derive(Parser, Debug)]
#[command(name = "geosteer-agent", about = "Steer a bonded Wi-Fi slave to the nearest access point")]
struct Cli {
    /// TOML config file. Command line and environment values override it.
    #[arg(long, env = "GEOSTEER_CONFIG")]
    config: Option<PathBuf>,

    /// Station table (CSV with id,x,y).
    #[arg(long, env = "SRC_FILE")]
    stations_file: Option<PathBuf>,

    /// Access point table (CSV with id,x,y; id is the base BSSID).
    #[arg(long, env = "TGT_FILE")]
    access_points_file: Option<PathBuf>,

    /// Station identity override (defaults to the host's system UUID).
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Interface name of the bond master.
    #[arg(long, env = "BOND_INTERFACE")]
    bond_interface: Option<String>,

    /// Log profile changes without applying them.
    #[arg(long, env = "DRY_RUN", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    dry_run: Option<bool>,

    /// Stop re-applying once a BSSID has been verified.
    #[arg(long, env = "ONE_SHOT", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    one_shot: Option<bool>,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, env = "DEBUG", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    verbose: Option<bool>,

    /// Seconds between scans.
    #[arg(long, env = "INTERVAL_SECS")]
    interval_secs: Option<f64>,

    /// Seconds before a NetworkManager call is abandoned.
    #[arg(long, env = "CALL_TIMEOUT_SECS")]
    call_timeout_secs: Option<f64>,
}

impl Cli {
    fn overrides(&self) -> RoamConfigInput {
        RoamConfigInput {
            stations_file: self.stations_file.clone(),
            access_points_file: self.access_points_file.clone(),
            node_id: self.node_id.clone(),
            bond_interface: self.bond_interface.clone(),
            dry_run: self.dry_run,
            one_shot: self.one_shot,
            verbose: self.verbose,
            interval_secs: self.interval_secs,
            call_timeout_secs: self.call_timeout_secs,
        }
    }

    fn resolve(&self) -> anyhow::Result<RoamConfig> {
        let file = match &self.config {
            Some(path) => RoamConfigInput::from_toml_file(path)?,
            None => RoamConfigInput::default(),
        };
        Ok(file.merge(self.overrides()).resolve()?)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve()?;

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        stations = %config.stations_file.display(),
        access_points = %config.access_points_file.display(),
        bond = %config.bond_interface,
        dry_run = config.controller.dry_run,
        one_shot = config.controller.one_shot,
        interval_s = config.controller.interval.as_secs_f64(),
        "geosteer-agent starting"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        reason = start(config) => {
            tracing::warn!(error = %reason, "halted; idling until terminated");
        }
        received = terminated(&mut sigterm) => {
            tracing::info!(signal = received?, "shutting down");
            return Ok(());
        }
    }

    // Stay alive so the service manager does not restart into the same failure.
    let received = terminated(&mut sigterm).await?;
    tracing::info!(signal = received, "geosteer-agent stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM and name the one that arrived.
async fn terminated(sigterm: &mut Signal) -> std::io::Result<&'static str> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Load the catalog, identify the station and run the controller.
/// Returns only when the controller cannot (or can no longer) proceed.
async fn start(config: RoamConfig) -> InitError {
    tracing::info!("loading geolocation catalog");
    let catalog = match GeoCatalog::load(&config.stations_file, &config.access_points_file) {
        Ok(catalog) => catalog,
        Err(e) => return e.into(),
    };

    let station_id = match identity::station_id(config.node_id.as_deref()).await {
        Ok(id) => id,
        Err(e) => return InitError::Identity(Box::new(e)),
    };
    tracing::info!(node = %station_id, "station identity");

    let backend = nmcli::NmCli::new(config.bond_interface);
    RoamingController::new(backend, catalog, station_id, config.controller)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn sigterm_ends_the_wait() {
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), terminated(&mut sigterm))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }

    #[test]
    fn cli_values_become_overrides() {
        let cli = Cli::try_parse_from([
            "geosteer-agent",
            "--stations-file",
            "/tmp/stations.csv",
            "--dry-run",
            "--one-shot=false",
            "--interval-secs",
            "7.5",
        ])
        .unwrap();
        let input = cli.overrides();
        assert_eq!(input.stations_file, Some(PathBuf::from("/tmp/stations.csv")));
        assert_eq!(input.dry_run, Some(true));
        assert_eq!(input.one_shot, Some(false));
        assert_eq!(input.interval_secs, Some(7.5));
    }
}
