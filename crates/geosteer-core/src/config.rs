use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::controller::ControllerConfig;

pub const DEFAULT_STATIONS_FILE: &str = "sources.csv";
pub const DEFAULT_ACCESS_POINTS_FILE: &str = "targets.csv";
pub const DEFAULT_INTERVAL_SECS: f64 = 30.0;
pub const DEFAULT_CALL_TIMEOUT_SECS: f64 = 20.0;
pub const DEFAULT_BOND_INTERFACE: &str = "master";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Raw settings as they come from a config file or the command line.
/// Every field is optional so sources can be layered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoamConfigInput {
    pub stations_file: Option<PathBuf>,
    pub access_points_file: Option<PathBuf>,
    pub node_id: Option<String>,
    pub bond_interface: Option<String>,
    pub dry_run: Option<bool>,
    pub one_shot: Option<bool>,
    pub verbose: Option<bool>,
    pub interval_secs: Option<f64>,
    pub call_timeout_secs: Option<f64>,
}

/// Validated daemon settings.
#[derive(Debug, Clone)]
pub struct RoamConfig {
    pub stations_file: PathBuf,
    pub access_points_file: PathBuf,
    /// Station identity override. `None` means read it from the host.
    pub node_id: Option<String>,
    pub bond_interface: String,
    pub verbose: bool,
    pub controller: ControllerConfig,
}

impl RoamConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(input)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: RoamConfigInput) -> Self {
        Self {
            stations_file: overrides.stations_file.or(self.stations_file),
            access_points_file: overrides.access_points_file.or(self.access_points_file),
            node_id: overrides.node_id.or(self.node_id),
            bond_interface: overrides.bond_interface.or(self.bond_interface),
            dry_run: overrides.dry_run.or(self.dry_run),
            one_shot: overrides.one_shot.or(self.one_shot),
            verbose: overrides.verbose.or(self.verbose),
            interval_secs: overrides.interval_secs.or(self.interval_secs),
            call_timeout_secs: overrides.call_timeout_secs.or(self.call_timeout_secs),
        }
    }

    pub fn resolve(self) -> Result<RoamConfig, ConfigError> {
        let stations_file = non_empty_path(
            "stations_file",
            self.stations_file,
            DEFAULT_STATIONS_FILE,
        )?;
        let access_points_file = non_empty_path(
            "access_points_file",
            self.access_points_file,
            DEFAULT_ACCESS_POINTS_FILE,
        )?;

        let bond_interface = self
            .bond_interface
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BOND_INTERFACE.to_string());
        if bond_interface.is_empty() {
            return Err(ConfigError::Invalid {
                field: "bond_interface",
                reason: "must not be empty".into(),
            });
        }

        let node_id = self
            .node_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let interval = positive_secs(
            "interval_secs",
            self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
        )?;
        let call_timeout = positive_secs(
            "call_timeout_secs",
            self.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
        )?;

        Ok(RoamConfig {
            stations_file,
            access_points_file,
            node_id,
            bond_interface,
            verbose: self.verbose.unwrap_or(false),
            controller: ControllerConfig {
                dry_run: self.dry_run.unwrap_or(false),
                one_shot: self.one_shot.unwrap_or(false),
                interval,
                call_timeout,
            },
        })
    }
}

fn non_empty_path(
    field: &'static str,
    value: Option<PathBuf>,
    default: &str,
) -> Result<PathBuf, ConfigError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "path must not be empty".into(),
        });
    }
    Ok(path)
}

fn positive_secs(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("{secs} is not a positive number of seconds"),
        }),
    }
}
