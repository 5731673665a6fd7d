//! Network collaborator interfaces.
//!
//! The controller never talks to NetworkManager directly. It drives three
//! narrow traits, which the agent implements on top of `nmcli` and the tests
//! implement with scripted fakes. Every method is awaited one at a time and
//! bounded by the controller's call timeout.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::bssid::{Bssid, ObservedBssid};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unsupported network configuration: {0}")]
    UnsupportedTopology(String),
    #[error("no wireless slave interface in bond {0}")]
    NoWifiSlave(String),
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Identifies a connection whose activation can be checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub String);

/// Identifies the wireless network device of a bond slave.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub String);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The saved wireless profile whose BSSID override gets steered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiProfile {
    pub uuid: String,
    pub interface: String,
    pub ssid: String,
}

/// The wireless slave of the primary bond that this daemon manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSlave {
    pub connection: ConnectionHandle,
    pub profile: WifiProfile,
    pub device: DeviceHandle,
}

pub trait DeviceDiscovery {
    /// Locate the first wireless slave of the primary bonded connection.
    ///
    /// Fails with [`BackendError::UnsupportedTopology`] when the primary
    /// connection is not a bond master, and [`BackendError::NoWifiSlave`]
    /// when the bond has no usable wireless slave.
    fn find_primary_bonded_wifi_slave(
        &self,
    ) -> impl Future<Output = Result<WifiSlave, BackendError>> + Send;

    /// Interface names of all wireless slaves of the primary bond.
    fn list_wifi_slave_interfaces(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, BackendError>> + Send;
}

pub trait WifiScanner {
    fn rescan(
        &self,
        device: &DeviceHandle,
        ssid: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// BSSIDs currently visible on `device` that advertise `ssid`.
    fn list_visible_bssids(
        &self,
        device: &DeviceHandle,
        ssid: &str,
    ) -> impl Future<Output = Result<Vec<ObservedBssid>, BackendError>> + Send;
}

pub trait ConnectionManager {
    fn bssid_override(
        &self,
        profile: &WifiProfile,
    ) -> impl Future<Output = Result<Option<Bssid>, BackendError>> + Send;

    /// Pin the profile to `bssid`, or let the driver roam freely with `None`.
    fn set_bssid_override(
        &self,
        profile: &WifiProfile,
        bssid: Option<Bssid>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Reactivate `connection` so the updated profile takes effect.
    fn apply_profile(
        &self,
        profile: &WifiProfile,
        connection: &ConnectionHandle,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn list_active_connections(
        &self,
    ) -> impl Future<Output = Result<Vec<ConnectionHandle>, BackendError>> + Send;
}

/// Everything the controller needs from the host network stack.
pub trait NetworkBackend: DeviceDiscovery + WifiScanner + ConnectionManager {}

impl<T: DeviceDiscovery + WifiScanner + ConnectionManager> NetworkBackend for T {}
