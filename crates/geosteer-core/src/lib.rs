//! Geolocation-driven BSSID steering for a bonded Wi-Fi station.
//!
//! This crate contains:
//! - **Catalog**: station and access point positions loaded from CSV
//! - **Matcher**: maps an observed BSSID to the physical AP that emits it
//! - **Selector**: picks the nearest matched AP to the station
//! - **Controller**: the scan / apply / verify / rollback loop
//! - **Backend traits**: the network stack seams the controller drives

pub mod backend;
pub mod bssid;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod matcher;
pub mod selector;

pub use backend::{
    BackendError, ConnectionHandle, ConnectionManager, DeviceDiscovery, DeviceHandle,
    NetworkBackend, WifiProfile, WifiScanner, WifiSlave,
};
pub use bssid::{Bssid, BssidParseError, ObservedBssid};
pub use catalog::{ApTargetRecord, CatalogError, GeoCatalog, Node, Position};
pub use config::{ConfigError, RoamConfig, RoamConfigInput};
pub use controller::{
    ControllerConfig, InitError, Phase, RoamingController, SelectionState, TickOutcome,
};
