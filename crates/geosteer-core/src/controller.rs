//! The roaming control loop.
//!
//! ```text
//!   Init ──ok──▶ Steady ──tick──▶ Steady ...
//!     │
//!     └─fail──▶ Halted (terminal, no further network action)
//! ```
//!
//! Each steady tick runs scan → match → select → apply → verify, with an
//! immediate rollback to unconstrained roaming when the pinned connection
//! fails to come up. Tick failures never leave the tick; only INIT failures
//! halt the controller.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendError, NetworkBackend, WifiSlave};
use crate::bssid::Bssid;
use crate::catalog::{CatalogError, GeoCatalog, Position};
use crate::selector;

/// Startup failures. All of them put the controller in [`Phase::Halted`].
#[derive(Debug, Error)]
pub enum InitError {
    #[error("network topology check failed: {0}")]
    Topology(#[source] BackendError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("cannot determine station identity: {0}")]
    Identity(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("controller already halted")]
    Halted,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Log intended profile changes without applying them.
    pub dry_run: bool,
    /// Skip apply/verify while the selection equals the committed BSSID.
    pub one_shot: bool,
    pub interval: Duration,
    /// Upper bound for each individual backend call.
    pub call_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            one_shot: false,
            interval: Duration::from_secs(30),
            call_timeout: Duration::from_secs(20),
        }
    }
}

/// What the controller has validated and resolved at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct SteadyTarget {
    pub slave: WifiSlave,
    pub station: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Init,
    Steady(SteadyTarget),
    /// Terminal. The controller performs no further network action.
    Halted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    /// Last BSSID whose activation was verified.
    pub last_bssid: Option<Bssid>,
    /// An override written by this controller may still be in place.
    pub override_applied: bool,
}

impl SelectionState {
    /// A pinned BSSID failed verification and clearing it has not succeeded yet.
    pub fn rollback_pending(&self) -> bool {
        self.override_applied && self.last_bssid.is_none()
    }
}

/// Result of one steady-state tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The controller is not in the steady phase; nothing was done.
    Idle,
    /// One-shot mode kept an already verified BSSID without touching the profile.
    Kept(Bssid),
    /// The profile's override already matched the selection.
    Unchanged(Option<Bssid>),
    /// Override pinned to this BSSID and the connection verified active.
    Applied(Bssid),
    /// Override removed because nothing in the catalog was visible.
    Cleared,
    /// Pinning to this BSSID did not come up; the override was reverted.
    RolledBack(Bssid),
    /// A backend call failed; the next tick retries.
    Failed(BackendError),
}

pub struct RoamingController<N> {
    backend: N,
    catalog: GeoCatalog,
    station_id: String,
    config: ControllerConfig,
    phase: Phase,
    state: SelectionState,
}

impl<N: NetworkBackend> RoamingController<N> {
    pub fn new(
        backend: N,
        catalog: GeoCatalog,
        station_id: impl Into<String>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            station_id: station_id.into(),
            config,
            phase: Phase::Init,
            state: SelectionState::default(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// Validate the topology and resolve the station position.
    ///
    /// On failure the controller moves to [`Phase::Halted`] and stays there.
    pub async fn init(&mut self) -> Result<(), InitError> {
        match self.phase {
            Phase::Init => {}
            Phase::Steady(_) => return Ok(()),
            Phase::Halted => return Err(InitError::Halted),
        }
        match self.validate().await {
            Ok(target) => {
                tracing::info!(
                    interface = %target.slave.device,
                    ssid = %target.slave.profile.ssid,
                    x = target.station.x,
                    y = target.station.y,
                    "roaming controller ready"
                );
                self.phase = Phase::Steady(target);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "unsupported configuration; halting");
                self.phase = Phase::Halted;
                Err(e)
            }
        }
    }

    async fn validate(&self) -> Result<SteadyTarget, InitError> {
        let timeout = self.config.call_timeout;

        tracing::info!("inspecting the primary connection");
        let slave = bounded(
            timeout,
            "primary connection lookup",
            self.backend.find_primary_bonded_wifi_slave(),
        )
        .await
        .map_err(InitError::Topology)?;

        let interfaces = bounded(
            timeout,
            "wireless slave listing",
            self.backend.list_wifi_slave_interfaces(),
        )
        .await
        .map_err(InitError::Topology)?;
        if interfaces.is_empty() {
            return Err(InitError::Topology(BackendError::NoWifiSlave(
                slave.connection.to_string(),
            )));
        }
        tracing::info!(
            interfaces = ?interfaces,
            selected = %slave.device,
            "found wireless slave interfaces"
        );

        let station = self.catalog.station_position(&self.station_id)?;
        tracing::info!(node = %self.station_id, x = station.x, y = station.y, "station located");

        Ok(SteadyTarget { slave, station })
    }

    /// Run one scan → select → apply → verify cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let Phase::Steady(target) = &self.phase else {
            return TickOutcome::Idle;
        };
        let target = target.clone();

        match self.steady_tick(&target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "tick failed; retrying next interval");
                TickOutcome::Failed(e)
            }
        }
    }

    async fn steady_tick(&mut self, target: &SteadyTarget) -> Result<TickOutcome, BackendError> {
        let timeout = self.config.call_timeout;
        let slave = &target.slave;
        let ssid = slave.profile.ssid.as_str();

        tracing::debug!(ssid, "rescanning");
        if let Err(e) = bounded(timeout, "rescan", self.backend.rescan(&slave.device, ssid)).await {
            tracing::warn!(error = %e, "rescan request failed; using cached scan results");
        }
        let visible = bounded(
            timeout,
            "BSSID listing",
            self.backend.list_visible_bssids(&slave.device, ssid),
        )
        .await?;

        let fastest = selector::fastest(&visible);
        tracing::debug!(visible = visible.len(), fastest = ?fastest, "detected BSSIDs");

        let candidates = selector::match_candidates(&fastest, self.catalog.access_points());
        let selected = selector::nearest(target.station, &candidates);
        match selected {
            Some(bssid) => tracing::debug!(bssid = %bssid, "nearest access point"),
            None => tracing::debug!("no known access point visible"),
        }

        if self.config.one_shot {
            if let Some(bssid) = selected.filter(|b| self.state.last_bssid == Some(*b)) {
                tracing::debug!(bssid = %bssid, "keeping the committed BSSID");
                return Ok(TickOutcome::Kept(bssid));
            }
        }

        let current = bounded(
            timeout,
            "override lookup",
            self.backend.bssid_override(&slave.profile),
        )
        .await?;
        if current == selected {
            // A pin nobody verified: left by a failed rollback or by an earlier run.
            if let Some(bssid) = selected.filter(|b| self.state.last_bssid != Some(*b)) {
                return self.confirm(slave, bssid).await;
            }
            if selected.is_none() {
                self.state = SelectionState::default();
            }
            return Ok(TickOutcome::Unchanged(selected));
        }

        let Some(bssid) = selected else {
            self.switch(slave, None).await?;
            self.state = SelectionState::default();
            tracing::info!("BSSID override removed");
            return Ok(TickOutcome::Cleared);
        };

        self.switch(slave, Some(bssid)).await?;

        if self.verify(slave).await {
            tracing::info!(bssid = %bssid, "switched BSSID");
            self.state = SelectionState {
                last_bssid: Some(bssid),
                override_applied: true,
            };
            return Ok(TickOutcome::Applied(bssid));
        }

        tracing::warn!(bssid = %bssid, connection = %slave.connection, "connection inactive after switching; reverting");
        self.roll_back(slave, bssid).await
    }

    /// Handle an override that already equals the selection but was never
    /// verified by this controller.
    async fn confirm(&mut self, slave: &WifiSlave, bssid: Bssid) -> Result<TickOutcome, BackendError> {
        if self.state.rollback_pending() {
            tracing::warn!(bssid = %bssid, "retrying rollback of a failed override");
            return self.roll_back(slave, bssid).await;
        }

        tracing::info!(bssid = %bssid, "verifying existing BSSID override");
        if self.verify(slave).await {
            self.state = SelectionState {
                last_bssid: Some(bssid),
                override_applied: true,
            };
            return Ok(TickOutcome::Unchanged(Some(bssid)));
        }
        tracing::warn!(bssid = %bssid, connection = %slave.connection, "connection inactive on existing override; reverting");
        self.roll_back(slave, bssid).await
    }

    /// Clear the override after `bssid` failed to come up. Until the clear
    /// succeeds the state stays rollback-pending, so a later tick retries it.
    async fn roll_back(&mut self, slave: &WifiSlave, bssid: Bssid) -> Result<TickOutcome, BackendError> {
        self.state = SelectionState {
            last_bssid: None,
            override_applied: true,
        };
        self.switch(slave, None).await?;
        self.state = SelectionState::default();
        Ok(TickOutcome::RolledBack(bssid))
    }

    /// Update the override and reactivate the connection.
    ///
    /// A failed reactivation is not returned as an error: the caller's
    /// verification step decides what to do about it.
    async fn switch(&self, slave: &WifiSlave, bssid: Option<Bssid>) -> Result<(), BackendError> {
        let target = bssid.map_or_else(|| "any".to_string(), |b| b.to_string());
        if self.config.dry_run {
            tracing::info!(bssid = %target, profile = %slave.profile.uuid, "dry run: would update BSSID override");
            return Ok(());
        }

        let timeout = self.config.call_timeout;
        tracing::debug!(bssid = %target, profile = %slave.profile.uuid, "updating wifi profile");
        bounded(
            timeout,
            "override update",
            self.backend.set_bssid_override(&slave.profile, bssid),
        )
        .await?;

        if let Err(e) = bounded(
            timeout,
            "profile activation",
            self.backend.apply_profile(&slave.profile, &slave.connection),
        )
        .await
        {
            tracing::warn!(error = %e, connection = %slave.connection, "profile activation failed");
        }
        Ok(())
    }

    /// Whether the managed connection is active. Unknown counts as inactive.
    async fn verify(&self, slave: &WifiSlave) -> bool {
        match bounded(
            self.config.call_timeout,
            "active connection listing",
            self.backend.list_active_connections(),
        )
        .await
        {
            Ok(active) => active.contains(&slave.connection),
            Err(e) => {
                tracing::warn!(error = %e, "cannot verify activation");
                false
            }
        }
    }

    /// Run INIT, then tick forever.
    ///
    /// Returns only when INIT fails. The returned error means "do not retry":
    /// the caller should idle rather than restart the controller.
    pub async fn run(mut self) -> InitError {
        if let Err(e) = self.init().await {
            return e;
        }
        loop {
            let outcome = self.tick().await;
            tracing::trace!(?outcome, "tick complete");
            tracing::debug!(secs = self.config.interval.as_secs_f64(), "waiting for next scan");
            tokio::time::sleep(self.config.interval).await;
        }
    }
}

async fn bounded<T>(
    after: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| BackendError::Timeout { operation, after })?
}
