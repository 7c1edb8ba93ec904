//! Live-connection registry
//!
//! Maps station ids to their Charge Point command channel and EV ids to
//! their EV Client command channel. Components never hold references to
//! each other; everything cross-component goes through a command sent to
//! the channel registered here. Entries are registered when a connection
//! comes up and removed by the owning task when it exits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::ConnectorStatus;

/// Commands delivered to a Charge Point's command loop
#[derive(Debug)]
pub enum StationCommand {
    /// Begin a transaction (report Started, start meter sampling)
    StartTransaction { evse_id: u32 },
    /// End the current transaction (report Ended, stop meter sampling)
    StopTransaction { evse_id: u32, reason: String },
    /// Report the EVSE occupied (simulated plug-in)
    PlugIn { evse_id: u32 },
    /// Report an arbitrary connector status
    SendStatus {
        evse_id: u32,
        status: ConnectorStatus,
    },
}

/// Commands delivered to an EV Client's command loop
#[derive(Debug)]
pub enum EvCommand {
    StartCharging,
    StopCharging { reason: String },
}

/// Acting on a station or vehicle that has no live connection
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("station {0} not connected")]
    StationNotConnected(String),
    #[error("ev {0} not connected")]
    EvNotConnected(String),
}

/// Process-wide registry of live protocol connections
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stations: RwLock<HashMap<String, mpsc::UnboundedSender<StationCommand>>>,
    evs: RwLock<HashMap<String, mpsc::UnboundedSender<EvCommand>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a station's command channel, returning the receiving end
    /// the Charge Point's command loop consumes.
    pub fn register_station(
        &self,
        station_id: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<StationCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.stations.write().insert(station_id.into(), tx);
        rx
    }

    /// Handle to a connected station's command channel.
    pub fn station(
        &self,
        station_id: &str,
    ) -> Result<mpsc::UnboundedSender<StationCommand>, RegistryError> {
        self.inner
            .stations
            .read()
            .get(station_id)
            .cloned()
            .ok_or_else(|| RegistryError::StationNotConnected(station_id.to_string()))
    }

    pub fn remove_station(&self, station_id: &str) {
        self.inner.stations.write().remove(station_id);
    }

    pub fn register_ev(&self, ev_id: impl Into<String>) -> mpsc::UnboundedReceiver<EvCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.evs.write().insert(ev_id.into(), tx);
        rx
    }

    /// Handle to a connected vehicle's command channel.
    pub fn ev(&self, ev_id: &str) -> Result<mpsc::UnboundedSender<EvCommand>, RegistryError> {
        self.inner
            .evs
            .read()
            .get(ev_id)
            .cloned()
            .ok_or_else(|| RegistryError::EvNotConnected(ev_id.to_string()))
    }

    pub fn remove_ev(&self, ev_id: &str) {
        self.inner.evs.write().remove(ev_id);
    }

    pub fn connected_stations(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.stations.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
