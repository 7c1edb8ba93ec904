//! # Voltgrid Core
//!
//! Shared foundation for the Voltgrid charging network simulator:
//!
//! - [`model`] — EVSE and EV records and the connector status lifecycle
//! - [`fleet`] — the process-wide store of those records
//! - [`registry`] — live-connection registry (station and vehicle command channels)
//! - [`ident`] — the derived-identifier convention tying an EVSE to its
//!   station id and ISO15118 port
//! - [`config`] — network, station, and vehicle configuration
//!
//! Two protocol crates sit on top of this one: `voltgrid-ocpp` (station ↔
//! central system) and `voltgrid-iso15118` (vehicle ↔ station). They share
//! no types with each other except through here, which is what keeps the
//! two conversations of a charging session correlated.

pub mod config;
pub mod fleet;
pub mod ident;
pub mod model;
pub mod registry;

pub use config::{EvConfig, NetworkConfig, StationConfig};
pub use fleet::FleetState;
pub use ident::{evse_id_from_station, iso15118_port_for, station_id_for};
pub use model::{ConnectorStatus, EvRecord, EvseRecord};
pub use registry::{EvCommand, RegistryError, SessionRegistry, StationCommand};
