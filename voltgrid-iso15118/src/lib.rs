//! Vehicle↔station session protocol
//!
//! The plug-level counterpart to the OCPP layer: per-EVSE WebSocket
//! servers vehicles connect to, the vehicle-side client, and the JSON
//! envelope format they speak. Start and stop requests are forwarded
//! to the OCPP side through the shared session registry.

pub mod ev_client;
pub mod evse_server;
pub mod messages;

pub use ev_client::EvClient;
pub use evse_server::EvseServer;
pub use messages::{Envelope, SessionError, SessionMessage, SessionStatus};
