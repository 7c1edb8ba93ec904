//! OCPP 2.0.1 protocol layer
//!
//! Station↔Central-System messaging over WebSocket: JSON-RPC style
//! framing, typed payloads for the actions this network uses, the
//! Charge Point (station side) and the Central System (server side).

pub mod central_system;
pub mod charge_point;
pub mod messages;
pub mod types;

pub use central_system::{CentralSystem, CsmsError};
pub use charge_point::ChargePoint;
pub use messages::{Action, Call, CallError, CallResult, ErrorCode, OcppError, OcppMessage};
