//! Vehicle↔station session messages
//!
//! JSON envelopes of the form `{"message_type": ..., "timestamp": ...,
//! "payload": {...}}`. Unlike the OCPP side there is no message id;
//! requests and responses pair up by message type within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in session message handling
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome reported in session responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Accepted,
    Rejected,
    Stopped,
}

/// One session message, tagged by `message_type` with its body under
/// `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "payload")]
pub enum SessionMessage {
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    #[serde(rename = "EVInformationRequest")]
    EvInformationRequest(EvInformationRequest),
    #[serde(rename = "EVInformationResponse")]
    EvInformationResponse(EvInformationResponse),
    ChargingStartRequest(ChargingStartRequest),
    ChargingStartResponse(ChargingStartResponse),
    ChargingStopRequest(ChargingStopRequest),
    ChargingStopResponse(ChargingStopResponse),
    ChargingStatusUpdate(ChargingStatusUpdate),
    ChargingCompleteNotification(ChargingCompleteNotification),
    DisconnectionRequest(DisconnectionRequest),
    DisconnectionResponse(DisconnectionResponse),
}

impl SessionMessage {
    /// Wire name, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            SessionMessage::ConnectionRequest(_) => "ConnectionRequest",
            SessionMessage::ConnectionResponse(_) => "ConnectionResponse",
            SessionMessage::EvInformationRequest(_) => "EVInformationRequest",
            SessionMessage::EvInformationResponse(_) => "EVInformationResponse",
            SessionMessage::ChargingStartRequest(_) => "ChargingStartRequest",
            SessionMessage::ChargingStartResponse(_) => "ChargingStartResponse",
            SessionMessage::ChargingStopRequest(_) => "ChargingStopRequest",
            SessionMessage::ChargingStopResponse(_) => "ChargingStopResponse",
            SessionMessage::ChargingStatusUpdate(_) => "ChargingStatusUpdate",
            SessionMessage::ChargingCompleteNotification(_) => "ChargingCompleteNotification",
            SessionMessage::DisconnectionRequest(_) => "DisconnectionRequest",
            SessionMessage::DisconnectionResponse(_) => "DisconnectionResponse",
        }
    }
}

/// A session message with its timestamp, as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: SessionMessage,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message: SessionMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// EV → EVSE: open a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub ev_id: String,
    pub evse_id: u32,
    pub session_id: String,
    pub protocol_version: String,
}

/// EVSE → EV: session accepted or rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub status: SessionStatus,
}

/// EV → EVSE: ask for the station's view of the vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvInformationRequest {
    pub session_id: String,
}

/// EVSE → EV: battery and charging capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvInformationResponse {
    pub battery_capacity: f64,
    pub current_soc: f64,
    pub target_soc: f64,
    pub charging_power: f64,
}

/// Energy demand attached to a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingProfile {
    #[serde(rename = "energy_amount_kWh")]
    pub energy_amount_kwh: f64,
    pub target_soc: f64,
}

/// EV → EVSE: begin charging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStartRequest {
    pub session_id: String,
    pub ev_id: String,
    pub evse_id: u32,
    pub charging_profile: ChargingProfile,
}

/// EVSE → EV: charging begun
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStartResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
}

/// EV → EVSE: stop charging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStopRequest {
    pub session_id: String,
    pub ev_id: String,
    pub evse_id: u32,
    pub reason: String,
}

/// EVSE → EV: charging stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStopResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
}

/// EV → EVSE: periodic progress report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStatusUpdate {
    pub session_id: String,
    pub current_soc: f64,
    pub power_kw: f64,
}

/// EV → EVSE: target SOC reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingCompleteNotification {
    pub session_id: String,
    pub final_soc: f64,
}

/// EV → EVSE: close the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectionRequest {
    pub session_id: String,
    pub ev_id: String,
}

/// EVSE → EV: session closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectionResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(SessionMessage::ConnectionRequest(ConnectionRequest {
            ev_id: "EV-001".into(),
            evse_id: 3,
            session_id: "session-EV-001-1700000000".into(),
            protocol_version: "1.0".into(),
        }));

        let json = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["message_type"], "ConnectionRequest");
        assert_eq!(value["payload"]["ev_id"], "EV-001");
        assert_eq!(value["payload"]["evse_id"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_ev_information_uses_upper_case_ev() {
        let envelope = Envelope::new(SessionMessage::EvInformationRequest(EvInformationRequest {
            session_id: "s".into(),
        }));
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"EVInformationRequest\""));

        let parsed = Envelope::from_json(&json).unwrap();
        assert!(matches!(
            parsed.message,
            SessionMessage::EvInformationRequest(_)
        ));
    }

    #[test]
    fn test_charging_profile_energy_key() {
        let profile = ChargingProfile {
            energy_amount_kwh: 27.0,
            target_soc: 80.0,
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("energy_amount_kWh"));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let json = r#"{"message_type": "PowerNegotiation", "timestamp": "2026-02-01T10:00:00Z", "payload": {}}"#;
        assert!(Envelope::from_json(json).is_err());
    }
}
