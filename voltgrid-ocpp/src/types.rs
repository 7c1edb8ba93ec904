//! OCPP 2.0.1 message payload types
//!
//! Typed requests and responses for the actions this network exchanges:
//! BootNotification, Authorize, StatusNotification, Heartbeat,
//! TransactionEvent, MeterValues (station-initiated) and ReserveNow
//! (central-system-initiated).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status returned in IdTokenInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    Unknown,
}

/// Reservation status for ReserveNow responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Accepted,
    Faulted,
    Occupied,
    Rejected,
    Unavailable,
}

/// Boot reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

/// Transaction event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEventType {
    Started,
    Updated,
    Ended,
}

/// What triggered a transaction event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Authorized,
    CablePluggedIn,
    EVDetected,
    MeterValuePeriodic,
    RemoteStart,
    RemoteStop,
    StopAuthorized,
}

/// Why a transaction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoppedReason {
    EVDisconnected,
    Local,
    Remote,
    SOCLimitReached,
}

/// Charging state reported in transaction info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    Charging,
    EVConnected,
    Idle,
    SuspendedEV,
    SuspendedEVSE,
}

/// Measurand types for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Voltage")]
    Voltage,
    #[serde(rename = "SoC")]
    SoC,
}

// ============================================================================
// Complex types
// ============================================================================

/// Token for identification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdToken {
    pub id_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl IdToken {
    /// Central-issued token, the only type this simulation uses
    pub fn central(id: impl Into<String>) -> Self {
        Self {
            id_token: id.into(),
            token_type: "Central".to_string(),
        }
    }
}

/// Authorization info returned with a token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenInfo {
    pub status: AuthorizationStatus,
}

/// EVSE identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evse {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

/// Charging station information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStationInfo {
    pub model: String,
    pub vendor_name: String,
}

/// Unit of measure for sampled values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOfMeasure {
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<i32>,
}

impl UnitOfMeasure {
    pub fn wh() -> Self {
        Self {
            unit: "Wh".to_string(),
            multiplier: Some(0),
        }
    }

    pub fn volt() -> Self {
        Self {
            unit: "V".to_string(),
            multiplier: None,
        }
    }

    pub fn amp() -> Self {
        Self {
            unit: "A".to_string(),
            multiplier: None,
        }
    }
}

/// Sampled value for meter readings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<UnitOfMeasure>,
}

impl SampledValue {
    pub fn energy_wh(value: f64) -> Self {
        Self {
            value,
            measurand: Some(Measurand::EnergyActiveImportRegister),
            unit_of_measure: Some(UnitOfMeasure::wh()),
        }
    }

    pub fn voltage(value: f64) -> Self {
        Self {
            value,
            measurand: Some(Measurand::Voltage),
            unit_of_measure: Some(UnitOfMeasure::volt()),
        }
    }

    pub fn current_import(value: f64) -> Self {
        Self {
            value,
            measurand: Some(Measurand::CurrentImport),
            unit_of_measure: Some(UnitOfMeasure::amp()),
        }
    }
}

/// Meter value with timestamp and samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

/// Transaction identity and terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<StoppedReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_state: Option<ChargingState>,
}

// ============================================================================
// Request messages
// ============================================================================

/// BootNotification request (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStationInfo,
    pub reason: BootReason,
}

/// Authorize request (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_token: IdToken,
}

/// StatusNotification request (station -> central system)
///
/// The connector status travels as a plain string; the receiving handler
/// parses it and treats an unknown value as a non-fatal warning rather
/// than rejecting the whole message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: String,
    pub evse_id: u32,
    pub connector_id: u32,
}

/// Heartbeat request (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// MeterValues request (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub evse_id: u32,
    pub meter_value: Vec<MeterValue>,
}

/// TransactionEvent request (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventRequest {
    pub event_type: TransactionEventType,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: TriggerReason,
    pub seq_no: i32,
    pub transaction_info: TransactionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_value: Option<Vec<MeterValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse: Option<Evse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
}

/// ReserveNow request (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveNowRequest {
    pub id: i32,
    pub expiry_date_time: DateTime<Utc>,
    pub id_token: IdToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
}

// ============================================================================
// Response messages
// ============================================================================

/// BootNotification response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: i32,
    pub status: RegistrationStatus,
}

/// Authorize response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_token_info: IdTokenInfo,
}

/// StatusNotification response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

/// Heartbeat response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// MeterValues response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// TransactionEvent response (central system -> station)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEventResponse {}

/// ReserveNow response (station -> central system)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveNowResponse {
    pub status: ReservationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_notification_round_trip() {
        let req = BootNotificationRequest {
            charging_station: ChargingStationInfo {
                model: "VG-EVSE".to_string(),
                vendor_name: "Voltgrid".to_string(),
            },
            reason: BootReason::PowerUp,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"vendorName\":\"Voltgrid\""));
        assert!(json.contains("\"PowerUp\""));

        let parsed: BootNotificationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.charging_station.model, "VG-EVSE");
    }

    #[test]
    fn test_sampled_value_wire_names() {
        let sample = SampledValue::energy_wh(1234.0);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("Energy.Active.Import.Register"));
        assert!(json.contains("\"unit\":\"Wh\""));
    }

    #[test]
    fn test_transaction_event_optional_fields_omitted() {
        let req = TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp: chrono::Utc::now(),
            trigger_reason: TriggerReason::Authorized,
            seq_no: 1,
            transaction_info: TransactionInfo {
                transaction_id: "tx-CP_1-20260201100000".to_string(),
                stopped_reason: None,
                charging_state: None,
            },
            meter_value: None,
            offline: None,
            evse: None,
            id_token: None,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("stoppedReason"));
        assert!(!json.contains("meterValue"));
        assert!(json.contains("\"seqNo\":1"));
    }

    #[test]
    fn test_id_token_type_field_name() {
        let token = IdToken::central("EV-001");
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, r#"{"idToken":"EV-001","type":"Central"}"#);
    }
}
