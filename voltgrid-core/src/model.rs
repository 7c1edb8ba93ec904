//! EVSE and EV records
//!
//! These are the authoritative per-process records the protocol roles
//! mutate. Status only ever changes through the lifecycle methods here or
//! through the Central System overwriting it from a StatusNotification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connector status as reported over OCPP (2.0.1 spelling)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for ConnectorStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ConnectorStatus::Available),
            "Occupied" => Ok(ConnectorStatus::Occupied),
            "Reserved" => Ok(ConnectorStatus::Reserved),
            "Unavailable" => Ok(ConnectorStatus::Unavailable),
            "Faulted" => Ok(ConnectorStatus::Faulted),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A status string that is not one of the five defined values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connector status: {0}")]
pub struct UnknownStatus(pub String);

/// One charging point (EVSE) as tracked by the Central System
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvseRecord {
    pub id: u32,
    pub name: String,
    pub brand: String,
    pub model: String,
    pub vendor: String,
    pub latitude: f64,
    pub longitude: f64,
    pub max_power_kw: f64,
    pub status: ConnectorStatus,
    pub current_ev_id: Option<String>,
    pub charging_start_time: Option<DateTime<Utc>>,
    pub estimated_finish_time: Option<DateTime<Utc>>,
}

impl EvseRecord {
    /// Create a new EVSE, initially available
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            brand: String::new(),
            model: String::new(),
            vendor: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            max_power_kw: 22.0,
            status: ConnectorStatus::Available,
            current_ev_id: None,
            charging_start_time: None,
            estimated_finish_time: None,
        }
    }

    pub fn with_hardware(
        mut self,
        brand: impl Into<String>,
        model: impl Into<String>,
        vendor: impl Into<String>,
    ) -> Self {
        self.brand = brand.into();
        self.model = model.into();
        self.vendor = vendor.into();
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn with_max_power(mut self, kw: f64) -> Self {
        self.max_power_kw = kw;
        self
    }

    pub fn with_status(mut self, status: ConnectorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_available(&self) -> bool {
        self.status == ConnectorStatus::Available
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.status,
            ConnectorStatus::Occupied | ConnectorStatus::Reserved
        )
    }

    /// Mark reserved for the given vehicle
    pub fn reserve(&mut self, ev_id: impl Into<String>) {
        self.status = ConnectorStatus::Reserved;
        self.current_ev_id = Some(ev_id.into());
    }

    /// Mark occupied and stamp the charging start time
    pub fn start_charging(&mut self) {
        self.status = ConnectorStatus::Occupied;
        self.charging_start_time = Some(Utc::now());
    }

    /// Back to available, vehicle association and timestamps cleared
    pub fn stop_charging(&mut self) {
        self.status = ConnectorStatus::Available;
        self.current_ev_id = None;
        self.charging_start_time = None;
        self.estimated_finish_time = None;
    }
}

/// One vehicle as tracked by the simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvRecord {
    pub id: String,
    pub brand: String,
    pub model: String,
    pub battery_capacity_kwh: f64,
    pub consumption_kwh_per_km: f64,
    /// Current state of charge, percent
    pub current_soc: f64,
    /// Target state of charge, percent
    pub target_soc: f64,
    pub location_lat: f64,
    pub location_long: f64,
    /// Back-reference to the EVSE this vehicle is plugged into
    pub connected_evse_id: Option<u32>,
}

impl EvRecord {
    pub fn new(
        id: impl Into<String>,
        brand: impl Into<String>,
        model: impl Into<String>,
        battery_capacity_kwh: f64,
        consumption_kwh_per_km: f64,
    ) -> Self {
        Self {
            id: id.into(),
            brand: brand.into(),
            model: model.into(),
            battery_capacity_kwh,
            consumption_kwh_per_km,
            current_soc: 0.0,
            target_soc: 100.0,
            location_lat: 0.0,
            location_long: 0.0,
            connected_evse_id: None,
        }
    }

    pub fn with_soc(mut self, current: f64, target: f64) -> Self {
        self.current_soc = current;
        self.target_soc = target;
        self
    }

    pub fn with_location(mut self, lat: f64, long: f64) -> Self {
        self.location_lat = lat;
        self.location_long = long;
        self
    }

    /// Energy needed to reach the target SOC, in kWh
    pub fn required_energy_kwh(&self) -> f64 {
        let delta_percent = (self.target_soc - self.current_soc).max(0.0);
        (delta_percent / 100.0) * self.battery_capacity_kwh
    }

    /// How far the current charge gets this vehicle, in km
    pub fn estimated_range_km(&self) -> f64 {
        (self.current_soc / 100.0) * self.battery_capacity_kwh / self.consumption_kwh_per_km
    }

    /// Range at the target SOC, in km
    pub fn target_range_km(&self) -> f64 {
        (self.target_soc / 100.0) * self.battery_capacity_kwh / self.consumption_kwh_per_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ConnectorStatus::Available,
            ConnectorStatus::Occupied,
            ConnectorStatus::Reserved,
            ConnectorStatus::Unavailable,
            ConnectorStatus::Faulted,
        ] {
            let parsed = ConnectorStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_rejects_arbitrary_strings() {
        assert!(ConnectorStatus::from_str("Charging").is_err());
        assert!(ConnectorStatus::from_str("available").is_err());
        assert!(ConnectorStatus::from_str("").is_err());
    }

    #[test]
    fn test_evse_lifecycle() {
        let mut evse = EvseRecord::new(1, "Marina AC");
        assert!(evse.is_available());
        assert!(!evse.is_busy());

        evse.reserve("EV-001");
        assert_eq!(evse.status, ConnectorStatus::Reserved);
        assert_eq!(evse.current_ev_id.as_deref(), Some("EV-001"));
        assert!(evse.is_busy());

        evse.start_charging();
        assert_eq!(evse.status, ConnectorStatus::Occupied);
        assert!(evse.charging_start_time.is_some());

        evse.stop_charging();
        assert!(evse.is_available());
        assert!(evse.current_ev_id.is_none());
        assert!(evse.charging_start_time.is_none());
    }

    #[test]
    fn test_ev_energy_figures() {
        let ev = EvRecord::new("EV-001", "Tesla", "Model 3", 60.0, 0.15).with_soc(40.0, 90.0);

        assert_eq!(ev.required_energy_kwh(), 30.0);
        assert_eq!(ev.estimated_range_km(), 160.0);
        assert_eq!(ev.target_range_km(), 360.0);
    }

    #[test]
    fn test_required_energy_never_negative() {
        let ev = EvRecord::new("EV-002", "Renault", "ZOE", 45.0, 0.13).with_soc(90.0, 80.0);
        assert_eq!(ev.required_energy_kwh(), 0.0);
    }
}
