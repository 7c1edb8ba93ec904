//! Network, station, and vehicle configuration

use std::time::Duration;

use crate::ident::DEFAULT_ISO15118_BASE_PORT;
use crate::model::ConnectorStatus;

/// Process-wide network settings
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Central System bind/connect host
    pub csms_host: String,

    /// Central System WebSocket port
    pub csms_port: u16,

    /// Base port for ISO15118 listeners (EVSE `n` listens on `base + n`)
    pub iso15118_base_port: u16,

    /// Heartbeat interval granted to booting stations
    pub heartbeat_interval: Duration,

    /// Interval between meter samples while a transaction is active
    pub meter_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            csms_host: "127.0.0.1".to_string(),
            csms_port: 9000,
            iso15118_base_port: DEFAULT_ISO15118_BASE_PORT,
            heartbeat_interval: Duration::from_secs(10),
            meter_interval: Duration::from_secs(5),
        }
    }
}

impl NetworkConfig {
    /// `ws://host:port` of the Central System, without the station path
    pub fn csms_url(&self) -> String {
        format!("ws://{}:{}", self.csms_host, self.csms_port)
    }

    pub fn with_csms_host(mut self, host: impl Into<String>) -> Self {
        self.csms_host = host.into();
        self
    }

    pub fn with_csms_port(mut self, port: u16) -> Self {
        self.csms_port = port;
        self
    }

    pub fn with_iso15118_base_port(mut self, port: u16) -> Self {
        self.iso15118_base_port = port;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_meter_interval(mut self, interval: Duration) -> Self {
        self.meter_interval = interval;
        self
    }
}

/// Identity a Charge Point reports in its BootNotification
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub vendor: String,
    pub model: String,

    /// Token used for the post-boot Authorize call and transaction events
    pub id_token: String,

    /// Status reported right after a successful boot
    pub initial_status: ConnectorStatus,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            vendor: "Voltgrid".to_string(),
            model: "VG-EVSE".to_string(),
            id_token: "voltgrid-user".to_string(),
            initial_status: ConnectorStatus::Available,
        }
    }
}

impl StationConfig {
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self.model = model.into();
        self
    }

    pub fn with_initial_status(mut self, status: ConnectorStatus) -> Self {
        self.initial_status = status;
        self
    }
}

/// EV Client behavior settings
#[derive(Debug, Clone)]
pub struct EvConfig {
    /// SOC percentage added per monitor tick
    pub soc_step: f64,

    /// Interval between SOC monitor ticks
    pub soc_interval: Duration,

    /// Protocol version announced in the ConnectionRequest
    pub protocol_version: String,
}

impl Default for EvConfig {
    fn default() -> Self {
        Self {
            soc_step: 5.0,
            soc_interval: Duration::from_secs(5),
            protocol_version: "1.0".to_string(),
        }
    }
}

impl EvConfig {
    pub fn with_soc_step(mut self, step: f64) -> Self {
        self.soc_step = step;
        self
    }

    pub fn with_soc_interval(mut self, interval: Duration) -> Self {
        self.soc_interval = interval;
        self
    }
}
