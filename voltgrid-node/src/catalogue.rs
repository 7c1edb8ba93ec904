//! Built-in fleet catalogue
//!
//! Default vehicles and stations loaded at startup so the simulation has
//! something to charge without any provisioning step.

use voltgrid_core::model::{ConnectorStatus, EvRecord, EvseRecord};

/// Rated power per station model, in kW. Unknown models fall back to a
/// 22 kW AC assumption.
pub fn max_power_for_model(model: &str) -> f64 {
    match model {
        "AC Type-2" => 22.0,
        "Wallbox" => 11.0,
        "DC Fast" => 50.0,
        "DC Ultra" => 150.0,
        "Supercharger" => 250.0,
        _ => 22.0,
    }
}

pub fn default_evs() -> Vec<EvRecord> {
    vec![
        EvRecord::new("EV-001", "Tesla", "Model 3", 60.0, 0.15)
            .with_soc(40.0, 90.0)
            .with_location(40.7128, 29.9230),
        EvRecord::new("EV-002", "Renault", "ZOE", 45.0, 0.13)
            .with_soc(55.0, 100.0)
            .with_location(40.7321, 29.9540),
        EvRecord::new("EV-003", "Hyundai", "Kona", 64.0, 0.16)
            .with_soc(20.0, 80.0)
            .with_location(40.7483, 29.9801),
        EvRecord::new("EV-004", "Volkswagen", "ID.4", 77.0, 0.18)
            .with_soc(50.0, 100.0)
            .with_location(40.7600, 29.9200),
        EvRecord::new("EV-005", "BMW", "i4 eDrive40", 83.9, 0.19)
            .with_soc(30.0, 85.0)
            .with_location(40.7900, 29.9100),
        EvRecord::new("EV-006", "Mercedes-Benz", "EQB 300", 66.5, 0.17)
            .with_soc(25.0, 90.0)
            .with_location(40.7020, 29.9500),
        EvRecord::new("EV-007", "Nissan", "Leaf e+", 62.0, 0.15)
            .with_soc(60.0, 100.0)
            .with_location(40.7400, 29.9700),
        EvRecord::new("EV-008", "BYD", "Atto 3", 60.5, 0.16)
            .with_soc(45.0, 95.0)
            .with_location(40.7200, 29.9650),
    ]
}

pub fn default_evses(count: u32) -> Vec<EvseRecord> {
    let templates = [
        (
            "Harborview AC",
            "ZES",
            "AC Type-2",
            "Vestel",
            (40.7142, 29.9235),
            ConnectorStatus::Available,
        ),
        (
            "Midtown Fast",
            "Voltrun",
            "DC Fast",
            "Siemens",
            (40.7325, 29.9550),
            ConnectorStatus::Reserved,
        ),
        (
            "Riverside Park",
            "Sharz",
            "Wallbox",
            "ABB",
            (40.7487, 29.9805),
            ConnectorStatus::Occupied,
        ),
        (
            "Techpark Ultra",
            "Esarj",
            "DC Ultra",
            "Delta",
            (40.7905, 29.9110),
            ConnectorStatus::Unavailable,
        ),
        (
            "Eastgate Hub",
            "Tesla",
            "Supercharger",
            "Tesla",
            (40.7202, 29.9652),
            ConnectorStatus::Faulted,
        ),
    ];

    (0..count as usize)
        .map(|i| {
            let (name, brand, model, vendor, (lat, long), status) =
                templates[i % templates.len()];
            EvseRecord::new(i as u32 + 1, name)
                .with_hardware(brand, model, vendor)
                .with_location(lat, long)
                .with_max_power(max_power_for_model(model))
                .with_status(status)
        })
        .collect()
}
