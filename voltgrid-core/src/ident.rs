//! Derived identifiers
//!
//! The station id and the ISO15118 listen port are both derived from the
//! EVSE id. This convention — not a shared database — is how the EVSE
//! Server finds "its" Charge Point and how an EV Client finds "its" EVSE
//! Server, so the mapping must stay bijective for the lifetime of an
//! EVSE id.

/// Default base port for ISO15118 listeners; EVSE `n` listens on `base + n`.
pub const DEFAULT_ISO15118_BASE_PORT: u16 = 9001;

/// Station id for an EVSE: `CP_{id}`
pub fn station_id_for(evse_id: u32) -> String {
    format!("CP_{}", evse_id)
}

/// Inverse of [`station_id_for`]; `None` for ids not of that shape.
pub fn evse_id_from_station(station_id: &str) -> Option<u32> {
    station_id.strip_prefix("CP_")?.parse().ok()
}

/// ISO15118 listen port for an EVSE
pub fn iso15118_port_for(base_port: u16, evse_id: u32) -> u16 {
    base_port + evse_id as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_id_round_trip() {
        for id in [0, 1, 3, 42, 9999] {
            assert_eq!(evse_id_from_station(&station_id_for(id)), Some(id));
        }
    }

    #[test]
    fn test_station_id_shape() {
        assert_eq!(station_id_for(3), "CP_3");
        assert_eq!(evse_id_from_station("CP_17"), Some(17));
    }

    #[test]
    fn test_malformed_station_ids() {
        assert_eq!(evse_id_from_station("CP_"), None);
        assert_eq!(evse_id_from_station("CP_abc"), None);
        assert_eq!(evse_id_from_station("EVSE_3"), None);
        assert_eq!(evse_id_from_station(""), None);
    }

    #[test]
    fn test_distinct_ids_never_collide() {
        let pairs: Vec<_> = (0..100)
            .map(|id| {
                (
                    station_id_for(id),
                    iso15118_port_for(DEFAULT_ISO15118_BASE_PORT, id),
                )
            })
            .collect();
        for (i, a) in pairs.iter().enumerate() {
            for b in &pairs[i + 1..] {
                assert_ne!(a.0, b.0);
                assert_ne!(a.1, b.1);
            }
        }
    }

    #[test]
    fn test_port_derivation() {
        assert_eq!(iso15118_port_for(DEFAULT_ISO15118_BASE_PORT, 0), 9001);
        assert_eq!(iso15118_port_for(DEFAULT_ISO15118_BASE_PORT, 3), 9004);
    }
}
