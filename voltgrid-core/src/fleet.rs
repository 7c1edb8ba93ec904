//! Process-wide store of EVSE and EV records
//!
//! All protocol roles in a process share one `FleetState`. Mutations go
//! through closure-scoped accessors that take and release the lock in one
//! call, so a check-then-mutate sequence can never be interleaved by a
//! task suspension point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{EvRecord, EvseRecord};

/// Shared, cloneable handle to the fleet records
#[derive(Debug, Clone, Default)]
pub struct FleetState {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    evses: RwLock<HashMap<u32, EvseRecord>>,
    evs: RwLock<HashMap<String, EvRecord>>,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an EVSE record, replacing any existing record with the same id.
    pub fn add_evse(&self, evse: EvseRecord) {
        self.inner.evses.write().insert(evse.id, evse);
    }

    /// Insert an EV record, replacing any existing record with the same id.
    pub fn add_ev(&self, ev: EvRecord) {
        self.inner.evs.write().insert(ev.id.clone(), ev);
    }

    /// Snapshot of one EVSE record
    pub fn evse(&self, evse_id: u32) -> Option<EvseRecord> {
        self.inner.evses.read().get(&evse_id).cloned()
    }

    /// Snapshot of one EV record
    pub fn ev(&self, ev_id: &str) -> Option<EvRecord> {
        self.inner.evs.read().get(ev_id).cloned()
    }

    /// Run `f` against a mutable EVSE record under the lock.
    ///
    /// Returns `None` when the id is unknown; the caller decides whether
    /// that is a warning (protocol handlers) or an error (orchestration).
    pub fn with_evse_mut<R>(&self, evse_id: u32, f: impl FnOnce(&mut EvseRecord) -> R) -> Option<R> {
        self.inner.evses.write().get_mut(&evse_id).map(f)
    }

    /// Run `f` against a mutable EV record under the lock.
    pub fn with_ev_mut<R>(&self, ev_id: &str, f: impl FnOnce(&mut EvRecord) -> R) -> Option<R> {
        self.inner.evs.write().get_mut(ev_id).map(f)
    }

    /// Run `f` against the EV whose `connected_evse_id` matches, if any.
    pub fn with_connected_ev_mut<R>(
        &self,
        evse_id: u32,
        f: impl FnOnce(&mut EvRecord) -> R,
    ) -> Option<R> {
        let mut evs = self.inner.evs.write();
        evs.values_mut()
            .find(|ev| ev.connected_evse_id == Some(evse_id))
            .map(f)
    }

    pub fn evse_ids(&self) -> Vec<u32> {
        let mut ids: Vec<_> = self.inner.evses.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn ev_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.evs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every EVSE record, id-ordered
    pub fn evse_summaries(&self) -> Vec<EvseRecord> {
        let mut all: Vec<_> = self.inner.evses.read().values().cloned().collect();
        all.sort_by_key(|e| e.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectorStatus;

    #[test]
    fn test_add_and_lookup() {
        let fleet = FleetState::new();
        fleet.add_evse(EvseRecord::new(1, "A"));
        fleet.add_evse(EvseRecord::new(2, "B"));

        assert_eq!(fleet.evse(1).unwrap().name, "A");
        assert!(fleet.evse(99).is_none());
        assert_eq!(fleet.evse_ids(), vec![1, 2]);
    }

    #[test]
    fn test_mutation_is_scoped() {
        let fleet = FleetState::new();
        fleet.add_evse(EvseRecord::new(1, "A"));

        let was_available = fleet
            .with_evse_mut(1, |evse| {
                let ok = evse.is_available();
                if ok {
                    evse.reserve("EV-001");
                }
                ok
            })
            .unwrap();

        assert!(was_available);
        assert_eq!(fleet.evse(1).unwrap().status, ConnectorStatus::Reserved);
    }

    #[test]
    fn test_unknown_id_mutation_is_none() {
        let fleet = FleetState::new();
        assert!(fleet.with_evse_mut(7, |e| e.start_charging()).is_none());
    }

    #[test]
    fn test_connected_ev_lookup() {
        let fleet = FleetState::new();
        let mut ev = EvRecord::new("EV-001", "Tesla", "Model 3", 60.0, 0.15);
        ev.connected_evse_id = Some(3);
        fleet.add_ev(ev);
        fleet.add_ev(EvRecord::new("EV-002", "Renault", "ZOE", 45.0, 0.13));

        let hit = fleet.with_connected_ev_mut(3, |ev| ev.id.clone());
        assert_eq!(hit.as_deref(), Some("EV-001"));
        assert!(fleet.with_connected_ev_mut(4, |ev| ev.id.clone()).is_none());
    }
}
