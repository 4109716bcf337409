use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::observers::{ObserverSet, Subscription};
use crate::persist::{AggregateSnapshot, SnapshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Wood,
    Grain,
    Gold,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Wood, ResourceKind::Grain, ResourceKind::Gold];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    Changed { kind: ResourceKind, balance: i64 },
    Reloaded,
}

/// Per-kind resource balances. Amounts are unsigned, so a negative amount
/// is unrepresentable; balances themselves may go below zero (spending on
/// credit is a gameplay rule, not a ledger concern). Bulk load is one
/// suppressed-notification pass followed by a single [`LedgerEvent::Reloaded`].
#[derive(Default)]
pub struct ResourceLedger {
    balances: Mutex<HashMap<ResourceKind, i64>>,
    observers: ObserverSet<LedgerEvent>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        {
            let mut balances = ledger.lock_balances();
            for kind in ResourceKind::ALL {
                balances.insert(kind, 0);
            }
        }
        ledger
    }

    pub fn balance(&self, kind: ResourceKind) -> i64 {
        self.lock_balances().get(&kind).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> HashMap<ResourceKind, i64> {
        self.lock_balances().clone()
    }

    pub fn deposit(&self, kind: ResourceKind, amount: u32) {
        let balance = {
            let mut balances = self.lock_balances();
            let balance = balances.entry(kind).or_insert(0);
            *balance = balance.saturating_add(i64::from(amount));
            *balance
        };
        self.observers.emit(&LedgerEvent::Changed { kind, balance });
    }

    pub fn withdraw(&self, kind: ResourceKind, amount: u32) {
        let balance = {
            let mut balances = self.lock_balances();
            let balance = balances.entry(kind).or_insert(0);
            *balance = balance.saturating_sub(i64::from(amount));
            *balance
        };
        self.observers.emit(&LedgerEvent::Changed { kind, balance });
    }

    pub fn observe(&self, callback: impl Fn(&LedgerEvent) + Send + Sync + 'static) -> Subscription {
        self.observers.observe(callback)
    }

    /// Replaces every balance from a persisted snapshot in one pass.
    /// Kinds absent from the snapshot reset to zero. Observers see a
    /// single `Reloaded`, not one event per entry.
    pub fn load_from(&self, serialized: &str) -> Result<(), SnapshotError> {
        let loaded: HashMap<ResourceKind, i64> =
            serde_json::from_str(serialized).map_err(SnapshotError::Decode)?;
        {
            let mut balances = self.lock_balances();
            balances.clear();
            for kind in ResourceKind::ALL {
                balances.insert(kind, loaded.get(&kind).copied().unwrap_or(0));
            }
        }
        self.observers.emit(&LedgerEvent::Reloaded);
        Ok(())
    }

    fn lock_balances(&self) -> MutexGuard<'_, HashMap<ResourceKind, i64>> {
        self.balances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AggregateSnapshot for ResourceLedger {
    fn snapshot(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(&*self.lock_balances()).map_err(SnapshotError::Encode)
    }
}
