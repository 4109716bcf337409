use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode persisted state: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Produces the serialized form written to storage under the aggregate's
/// key. Implementations read their own state; the save pipeline never
/// mutates an aggregate.
pub trait AggregateSnapshot: Send + Sync {
    fn snapshot(&self) -> Result<String, SnapshotError>;
}

/// Serializability declared at registration time. A transient aggregate is
/// tracked but never written; the pipeline warns about it once when it is
/// registered.
#[derive(Clone)]
pub enum SnapshotCapability {
    Serializable(Arc<dyn AggregateSnapshot>),
    Transient,
}

/// Shared changed-since-last-flush flag. `mark` is safe to call from any
/// change-notification callback: a single atomic flip, no locks, no I/O.
#[derive(Clone, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clears the flag and reports whether it was set. The save loop calls
    /// this once per cycle; a mark arriving after the call lands in the
    /// next cycle.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
