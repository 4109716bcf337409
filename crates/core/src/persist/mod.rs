mod aggregate;
mod coordinator;
mod file_storage;
mod storage;

pub use aggregate::{AggregateSnapshot, DirtyFlag, SnapshotCapability, SnapshotError};
pub use coordinator::{SaveCoordinator, SaveError, SaveLoopConfig};
pub use file_storage::FileStorage;
pub use storage::{MemoryStorage, SaveBundle, Storage, StorageError};
