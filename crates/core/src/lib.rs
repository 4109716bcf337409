pub mod flow;
pub mod persist;
pub mod session;

pub use flow::{
    FlowHandle, GraphError, MachineError, StateChanged, StateContext, StateGraph,
    StateGraphBuilder, StateHandler, StateMachine, StateMachineBuilder, StateSwitcher, StateValue,
    TransitionError,
};
pub use persist::{
    AggregateSnapshot, DirtyFlag, FileStorage, MemoryStorage, SaveBundle, SaveCoordinator,
    SaveError, SaveLoopConfig, SnapshotCapability, SnapshotError, Storage, StorageError,
};
pub use session::{
    GameSettings, LedgerEvent, MapObject, MapObjectId, MapObjectRegistry, MapPosition,
    Persistence, QualityLevel, RegistryEvent, ResourceKind, ResourceLedger, SettingsChange,
    Subscription,
};
