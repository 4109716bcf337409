mod observers;
mod registry;
mod resources;
mod settings;

pub use observers::Subscription;
pub use registry::{
    MapObject, MapObjectId, MapObjectRegistry, MapPosition, Persistence, RegistryEvent,
};
pub use resources::{LedgerEvent, ResourceKind, ResourceLedger};
pub use settings::{GameSettings, QualityLevel, SettingsChange};
