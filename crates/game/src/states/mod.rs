mod exit;
mod gameplay;
mod initial;
mod pause;

pub use exit::ExitState;
pub use gameplay::GameplayState;
pub use initial::InitialState;
pub use pause::PauseState;

/// Top-level lifecycle of the prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppState {
    Initial,
    Gameplay,
    Pause,
    Exit,
}

/// Storage keys for the persisted bundle, one entry per aggregate.
pub const SETTINGS_KEY: &str = "settings";
pub const RESOURCES_KEY: &str = "resources";
pub const MAP_OBJECTS_KEY: &str = "map_objects";

/// One-shot payload for entering Gameplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameplayContext {
    pub first_start: bool,
}
