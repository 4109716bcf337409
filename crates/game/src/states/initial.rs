use std::sync::Arc;

use async_trait::async_trait;
use homestead_core::{
    FlowHandle, GameSettings, MapObjectRegistry, ResourceLedger, SaveCoordinator,
    SnapshotCapability, StateContext, StateHandler, Subscription,
};
use tracing::{debug, error, info, warn};

use super::{AppState, GameplayContext, MAP_OBJECTS_KEY, RESOURCES_KEY, SETTINGS_KEY};

/// First state after launch: restores the persisted session, wires the
/// aggregates into the save pipeline, starts the pipeline, and hands
/// control to Gameplay. Storage trouble degrades to a fresh session; it
/// never blocks the game from starting.
pub struct InitialState {
    flow: FlowHandle<AppState>,
    coordinator: Arc<SaveCoordinator>,
    settings: Arc<GameSettings>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<MapObjectRegistry>,
    subscriptions: Vec<Subscription>,
}

impl InitialState {
    pub fn new(
        flow: FlowHandle<AppState>,
        coordinator: Arc<SaveCoordinator>,
        settings: Arc<GameSettings>,
        ledger: Arc<ResourceLedger>,
        registry: Arc<MapObjectRegistry>,
    ) -> Self {
        Self {
            flow,
            coordinator,
            settings,
            ledger,
            registry,
            subscriptions: Vec::new(),
        }
    }

    async fn load_saved_data(&mut self) {
        let bundle = match self
            .coordinator
            .load_bundle(&[SETTINGS_KEY, RESOURCES_KEY, MAP_OBJECTS_KEY])
            .await
        {
            Ok(bundle) => bundle,
            Err(error) => {
                warn!(error = %error, "save_data_unavailable");
                return;
            }
        };

        if let Some(raw) = bundle.get(SETTINGS_KEY) {
            match self.settings.apply_loaded(raw) {
                Ok(()) => info!(
                    quality = ?self.settings.quality(),
                    music_volume = self.settings.music_volume(),
                    show_fps = self.settings.show_fps(),
                    "settings_restored"
                ),
                Err(error) => warn!(error = %error, "settings_restore_failed"),
            }
        }
        if let Some(raw) = bundle.get(RESOURCES_KEY) {
            match self.ledger.load_from(raw) {
                Ok(()) => info!("resources_restored"),
                Err(error) => warn!(error = %error, "resources_restore_failed"),
            }
        }
        if let Some(raw) = bundle.get(MAP_OBJECTS_KEY) {
            match self.registry.load_restored(raw) {
                Ok(count) => info!(objects = count, "map_objects_restored"),
                Err(error) => warn!(error = %error, "map_objects_restore_failed"),
            }
        }
    }

    fn wire_dirty_tracking(&mut self) {
        let settings_dirty = self.coordinator.register(
            SETTINGS_KEY,
            SnapshotCapability::Serializable(Arc::clone(&self.settings) as _),
        );
        self.subscriptions
            .push(self.settings.observe(move |_| settings_dirty.mark()));

        let resources_dirty = self.coordinator.register(
            RESOURCES_KEY,
            SnapshotCapability::Serializable(Arc::clone(&self.ledger) as _),
        );
        self.subscriptions
            .push(self.ledger.observe(move |_| resources_dirty.mark()));

        let map_objects_dirty = self.coordinator.register(
            MAP_OBJECTS_KEY,
            SnapshotCapability::Serializable(Arc::clone(&self.registry) as _),
        );
        self.subscriptions
            .push(self.registry.observe(move |_| map_objects_dirty.mark()));
    }
}

#[async_trait]
impl StateHandler<AppState> for InitialState {
    fn state(&self) -> AppState {
        AppState::Initial
    }

    async fn enter(&mut self, _previous: Option<AppState>, _context: Option<&StateContext>) {
        self.load_saved_data().await;
        self.wire_dirty_tracking();

        if let Err(error) = self.coordinator.start() {
            error!(error = %error, "save_loop_unavailable");
        }
        if self.settings.show_fps() {
            info!("diagnostics_enabled");
        }

        self.flow.request_with(
            AppState::Gameplay,
            Box::new(GameplayContext { first_start: true }),
        );
    }

    async fn exit(&mut self, next: AppState) {
        debug!(next = ?next, "initial_state_left");
    }
}
