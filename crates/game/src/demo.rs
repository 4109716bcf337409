use std::sync::Arc;
use std::time::Duration;

use homestead_core::{
    FlowHandle, GameSettings, MapObject, MapObjectId, MapObjectRegistry, MapPosition, Persistence,
    QualityLevel, ResourceKind, ResourceLedger,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::info;

use crate::states::AppState;

const STARTUP_GRACE: Duration = Duration::from_millis(300);
const PLAY_STRETCH: Duration = Duration::from_millis(1200);
const MENU_PAUSE: Duration = Duration::from_millis(400);

/// Scripted stand-in for a player session: harvests, tweaks settings,
/// pauses and resumes, then quits. Runs beside the machine's own loop the
/// way presentation callbacks would.
pub fn spawn(
    flow: FlowHandle<AppState>,
    settings: Arc<GameSettings>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<MapObjectRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(run_session(flow, settings, ledger, registry))
}

async fn run_session(
    flow: FlowHandle<AppState>,
    settings: Arc<GameSettings>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<MapObjectRegistry>,
) {
    sleep(STARTUP_GRACE).await;
    info!("demo_session_started");

    registry.register(
        MapObjectId::new("pile_east"),
        MapObject {
            kind: "resource_pile".to_string(),
            position: MapPosition { x: 4.0, y: 0.0 },
            remaining_uses: Some(3),
        },
        Persistence::Durable,
    );
    registry.register(
        MapObjectId::new("spawn_marker"),
        MapObject {
            kind: "debug_marker".to_string(),
            position: MapPosition { x: 0.0, y: 0.0 },
            remaining_uses: None,
        },
        Persistence::Transient,
    );

    ledger.deposit(ResourceKind::Wood, 25);
    ledger.deposit(ResourceKind::Grain, 10);
    settings.set_music_volume(0.6);
    sleep(PLAY_STRETCH).await;

    flow.request(AppState::Pause);
    sleep(MENU_PAUSE).await;
    flow.request(AppState::Gameplay);
    sleep(MENU_PAUSE).await;

    ledger.withdraw(ResourceKind::Wood, 5);
    registry.update(&MapObjectId::new("pile_east"), |pile| {
        pile.remaining_uses = pile.remaining_uses.map(|uses| uses.saturating_sub(1));
    });
    settings.set_quality(QualityLevel::Middle);
    sleep(PLAY_STRETCH).await;

    info!(
        wood = ledger.balance(ResourceKind::Wood),
        grain = ledger.balance(ResourceKind::Grain),
        objects = registry.object_count(),
        "demo_session_finished"
    );
    flow.request(AppState::Pause);
    sleep(MENU_PAUSE).await;
    flow.request(AppState::Exit);
}
