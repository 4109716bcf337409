use async_trait::async_trait;
use homestead_core::{StateContext, StateHandler};
use tracing::info;

use super::{AppState, GameplayContext};

/// Active play. Presentation and input live outside this crate; the
/// handler keeps the lifecycle bookkeeping.
#[derive(Default)]
pub struct GameplayState {
    sessions: u32,
}

impl GameplayState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateHandler<AppState> for GameplayState {
    fn state(&self) -> AppState {
        AppState::Gameplay
    }

    async fn enter(&mut self, previous: Option<AppState>, context: Option<&StateContext>) {
        let first_start = context
            .and_then(|payload| payload.downcast_ref::<GameplayContext>())
            .map(|context| context.first_start)
            .unwrap_or(false);
        self.sessions = self.sessions.saturating_add(1);
        info!(
            previous = ?previous,
            first_start,
            session = self.sessions,
            "gameplay_started"
        );
    }

    async fn exit(&mut self, next: AppState) {
        info!(next = ?next, "gameplay_suspended");
    }
}
