use async_trait::async_trait;
use homestead_core::{StateContext, StateHandler};
use tracing::info;

use super::AppState;

#[derive(Default)]
pub struct PauseState {
    pauses: u32,
}

impl PauseState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateHandler<AppState> for PauseState {
    fn state(&self) -> AppState {
        AppState::Pause
    }

    async fn enter(&mut self, _previous: Option<AppState>, _context: Option<&StateContext>) {
        self.pauses = self.pauses.saturating_add(1);
        info!(pauses = self.pauses, "game_paused");
    }

    async fn exit(&mut self, next: AppState) {
        info!(next = ?next, "game_resumed");
    }
}
