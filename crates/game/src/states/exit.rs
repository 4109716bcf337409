use std::sync::Arc;

use async_trait::async_trait;
use homestead_core::{SaveCoordinator, StateContext, StateHandler};
use tracing::{error, info};

use super::AppState;

/// Terminal state: stops the save loop and performs the one final flush
/// process teardown cannot wait a loop tick for.
pub struct ExitState {
    coordinator: Arc<SaveCoordinator>,
}

impl ExitState {
    pub fn new(coordinator: Arc<SaveCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl StateHandler<AppState> for ExitState {
    fn state(&self) -> AppState {
        AppState::Exit
    }

    async fn enter(&mut self, previous: Option<AppState>, _context: Option<&StateContext>) {
        info!(previous = ?previous, "exit_requested");
        self.coordinator.stop().await;
        match self.coordinator.flush().await {
            Ok(written) => info!(aggregates = written, "final_save_complete"),
            Err(error) => error!(error = %error, "final_save_failed"),
        }
    }

    async fn exit(&mut self, _next: AppState) {}
}
