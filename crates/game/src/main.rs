use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use homestead_core::{
    FileStorage, GameSettings, GraphError, MachineError, MapObjectRegistry, ResourceLedger,
    SaveCoordinator, SaveLoopConfig, StateChanged, StateGraph, StateMachine, Storage,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod demo;
mod states;

use states::{AppState, ExitState, GameplayState, InitialState, PauseState};

const SAVE_PATH_ENV_VAR: &str = "HOMESTEAD_SAVE_PATH";
const DEFAULT_SAVE_PATH: &str = "save/homestead.json";

#[derive(Debug, Error)]
enum AppError {
    #[error("invalid lifecycle graph: {0}")]
    Graph(#[from] GraphError),
    #[error("invalid machine configuration: {0}")]
    Machine(#[from] MachineError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    info!("=== Homestead Startup ===");

    if let Err(error) = run().await {
        error!(error = %error, "startup_failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let settings = Arc::new(GameSettings::new());
    let ledger = Arc::new(ResourceLedger::new());
    let registry = Arc::new(MapObjectRegistry::new());

    let save_path = resolve_save_path();
    info!(path = %save_path.display(), "save_path_resolved");
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(save_path));
    let coordinator = Arc::new(SaveCoordinator::new(storage, SaveLoopConfig::default()));

    let mut builder = StateMachine::builder(lifecycle_graph()?);
    let flow = builder.handle();
    builder.register(Box::new(InitialState::new(
        flow.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&settings),
        Arc::clone(&ledger),
        Arc::clone(&registry),
    )))?;
    builder.register(Box::new(GameplayState::new()))?;
    builder.register(Box::new(PauseState::new()))?;
    builder.register(Box::new(ExitState::new(Arc::clone(&coordinator))))?;
    let mut machine = builder.build()?;

    spawn_transition_logger(machine.subscribe());
    demo::spawn(
        flow,
        Arc::clone(&settings),
        Arc::clone(&ledger),
        Arc::clone(&registry),
    );

    machine.start(None).await?;
    let final_state = machine.run_until_terminal().await;
    info!(state = ?final_state, "shutdown");
    Ok(())
}

fn lifecycle_graph() -> Result<StateGraph<AppState>, GraphError> {
    StateGraph::builder(AppState::Initial)
        .transitions(AppState::Initial, [AppState::Gameplay])
        .transitions(AppState::Gameplay, [AppState::Pause])
        .transitions(AppState::Pause, [AppState::Gameplay, AppState::Exit])
        .transitions(AppState::Exit, [])
        .build()
}

fn spawn_transition_logger(mut events: broadcast::Receiver<StateChanged<AppState>>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(changed) => info!(
                    previous = ?changed.previous,
                    current = ?changed.current,
                    "lifecycle_observed"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle_observer_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn resolve_save_path() -> PathBuf {
    match env::var(SAVE_PATH_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        Ok(_) | Err(env::VarError::NotPresent) => PathBuf::from(DEFAULT_SAVE_PATH),
        Err(err) => {
            warn!(
                env_var = SAVE_PATH_ENV_VAR,
                error = %err,
                "unable to read save-path env var; falling back to default"
            );
            PathBuf::from(DEFAULT_SAVE_PATH)
        }
    }
}
