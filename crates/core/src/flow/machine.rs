use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use super::graph::StateGraph;
use super::handler::{StateContext, StateHandler, StateValue};
use super::switcher::{StateChanged, StateSwitcher};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("machine already started")]
    AlreadyStarted,
    #[error("handler registered for {state}, which is not in the graph")]
    UnknownHandlerState { state: String },
    #[error("handler for {state} registered more than once")]
    DuplicateHandler { state: String },
    #[error("no handler registered for {state}")]
    MissingHandler { state: String },
}

struct TransitionRequest<S: StateValue> {
    target: S,
    context: Option<StateContext>,
}

/// Cloneable transition-request surface published to state handlers and
/// external callers. Requests are queued and executed strictly after the
/// in-flight transition completes, which is what makes it safe to call
/// from inside a handler's own enter/exit.
pub struct FlowHandle<S: StateValue> {
    tx: mpsc::UnboundedSender<TransitionRequest<S>>,
}

impl<S: StateValue> Clone for FlowHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: StateValue> FlowHandle<S> {
    pub fn request(&self, target: S) {
        self.send(TransitionRequest {
            target,
            context: None,
        });
    }

    pub fn request_with(&self, target: S, context: StateContext) {
        self.send(TransitionRequest {
            target,
            context: Some(context),
        });
    }

    fn send(&self, request: TransitionRequest<S>) {
        let requested = request.target;
        if self.tx.send(request).is_err() {
            warn!(requested = ?requested, "flow_request_dropped");
        }
    }
}

/// Collects the graph and the per-state handlers before the machine is
/// allowed to start. Registration misuse fails fast.
pub struct StateMachineBuilder<S: StateValue> {
    graph: StateGraph<S>,
    handlers: HashMap<S, Box<dyn StateHandler<S>>>,
    tx: mpsc::UnboundedSender<TransitionRequest<S>>,
    rx: mpsc::UnboundedReceiver<TransitionRequest<S>>,
}

impl<S: StateValue> StateMachineBuilder<S> {
    /// The handle is available before handlers are registered, so handler
    /// constructors can receive it as an explicit dependency.
    pub fn handle(&self) -> FlowHandle<S> {
        FlowHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn StateHandler<S>>) -> Result<(), MachineError> {
        let state = handler.state();
        if !self.graph.states().any(|known| known == state) {
            return Err(MachineError::UnknownHandlerState {
                state: format!("{state:?}"),
            });
        }
        if self.handlers.insert(state, handler).is_some() {
            return Err(MachineError::DuplicateHandler {
                state: format!("{state:?}"),
            });
        }
        Ok(())
    }

    pub fn build(self) -> Result<StateMachine<S>, MachineError> {
        for state in self.graph.states() {
            if !self.handlers.contains_key(&state) {
                return Err(MachineError::MissingHandler {
                    state: format!("{state:?}"),
                });
            }
        }
        Ok(StateMachine {
            switcher: Arc::new(StateSwitcher::new(self.graph, self.handlers)),
            tx: self.tx,
            rx: self.rx,
            started: false,
        })
    }
}

/// Process-wide owner of the lifecycle state machine: starts it at the
/// graph's initial state, holds the authoritative current state, and
/// drains queued transition requests one at a time.
pub struct StateMachine<S: StateValue> {
    switcher: Arc<StateSwitcher<S>>,
    tx: mpsc::UnboundedSender<TransitionRequest<S>>,
    rx: mpsc::UnboundedReceiver<TransitionRequest<S>>,
    started: bool,
}

impl<S: StateValue> std::fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.switcher.current())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl<S: StateValue> StateMachine<S> {
    pub fn builder(graph: StateGraph<S>) -> StateMachineBuilder<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        StateMachineBuilder {
            graph,
            handlers: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> FlowHandle<S> {
        FlowHandle {
            tx: self.tx.clone(),
        }
    }

    /// Direct access for callers that want synchronous rejection instead
    /// of queueing (diagnostics, tests).
    pub fn switcher(&self) -> Arc<StateSwitcher<S>> {
        Arc::clone(&self.switcher)
    }

    pub fn current(&self) -> S {
        self.switcher.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged<S>> {
        self.switcher.subscribe()
    }

    /// Enters the initial state's handler with previous-state `None`.
    /// Calling this twice is a configuration error.
    pub async fn start(&mut self, context: Option<StateContext>) -> Result<(), MachineError> {
        if self.started {
            return Err(MachineError::AlreadyStarted);
        }
        self.started = true;
        info!(state = ?self.switcher.graph().initial(), "lifecycle_started");
        self.switcher.enter_initial(context).await;
        Ok(())
    }

    /// Processes every request queued so far, including requests enqueued
    /// by handlers while draining, and returns the state the machine
    /// settles in. For callers driving the machine from their own loop.
    pub async fn pump(&mut self) -> S {
        while !self.switcher.is_terminal() {
            let Ok(request) = self.rx.try_recv() else {
                break;
            };
            self.execute(request).await;
        }
        self.switcher.current()
    }

    /// Drains queued transition requests until the machine sits in a
    /// terminal state. Rejected requests are logged and do not stop the
    /// loop. Returns the final state.
    pub async fn run_until_terminal(&mut self) -> S {
        while !self.switcher.is_terminal() {
            let Some(request) = self.rx.recv().await else {
                break;
            };
            self.execute(request).await;
        }
        let terminal = self.switcher.current();
        info!(state = ?terminal, "lifecycle_terminal");
        terminal
    }

    async fn execute(&mut self, request: TransitionRequest<S>) {
        let previous = self.switcher.current();
        match self
            .switcher
            .transition_to(request.target, request.context)
            .await
        {
            Ok(()) => info!(
                previous = ?previous,
                current = ?self.switcher.current(),
                "lifecycle_transition"
            ),
            Err(error) => warn!(error = %error, "transition_rejected"),
        }
    }
}
