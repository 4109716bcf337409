use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::graph::StateGraph;
use super::handler::{StateContext, StateHandler, StateValue};

const STATE_EVENT_CAPACITY: usize = 64;

/// Emitted after a transition's Enter completes. `previous` is `None` for
/// the machine's first start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged<S: StateValue> {
    pub previous: Option<S>,
    pub current: S,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError<S: StateValue> {
    #[error("no transition from {from:?} to {to:?} (allowed: {allowed:?})")]
    NotAllowed { from: S, to: S, allowed: Vec<S> },
    #[error("transition to {requested:?} rejected: another transition is in flight")]
    InFlight { requested: S },
}

struct SwitcherInner<S: StateValue> {
    current: S,
    handlers: HashMap<S, Box<dyn StateHandler<S>>>,
}

/// Validates and executes a single transition: Exit on the old handler,
/// then the current-state update, then Enter on the new handler, strictly
/// in that order. At most one transition is in flight at a time; a request
/// arriving while one runs (including a re-entrant call from inside a
/// handler) fails with [`TransitionError::InFlight`] instead of queueing.
/// Handlers that need to chain transitions enqueue through the machine's
/// `FlowHandle`.
pub struct StateSwitcher<S: StateValue> {
    graph: StateGraph<S>,
    inner: Mutex<SwitcherInner<S>>,
    current: RwLock<S>,
    events: broadcast::Sender<StateChanged<S>>,
}

impl<S: StateValue> StateSwitcher<S> {
    pub(crate) fn new(graph: StateGraph<S>, handlers: HashMap<S, Box<dyn StateHandler<S>>>) -> Self {
        let initial = graph.initial();
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            graph,
            inner: Mutex::new(SwitcherInner {
                current: initial,
                handlers,
            }),
            current: RwLock::new(initial),
            events,
        }
    }

    pub fn graph(&self) -> &StateGraph<S> {
        &self.graph
    }

    /// The authoritative current state. Readable at any time, including
    /// while a transition runs (it reports the state set between Exit and
    /// Enter).
    pub fn current(&self) -> S {
        *self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_terminal(&self) -> bool {
        self.graph.is_terminal(self.current())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged<S>> {
        self.events.subscribe()
    }

    pub async fn transition_to(
        &self,
        target: S,
        context: Option<StateContext>,
    ) -> Result<(), TransitionError<S>> {
        let mut inner = self
            .inner
            .try_lock()
            .map_err(|_| TransitionError::InFlight { requested: target })?;

        let from = inner.current;
        if !self.graph.allows(from, target) {
            return Err(TransitionError::NotAllowed {
                from,
                to: target,
                allowed: self.graph.successors(from).to_vec(),
            });
        }

        if let Some(handler) = inner.handlers.get_mut(&from) {
            handler.exit(target).await;
        }
        debug!(state = ?from, next = ?target, "state_exited");

        inner.current = target;
        self.store_current(target);

        if let Some(handler) = inner.handlers.get_mut(&target) {
            handler.enter(Some(from), context.as_ref()).await;
        }
        debug!(state = ?target, previous = ?from, "state_entered");
        drop(inner);

        let _ = self.events.send(StateChanged {
            previous: Some(from),
            current: target,
        });
        Ok(())
    }

    /// First start only: Enter on the initial state's handler with no
    /// previous state. The machine guarantees this runs exactly once.
    pub(crate) async fn enter_initial(&self, context: Option<StateContext>) {
        let mut inner = self.inner.lock().await;
        let initial = self.graph.initial();
        if let Some(handler) = inner.handlers.get_mut(&initial) {
            handler.enter(None, context.as_ref()).await;
        }
        debug!(state = ?initial, "state_entered");
        drop(inner);

        let _ = self.events.send(StateChanged {
            previous: None,
            current: initial,
        });
    }

    fn store_current(&self, state: S) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }
}
