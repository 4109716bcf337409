mod graph;
mod handler;
mod machine;
mod switcher;


pub use graph::{GraphError, StateGraph, StateGraphBuilder};
pub use handler::{StateContext, StateHandler, StateValue};
pub use machine::{FlowHandle, MachineError, StateMachine, StateMachineBuilder};
pub use switcher::{StateChanged, StateSwitcher, TransitionError};
