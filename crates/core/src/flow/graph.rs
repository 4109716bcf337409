use std::collections::HashMap;

use thiserror::Error;

use super::handler::StateValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("initial state {state} has no transition entry")]
    MissingInitialState { state: String },
    #[error("transition {from} -> {to} targets a state with no transition entry")]
    UnknownTarget { from: String, to: String },
    #[error("state {state} declared more than once")]
    DuplicateState { state: String },
}

/// Immutable description of the legal lifecycle transitions for a state
/// type. Every state owns an ordered successor list; a state with an empty
/// list is terminal. Construction validates the whole table up front, so a
/// built graph can never name a state it does not know.
#[derive(Debug, Clone)]
pub struct StateGraph<S: StateValue> {
    initial: S,
    transitions: HashMap<S, Vec<S>>,
}

impl<S: StateValue> StateGraph<S> {
    pub fn builder(initial: S) -> StateGraphBuilder<S> {
        StateGraphBuilder {
            initial,
            entries: Vec::new(),
        }
    }

    pub fn initial(&self) -> S {
        self.initial
    }

    pub fn successors(&self, state: S) -> &[S] {
        self.transitions
            .get(&state)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn allows(&self, from: S, to: S) -> bool {
        self.successors(from).contains(&to)
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.successors(state).is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = S> + '_ {
        self.transitions.keys().copied()
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }
}

pub struct StateGraphBuilder<S: StateValue> {
    initial: S,
    entries: Vec<(S, Vec<S>)>,
}

impl<S: StateValue> StateGraphBuilder<S> {
    /// Declare the ordered successor list for `from`. Every state the graph
    /// mentions must be declared exactly once, terminal states with an
    /// empty list.
    pub fn transitions(mut self, from: S, to: impl IntoIterator<Item = S>) -> Self {
        self.entries.push((from, to.into_iter().collect()));
        self
    }

    pub fn build(self) -> Result<StateGraph<S>, GraphError> {
        let mut transitions: HashMap<S, Vec<S>> = HashMap::with_capacity(self.entries.len());
        for (from, successors) in &self.entries {
            if transitions.insert(*from, successors.clone()).is_some() {
                return Err(GraphError::DuplicateState {
                    state: format!("{from:?}"),
                });
            }
        }

        if !transitions.contains_key(&self.initial) {
            return Err(GraphError::MissingInitialState {
                state: format!("{:?}", self.initial),
            });
        }

        for (from, successors) in &self.entries {
            for to in successors {
                if !transitions.contains_key(to) {
                    return Err(GraphError::UnknownTarget {
                        from: format!("{from:?}"),
                        to: format!("{to:?}"),
                    });
                }
            }
        }

        Ok(StateGraph {
            initial: self.initial,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Phase {
        Boot,
        Run,
        Done,
    }

    fn lifecycle_graph() -> StateGraph<Phase> {
        StateGraph::builder(Phase::Boot)
            .transitions(Phase::Boot, [Phase::Run])
            .transitions(Phase::Run, [Phase::Done])
            .transitions(Phase::Done, [])
            .build()
            .expect("graph")
    }

    #[test]
    fn successors_follow_declaration_order() {
        let graph = StateGraph::builder(Phase::Boot)
            .transitions(Phase::Boot, [Phase::Done, Phase::Run])
            .transitions(Phase::Run, [])
            .transitions(Phase::Done, [])
            .build()
            .expect("graph");

        assert_eq!(graph.successors(Phase::Boot), &[Phase::Done, Phase::Run]);
    }

    #[test]
    fn allows_only_declared_edges() {
        let graph = lifecycle_graph();
        assert!(graph.allows(Phase::Boot, Phase::Run));
        assert!(!graph.allows(Phase::Boot, Phase::Done));
        assert!(!graph.allows(Phase::Done, Phase::Boot));
    }

    #[test]
    fn terminal_state_has_no_successors() {
        let graph = lifecycle_graph();
        assert!(graph.is_terminal(Phase::Done));
        assert!(!graph.is_terminal(Phase::Boot));
    }

    #[test]
    fn build_rejects_missing_initial_state() {
        let err = StateGraph::builder(Phase::Boot)
            .transitions(Phase::Run, [])
            .build()
            .expect_err("err");
        assert_eq!(
            err,
            GraphError::MissingInitialState {
                state: "Boot".to_string()
            }
        );
    }

    #[test]
    fn build_rejects_unknown_edge_target() {
        let err = StateGraph::builder(Phase::Boot)
            .transitions(Phase::Boot, [Phase::Run])
            .build()
            .expect_err("err");
        assert_eq!(
            err,
            GraphError::UnknownTarget {
                from: "Boot".to_string(),
                to: "Run".to_string()
            }
        );
    }

    #[test]
    fn build_rejects_duplicate_state_declaration() {
        let err = StateGraph::builder(Phase::Boot)
            .transitions(Phase::Boot, [])
            .transitions(Phase::Boot, [])
            .build()
            .expect_err("err");
        assert_eq!(
            err,
            GraphError::DuplicateState {
                state: "Boot".to_string()
            }
        );
    }
}
