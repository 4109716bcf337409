use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;

/// Marker for types usable as lifecycle state values: small copyable tags,
/// finite and fixed at configuration time.
pub trait StateValue: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> StateValue for T {}

/// Opaque one-shot payload delivered to `enter`, used to convey one-time
/// information such as "first gameplay entry after launch".
pub type StateContext = Box<dyn Any + Send + Sync>;

/// Per-state lifecycle hooks. One handler per state value, registered once
/// at machine construction and owned by the machine for the process
/// lifetime. Handler failures are reported to the logger inside the
/// handler, never across the transition boundary.
#[async_trait]
pub trait StateHandler<S: StateValue>: Send {
    fn state(&self) -> S;

    /// `previous` is `None` only for the machine's very first start; a
    /// genuine transition always carries the state being left.
    async fn enter(&mut self, previous: Option<S>, context: Option<&StateContext>);

    async fn exit(&mut self, next: S);
}
