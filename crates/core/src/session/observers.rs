use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type Slots<E> = Mutex<Vec<(u64, Callback<E>)>>;

/// Scoped observer registration: dropping the handle unsubscribes. Call
/// [`Subscription::detach`] for a subscription that must outlive its
/// handle.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

pub(crate) struct ObserverSet<E> {
    slots: Arc<Slots<E>>,
    next_id: AtomicU64,
}

impl<E> Default for ObserverSet<E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E: 'static> ObserverSet<E> {
    pub(crate) fn observe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let slots: Weak<Slots<E>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(slot_id, _)| *slot_id != id);
            }
        })
    }

    /// Callbacks run outside the registry lock, so an observer may call
    /// back into the owning aggregate.
    pub(crate) fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_reaches_every_observer() {
        let set = ObserverSet::<u32>::default();
        let (first_count, first) = counter();
        let (second_count, second) = counter();
        let _first = set.observe(first);
        let _second = set.observe(second);

        set.emit(&1);
        set.emit(&2);

        assert_eq!(first_count.load(Ordering::SeqCst), 2);
        assert_eq!(second_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let set = ObserverSet::<u32>::default();
        let (count, callback) = counter();
        let subscription = set.observe(callback);

        set.emit(&1);
        drop(subscription);
        set.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_subscription_outlives_its_handle() {
        let set = ObserverSet::<u32>::default();
        let (count, callback) = counter();
        set.observe(callback).detach();

        set.emit(&1);
        set.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_may_reenter_the_set_during_emit() {
        let set = Arc::new(ObserverSet::<u32>::default());
        let reentrant = Arc::clone(&set);
        let _subscription = set.observe(move |_| {
            // Registering from inside a callback must not deadlock.
            reentrant.observe(|_| {}).detach();
        });

        set.emit(&1);
    }
}
