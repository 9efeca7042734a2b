use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};

type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// Callbacks keyed by event kind and a caller-chosen id, fired in insertion order.
pub struct EventListeners<K, E> {
    slots: HashMap<K, Vec<(String, Callback<E>)>>,
}

impl<K, E> Default for EventListeners<K, E> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K, E> EventListeners<K, E>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adding an id that already exists for `kind` replaces its callback in place.
    pub fn add(
        &mut self,
        kind: K,
        id: impl Into<String>,
        callback: impl FnMut(&E) + Send + 'static,
    ) {
        let id = id.into();
        let listeners = self.slots.entry(kind).or_default();
        match listeners.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = Box::new(callback),
            None => listeners.push((id, Box::new(callback))),
        }
    }

    pub fn remove(&mut self, kind: K, id: &str) -> bool {
        let Some(listeners) = self.slots.get_mut(&kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| existing != id);
        before != listeners.len()
    }

    pub fn has(&self, kind: K) -> bool {
        self.slots.get(&kind).is_some_and(|listeners| !listeners.is_empty())
    }

    /// Fires every callback for `kind`. A panicking callback is logged and the
    /// rest still run. Returns the number of callbacks that completed.
    pub fn emit(&mut self, kind: K, event: &E) -> usize {
        let Some(listeners) = self.slots.get_mut(&kind) else {
            return 0;
        };
        let mut completed = 0;
        for (id, callback) in listeners.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => completed += 1,
                Err(_) => log::error!(target: "handle", "listener {id:?} for {kind:?} panicked"),
            }
        }
        completed
    }
}
