//! Named queues - owner-scoped lookup table
//!
//! Lets calling code get back "the same" queue across repeated calls by
//! keying it on an owner and a name. The registry is an ordinary value held
//! by the caller; nothing here is global.

use crate::queue::Queue;
use crate::ticker::Ticker;
use log::{debug, trace};
use std::collections::HashMap;
use std::hash::Hash;

/// Queues keyed by owner, then by name.
pub struct QueueRegistry<O> {
    ticker: Ticker,
    owners: HashMap<O, HashMap<String, Queue>>,
}

impl<O: Hash + Eq> QueueRegistry<O> {
    /// Queues created through the registry are driven by `ticker`.
    pub fn new(ticker: &Ticker) -> Self {
        Self {
            ticker: ticker.clone(),
            owners: HashMap::new(),
        }
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// The queue named `name` for `owner`, created empty on first use.
    pub fn get_or_create(&mut self, owner: O, name: &str) -> Queue {
        let ticker = &self.ticker;
        self.owners
            .entry(owner)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| {
                trace!("registry creates queue '{}'", name);
                Queue::new(ticker)
            })
            .clone()
    }

    pub fn get(&self, owner: &O, name: &str) -> Option<Queue> {
        self.owners.get(owner).and_then(|queues| queues.get(name)).cloned()
    }

    /// Forget every queue of `owner`, stopping each. Returns how many were removed.
    pub fn remove_owner(&mut self, owner: &O) -> usize {
        let Some(queues) = self.owners.remove(owner) else {
            return 0;
        };
        for queue in queues.values() {
            queue.stop();
        }
        debug!("registry removed {} queue(s) of an owner", queues.len());
        queues.len()
    }

    /// Drop completed queues that nobody outside the registry still holds.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        for queues in self.owners.values_mut() {
            let before = queues.len();
            // One handle here, one in the ticker while it still tracks the queue
            queues.retain(|_, q| !(q.is_completed() && q.handle_count() <= 2));
            removed += before - queues.len();
        }
        self.owners.retain(|_, queues| !queues.is_empty());
        if removed > 0 {
            trace!("registry pruned {} queue(s)", removed);
        }
        removed
    }

    /// Total number of named queues.
    pub fn len(&self) -> usize {
        self.owners.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.values().all(HashMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_owner_and_name_same_queue() {
        let ticker = Ticker::new();
        let mut registry = QueueRegistry::new(&ticker);
        let a = registry.get_or_create(1u32, "fade");
        let b = registry.get_or_create(1u32, "fade");
        let c = registry.get_or_create(2u32, "fade");
        let d = registry.get_or_create(1u32, "move");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(!a.ptr_eq(&d));
        assert_eq!(registry.len(), 3);
        assert!(registry.get(&1, "fade").is_some());
        assert!(registry.get(&3, "fade").is_none());
    }

    #[test]
    fn test_remove_owner_stops_queues() {
        let ticker = Ticker::new();
        let mut registry = QueueRegistry::new(&ticker);
        let q = registry.get_or_create("player", "blink");
        q.add(1.0, || {});
        assert!(q.is_playing());
        assert_eq!(registry.remove_owner(&"player"), 1);
        assert!(!q.is_playing());
        assert!(registry.is_empty());
        assert_eq!(registry.remove_owner(&"player"), 0);
    }

    #[test]
    fn test_prune_drops_completed_unheld_queues() {
        let ticker = Ticker::new();
        let mut registry = QueueRegistry::new(&ticker);
        registry.get_or_create("a", "once").then(|| {});
        let held = registry.get_or_create("a", "held");
        held.then(|| {});
        ticker.step_frames(4).unwrap();

        assert_eq!(registry.prune(), 1);
        assert!(registry.get(&"a", "once").is_none());
        assert!(registry.get(&"a", "held").is_some());
    }
}
