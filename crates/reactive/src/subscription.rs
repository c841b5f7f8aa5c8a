//! Consumer subscriptions on registered queries.
//!
//! Every registered query keeps one `SubscriptionManager`. Callbacks are
//! handed out as `Rc` snapshots so the engine can invoke them after it has
//! released its own borrows; a callback is then free to subscribe, drop a
//! live query, or start another watch.

use crate::response::QueryResponse;
use alloc::rc::Rc;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked with the query's new response.
pub type ResponseCallback = Rc<dyn Fn(&QueryResponse)>;

/// Manages the subscriptions of one registered query.
pub struct SubscriptionManager {
    subscriptions: HashMap<SubscriptionId, ResponseCallback>,
    next_id: SubscriptionId,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes to response changes.
    ///
    /// Returns the subscription ID that can be used to unsubscribe.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&QueryResponse) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, Rc::new(callback));
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Returns the current callbacks in subscription order.
    pub fn callbacks(&self) -> Vec<ResponseCallback> {
        let mut entries: Vec<(&SubscriptionId, &ResponseCallback)> =
            self.subscriptions.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, cb)| cb.clone()).collect()
    }

    /// Invokes every callback with the given response.
    pub fn notify_all(&self, response: &QueryResponse) {
        for callback in self.callbacks() {
            callback(response);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
