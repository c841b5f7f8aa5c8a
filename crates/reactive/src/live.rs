//! Consumer handle on a registered query.

use crate::engine::Shared;
use crate::response::{QueryResponse, QueryResult};
use crate::subscription::SubscriptionId;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use sluice_core::Entity;
use sluice_query::QueryKey;

/// A consumer's handle on a live query.
///
/// The handle holds one reference on the registered query. Dropping it
/// removes the callbacks subscribed through it and releases the reference;
/// the last release unregisters the query and closes the change channels
/// nothing else needs.
pub struct LiveQuery {
    shared: Rc<Shared>,
    key: QueryKey,
    list: bool,
    subscriptions: RefCell<Vec<SubscriptionId>>,
}

impl LiveQuery {
    pub(crate) fn new(shared: Rc<Shared>, key: QueryKey, list: bool) -> Self {
        Self {
            shared,
            key,
            list,
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    /// Identity of the registered query.
    #[inline]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Returns the current response.
    pub fn response(&self) -> QueryResponse {
        self.shared
            .response(&self.key)
            .unwrap_or_else(|| QueryResponse {
                loaded: false,
                result: QueryResult::empty(self.list),
                error: None,
            })
    }

    pub fn is_loaded(&self) -> bool {
        self.response().loaded
    }

    /// Returns the cached items of a list query.
    pub fn items(&self) -> Vec<Entity> {
        self.response().items().to_vec()
    }

    /// Returns the cached item of a single-item query.
    pub fn item(&self) -> Option<Entity> {
        self.response().item().cloned()
    }

    /// Subscribes to response changes.
    ///
    /// The callback runs whenever the cached result, the loaded flag or the
    /// error changes. It is not invoked with the current response.
    ///
    /// Callbacks are owned by the engine. A callback that owns the handle it
    /// was subscribed through keeps the handle alive, so the query is never
    /// released; capture a `Weak` reference to the handle instead.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&QueryResponse) + 'static,
    {
        match self.shared.subscribe(&self.key, callback) {
            Some(id) => {
                self.subscriptions.borrow_mut().push(id);
                id
            }
            None => 0,
        }
    }

    /// Removes a subscription made through this handle.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let Some(pos) = subscriptions.iter().position(|s| *s == id) else {
            return false;
        };
        subscriptions.swap_remove(pos);
        drop(subscriptions);
        self.shared.unsubscribe(&self.key, id)
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        let subscriptions = core::mem::take(self.subscriptions.get_mut());
        self.shared.release(&self.key, &subscriptions);
    }
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("key", &self.key)
            .field("list", &self.list)
            .finish()
    }
}
