//! The live-query engine session.
//!
//! `Engine` wires the registry, the channel manager and the reconciler to
//! the two external collaborators: a `QueryExecutor` that fetches initial
//! results and a `ChangeSource` that delivers change events.
//!
//! Every entry point (consumer calls, fetch completions, dispatched events)
//! appends work to one queue and pumps it. Work is processed in arrival
//! order, one item at a time, so a collaborator that answers synchronously
//! never re-enters a borrowed executor, source or registry.

use crate::channel::{ChangeSink, ChangeSource, ChannelManager, Demand, Dispatcher, Scope};
use crate::event::ChangeEvent;
use crate::live::LiveQuery;
use crate::reconciler::reconcile;
use crate::registry::{QueryRegistry, RegisteredQuery, Registration, Release};
use crate::response::{QueryResponse, QueryResult};
use crate::subscription::{ResponseCallback, SubscriptionId};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use sluice_core::schema::Catalog;
use sluice_core::{Entity, Error, Result, Value};
use sluice_query::config::{derive, DerivedQueryConfig, QueryConfig};
use sluice_query::document::build_request;
use sluice_query::{select_path, shape, AccessPath, QueryKey, QueryRequest};

/// External query executor.
///
/// `execute` may answer synchronously or keep the completion and answer
/// later; either way the answer is queued and processed in order.
pub trait QueryExecutor {
    fn execute(&mut self, request: QueryRequest, completion: Completion);
}

/// One-shot answer to a fetch handed to the executor.
pub struct Completion {
    shared: Weak<Shared>,
    key: QueryKey,
    generation: u64,
}

impl Completion {
    /// Key of the query the fetch belongs to.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Delivers the response data: an object keyed by the request's
    /// operation name.
    pub fn resolve(self, payload: Value) {
        self.finish(Ok(payload));
    }

    /// Reports that the fetch failed.
    pub fn reject(self, message: impl Into<String>) {
        self.finish(Err(message.into()));
    }

    fn finish(self, outcome: core::result::Result<Value, String>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.submit(Work::Completed {
                key: self.key,
                generation: self.generation,
                outcome,
            });
        }
    }
}

enum Work {
    Change(ChangeEvent),
    ChannelError(Error),
    Fetch {
        key: QueryKey,
        generation: u64,
        next_token: Option<String>,
    },
    Completed {
        key: QueryKey,
        generation: u64,
        outcome: core::result::Result<Value, String>,
    },
    Release {
        key: QueryKey,
        subscriptions: Vec<SubscriptionId>,
    },
    SyncChannels,
}

/// Responses to deliver once every borrow is released.
type Notifications = Vec<(QueryResponse, Vec<ResponseCallback>)>;

struct EngineState {
    registry: QueryRegistry,
    channels: ChannelManager,
    principal: Option<String>,
}

impl EngineState {
    /// Channels needed by the queries that still have consumers.
    fn demand(&self) -> Demand {
        let mut demand = Demand::new();
        for query in self.registry.live() {
            for entity_type in query.config().channel_entity_types() {
                if let Some(scope) = Scope::for_entity_type(&entity_type, self.principal.as_deref()) {
                    demand.add(&entity_type, scope);
                }
            }
        }
        demand
    }
}

/// State shared by the engine, live queries, completions and dispatchers.
pub(crate) struct Shared {
    catalog: Catalog,
    state: RefCell<EngineState>,
    executor: RefCell<Box<dyn QueryExecutor>>,
    source: RefCell<Box<dyn ChangeSource>>,
    queue: RefCell<VecDeque<Work>>,
    pumping: Cell<bool>,
    this: Weak<Shared>,
}

/// Clears the pumping flag when the pump loop exits.
struct PumpGuard<'a>(&'a Cell<bool>);

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

enum PageOutcome {
    More(String),
    Done(QueryResult),
}

impl Shared {
    fn submit(&self, work: Work) {
        self.queue.borrow_mut().push_back(work);
        self.pump();
    }

    fn enqueue(&self, work: Work) {
        self.queue.borrow_mut().push_back(work);
    }

    fn pump(&self) {
        if self.pumping.replace(true) {
            return;
        }
        let _guard = PumpGuard(&self.pumping);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(work) = next else {
                break;
            };
            match work {
                Work::Change(event) => self.apply_change(event),
                Work::ChannelError(error) => {
                    tracing::warn!(error = %error, "change channel error, cached results may be stale");
                }
                Work::Fetch {
                    key,
                    generation,
                    next_token,
                } => self.fetch(key, generation, next_token),
                Work::Completed {
                    key,
                    generation,
                    outcome,
                } => self.complete(key, generation, outcome),
                Work::Release { key, subscriptions } => self.release(&key, &subscriptions),
                Work::SyncChannels => self.sync_channels(),
            }
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        let sink: Weak<Shared> = self.this.clone();
        Dispatcher::new(sink)
    }

    fn notify(notifications: Notifications) {
        for (response, callbacks) in notifications {
            for callback in callbacks {
                callback(&response);
            }
        }
    }

    fn snapshot(entry: &RegisteredQuery) -> (QueryResponse, Vec<ResponseCallback>) {
        (entry.response.clone(), entry.subscriptions.callbacks())
    }

    /// Strips transport artifacts from an event payload, as fetched pages are.
    fn normalize_event(&self, mut event: ChangeEvent) -> ChangeEvent {
        let entity_type = self.catalog.get(&event.entity_type).map(|t| &**t);
        let payload = Value::Entity(core::mem::take(&mut event.payload));
        if let Value::Entity(normalized) = shape::normalize(&payload, entity_type, &self.catalog) {
            event.payload = normalized;
        }
        event
    }

    /// Routes one change event through every affected query.
    fn apply_change(&self, event: ChangeEvent) {
        let event = self.normalize_event(event);
        let mut notifications = Notifications::new();
        {
            let mut state = self.state.borrow_mut();
            state.registry.begin_pass();
            let candidates = state.registry.lookup_by_entity_type(&event.entity_type);
            tracing::trace!(
                entity_type = event.entity_type.as_str(),
                operation = event.operation.as_str(),
                candidates = candidates.len(),
                "routing change"
            );
            for key in candidates {
                let Some(entry) = state.registry.get_mut(&key) else {
                    continue;
                };
                if !entry.accepts_changes() {
                    tracing::trace!(query = %key, "query not loaded, change ignored");
                    continue;
                }
                let Some(next) = reconcile(entry.config(), &entry.response.result, &event) else {
                    continue;
                };
                if next.equivalent(&entry.response.result) {
                    tracing::trace!(query = %key, "suppressed equivalent result");
                    continue;
                }
                tracing::trace!(query = %key, items = next.len(), "patched cached result");
                entry.response.result = next;
                notifications.push(Self::snapshot(entry));
            }
        }

        // Consumers may release queries here; the pass is still open, so
        // those releases are deferred.
        Self::notify(notifications);

        let released = self.state.borrow_mut().registry.end_pass();
        if !released.is_empty() {
            self.enqueue(Work::SyncChannels);
        }
    }

    fn fetch(&self, key: QueryKey, generation: u64, next_token: Option<String>) {
        let request = {
            let state = self.state.borrow();
            let Some(entry) = state.registry.get(&key) else {
                return;
            };
            if entry.fetch.generation != generation || entry.is_pending_release() {
                return;
            }
            let principal = state.principal.as_deref();
            if entry.config().is_list()
                && entry.path().is_indexed()
                && entry.path().resolve_argument(principal).is_none()
            {
                tracing::debug!(query = %key, "no principal for owner path, fetch skipped");
                return;
            }
            build_request(entry.config(), entry.path(), principal, next_token.as_deref())
        };

        tracing::debug!(
            query = %key,
            operation = request.operation.as_str(),
            page = next_token.is_some(),
            "fetching"
        );
        let completion = Completion {
            shared: self.this.clone(),
            key,
            generation,
        };
        self.executor.borrow_mut().execute(request, completion);
    }

    fn complete(&self, key: QueryKey, generation: u64, outcome: core::result::Result<Value, String>) {
        let notifications = {
            let mut state = self.state.borrow_mut();
            let Some(entry) = state.registry.get_mut(&key) else {
                tracing::trace!(query = %key, "completion for released query dropped");
                return;
            };
            if entry.fetch.generation != generation {
                tracing::trace!(query = %key, "stale completion dropped");
                return;
            }

            let accepted = outcome
                .map_err(Error::fetch_failed)
                .and_then(|payload| self.accept_page(entry, payload));
            match accepted {
                Ok(PageOutcome::More(token)) => {
                    self.enqueue(Work::Fetch {
                        key,
                        generation,
                        next_token: Some(token),
                    });
                    return;
                }
                Ok(PageOutcome::Done(result)) => {
                    tracing::debug!(query = %key, items = result.len(), "initial result loaded");
                    entry.response = QueryResponse {
                        loaded: true,
                        result,
                        error: None,
                    };
                }
                Err(error) => {
                    tracing::warn!(query = %key, error = %error, "initial fetch failed");
                    entry.fetch.pages.clear();
                    entry.response = QueryResponse {
                        loaded: false,
                        result: QueryResult::empty(entry.config().is_list()),
                        error: Some(error.to_string()),
                    };
                }
            }
            vec![Self::snapshot(entry)]
        };
        Self::notify(notifications);
    }

    /// Maps one fetched page into the entry's accumulated result.
    fn accept_page(&self, entry: &mut RegisteredQuery, payload: Value) -> Result<PageOutcome> {
        let config: Rc<DerivedQueryConfig> = entry.config().clone();
        let entity_type = config.entity_type();
        let operation = if config.is_list() {
            entry.path().operation()
        } else {
            entity_type.get_operation()
        };
        let data = payload.get(operation).ok_or_else(|| {
            Error::ambiguous_shape(format!("response has no {} field", operation))
        })?;

        let normalized = shape::normalize(data, Some(entity_type.as_ref()), &self.catalog);
        if !config.is_list() {
            return Ok(PageOutcome::Done(QueryResult::Item(shape::expect_item(normalized)?)));
        }

        let token = shape::next_token(data);
        let items: Vec<Entity> = shape::expect_list(normalized)?;
        entry.fetch.pages.extend(items);
        match token {
            Some(token) => Ok(PageOutcome::More(token)),
            None => {
                let items = core::mem::take(&mut entry.fetch.pages);
                Ok(PageOutcome::Done(QueryResult::Items(config.post_process(items))))
            }
        }
    }

    fn sync_channels(&self) {
        let errors = {
            let mut state = self.state.borrow_mut();
            let demand = state.demand();
            let mut source = self.source.borrow_mut();
            state.channels.sync(&demand, &mut **source, &self.dispatcher())
        };
        let dispatcher = self.dispatcher();
        for error in errors {
            dispatcher.fail(error);
        }
    }

    /// Drops one consumer reference on a query.
    pub(crate) fn release(&self, key: &QueryKey, subscriptions: &[SubscriptionId]) {
        // Dropping a registry entry drops its callbacks, and with them any
        // live query they captured; that nested release is queued instead.
        let Ok(mut state) = self.state.try_borrow_mut() else {
            self.enqueue(Work::Release {
                key: key.clone(),
                subscriptions: subscriptions.to_vec(),
            });
            return;
        };
        if let Some(entry) = state.registry.get_mut(key) {
            for id in subscriptions {
                entry.subscriptions.unsubscribe(*id);
            }
        }
        match state.registry.release(key) {
            Release::Unregistered => tracing::debug!(query = %key, "released query"),
            Release::Deferred => {}
            Release::Retained => tracing::trace!(query = %key, "query still referenced"),
            Release::Unknown => return,
        }
        drop(state);
        self.submit(Work::SyncChannels);
    }

    pub(crate) fn response(&self, key: &QueryKey) -> Option<QueryResponse> {
        self.state
            .borrow()
            .registry
            .get(key)
            .map(|entry| entry.response.clone())
    }

    pub(crate) fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&QueryResponse) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let entry = state.registry.get_mut(key)?;
        Some(entry.subscriptions.subscribe(callback))
    }

    pub(crate) fn unsubscribe(&self, key: &QueryKey, id: SubscriptionId) -> bool {
        let mut state = self.state.borrow_mut();
        state
            .registry
            .get_mut(key)
            .is_some_and(|entry| entry.subscriptions.unsubscribe(id))
    }
}

impl ChangeSink for Shared {
    fn on_change(&self, event: ChangeEvent) {
        self.submit(Work::Change(event));
    }

    fn on_channel_error(&self, error: Error) {
        self.submit(Work::ChannelError(error));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.channels.close_all(&mut **self.source.get_mut());
    }
}

/// A live-query session over one catalog.
///
/// # Example
///
/// ```ignore
/// use sluice_query::QueryConfig;
/// use sluice_reactive::Engine;
///
/// let engine = Engine::new(catalog, executor, source)?;
/// engine.set_principal(Some("u1"));
///
/// let todos = engine.watch(&QueryConfig::list("Todo"))?;
/// todos.subscribe(|response| {
///     if response.loaded {
///         render(response.items());
///     }
/// });
/// ```
pub struct Engine {
    shared: Rc<Shared>,
}

impl Engine {
    /// Creates an engine over a validated catalog.
    pub fn new<E, S>(catalog: Catalog, executor: E, source: S) -> Result<Self>
    where
        E: QueryExecutor + 'static,
        S: ChangeSource + 'static,
    {
        catalog.validate()?;
        let shared = Rc::new_cyclic(|this| Shared {
            catalog,
            state: RefCell::new(EngineState {
                registry: QueryRegistry::new(),
                channels: ChannelManager::new(),
                principal: None,
            }),
            executor: RefCell::new(Box::new(executor)),
            source: RefCell::new(Box::new(source)),
            queue: RefCell::new(VecDeque::new()),
            pumping: Cell::new(false),
            this: this.clone(),
        });
        Ok(Self { shared })
    }

    /// Registers a query and returns a live handle on its result.
    ///
    /// A query with the same identity as an already registered one shares
    /// its cached result and is not fetched again.
    pub fn watch(&self, config: &QueryConfig) -> Result<LiveQuery> {
        let derived = derive(config, &self.shared.catalog)?;
        let path = if derived.is_list() {
            select_path(derived.entity_type(), derived.condition(), derived.sort_direction())
        } else {
            AccessPath::Scan {
                operation: derived.entity_type().get_operation().to_string(),
            }
        };
        let key = QueryKey::for_query(&derived, &path);
        let list = derived.is_list();

        let registration = self
            .shared
            .state
            .borrow_mut()
            .registry
            .register(key.clone(), Rc::new(derived), path);
        match registration {
            Registration::Created => {
                tracing::debug!(query = %key, "registered query");
                self.shared.enqueue(Work::Fetch {
                    key: key.clone(),
                    generation: 0,
                    next_token: None,
                });
            }
            Registration::Reused => tracing::debug!(query = %key, "reusing registered query"),
        }
        self.shared.enqueue(Work::SyncChannels);

        let live = LiveQuery::new(self.shared.clone(), key, list);
        self.shared.pump();
        Ok(live)
    }

    /// Changes the acting principal.
    ///
    /// Queries fetched through an owner path are reset and refetched, and
    /// change channels are re-scoped. Channels of other scopes are kept.
    pub fn set_principal(&self, principal: Option<&str>) {
        let notifications = {
            let mut state = self.shared.state.borrow_mut();
            if state.principal.as_deref() == principal {
                return;
            }
            tracing::debug!(
                from = state.principal.as_deref().unwrap_or("-"),
                to = principal.unwrap_or("-"),
                "principal changed"
            );
            state.principal = principal.map(String::from);

            let affected: Vec<QueryKey> = state
                .registry
                .live()
                .filter(|q| q.path().needs_principal())
                .map(|q| q.key().clone())
                .collect();
            let mut notifications = Notifications::new();
            for key in affected {
                let Some(entry) = state.registry.get_mut(&key) else {
                    continue;
                };
                let generation = entry.reset();
                notifications.push(Shared::snapshot(entry));
                if principal.is_some() {
                    self.shared.enqueue(Work::Fetch {
                        key,
                        generation,
                        next_token: None,
                    });
                }
            }
            notifications
        };
        self.shared.enqueue(Work::SyncChannels);
        Shared::notify(notifications);
        self.shared.pump();
    }

    /// Returns the acting principal.
    pub fn principal(&self) -> Option<String> {
        self.shared.state.borrow().principal.clone()
    }

    /// Applies a change event delivered outside the change source.
    pub fn on_change(&self, event: ChangeEvent) {
        self.shared.submit(Work::Change(event));
    }

    /// Returns a dispatcher delivering into this engine.
    pub fn dispatcher(&self) -> Dispatcher {
        self.shared.dispatcher()
    }

    #[inline]
    pub fn catalog(&self) -> &Catalog {
        &self.shared.catalog
    }

    /// Number of registered queries.
    pub fn registered_queries(&self) -> usize {
        self.shared.state.borrow().registry.len()
    }

    /// Open change channel handles as `(entity type, scope)` pairs.
    pub fn open_channels(&self) -> Vec<(String, Scope)> {
        self.shared.state.borrow().channels.open_channels()
    }

    /// Channel handles whose setup failed.
    pub fn unavailable_channels(&self) -> Vec<(String, Scope)> {
        self.shared.state.borrow().channels.unavailable_channels()
    }
}
