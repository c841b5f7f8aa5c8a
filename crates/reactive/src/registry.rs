//! Query registry.
//!
//! This module provides `QueryRegistry`, which tracks registered queries by
//! their `QueryKey` and indexes them by every entity type reachable through
//! their configuration tree, so a change event only visits the queries it
//! can affect.
//!
//! Releases requested while a reconciliation pass is running are deferred
//! until the pass ends: the entry is flagged, skipped by routing, and either
//! unregistered at `end_pass` or revived by a new registration.

use crate::response::{QueryResponse, QueryResult};
use crate::subscription::SubscriptionManager;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use sluice_core::Entity;
use sluice_query::config::DerivedQueryConfig;
use sluice_query::{AccessPath, QueryKey};

/// Outcome of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// A new entry was created; its initial result must be fetched.
    Created,
    /// An existing entry was reused.
    Reused,
}

/// Outcome of a release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Other handles still hold the query.
    Retained,
    /// The last handle was released and the query was removed.
    Unregistered,
    /// The last handle was released during a pass; removal waits for `end_pass`.
    Deferred,
    /// No such query.
    Unknown,
}

/// In-flight initial fetch of a registered query.
#[derive(Debug, Default)]
pub struct FetchState {
    /// Incremented whenever the query is refetched; stale completions are dropped.
    pub generation: u64,
    /// Items of the pages received so far.
    pub pages: Vec<Entity>,
}

/// A live, deduplicated query and its cached result.
pub struct RegisteredQuery {
    key: QueryKey,
    config: Rc<DerivedQueryConfig>,
    path: AccessPath,
    pub(crate) response: QueryResponse,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) fetch: FetchState,
    refs: usize,
    pending_release: bool,
}

impl RegisteredQuery {
    fn new(key: QueryKey, config: Rc<DerivedQueryConfig>, path: AccessPath) -> Self {
        let result = QueryResult::empty(config.is_list());
        Self {
            key,
            config,
            path,
            response: QueryResponse {
                loaded: false,
                result,
                error: None,
            },
            subscriptions: SubscriptionManager::new(),
            fetch: FetchState::default(),
            refs: 1,
            pending_release: false,
        }
    }

    #[inline]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    #[inline]
    pub fn config(&self) -> &Rc<DerivedQueryConfig> {
        &self.config
    }

    #[inline]
    pub fn path(&self) -> &AccessPath {
        &self.path
    }

    #[inline]
    pub fn response(&self) -> &QueryResponse {
        &self.response
    }

    /// Number of consumer handles holding the query.
    #[inline]
    pub fn refs(&self) -> usize {
        self.refs
    }

    #[inline]
    pub fn is_pending_release(&self) -> bool {
        self.pending_release
    }

    /// Returns true if change events should be applied to the cached result.
    pub fn accepts_changes(&self) -> bool {
        self.response.loaded && !self.pending_release
    }

    /// Clears the cached result and starts a new fetch generation.
    pub(crate) fn reset(&mut self) -> u64 {
        self.fetch.generation += 1;
        self.fetch.pages.clear();
        self.response = QueryResponse {
            loaded: false,
            result: QueryResult::empty(self.config.is_list()),
            error: None,
        };
        self.fetch.generation
    }
}

/// Tracks registered queries and routes entity types to them.
pub struct QueryRegistry {
    queries: HashMap<QueryKey, RegisteredQuery>,
    /// Entity type -> keys of the queries whose tree contains it.
    type_index: HashMap<String, Vec<QueryKey>>,
    pass_depth: usize,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            queries: HashMap::new(),
            type_index: HashMap::new(),
            pass_depth: 0,
        }
    }

    /// Registers a query, or takes another reference on an existing one.
    pub fn register(
        &mut self,
        key: QueryKey,
        config: Rc<DerivedQueryConfig>,
        path: AccessPath,
    ) -> Registration {
        if let Some(existing) = self.queries.get_mut(&key) {
            existing.refs += 1;
            if existing.pending_release {
                tracing::debug!(query = %key, "reviving query pending release");
                existing.pending_release = false;
            }
            return Registration::Reused;
        }

        for entity_type in config.all_entity_types() {
            self.type_index
                .entry(entity_type.clone())
                .or_default()
                .push(key.clone());
        }
        let entry = RegisteredQuery::new(key.clone(), config, path);
        self.queries.insert(key, entry);
        Registration::Created
    }

    /// Drops one reference on a query.
    pub fn release(&mut self, key: &QueryKey) -> Release {
        let Some(entry) = self.queries.get_mut(key) else {
            return Release::Unknown;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return Release::Retained;
        }
        if self.pass_depth > 0 {
            entry.pending_release = true;
            tracing::debug!(query = %key, "deferring release until the current pass ends");
            return Release::Deferred;
        }
        self.unregister(key);
        Release::Unregistered
    }

    fn unregister(&mut self, key: &QueryKey) {
        let Some(entry) = self.queries.remove(key) else {
            return;
        };
        for entity_type in entry.config.all_entity_types() {
            if let Some(keys) = self.type_index.get_mut(entity_type) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    self.type_index.remove(entity_type);
                }
            }
        }
        tracing::debug!(query = %key, "unregistered query");
    }

    /// Returns the keys of the queries that can be affected by a change of
    /// `entity_type`, in registration order. Entries pending release are left out.
    pub fn lookup_by_entity_type(&self, entity_type: &str) -> Vec<QueryKey> {
        self.type_index
            .get(entity_type)
            .map(|keys| {
                keys.iter()
                    .filter(|k| self.queries.get(*k).is_some_and(|q| !q.pending_release))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks the start of a reconciliation pass.
    pub fn begin_pass(&mut self) {
        self.pass_depth += 1;
    }

    /// Marks the end of a pass and removes the entries released during it.
    ///
    /// Returns the keys that were unregistered.
    pub fn end_pass(&mut self) -> Vec<QueryKey> {
        self.pass_depth = self.pass_depth.saturating_sub(1);
        if self.pass_depth > 0 {
            return Vec::new();
        }
        let released: Vec<QueryKey> = self
            .queries
            .values()
            .filter(|q| q.pending_release && q.refs == 0)
            .map(|q| q.key.clone())
            .collect();
        for key in &released {
            self.unregister(key);
        }
        released
    }

    #[inline]
    pub fn in_pass(&self) -> bool {
        self.pass_depth > 0
    }

    pub fn get(&self, key: &QueryKey) -> Option<&RegisteredQuery> {
        self.queries.get(key)
    }

    pub fn get_mut(&mut self, key: &QueryKey) -> Option<&mut RegisteredQuery> {
        self.queries.get_mut(key)
    }

    /// Iterates over every registered query, including entries pending release.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredQuery> {
        self.queries.values()
    }

    /// Iterates over the queries that still hold consumer references.
    pub fn live(&self) -> impl Iterator<Item = &RegisteredQuery> {
        self.queries.values().filter(|q| !q.pending_release)
    }

    /// Returns the number of registered queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Returns the number of queries indexed under an entity type.
    pub fn queries_for_entity_type(&self, entity_type: &str) -> usize {
        self.type_index.get(entity_type).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use sluice_core::schema::{Catalog, EntityTypeBuilder};
    use sluice_core::FieldType;
    use sluice_query::config::{derive, QueryConfig};
    use sluice_query::select_path;

    fn catalog() -> Catalog {
        let todo = EntityTypeBuilder::new("Todo")
            .unwrap()
            .add_field("id", FieldType::String)
            .unwrap()
            .primary_key("id")
            .unwrap()
            .add_connection("comments", "Comment", true)
            .unwrap()
            .build()
            .unwrap();
        let comment = EntityTypeBuilder::new("Comment")
            .unwrap()
            .add_field("id", FieldType::String)
            .unwrap()
            .primary_key("id")
            .unwrap()
            .build()
            .unwrap();
        Catalog::new().with(todo).unwrap().with(comment).unwrap()
    }

    fn query(config: QueryConfig) -> (QueryKey, Rc<DerivedQueryConfig>, AccessPath) {
        let derived = derive(&config, &catalog()).unwrap();
        let path = select_path(derived.entity_type(), derived.condition(), derived.sort_direction());
        let key = QueryKey::for_query(&derived, &path);
        (key, Rc::new(derived), path)
    }

    fn todos() -> (QueryKey, Rc<DerivedQueryConfig>, AccessPath) {
        query(QueryConfig::list("Todo").sub_key("comments", QueryConfig::list("Comment")))
    }

    #[test]
    fn test_register_indexes_every_entity_type() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = todos();
        assert_eq!(registry.register(key.clone(), config, path), Registration::Created);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup_by_entity_type("Todo"), vec![key.clone()]);
        assert_eq!(registry.lookup_by_entity_type("Comment"), vec![key]);
        assert!(registry.lookup_by_entity_type("User").is_empty());
    }

    #[test]
    fn test_reregistration_is_reference_counted() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = todos();
        registry.register(key.clone(), config.clone(), path.clone());
        assert_eq!(registry.register(key.clone(), config, path), Registration::Reused);
        assert_eq!(registry.get(&key).unwrap().refs(), 2);
        assert_eq!(registry.queries_for_entity_type("Todo"), 1);

        assert_eq!(registry.release(&key), Release::Retained);
        assert_eq!(registry.release(&key), Release::Unregistered);
        assert!(registry.is_empty());
        assert_eq!(registry.queries_for_entity_type("Comment"), 0);
        assert_eq!(registry.release(&key), Release::Unknown);
    }

    #[test]
    fn test_release_during_pass_is_deferred() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = todos();
        registry.register(key.clone(), config, path);

        registry.begin_pass();
        assert_eq!(registry.release(&key), Release::Deferred);
        assert!(registry.get(&key).unwrap().is_pending_release());
        assert!(registry.lookup_by_entity_type("Todo").is_empty());
        assert_eq!(registry.end_pass(), vec![key.clone()]);
        assert!(registry.get(&key).is_none());
    }

    #[test]
    fn test_reregistration_revives_pending_entry() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = todos();
        registry.register(key.clone(), config.clone(), path.clone());

        registry.begin_pass();
        registry.release(&key);
        assert_eq!(registry.register(key.clone(), config, path), Registration::Reused);
        assert!(registry.end_pass().is_empty());
        assert!(!registry.get(&key).unwrap().is_pending_release());
        assert_eq!(registry.lookup_by_entity_type("Todo"), vec![key]);
    }

    #[test]
    fn test_nested_passes_defer_until_outermost_ends() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = query(QueryConfig::list("Comment"));
        registry.register(key.clone(), config, path);

        registry.begin_pass();
        registry.begin_pass();
        registry.release(&key);
        assert!(registry.end_pass().is_empty());
        assert!(registry.in_pass());
        assert_eq!(registry.end_pass(), vec![key]);
        assert!(!registry.in_pass());
    }

    #[test]
    fn test_reset_starts_new_generation() {
        let mut registry = QueryRegistry::new();
        let (key, config, path) = todos();
        registry.register(key.clone(), config, path);
        let entry = registry.get_mut(&key).unwrap();
        entry.response.loaded = true;
        assert!(entry.accepts_changes());
        assert_eq!(entry.reset(), 1);
        assert!(!entry.accepts_changes());
        assert_eq!(entry.response().result, QueryResult::Items(Vec::new()));
    }
}
