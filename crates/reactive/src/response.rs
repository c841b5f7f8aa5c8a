//! Consumer-visible query results.

use alloc::string::String;
use alloc::vec::Vec;
use sluice_core::Entity;

/// Cached result of a registered query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryResult {
    /// Result of a single-item query.
    Item(Option<Entity>),
    /// Result of a list query.
    Items(Vec<Entity>),
}

impl QueryResult {
    /// The empty result for a list or single-item query.
    pub fn empty(list: bool) -> Self {
        if list {
            QueryResult::Items(Vec::new())
        } else {
            QueryResult::Item(None)
        }
    }

    pub fn item(&self) -> Option<&Entity> {
        match self {
            QueryResult::Item(item) => item.as_ref(),
            QueryResult::Items(_) => None,
        }
    }

    pub fn items(&self) -> &[Entity] {
        match self {
            QueryResult::Items(items) => items,
            QueryResult::Item(_) => &[],
        }
    }

    /// Number of entities held.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Item(item) => item.is_some() as usize,
            QueryResult::Items(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structural equivalence ignoring null fields.
    pub fn equivalent(&self, other: &QueryResult) -> bool {
        match (self, other) {
            (QueryResult::Item(None), QueryResult::Item(None)) => true,
            (QueryResult::Item(Some(a)), QueryResult::Item(Some(b))) => a.equivalent(b),
            (QueryResult::Items(a), QueryResult::Items(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equivalent(y))
            }
            _ => false,
        }
    }
}

/// What a consumer observes for a live query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    /// False until the initial fetch resolves.
    pub loaded: bool,
    pub result: QueryResult,
    /// Human-readable failure description.
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn item(&self) -> Option<&Entity> {
        self.result.item()
    }

    pub fn items(&self) -> &[Entity] {
        self.result.items()
    }
}
