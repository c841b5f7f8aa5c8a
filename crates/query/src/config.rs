//! Query configurations and their derivation.
//!
//! A `QueryConfig` is what a consumer hands in: most settings optional.
//! `derive` resolves every default once, validates the configuration against
//! the catalog and produces the recursive `DerivedQueryConfig` tree that the
//! registry and the reconciler work on.

use crate::ast::{Comparison, Condition, FilterExpression};
use crate::eval;
use crate::sort::{self, SortDirection, SortKey};
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use sluice_core::schema::{Catalog, EntityType};
use sluice_core::{Entity, Error, Result, Value};

/// Default limit of list queries.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Default limit of single-item queries.
pub const DEFAULT_ITEM_LIMIT: usize = 1;

/// A query configuration as supplied by a consumer.
#[derive(Clone, Debug)]
pub struct QueryConfig {
    entity_type: String,
    list: bool,
    id: Option<Value>,
    limit: Option<usize>,
    sort_direction: Option<SortDirection>,
    sort: Vec<SortKey>,
    condition: Option<Condition>,
    disable_subscribe: bool,
    sub_keys: BTreeMap<String, QueryConfig>,
}

impl QueryConfig {
    fn new(entity_type: impl Into<String>, list: bool) -> Self {
        Self {
            entity_type: entity_type.into(),
            list,
            id: None,
            limit: None,
            sort_direction: None,
            sort: Vec::new(),
            condition: None,
            disable_subscribe: false,
            sub_keys: BTreeMap::new(),
        }
    }

    /// A collection query.
    pub fn list(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, true)
    }

    /// A single-item query. Root item queries also need `with_id`.
    pub fn item(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, false)
    }

    /// Selects the item by primary key.
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the direction used for the access path's own ordering.
    pub fn sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = Some(direction);
        self
    }

    /// Appends a client-side sort key.
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey::new(field, direction));
        self
    }

    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Turns off live updates for this query.
    pub fn disable_subscribe(mut self) -> Self {
        self.disable_subscribe = true;
        self
    }

    /// Adds a nested configuration for a connection field.
    pub fn sub_key(mut self, field: impl Into<String>, config: QueryConfig) -> Self {
        self.sub_keys.insert(field.into(), config);
        self
    }

    #[inline]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        self.list
    }
}

/// A query configuration with every default resolved.
#[derive(Clone, Debug)]
pub struct DerivedQueryConfig {
    entity_type: Rc<EntityType>,
    list: bool,
    id: Option<Value>,
    limit: usize,
    sort_direction: SortDirection,
    sort: Vec<SortKey>,
    condition: Condition,
    disable_subscribe: bool,
    sub_keys: Vec<(String, DerivedQueryConfig)>,
    all_entity_types: Vec<String>,
}

/// Derives and validates a root configuration.
pub fn derive(config: &QueryConfig, catalog: &Catalog) -> Result<DerivedQueryConfig> {
    derive_node(config, catalog, true)
}

fn derive_node(config: &QueryConfig, catalog: &Catalog, root: bool) -> Result<DerivedQueryConfig> {
    let entity_type = catalog.require(&config.entity_type)?;

    if config.limit == Some(0) {
        return Err(Error::invalid_config(format!(
            "Limit of a {} query must be positive",
            entity_type.name()
        )));
    }
    if config.id.is_some() && (config.list || !root) {
        return Err(Error::invalid_config(format!(
            "Only root single-item {} queries select by id",
            entity_type.name()
        )));
    }
    if root && !config.list && config.id.is_none() {
        return Err(Error::invalid_config(format!(
            "Single-item {} query requires an id",
            entity_type.name()
        )));
    }

    let condition = match (&config.condition, &config.id) {
        (Some(Condition::Dynamic(d)), _) if root => {
            return Err(Error::invalid_config(format!(
                "Parent-dependent condition {} used on a root query",
                d.label()
            )));
        }
        (Some(condition), _) => condition.clone(),
        (None, Some(id)) => Condition::Expr(FilterExpression::field(
            entity_type.primary_key(),
            Comparison::Eq(id.clone()),
        )),
        (None, None) => Condition::MatchAll,
    };
    if let Condition::Expr(expr) = &condition {
        eval::validate(expr, &entity_type)?;
    }

    for key in &config.sort {
        if entity_type.field_type(&key.field).is_none() {
            return Err(Error::unknown_field(entity_type.name(), key.field.as_str()));
        }
    }

    let mut sub_keys = Vec::with_capacity(config.sub_keys.len());
    let mut all_entity_types = alloc::vec![entity_type.name().to_string()];
    for (field, sub) in &config.sub_keys {
        let connection = entity_type
            .connection(field)
            .ok_or_else(|| Error::unknown_field(entity_type.name(), field.as_str()))?;
        if connection.target != sub.entity_type {
            return Err(Error::invalid_config(format!(
                "{}.{} references {}, not {}",
                entity_type.name(),
                field,
                connection.target,
                sub.entity_type
            )));
        }
        if connection.list != sub.list {
            return Err(Error::invalid_config(format!(
                "{}.{} cardinality does not match its nested configuration",
                entity_type.name(),
                field
            )));
        }
        let derived = derive_node(sub, catalog, false)?;
        for name in &derived.all_entity_types {
            if !all_entity_types.contains(name) {
                all_entity_types.push(name.clone());
            }
        }
        sub_keys.push((field.clone(), derived));
    }

    let limit = config.limit.unwrap_or(if config.list {
        DEFAULT_LIST_LIMIT
    } else {
        DEFAULT_ITEM_LIMIT
    });

    Ok(DerivedQueryConfig {
        entity_type,
        list: config.list,
        id: config.id.clone(),
        limit,
        sort_direction: config.sort_direction.unwrap_or_default(),
        sort: config.sort.clone(),
        condition,
        disable_subscribe: config.disable_subscribe,
        sub_keys,
        all_entity_types,
    })
}

impl DerivedQueryConfig {
    #[inline]
    pub fn entity_type(&self) -> &Rc<EntityType> {
        &self.entity_type
    }

    #[inline]
    pub fn entity_type_name(&self) -> &str {
        self.entity_type.name()
    }

    #[inline]
    pub fn primary_key(&self) -> &str {
        self.entity_type.primary_key()
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// The requested primary key of a root single-item query.
    #[inline]
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn sort_direction(&self) -> SortDirection {
        self.sort_direction
    }

    #[inline]
    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    #[inline]
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    #[inline]
    pub fn is_subscribe_disabled(&self) -> bool {
        self.disable_subscribe
    }

    /// Nested configurations, ordered by field name.
    #[inline]
    pub fn sub_keys(&self) -> &[(String, DerivedQueryConfig)] {
        &self.sub_keys
    }

    /// Every entity type reachable from this node, this node's type first.
    #[inline]
    pub fn all_entity_types(&self) -> &[String] {
        &self.all_entity_types
    }

    /// Whether changes are applied to this node at all.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.disable_subscribe && !self.condition.is_match_none()
    }

    /// Entity types that need open change channels.
    ///
    /// Only live nodes reached through live parents count.
    pub fn channel_entity_types(&self) -> Vec<Rc<EntityType>> {
        let mut out: Vec<Rc<EntityType>> = Vec::new();
        self.collect_channel_types(&mut out);
        out
    }

    fn collect_channel_types(&self, out: &mut Vec<Rc<EntityType>>) {
        if !self.is_live() {
            return;
        }
        if !out.iter().any(|t| t.name() == self.entity_type.name()) {
            out.push(self.entity_type.clone());
        }
        for (_, sub) in &self.sub_keys {
            sub.collect_channel_types(out);
        }
    }

    /// Filters and orders a freshly fetched list result.
    pub fn post_process(&self, items: Vec<Entity>) -> Vec<Entity> {
        let fetched = items.len();
        let items = match &self.condition {
            Condition::Expr(expr) => items
                .into_iter()
                .filter(|item| eval::matches(item, expr))
                .collect(),
            _ => items,
        };
        let items = sort::apply(items, &self.sort, self.limit);
        tracing::trace!(
            entity_type = self.entity_type.name(),
            fetched,
            kept = items.len(),
            "post-processed fetched items"
        );
        items
    }
}

impl fmt::Display for DerivedQueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}(limit: {}, direction: {}, sort: [",
            self.entity_type.name(),
            if self.list { "[]" } else { "" },
            self.limit,
            self.sort_direction
        )?;
        for (i, key) in self.sort.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", key)?;
        }
        write!(f, "], where: {}", self.condition)?;
        if self.disable_subscribe {
            f.write_str(", static")?;
        }
        f.write_str(")")?;
        if !self.sub_keys.is_empty() {
            f.write_str(" {")?;
            for (i, (field, sub)) in self.sub_keys.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, " {}: {}", field, sub)?;
            }
            f.write_str(" }")?;
        }
        Ok(())
    }
}
