//! Cache reconciliation.
//!
//! Patches a registered query's cached result with one change event. The
//! walk follows the derived configuration tree: a node of the event's
//! entity type decides membership with its condition, any other node
//! descends into the nested collections of its current items. A changed
//! nested collection marks every enclosing level as changed.
//!
//! Only `create` and `delete` move entities in or out of a result. Updates
//! of entities already present are expected to be reflected by whoever owns
//! the entity data, so they are not evaluated here.

use crate::event::{ChangeEvent, ChangeOperation};
use crate::response::QueryResult;
use alloc::vec::Vec;
use sluice_core::{Entity, Value};
use sluice_query::config::DerivedQueryConfig;
use sluice_query::eval::condition_matches;
use sluice_query::sort;

/// Applies a change event to a cached result.
///
/// Returns the patched result, or `None` when the event does not touch it.
pub fn reconcile(
    config: &DerivedQueryConfig,
    current: &QueryResult,
    event: &ChangeEvent,
) -> Option<QueryResult> {
    if !event.operation.affects_membership() {
        return None;
    }
    match current {
        QueryResult::Items(items) => {
            reconcile_items(config, items, event, None).map(QueryResult::Items)
        }
        QueryResult::Item(item) => {
            reconcile_item(config, item.as_ref(), event, None).map(QueryResult::Item)
        }
    }
}

/// Returns true if the node or one of its descendants holds the event's type.
#[inline]
fn is_relevant(config: &DerivedQueryConfig, event: &ChangeEvent) -> bool {
    config.is_live()
        && config
            .all_entity_types()
            .iter()
            .any(|name| *name == event.entity_type)
}

/// Returns true if the event's entity belongs to this node's result.
fn is_member(config: &DerivedQueryConfig, event: &ChangeEvent, parent: Option<&Entity>) -> bool {
    config.entity_type_name() == event.entity_type
        && condition_matches(&event.payload, config.condition(), parent)
}

fn reconcile_items(
    config: &DerivedQueryConfig,
    items: &[Entity],
    event: &ChangeEvent,
    parent: Option<&Entity>,
) -> Option<Vec<Entity>> {
    if !is_relevant(config, event) {
        return None;
    }

    if is_member(config, event, parent) {
        let primary_key = config.primary_key();
        let mut next: Vec<Entity> = items
            .iter()
            .filter(|item| !item.same_key(&event.payload, primary_key))
            .cloned()
            .collect();
        if event.operation == ChangeOperation::Create {
            next.push(event.payload.clone());
        }
        tracing::trace!(
            entity_type = config.entity_type_name(),
            operation = event.operation.as_str(),
            before = items.len(),
            "applying change to list"
        );
        return Some(sort::apply(next, config.sort(), config.limit()));
    }

    let mut changed: Option<Vec<Entity>> = None;
    for (i, item) in items.iter().enumerate() {
        if let Some(patched) = reconcile_nested(config, item, event) {
            changed.get_or_insert_with(|| items.to_vec())[i] = patched;
        }
    }
    changed
}

fn reconcile_item(
    config: &DerivedQueryConfig,
    item: Option<&Entity>,
    event: &ChangeEvent,
    parent: Option<&Entity>,
) -> Option<Option<Entity>> {
    if !is_relevant(config, event) {
        return None;
    }

    if is_member(config, event, parent) {
        tracing::trace!(
            entity_type = config.entity_type_name(),
            operation = event.operation.as_str(),
            "applying change to item"
        );
        return match event.operation {
            ChangeOperation::Create => Some(Some(event.payload.clone())),
            ChangeOperation::Delete => item.map(|_| None),
            ChangeOperation::Update => None,
        };
    }

    let current = item?;
    reconcile_nested(config, current, event).map(Some)
}

/// Reconciles the nested collections of one entity.
fn reconcile_nested(config: &DerivedQueryConfig, entity: &Entity, event: &ChangeEvent) -> Option<Entity> {
    let mut patched: Option<Entity> = None;
    for (field, sub) in config.sub_keys() {
        let current = entity.field(field);
        if current.is_null() {
            continue;
        }
        if let Some(value) = reconcile_value(sub, current, event, entity) {
            patched
                .get_or_insert_with(|| entity.clone())
                .insert(field.as_str(), value);
        }
    }
    patched
}

fn reconcile_value(
    config: &DerivedQueryConfig,
    current: &Value,
    event: &ChangeEvent,
    parent: &Entity,
) -> Option<Value> {
    if config.is_list() {
        let items: Vec<Entity> = current
            .as_list()?
            .iter()
            .filter_map(|v| v.as_entity().cloned())
            .collect();
        reconcile_items(config, &items, event, Some(parent))
            .map(|items| Value::List(items.into_iter().map(Value::Entity).collect()))
    } else {
        reconcile_item(config, current.as_entity(), event, Some(parent))
            .map(|item| item.map(Value::Entity).unwrap_or(Value::Null))
    }
}
