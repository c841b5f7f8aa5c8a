//! Response-shape normalization.
//!
//! Fetched payloads carry transport artifacts: `__typename` tags, and
//! connection objects `{items, nextToken}` wrapping every collection. The
//! normalizer strips those so results can be compared and patched as plain
//! entities and entity lists.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use sluice_core::schema::{Catalog, EntityType};
use sluice_core::{Entity, Error, Result, Value};

/// Transport tag stripped from every object.
pub const TYPENAME_FIELD: &str = "__typename";

const ITEMS_FIELD: &str = "items";
const NEXT_TOKEN_FIELD: &str = "nextToken";

/// Returns true if the entity is a connection object.
fn is_connection(entity: &Entity) -> bool {
    entity.contains_field(ITEMS_FIELD)
        && entity
            .keys()
            .all(|k| k == ITEMS_FIELD || k == NEXT_TOKEN_FIELD || k == TYPENAME_FIELD)
}

/// Normalizes a payload of the given entity type.
///
/// Connection fields are resolved through the catalog; a list connection
/// that came back null becomes an empty list.
pub fn normalize(payload: &Value, entity_type: Option<&EntityType>, catalog: &Catalog) -> Value {
    match payload {
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| normalize(item, entity_type, catalog))
                .collect(),
        ),
        Value::Entity(entity) if is_connection(entity) => {
            normalize(entity.field(ITEMS_FIELD), entity_type, catalog)
        }
        Value::Entity(entity) => {
            let mut out = Entity::with_capacity(entity.len());
            for (field, value) in entity.iter() {
                if field == TYPENAME_FIELD {
                    continue;
                }
                let connection = entity_type.and_then(|t| t.connection(field));
                let target = connection.and_then(|c| catalog.get(&c.target)).map(|t| &**t);
                let normalized = match (connection, value) {
                    (Some(c), Value::Null) if c.list => Value::List(Vec::new()),
                    _ => normalize(value, target, catalog),
                };
                out.insert(field, normalized);
            }
            Value::Entity(out)
        }
        scalar => scalar.clone(),
    }
}

/// Extracts the continuation token from a raw page.
pub fn next_token(page: &Value) -> Option<String> {
    page.as_entity()
        .filter(|e| is_connection(e))
        .and_then(|e| e.field(NEXT_TOKEN_FIELD).as_str())
        .map(String::from)
}

/// Maps a normalized payload into a collection of entities.
pub fn expect_list(payload: Value) -> Result<Vec<Entity>> {
    match payload {
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Entity(e) => Ok(e),
                other => Err(Error::ambiguous_shape(format!(
                    "expected an entity in the result list, got {:?}",
                    other
                ))),
            })
            .collect(),
        other => Err(Error::ambiguous_shape(format!(
            "expected multiple items in the response, got {:?}",
            other
        ))),
    }
}

/// Maps a normalized payload into at most one entity.
pub fn expect_item(payload: Value) -> Result<Option<Entity>> {
    match payload {
        Value::Null => Ok(None),
        Value::Entity(e) => Ok(Some(e)),
        other => Err(Error::ambiguous_shape(format!(
            "expected a single item in the response, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use sluice_core::schema::EntityTypeBuilder;
    use sluice_core::FieldType;

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

    fn page(items: Vec<Value>, token: Option<&str>) -> Value {
        Entity::new()
            .with("__typename", "ModelTodoConnection")
            .with("items", items)
            .with("nextToken", token)
            .into()
    }

    #[test]
    fn test_collapses_connections_and_strips_typename() {
        let catalog = catalog();
        let todo_type = catalog.get("Todo").map(|t| &**t);
        let comment = Entity::new().with("__typename", "Comment").with("id", "c1");
        let todo = Entity::new()
            .with("__typename", "Todo")
            .with("id", "t1")
            .with("comments", page(vec![comment.into()], None));
        let raw = page(vec![todo.into()], Some("tok"));

        let normalized = normalize(&raw, todo_type, &catalog);
        let items = expect_list(normalized).unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].contains_field("__typename"));
        let comments = items[0].field("comments").as_list().unwrap();
        assert_eq!(
            comments[0],
            Value::from(Entity::new().with("id", "c1"))
        );
        assert_eq!(next_token(&raw).as_deref(), Some("tok"));
    }

    #[test]
    fn test_null_list_connection_becomes_empty() {
        let catalog = catalog();
        let raw: Value = Entity::new().with("id", "t1").with("comments", Value::Null).into();
        let normalized = normalize(&raw, catalog.get("Todo").map(|t| &**t), &catalog);
        let item = expect_item(normalized).unwrap().unwrap();
        assert_eq!(item.field("comments"), &Value::List(vec![]));
    }

    #[test]
    fn test_plain_objects_are_kept() {
        let catalog = catalog();
        let raw: Value = Entity::new().with("items", 3).with("other", 1).into();
        let normalized = normalize(&raw, None, &catalog);
        assert_eq!(normalized.get("other"), Some(&Value::from(1)));
        assert_eq!(next_token(&raw), None);
    }

    #[test]
    fn test_shape_errors() {
        assert!(matches!(
            expect_list(Entity::new().with("id", "x").into()),
            Err(Error::AmbiguousResponseShape { .. })
        ));
        assert!(expect_list(Value::List(vec![Value::from(1)])).is_err());
        assert!(matches!(
            expect_item(Value::List(vec![])),
            Err(Error::AmbiguousResponseShape { .. })
        ));
        assert_eq!(expect_item(Value::Null).unwrap(), None);
    }
}
