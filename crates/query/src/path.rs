//! Query-path selection.
//!
//! Chooses the access path a list query is fetched through. Selection walks
//! the entity type's access paths in declaration order:
//!
//! - a path whose partition attribute is bound by the query's single
//!   equality predicate wins and stays chosen
//! - otherwise the first owner-partitioned path is kept as a fallback, and
//!   a later exact match still replaces it
//! - with neither, the query scans the whole collection
//!
//! The result only depends on the condition and the declared paths, so the
//! query identity built from it is stable.

use crate::ast::Condition;
use crate::sort::SortDirection;
use alloc::string::{String, ToString};
use sluice_core::schema::{AccessPathDef, EntityType};
use sluice_core::Value;

/// Value bound to an access path's partition attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum PathArgument {
    /// The acting principal, known only at fetch time.
    Principal,
    /// A literal taken from the query's equality predicate.
    Value(Value),
}

/// The route a list query is fetched through.
#[derive(Clone, Debug, PartialEq)]
pub enum AccessPath {
    /// Unindexed scan of the whole collection.
    Scan { operation: String },
    /// Lookup through a secondary access path.
    Index {
        operation: String,
        partition_attribute: String,
        argument: PathArgument,
        /// Ask the path for descending order.
        descending: bool,
    },
}

impl AccessPath {
    /// Returns the operation name used to fetch through this path.
    pub fn operation(&self) -> &str {
        match self {
            AccessPath::Scan { operation } | AccessPath::Index { operation, .. } => operation,
        }
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        matches!(self, AccessPath::Index { .. })
    }

    /// Returns true if the path argument is the acting principal.
    pub fn needs_principal(&self) -> bool {
        matches!(
            self,
            AccessPath::Index {
                argument: PathArgument::Principal,
                ..
            }
        )
    }

    /// Resolves the partition argument.
    ///
    /// Returns `None` for an owner path without a principal; such a query
    /// cannot be fetched yet.
    pub fn resolve_argument(&self, principal: Option<&str>) -> Option<Value> {
        match self {
            AccessPath::Scan { .. } => None,
            AccessPath::Index { argument, .. } => match argument {
                PathArgument::Principal => principal.map(Value::from),
                PathArgument::Value(v) => Some(v.clone()),
            },
        }
    }
}

/// Returns the equality operand if the condition binds exactly the
/// partition attribute of `path`.
fn equality_binding<'a>(condition: &'a Condition, path: &AccessPathDef) -> Option<&'a Value> {
    let (field, comparison) = condition.as_expr()?.single_field()?;
    if field != path.partition_attribute() {
        return None;
    }
    comparison.equality_operand()
}

/// Selects the access path for a list query.
pub fn select_path(
    entity_type: &EntityType,
    condition: &Condition,
    direction: SortDirection,
) -> AccessPath {
    let mut chosen: Option<&AccessPathDef> = None;
    for path in entity_type.access_paths() {
        if let Some(current) = chosen {
            if !current.is_owner_scoped() {
                break;
            }
        }
        if equality_binding(condition, path).is_some() {
            chosen = Some(path);
            continue;
        }
        if chosen.is_none() && path.is_owner_scoped() {
            chosen = Some(path);
        }
    }

    match chosen {
        None => AccessPath::Scan {
            operation: entity_type.list_operation().to_string(),
        },
        Some(path) => {
            let argument = if path.is_owner_scoped() {
                PathArgument::Principal
            } else {
                match equality_binding(condition, path) {
                    Some(v) => PathArgument::Value(v.clone()),
                    None => PathArgument::Principal,
                }
            };
            AccessPath::Index {
                operation: path.name().to_string(),
                partition_attribute: path.partition_attribute().to_string(),
                argument,
                descending: path.is_sorted() && direction == SortDirection::Desc,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Comparison, FilterExpression};
    use alloc::vec;
    use sluice_core::schema::EntityTypeBuilder;
    use sluice_core::FieldType;

    fn todo_type(paths: &[(&str, &str, &[&str])]) -> EntityType {
        let mut builder = EntityTypeBuilder::new("Todo")
            .unwrap()
            .add_field("id", FieldType::String)
            .unwrap()
            .add_field("owner", FieldType::String)
            .unwrap()
            .add_field("listId", FieldType::String)
            .unwrap()
            .add_field("rank", FieldType::String)
            .unwrap()
            .primary_key("id")
            .unwrap();
        for (name, partition, sort) in paths {
            builder = builder.add_access_path(*name, partition, sort).unwrap();
        }
        builder.build().unwrap()
    }

    fn by_list(id: &str) -> Condition {
        FilterExpression::field("listId", Comparison::eq(id)).into()
    }

    #[test]
    fn test_no_paths_scans() {
        let ty = todo_type(&[]);
        let path = select_path(&ty, &by_list("l1"), SortDirection::Desc);
        assert_eq!(
            path,
            AccessPath::Scan {
                operation: "listTodos".into()
            }
        );
        assert!(!path.is_indexed());
        assert_eq!(path.resolve_argument(Some("u1")), None);
    }

    #[test]
    fn test_exact_match_beats_owner_fallback() {
        let ty = todo_type(&[
            ("todosByOwner", "owner", &["rank"]),
            ("todosByList", "listId", &["rank"]),
        ]);
        let path = select_path(&ty, &by_list("l1"), SortDirection::Asc);
        assert_eq!(path.operation(), "todosByList");
        assert_eq!(path.resolve_argument(None), Some(Value::from("l1")));
        assert!(!path.needs_principal());
    }

    #[test]
    fn test_owner_fallback() {
        let ty = todo_type(&[
            ("todosByList", "listId", &[]),
            ("todosByOwner", "owner", &["rank"]),
        ]);
        let path = select_path(&ty, &Condition::MatchAll, SortDirection::Desc);
        assert_eq!(path.operation(), "todosByOwner");
        assert!(path.needs_principal());
        assert_eq!(path.resolve_argument(Some("u1")), Some(Value::from("u1")));
        assert_eq!(path.resolve_argument(None), None);
    }

    #[test]
    fn test_first_exact_match_wins() {
        let ty = todo_type(&[
            ("todosByList", "listId", &[]),
            ("todosByListRanked", "listId", &["rank"]),
        ]);
        let path = select_path(&ty, &by_list("l1"), SortDirection::Desc);
        assert_eq!(path.operation(), "todosByList");
    }

    #[test]
    fn test_only_single_equality_binds() {
        let ty = todo_type(&[("todosByList", "listId", &[])]);
        let ranged: Condition = FilterExpression::field("listId", Comparison::begins_with("l")).into();
        assert!(!select_path(&ty, &ranged, SortDirection::Desc).is_indexed());

        let two_fields: Condition = FilterExpression::field("listId", Comparison::eq("l1"))
            .and_field("rank", Comparison::eq("a"))
            .into();
        assert!(!select_path(&ty, &two_fields, SortDirection::Desc).is_indexed());

        let grouped: Condition =
            FilterExpression::and(vec![FilterExpression::field("listId", Comparison::eq("l1"))]).into();
        assert!(!select_path(&ty, &grouped, SortDirection::Desc).is_indexed());
    }

    #[test]
    fn test_descending_only_on_sorted_paths() {
        let ty = todo_type(&[("todosByList", "listId", &[]), ("todosByOwner", "owner", &["rank"])]);
        match select_path(&ty, &by_list("l1"), SortDirection::Desc) {
            AccessPath::Index { descending, .. } => assert!(!descending),
            other => panic!("unexpected path {:?}", other),
        }
        match select_path(&ty, &Condition::MatchAll, SortDirection::Desc) {
            AccessPath::Index { descending, .. } => assert!(descending),
            other => panic!("unexpected path {:?}", other),
        }
        match select_path(&ty, &Condition::MatchAll, SortDirection::Asc) {
            AccessPath::Index { descending, .. } => assert!(!descending),
            other => panic!("unexpected path {:?}", other),
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let ty = todo_type(&[("todosByOwner", "owner", &["rank"]), ("todosByList", "listId", &[])]);
        let first = select_path(&ty, &by_list("l9"), SortDirection::Desc);
        for _ in 0..10 {
            assert_eq!(select_path(&ty, &by_list("l9"), SortDirection::Desc), first);
        }
    }
}
