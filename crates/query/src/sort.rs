//! Sort/limit evaluator.
//!
//! Orders a candidate set by a list of sort keys and truncates it to the
//! query limit. Reconciliation re-runs this over the whole set after every
//! insertion or removal instead of inserting in place.

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use sluice_core::Entity;

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Returns the wire name (`ASC` / `DESC`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    #[inline]
    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(field, direction)` pair of a sort specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.direction)
    }
}

/// Compares two entities by the sort keys. The first non-equal key wins.
///
/// Missing fields compare as null, which sorts before every other value.
pub fn compare(a: &Entity, b: &Entity, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = a.field(&key.field).cmp(b.field(&key.field));
        if ordering != Ordering::Equal {
            return key.direction.apply(ordering);
        }
    }
    Ordering::Equal
}

/// Sorts the items by the sort keys and keeps at most `limit` of them.
///
/// The sort is stable, so items equal under every key keep their order.
pub fn apply(mut items: Vec<Entity>, keys: &[SortKey], limit: usize) -> Vec<Entity> {
    if !keys.is_empty() {
        items.sort_by(|a, b| compare(a, b, keys));
    }
    items.truncate(limit);
    items
}

/// Returns true if the items are ordered according to the sort keys.
pub fn is_sorted(items: &[Entity], keys: &[SortKey]) -> bool {
    items
        .windows(2)
        .all(|w| compare(&w[0], &w[1], keys) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use sluice_core::Value;

    fn item(id: i64, rank: &str) -> Entity {
        Entity::new().with("id", id).with("rank", rank)
    }

    fn ids(items: &[Entity]) -> Vec<Value> {
        items.iter().map(|e| e.field("id").clone()).collect()
    }

    #[test]
    fn test_sort_asc() {
        let items = vec![item(1, "c"), item(2, "a"), item(3, "b")];
        let sorted = apply(items, &[SortKey::asc("rank")], 100);
        assert_eq!(ids(&sorted), vec![Value::from(2), Value::from(3), Value::from(1)]);
    }

    #[test]
    fn test_sort_desc() {
        let items = vec![item(1, "c"), item(2, "a"), item(3, "b")];
        let sorted = apply(items, &[SortKey::desc("rank")], 100);
        assert_eq!(ids(&sorted), vec![Value::from(1), Value::from(3), Value::from(2)]);
    }

    #[test]
    fn test_sort_multi_key() {
        let items = vec![item(3, "a"), item(1, "b"), item(2, "a")];
        let keys = [SortKey::asc("rank"), SortKey::desc("id")];
        let sorted = apply(items, &keys, 100);
        assert_eq!(ids(&sorted), vec![Value::from(3), Value::from(2), Value::from(1)]);
    }

    #[test]
    fn test_limit_truncates_after_sort() {
        let items = vec![item(1, "c"), item(2, "a"), item(3, "b")];
        let sorted = apply(items, &[SortKey::asc("rank")], 2);
        assert_eq!(ids(&sorted), vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn test_no_keys_keeps_order() {
        let items = vec![item(3, "a"), item(1, "b"), item(2, "c")];
        let result = apply(items, &[], 2);
        assert_eq!(ids(&result), vec![Value::from(3), Value::from(1)]);
    }

    #[test]
    fn test_missing_field_sorts_first() {
        let items = vec![item(1, "a"), Entity::new().with("id", 2)];
        let sorted = apply(items, &[SortKey::asc("rank")], 10);
        assert_eq!(ids(&sorted), vec![Value::from(2), Value::from(1)]);
        assert!(is_sorted(&sorted, &[SortKey::asc("rank")]));
    }

    #[test]
    fn test_direction_names() {
        assert_eq!(SortDirection::default(), SortDirection::Desc);
        assert_eq!(SortDirection::Asc.as_str(), "ASC");
        assert_eq!(alloc::format!("{}", SortKey::desc("rank")), "rank DESC");
    }
}
