//! Value and entity definitions for Sluice.
//!
//! An `Entity` is an opaque record: a set of named fields kept sorted by name.
//! Field values are scalars, lists, or nested entities (references resolved
//! by the query that fetched them). Entities carry no identity of their own;
//! they are compared by value and matched by primary key.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;

/// A value held by an entity field.
#[derive(Clone, Debug)]
pub enum Value {
    /// Null or absent value
    Null,
    /// Boolean value
    Bool(bool),
    /// Number (stored as f64)
    Number(f64),
    /// UTF-8 string
    String(String),
    /// List of values (scalar lists and nested collections)
    List(Vec<Value>),
    /// Nested entity
    Entity(Entity),
}

/// A record with fields sorted by name for O(log n) lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entity {
    fields: Vec<(String, Value)>,
}

impl Entity {
    /// Creates a new empty entity.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Creates an entity with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Returns the number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the entity has no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, field: &str) -> core::result::Result<usize, usize> {
        self.fields.binary_search_by(|(k, _)| k.as_str().cmp(field))
    }

    /// Gets a field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.position(field).ok().map(|idx| &self.fields[idx].1)
    }

    /// Gets a mutable field value by name.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        match self.position(field) {
            Ok(idx) => Some(&mut self.fields[idx].1),
            Err(_) => None,
        }
    }

    /// Returns the field value, treating missing fields as null.
    pub fn field(&self, field: &str) -> &Value {
        self.get(field).unwrap_or(&Value::Null)
    }

    /// Inserts or replaces a field, keeping fields sorted.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.position(&field) {
            Ok(idx) => self.fields[idx].1 = value,
            Err(idx) => self.fields.insert(idx, (field, value)),
        }
    }

    /// Removes a field and returns its value if present.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        match self.position(field) {
            Ok(idx) => Some(self.fields.remove(idx).1),
            Err(_) => None,
        }
    }

    /// Returns true if the entity has the given field.
    pub fn contains_field(&self, field: &str) -> bool {
        self.position(field).is_ok()
    }

    /// Returns an iterator over field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Returns an iterator over (name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if both entities carry the same non-null primary key.
    pub fn same_key(&self, other: &Entity, primary_key: &str) -> bool {
        match (self.get(primary_key), other.get(primary_key)) {
            (Some(a), Some(b)) => !a.is_null() && a == b,
            _ => false,
        }
    }

    /// Structural equivalence ignoring null fields.
    pub fn equivalent(&self, other: &Entity) -> bool {
        let mut left = self.fields.iter().filter(|(_, v)| !v.is_null());
        let mut right = other.fields.iter().filter(|(_, v)| !v.is_null());
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some((ka, va)), Some((kb, vb))) => {
                    if ka != kb || !va.equivalent(vb) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Entity
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entity = Entity::new();
        for (k, v) in iter {
            entity.insert(k, v);
        }
        entity
    }
}

impl Value {
    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean value if this is a Bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number value if this is a Number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns a reference to the string if this is a String.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the list if this is a List.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns a mutable list if this is a List.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entity if this is an Entity.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a mutable entity if this is an Entity.
    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Gets a field by name if this is an Entity.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_entity().and_then(|e| e.get(field))
    }

    /// Compares two scalars of the same kind.
    ///
    /// Returns None for nulls, lists, entities and mismatched kinds, so that
    /// ordering operators never match across types.
    pub fn compare_scalar(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Structural equivalence ignoring null fields of nested entities.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Entity(a), Value::Entity(b)) => a.equivalent(b),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equivalent(y))
            }
            _ => self == other,
        }
    }

    /// Returns a type ordering value for comparing different kinds.
    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::List(_) => 4,
            Value::Entity(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => {
                // NaN sorts after every other number
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
                }
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Entity(a), Value::Entity(b)) => a.cmp(b),
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        Value::Entity(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn todo(id: &str, rank: &str) -> Entity {
        Entity::new().with("id", id).with("rank", rank)
    }

    #[test]
    fn test_entity_sorted_fields() {
        let e = Entity::new().with("z", 1).with("a", 2).with("m", 3);
        let keys: Vec<&str> = e.keys().collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
        assert_eq!(e.get("m"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn test_entity_insert_replaces() {
        let mut e = todo("1", "a");
        e.insert("rank", "b");
        assert_eq!(e.len(), 2);
        assert_eq!(e.field("rank").as_str(), Some("b"));
        assert!(e.field("missing").is_null());
    }

    #[test]
    fn test_entity_remove() {
        let mut e = todo("1", "a");
        assert_eq!(e.remove("rank"), Some(Value::from("a")));
        assert_eq!(e.remove("rank"), None);
        assert!(!e.contains_field("rank"));
    }

    #[test]
    fn test_same_key() {
        let a = todo("1", "a");
        let b = todo("1", "z");
        let c = todo("2", "a");
        assert!(a.same_key(&b, "id"));
        assert!(!a.same_key(&c, "id"));
        assert!(!a.same_key(&b, "missing"));
    }

    #[test]
    fn test_equivalent_ignores_nulls() {
        let a = todo("1", "a").with("note", Value::Null);
        let b = todo("1", "a");
        assert!(a.equivalent(&b));
        assert!(b.equivalent(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_equivalent_nested() {
        let a = Value::List(vec![Value::Entity(
            todo("1", "a").with("owner", Entity::new().with("id", "u1").with("name", Value::Null)),
        )]);
        let b = Value::List(vec![Value::Entity(
            todo("1", "a").with("owner", Entity::new().with("id", "u1")),
        )]);
        assert!(a.equivalent(&b));

        let c = Value::List(vec![Value::Entity(todo("1", "b"))]);
        assert!(!a.equivalent(&c));
    }

    #[test]
    fn test_compare_scalar() {
        assert_eq!(Value::from(1).compare_scalar(&Value::from(2)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare_scalar(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from(1).compare_scalar(&Value::from("1")), None);
        assert_eq!(Value::Null.compare_scalar(&Value::Null), None);
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Null < Value::from(false));
        assert!(Value::from(1) < Value::from(2.5));
        assert!(Value::from(f64::NAN) > Value::from(1e300));
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert!(Value::from("a") < Value::from("b"));
    }

    #[test]
    fn test_value_from_impls() {
        let v: Value = Some("x").into();
        assert_eq!(v.as_str(), Some("x"));
        let v: Value = None::<i64>.into();
        assert!(v.is_null());
        let v: Value = 7i64.into();
        assert_eq!(v.as_f64(), Some(7.0));
    }

    #[test]
    fn test_entity_from_iter() {
        let e: Entity = vec![("id", Value::from("1")), ("done", Value::from(true))]
            .into_iter()
            .collect();
        assert_eq!(e.field("done").as_bool(), Some(true));
        assert_eq!(Value::from(e.clone()).get("id"), Some(&Value::from("1")));
    }
}
