//! Filter expression definitions.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use sluice_core::{Entity, Value};

/// Comparison operator applied to one field, with its operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Ne(Value),
    Le(Value),
    Lt(Value),
    Ge(Value),
    Gt(Value),
    /// Inclusive range `[low, high]`.
    Between(Value, Value),
    BeginsWith(String),
    /// Substring match on strings, membership on lists.
    Contains(Value),
    NotContains(Value),
}

impl Comparison {
    pub fn eq(value: impl Into<Value>) -> Self {
        Comparison::Eq(value.into())
    }

    pub fn ne(value: impl Into<Value>) -> Self {
        Comparison::Ne(value.into())
    }

    pub fn le(value: impl Into<Value>) -> Self {
        Comparison::Le(value.into())
    }

    pub fn lt(value: impl Into<Value>) -> Self {
        Comparison::Lt(value.into())
    }

    pub fn ge(value: impl Into<Value>) -> Self {
        Comparison::Ge(value.into())
    }

    pub fn gt(value: impl Into<Value>) -> Self {
        Comparison::Gt(value.into())
    }

    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Comparison::Between(low.into(), high.into())
    }

    pub fn begins_with(prefix: impl Into<String>) -> Self {
        Comparison::BeginsWith(prefix.into())
    }

    pub fn contains(value: impl Into<Value>) -> Self {
        Comparison::Contains(value.into())
    }

    pub fn not_contains(value: impl Into<Value>) -> Self {
        Comparison::NotContains(value.into())
    }

    /// Returns the operator name.
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq(_) => "eq",
            Comparison::Ne(_) => "ne",
            Comparison::Le(_) => "le",
            Comparison::Lt(_) => "lt",
            Comparison::Ge(_) => "ge",
            Comparison::Gt(_) => "gt",
            Comparison::Between(..) => "between",
            Comparison::BeginsWith(_) => "beginsWith",
            Comparison::Contains(_) => "contains",
            Comparison::NotContains(_) => "notContains",
        }
    }

    /// Returns the equality operand, if this is an `eq` comparison.
    pub fn equality_operand(&self) -> Option<&Value> {
        match self {
            Comparison::Eq(v) => Some(v),
            _ => None,
        }
    }
}

/// Logical combinator of a predicate group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    And,
    Or,
    /// Negates the conjunction of its children.
    Not,
}

impl GroupKind {
    pub fn name(&self) -> &'static str {
        match self {
            GroupKind::And => "and",
            GroupKind::Or => "or",
            GroupKind::Not => "not",
        }
    }
}

/// A field-predicate set: field name -> comparison, implicitly AND-ed.
///
/// Kept in a `BTreeMap` so its rendering is stable.
pub type FieldPredicateSet = BTreeMap<String, Comparison>;

/// A filter expression: a field-predicate set or a logical group.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpression {
    Fields(FieldPredicateSet),
    Group {
        kind: GroupKind,
        predicates: Vec<FilterExpression>,
    },
}

impl FilterExpression {
    /// Creates a single-field predicate set.
    pub fn field(name: impl Into<String>, comparison: Comparison) -> Self {
        let mut set = FieldPredicateSet::new();
        set.insert(name.into(), comparison);
        FilterExpression::Fields(set)
    }

    /// Adds another field predicate. Turns a group into `and(group, field)`.
    pub fn and_field(self, name: impl Into<String>, comparison: Comparison) -> Self {
        match self {
            FilterExpression::Fields(mut set) => {
                set.insert(name.into(), comparison);
                FilterExpression::Fields(set)
            }
            group => FilterExpression::and(alloc::vec![group, Self::field(name, comparison)]),
        }
    }

    pub fn and(predicates: Vec<FilterExpression>) -> Self {
        FilterExpression::Group {
            kind: GroupKind::And,
            predicates,
        }
    }

    pub fn or(predicates: Vec<FilterExpression>) -> Self {
        FilterExpression::Group {
            kind: GroupKind::Or,
            predicates,
        }
    }

    pub fn not(predicates: Vec<FilterExpression>) -> Self {
        FilterExpression::Group {
            kind: GroupKind::Not,
            predicates,
        }
    }

    /// Returns the single `(field, comparison)` pair if this is a one-field set.
    pub fn single_field(&self) -> Option<(&str, &Comparison)> {
        match self {
            FilterExpression::Fields(set) if set.len() == 1 => {
                set.iter().next().map(|(k, v)| (k.as_str(), v))
            }
            _ => None,
        }
    }

    /// Visits every field predicate in the expression tree.
    pub fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a str, &'a Comparison)) {
        match self {
            FilterExpression::Fields(set) => {
                for (field, cmp) in set {
                    f(field.as_str(), cmp);
                }
            }
            FilterExpression::Group { predicates, .. } => {
                for p in predicates {
                    p.for_each_field(f);
                }
            }
        }
    }
}

/// A predicate that can be evaluated against entities.
pub trait Predicate {
    /// Evaluates the predicate against an entity.
    fn eval(&self, entity: &Entity) -> bool;

    /// Returns the fields referenced by this predicate.
    fn fields(&self) -> Vec<&str>;
}

/// Resolves a nested configuration's condition from its parent entity.
pub type ConditionFn = dyn Fn(&Entity) -> Condition;

/// A parent-dependent condition with a stable label.
///
/// The label stands in for the closure in the query identity, so two
/// dynamic conditions with the same label are treated as the same query.
#[derive(Clone)]
pub struct DynamicCondition {
    label: String,
    resolve: Rc<ConditionFn>,
}

impl DynamicCondition {
    pub fn new<F>(label: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&Entity) -> Condition + 'static,
    {
        Self {
            label: label.into(),
            resolve: Rc::new(resolve),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolves the condition for the given parent.
    pub fn resolve(&self, parent: &Entity) -> Condition {
        (self.resolve)(parent)
    }
}

impl fmt::Debug for DynamicCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCondition")
            .field("label", &self.label)
            .finish()
    }
}

/// A query's membership condition.
#[derive(Clone, Debug)]
pub enum Condition {
    /// Matches every entity of the query's type.
    MatchAll,
    /// Matches nothing; the query never opens change channels.
    MatchNone,
    /// A filter expression.
    Expr(FilterExpression),
    /// Resolved per parent entity (nested configurations only).
    Dynamic(DynamicCondition),
}

impl Condition {
    /// Creates a parent-dependent condition.
    ///
    /// The closure is opaque to the query identity: configurations whose
    /// dynamic conditions share a label share one registered query and its
    /// cached result. Give every distinct closure its own label.
    pub fn dynamic<F>(label: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&Entity) -> Condition + 'static,
    {
        Condition::Dynamic(DynamicCondition::new(label, resolve))
    }

    #[inline]
    pub fn is_match_none(&self) -> bool {
        matches!(self, Condition::MatchNone)
    }

    /// Returns the expression if this is a plain filter expression.
    pub fn as_expr(&self) -> Option<&FilterExpression> {
        match self {
            Condition::Expr(e) => Some(e),
            _ => None,
        }
    }

    /// Resolves a dynamic condition against the parent, if any.
    ///
    /// Without a parent a dynamic condition resolves to `MatchNone`.
    pub fn resolve(&self, parent: Option<&Entity>) -> Condition {
        match (self, parent) {
            (Condition::Dynamic(d), Some(p)) => d.resolve(p),
            (Condition::Dynamic(_), None) => Condition::MatchNone,
            (other, _) => other.clone(),
        }
    }
}

impl From<FilterExpression> for Condition {
    fn from(expr: FilterExpression) -> Self {
        Condition::Expr(expr)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Between(low, high) => write!(f, "between {:?} {:?}", low, high),
            Comparison::BeginsWith(prefix) => write!(f, "beginsWith {:?}", prefix),
            Comparison::Eq(v)
            | Comparison::Ne(v)
            | Comparison::Le(v)
            | Comparison::Lt(v)
            | Comparison::Ge(v)
            | Comparison::Gt(v)
            | Comparison::Contains(v)
            | Comparison::NotContains(v) => write!(f, "{} {:?}", self.operator(), v),
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Fields(set) => {
                f.write_str("{")?;
                for (i, (field, cmp)) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field, cmp)?;
                }
                f.write_str("}")
            }
            FilterExpression::Group { kind, predicates } => {
                write!(f, "{}(", kind.name())?;
                for (i, p) in predicates.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::MatchAll => f.write_str("*"),
            Condition::MatchNone => f.write_str("!"),
            Condition::Expr(e) => write!(f, "{}", e),
            Condition::Dynamic(d) => write!(f, "<{}>", d.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_field_builder() {
        let expr = FilterExpression::field("owner", Comparison::eq("u1"))
            .and_field("rank", Comparison::gt(3));
        match &expr {
            FilterExpression::Fields(set) => assert_eq!(set.len(), 2),
            _ => panic!("expected field set"),
        }
        assert!(expr.single_field().is_none());
    }

    #[test]
    fn test_and_field_on_group() {
        let expr = FilterExpression::or(vec![FilterExpression::field("a", Comparison::eq(1))])
            .and_field("b", Comparison::eq(2));
        match expr {
            FilterExpression::Group { kind, predicates } => {
                assert_eq!(kind, GroupKind::And);
                assert_eq!(predicates.len(), 2);
            }
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn test_single_field() {
        let expr = FilterExpression::field("listId", Comparison::eq("l1"));
        let (field, cmp) = expr.single_field().unwrap();
        assert_eq!(field, "listId");
        assert_eq!(cmp.equality_operand(), Some(&Value::from("l1")));
    }

    #[test]
    fn test_display_is_stable() {
        let a = FilterExpression::field("rank", Comparison::gt(3)).and_field("owner", Comparison::eq("u1"));
        let b = FilterExpression::field("owner", Comparison::eq("u1")).and_field("rank", Comparison::gt(3));
        assert_eq!(a.to_string(), b.to_string());
        assert!(a.to_string().starts_with("{owner: eq"));
    }

    #[test]
    fn test_group_display() {
        let expr = FilterExpression::not(vec![FilterExpression::field("done", Comparison::eq(true))]);
        assert_eq!(expr.to_string(), "not({done: eq Bool(true)})");
    }

    #[test]
    fn test_for_each_field() {
        let expr = FilterExpression::and(vec![
            FilterExpression::field("a", Comparison::eq(1)),
            FilterExpression::or(vec![FilterExpression::field("b", Comparison::lt(2))]),
        ]);
        let mut seen = Vec::new();
        expr.for_each_field(&mut |field, _| seen.push(field));
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_dynamic_condition_resolve() {
        let cond = Condition::dynamic("by-author", |parent| {
            FilterExpression::field("id", Comparison::Eq(parent.field("authorId").clone())).into()
        });
        let parent = Entity::new().with("authorId", "u7");
        let resolved = cond.resolve(Some(&parent));
        assert_eq!(
            resolved.as_expr(),
            Some(&FilterExpression::field("id", Comparison::eq("u7")))
        );
        assert!(cond.resolve(None).is_match_none());
        assert_eq!(cond.to_string(), "<by-author>");
    }
}
