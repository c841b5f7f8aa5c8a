//! AST module for filter expressions and membership conditions.

mod predicate;

pub use predicate::{
    Comparison, Condition, ConditionFn, DynamicCondition, FieldPredicateSet, FilterExpression,
    GroupKind, Predicate,
};
