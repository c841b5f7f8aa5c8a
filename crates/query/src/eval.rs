//! Predicate evaluator.
//!
//! Evaluates filter expressions against entities. Evaluation is pure: it
//! reads the entity and the expression and nothing else.
//!
//! Group semantics:
//! - `and`: every child matches
//! - `or`: at least one child matches
//! - `not`: the conjunction of the children does not hold, so
//!   `not(a, b)` is `!(a && b)`, not `!a && !b`
//! - an empty group of any kind matches

use crate::ast::{Comparison, Condition, FilterExpression, GroupKind, Predicate};
use alloc::vec::Vec;
use core::cmp::Ordering;
use sluice_core::schema::EntityType;
use sluice_core::{Entity, Error, FieldType, Result, Value};

/// Returns true if the entity satisfies the expression.
pub fn matches(entity: &Entity, expr: &FilterExpression) -> bool {
    match expr {
        FilterExpression::Fields(set) => set
            .iter()
            .all(|(field, cmp)| eval_comparison(entity.field(field), cmp)),
        FilterExpression::Group { kind, predicates } => {
            if predicates.is_empty() {
                return true;
            }
            match kind {
                GroupKind::And => predicates.iter().all(|p| matches(entity, p)),
                GroupKind::Or => predicates.iter().any(|p| matches(entity, p)),
                GroupKind::Not => !predicates.iter().all(|p| matches(entity, p)),
            }
        }
    }
}

/// Evaluates a membership condition.
///
/// `MatchNone` yields false here, but callers are expected to skip such
/// queries before evaluating anything.
pub fn condition_matches(entity: &Entity, condition: &Condition, parent: Option<&Entity>) -> bool {
    match condition {
        Condition::MatchAll => true,
        Condition::MatchNone => false,
        Condition::Expr(expr) => matches(entity, expr),
        Condition::Dynamic(_) => match condition.resolve(parent) {
            Condition::MatchAll => true,
            Condition::Expr(expr) => matches(entity, &expr),
            // a dynamic condition must resolve to a concrete one
            Condition::MatchNone | Condition::Dynamic(_) => false,
        },
    }
}

/// Evaluates one comparison against a field value.
pub fn eval_comparison(value: &Value, cmp: &Comparison) -> bool {
    match cmp {
        Comparison::Eq(operand) => value == operand,
        Comparison::Ne(operand) => value != operand,
        Comparison::Le(operand) => matches!(
            value.compare_scalar(operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Comparison::Lt(operand) => value.compare_scalar(operand) == Some(Ordering::Less),
        Comparison::Ge(operand) => matches!(
            value.compare_scalar(operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Gt(operand) => value.compare_scalar(operand) == Some(Ordering::Greater),
        Comparison::Between(low, high) => {
            matches!(
                value.compare_scalar(low),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                value.compare_scalar(high),
                Some(Ordering::Less | Ordering::Equal)
            )
        }
        Comparison::BeginsWith(prefix) => value
            .as_str()
            .map(|s| s.starts_with(prefix.as_str()))
            .unwrap_or(false),
        Comparison::Contains(needle) => match value {
            Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
            Value::List(items) => items.contains(needle),
            _ => false,
        },
        Comparison::NotContains(needle) => match value {
            Value::String(s) => needle.as_str().map(|n| !s.contains(n)).unwrap_or(false),
            Value::List(items) => !items.contains(needle),
            _ => false,
        },
    }
}

/// Returns whether an operator is allowed on a field type.
pub fn operator_supported(cmp: &Comparison, field_type: FieldType) -> bool {
    match cmp {
        Comparison::Eq(_) | Comparison::Ne(_) => !field_type.is_list(),
        Comparison::Le(_)
        | Comparison::Lt(_)
        | Comparison::Ge(_)
        | Comparison::Gt(_)
        | Comparison::Between(..) => field_type.is_ordered(),
        Comparison::BeginsWith(_) => field_type.is_textual(),
        Comparison::Contains(_) | Comparison::NotContains(_) => {
            field_type.is_textual() || field_type.is_list()
        }
    }
}

/// Checks every field predicate of an expression against the entity type.
pub fn validate(expr: &FilterExpression, entity_type: &EntityType) -> Result<()> {
    let mut error = None;
    expr.for_each_field(&mut |field, cmp| {
        if error.is_some() {
            return;
        }
        match entity_type.field_type(field) {
            None => error = Some(Error::unknown_field(entity_type.name(), field)),
            Some(field_type) if !operator_supported(cmp, field_type) => {
                error = Some(Error::UnsupportedOperator {
                    field: field.into(),
                    operator: cmp.operator(),
                    field_type,
                })
            }
            Some(_) => {}
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl Predicate for FilterExpression {
    fn eval(&self, entity: &Entity) -> bool {
        matches(entity, self)
    }

    fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.for_each_field(&mut |field, _| {
            if !fields.contains(&field) {
                fields.push(field);
            }
        });
        fields
    }
}
