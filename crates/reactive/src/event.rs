//! Change events delivered by change channels.

use alloc::string::String;
use core::fmt;
use sluice_core::Entity;

/// Kind of change carried by a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    /// All operations, in the order channels are opened.
    pub const ALL: [ChangeOperation; 3] = [
        ChangeOperation::Create,
        ChangeOperation::Update,
        ChangeOperation::Delete,
    ];

    /// Returns the operation name used in subscription documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "Create",
            ChangeOperation::Update => "Update",
            ChangeOperation::Delete => "Delete",
        }
    }

    /// Returns true if the operation can change query membership.
    #[inline]
    pub fn affects_membership(&self) -> bool {
        !matches!(self, ChangeOperation::Update)
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entity change.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub operation: ChangeOperation,
    pub payload: Entity,
}

impl ChangeEvent {
    pub fn new(entity_type: impl Into<String>, operation: ChangeOperation, payload: Entity) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation,
            payload,
        }
    }

    pub fn create(entity_type: impl Into<String>, payload: Entity) -> Self {
        Self::new(entity_type, ChangeOperation::Create, payload)
    }

    pub fn update(entity_type: impl Into<String>, payload: Entity) -> Self {
        Self::new(entity_type, ChangeOperation::Update, payload)
    }

    pub fn delete(entity_type: impl Into<String>, payload: Entity) -> Self {
        Self::new(entity_type, ChangeOperation::Delete, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let event = ChangeEvent::delete("Todo", Entity::new().with("id", "1"));
        assert_eq!(event.operation, ChangeOperation::Delete);
        assert_eq!(event.entity_type, "Todo");
        assert!(event.operation.affects_membership());
        assert!(!ChangeOperation::Update.affects_membership());
    }

    #[test]
    fn test_names() {
        assert_eq!(ChangeOperation::ALL.len(), 3);
        assert_eq!(alloc::format!("{}", ChangeOperation::Create), "Create");
    }
}
