//! Field type definitions for entity schemas.

/// Declared type of an entity field.
///
/// The type decides which filter operators a field accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean field
    Boolean,
    /// Numeric or otherwise ordinal field
    Number,
    /// UTF-8 string field
    String,
    /// List of booleans
    BooleanList,
    /// List of numbers
    NumberList,
    /// List of strings
    StringList,
}

impl FieldType {
    /// Returns whether this is a list type.
    #[inline]
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldType::BooleanList | FieldType::NumberList | FieldType::StringList
        )
    }

    /// Returns whether values of this type have a meaningful order.
    pub fn is_ordered(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::String)
    }

    /// Returns whether this type supports substring operators.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_properties() {
        assert!(FieldType::StringList.is_list());
        assert!(!FieldType::String.is_list());
        assert!(FieldType::Number.is_ordered());
        assert!(!FieldType::Boolean.is_ordered());
        assert!(FieldType::String.is_textual());
        assert!(!FieldType::NumberList.is_textual());
    }
}
