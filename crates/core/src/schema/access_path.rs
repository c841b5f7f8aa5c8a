//! Access path definitions for entity type schemas.

use alloc::string::String;
use alloc::vec::Vec;

/// Attribute that binds an access path to the acting principal.
pub const OWNER_ATTRIBUTE: &str = "owner";

/// A secondary access path (index) through which a filtered collection of
/// one entity type can be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPathDef {
    /// Operation name used to fetch through this path.
    name: String,
    /// Attribute that must be bound by equality to use the path.
    partition_attribute: String,
    /// Attributes the path returns its items ordered by.
    sort_attributes: Vec<String>,
}

impl AccessPathDef {
    /// Creates a new access path definition.
    pub fn new(
        name: impl Into<String>,
        partition_attribute: impl Into<String>,
        sort_attributes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_attribute: partition_attribute.into(),
            sort_attributes,
        }
    }

    /// Returns the path name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the partition attribute.
    #[inline]
    pub fn partition_attribute(&self) -> &str {
        &self.partition_attribute
    }

    /// Returns the sort attributes.
    #[inline]
    pub fn sort_attributes(&self) -> &[String] {
        &self.sort_attributes
    }

    /// Returns true if the path is partitioned by the owning principal.
    #[inline]
    pub fn is_owner_scoped(&self) -> bool {
        self.partition_attribute == OWNER_ATTRIBUTE
    }

    /// Returns true if the path orders its items by at least one attribute.
    #[inline]
    pub fn is_sorted(&self) -> bool {
        !self.sort_attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_access_path_def() {
        let path = AccessPathDef::new("todosByOwner", "owner", vec!["rank".into()]);
        assert_eq!(path.name(), "todosByOwner");
        assert_eq!(path.partition_attribute(), "owner");
        assert!(path.is_owner_scoped());
        assert!(path.is_sorted());
    }

    #[test]
    fn test_unsorted_path() {
        let path = AccessPathDef::new("todosByList", "listId", vec![]);
        assert!(!path.is_owner_scoped());
        assert!(!path.is_sorted());
    }
}
