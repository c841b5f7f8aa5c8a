//! Catalog of declared entity types.

use super::entity_type::EntityType;
use crate::error::{Error, Result};
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;

/// The set of entity types known to a session.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    types: HashMap<String, Rc<EntityType>>,
}

impl Catalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Adds an entity type, rejecting duplicates.
    pub fn add(&mut self, entity_type: EntityType) -> Result<()> {
        if self.types.contains_key(entity_type.name()) {
            return Err(Error::invalid_schema(format!(
                "Entity type already exists: {}",
                entity_type.name()
            )));
        }
        self.types
            .insert(entity_type.name().to_string(), Rc::new(entity_type));
        Ok(())
    }

    /// Builder-style add.
    pub fn with(mut self, entity_type: EntityType) -> Result<Self> {
        self.add(entity_type)?;
        Ok(self)
    }

    /// Gets an entity type by name.
    pub fn get(&self, name: &str) -> Option<&Rc<EntityType>> {
        self.types.get(name)
    }

    /// Gets an entity type by name or fails with `UnknownEntityType`.
    pub fn require(&self, name: &str) -> Result<Rc<EntityType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_entity_type(name))
    }

    /// Returns the number of declared types.
    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are declared.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Checks that every connection targets a declared type.
    pub fn validate(&self) -> Result<()> {
        for entity_type in self.types.values() {
            for connection in entity_type.connections() {
                if !self.types.contains_key(connection.target.as_str()) {
                    return Err(Error::invalid_schema(format!(
                        "Connection {}.{} targets unknown entity type {}",
                        entity_type.name(),
                        connection.field,
                        connection.target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns all type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityTypeBuilder;
    use crate::types::FieldType;
    use alloc::vec;

    fn simple(name: &str) -> EntityType {
        EntityTypeBuilder::new(name)
            .unwrap()
            .add_field("id", FieldType::String)
            .unwrap()
            .primary_key("id")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_catalog_add_and_get() {
        let catalog = Catalog::new()
            .with(simple("User"))
            .unwrap()
            .with(simple("Todo"))
            .unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("User").is_some());
        assert_eq!(catalog.names(), vec!["Todo", "User"]);
    }

    #[test]
    fn test_catalog_duplicate() {
        let mut catalog = Catalog::new();
        catalog.add(simple("User")).unwrap();
        assert!(catalog.add(simple("User")).is_err());
    }

    #[test]
    fn test_catalog_require() {
        let catalog = Catalog::new().with(simple("User")).unwrap();
        assert!(catalog.require("User").is_ok());
        assert!(matches!(
            catalog.require("Ghost"),
            Err(Error::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn test_catalog_validate_connections() {
        let todo = EntityTypeBuilder::new("Todo")
            .unwrap()
            .add_field("id", FieldType::String)
            .unwrap()
            .primary_key("id")
            .unwrap()
            .add_connection("author", "User", false)
            .unwrap()
            .build()
            .unwrap();
        let catalog = Catalog::new().with(todo).unwrap();
        assert!(catalog.validate().is_err());

        let catalog = catalog.with(simple("User")).unwrap();
        assert!(catalog.validate().is_ok());
    }
}
