//! Entity type definition for Sluice schemas.

use super::access_path::{AccessPathDef, OWNER_ATTRIBUTE};
use crate::error::{Error, Result};
use crate::types::FieldType;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A field that references another entity type (or a list of them).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Field name on the owning entity.
    pub field: String,
    /// Referenced entity type name.
    pub target: String,
    /// Whether the field holds a collection.
    pub list: bool,
}

/// An entity type declaration: a named category of records sharing a schema.
#[derive(Clone, Debug)]
pub struct EntityType {
    /// Entity type name.
    name: String,
    /// Field holding the primary key.
    primary_key: String,
    /// Scalar and scalar-list fields.
    fields: Vec<(String, FieldType)>,
    /// Secondary access paths, in declaration order.
    access_paths: Vec<AccessPathDef>,
    /// Fields referencing other entity types.
    connections: Vec<Connection>,
    /// Whether change notifications are scoped to the owning principal.
    owner_scoped: bool,
    /// Operation fetching a single entity by primary key.
    get_operation: String,
    /// Operation scanning the whole collection.
    list_operation: String,
}

impl EntityType {
    /// Returns the entity type name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the primary key field name.
    #[inline]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the declared fields.
    #[inline]
    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    /// Returns the access paths in declaration order.
    #[inline]
    pub fn access_paths(&self) -> &[AccessPathDef] {
        &self.access_paths
    }

    /// Returns the connections.
    #[inline]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Returns whether change channels are scoped by owner.
    #[inline]
    pub fn is_owner_scoped(&self) -> bool {
        self.owner_scoped
    }

    /// Returns the single-item operation name.
    #[inline]
    pub fn get_operation(&self) -> &str {
        &self.get_operation
    }

    /// Returns the scan operation name.
    #[inline]
    pub fn list_operation(&self) -> &str {
        &self.list_operation
    }

    /// Gets a field type by name.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    /// Gets a connection by field name.
    pub fn connection(&self, field: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.field == field)
    }

    /// Gets an access path by name.
    pub fn access_path(&self, name: &str) -> Option<&AccessPathDef> {
        self.access_paths.iter().find(|p| p.name() == name)
    }

    /// Returns the scalar selection set (field names separated by spaces).
    pub fn field_set(&self) -> String {
        let names: Vec<&str> = self.fields.iter().map(|(n, _)| n.as_str()).collect();
        names.join(" ")
    }
}

/// Builder for entity type declarations.
pub struct EntityTypeBuilder {
    name: String,
    primary_key: Option<String>,
    fields: Vec<(String, FieldType)>,
    access_paths: Vec<AccessPathDef>,
    connections: Vec<Connection>,
    owner_scoped: bool,
    get_operation: Option<String>,
    list_operation: Option<String>,
}

impl EntityTypeBuilder {
    /// Creates a new entity type builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        Ok(Self {
            name,
            primary_key: None,
            fields: Vec::new(),
            access_paths: Vec::new(),
            connections: Vec::new(),
            owner_scoped: false,
            get_operation: None,
            list_operation: None,
        })
    }

    /// Validates a name follows naming rules.
    fn check_naming_rules(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return Err(Error::invalid_schema("Name cannot be empty")),
        };
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::invalid_schema(format!(
                "Name must start with letter or underscore: {}",
                name
            )));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::invalid_schema(format!(
                "Name contains invalid characters: {}",
                name
            )));
        }
        Ok(())
    }

    fn is_declared(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name) || self.connections.iter().any(|c| c.field == name)
    }

    /// Adds a scalar or scalar-list field.
    pub fn add_field(mut self, name: impl Into<String>, field_type: FieldType) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        if self.is_declared(&name) {
            return Err(Error::invalid_schema(format!("Field already exists: {}", name)));
        }
        self.fields.push((name, field_type));
        Ok(self)
    }

    /// Sets the primary key field.
    pub fn primary_key(mut self, field: &str) -> Result<Self> {
        match self.fields.iter().find(|(n, _)| n == field) {
            None => {
                return Err(Error::invalid_schema(format!("Field not found: {}", field)));
            }
            Some((_, t)) if t.is_list() => {
                return Err(Error::invalid_schema(format!(
                    "Primary key cannot be a list: {}",
                    field
                )));
            }
            Some(_) => {}
        }
        self.primary_key = Some(field.to_string());
        Ok(self)
    }

    /// Adds a secondary access path.
    pub fn add_access_path(
        mut self,
        name: impl Into<String>,
        partition_attribute: &str,
        sort_attributes: &[&str],
    ) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        if self.access_paths.iter().any(|p| p.name() == name) {
            return Err(Error::invalid_schema(format!("Access path already exists: {}", name)));
        }
        for attr in core::iter::once(&partition_attribute).chain(sort_attributes.iter()) {
            if !self.fields.iter().any(|(n, _)| n == attr) {
                return Err(Error::invalid_schema(format!("Field not found: {}", attr)));
            }
        }
        let sort = sort_attributes.iter().map(|s| s.to_string()).collect();
        self.access_paths
            .push(AccessPathDef::new(name, partition_attribute, sort));
        Ok(self)
    }

    /// Adds a field referencing another entity type.
    pub fn add_connection(mut self, field: impl Into<String>, target: &str, list: bool) -> Result<Self> {
        let field = field.into();
        Self::check_naming_rules(&field)?;
        Self::check_naming_rules(target)?;
        if self.is_declared(&field) {
            return Err(Error::invalid_schema(format!("Field already exists: {}", field)));
        }
        self.connections.push(Connection {
            field,
            target: target.to_string(),
            list,
        });
        Ok(self)
    }

    /// Scopes change channels to the owning principal.
    pub fn owner_scoped(mut self, value: bool) -> Self {
        self.owner_scoped = value;
        self
    }

    /// Overrides the single-item operation name.
    pub fn get_operation(mut self, name: impl Into<String>) -> Self {
        self.get_operation = Some(name.into());
        self
    }

    /// Overrides the scan operation name.
    pub fn list_operation(mut self, name: impl Into<String>) -> Self {
        self.list_operation = Some(name.into());
        self
    }

    /// Builds the entity type declaration.
    pub fn build(self) -> Result<EntityType> {
        let primary_key = match self.primary_key {
            Some(pk) => pk,
            None => {
                return Err(Error::invalid_schema(format!(
                    "Primary key required for entity type: {}",
                    self.name
                )))
            }
        };
        if self.owner_scoped && !self.fields.iter().any(|(n, _)| n == OWNER_ATTRIBUTE) {
            return Err(Error::invalid_schema(format!(
                "Owner-scoped entity type {} has no {} field",
                self.name, OWNER_ATTRIBUTE
            )));
        }
        let get_operation = self
            .get_operation
            .unwrap_or_else(|| format!("get{}", self.name));
        let list_operation = self
            .list_operation
            .unwrap_or_else(|| format!("list{}s", self.name));

        Ok(EntityType {
            name: self.name,
            primary_key,
            fields: self.fields,
            access_paths: self.access_paths,
            connections: self.connections,
            owner_scoped: self.owner_scoped,
            get_operation,
            list_operation,
        })
    }
}
