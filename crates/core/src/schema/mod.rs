//! Schema module for Sluice.
//!
//! This module contains entity type declarations, their access paths and
//! the catalog that a session resolves query configurations against.

mod access_path;
mod catalog;
mod entity_type;

pub use access_path::{AccessPathDef, OWNER_ATTRIBUTE};
pub use catalog::Catalog;
pub use entity_type::{Connection, EntityType, EntityTypeBuilder};
