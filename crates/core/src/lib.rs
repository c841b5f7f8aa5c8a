//! Sluice Core - Entity model, schema catalog and errors for Sluice.
//!
//! This crate provides the foundational types for the Sluice live-query engine:
//!
//! - `Value`: Field values (scalars, lists, nested entities)
//! - `Entity`: A record keyed by a per-type primary-key field
//! - `FieldType`: Declared field types, which decide the allowed filter operators
//! - `schema`: Entity type declarations, access paths and the `Catalog`
//! - `Error`: Error types shared by every Sluice crate
//!
//! # Example
//!
//! ```rust
//! use sluice_core::{Entity, FieldType, Value};
//! use sluice_core::schema::{Catalog, EntityTypeBuilder};
//!
//! let todo = EntityTypeBuilder::new("Todo")
//!     .unwrap()
//!     .add_field("id", FieldType::String)
//!     .unwrap()
//!     .add_field("rank", FieldType::String)
//!     .unwrap()
//!     .primary_key("id")
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! let catalog = Catalog::new().with(todo).unwrap();
//!
//! let item = Entity::new().with("id", "1").with("rank", "a");
//! assert_eq!(item.get("rank"), Some(&Value::from("a")));
//! assert!(catalog.get("Todo").is_some());
//! ```

#![no_std]

extern crate alloc;

mod error;
pub mod schema;
mod types;
mod value;

pub use error::{Error, Result};
pub use types::FieldType;
pub use value::{Entity, Value};
