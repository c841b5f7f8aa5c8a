//! Sluice Query - Filtering, ordering and query identity for Sluice.
//!
//! This crate turns consumer query configurations into everything the
//! reactive engine needs to fetch and maintain a result:
//!
//! - `ast`: Filter expressions and membership conditions
//! - `eval`: Predicate evaluation and operator validation
//! - `sort`: Sort/limit evaluation
//! - `config`: `QueryConfig` and its fully resolved `DerivedQueryConfig`
//! - `path`: Access-path selection for list queries
//! - `document`: Request documents and the `QueryKey` identity
//! - `shape`: Response-shape normalization

#![no_std]

extern crate alloc;

pub mod ast;
pub mod config;
pub mod document;
pub mod eval;
pub mod path;
pub mod shape;
pub mod sort;

pub use ast::{Comparison, Condition, FilterExpression, GroupKind, Predicate};
pub use config::{derive, DerivedQueryConfig, QueryConfig, DEFAULT_ITEM_LIMIT, DEFAULT_LIST_LIMIT};
pub use document::{QueryKey, QueryRequest};
pub use path::{select_path, AccessPath, PathArgument};
pub use sort::{SortDirection, SortKey};
