//! Sluice Reactive - Live queries kept current by change events.
//!
//! This crate keeps fetched query results up to date as entity changes
//! arrive out of band, without fetching them again.
//!
//! # Core Concepts
//!
//! - `Engine`: A session over one catalog, wired to a `QueryExecutor` and a `ChangeSource`
//! - `LiveQuery`: A consumer's handle on a registered query's `QueryResponse`
//! - `QueryRegistry`: Deduplicates queries by `QueryKey` and routes entity types to them
//! - `ChannelManager`: Opens and closes change channels by demand and scope
//! - `reconcile`: Patches a cached result with one `ChangeEvent`
//!
//! # Example
//!
//! ```ignore
//! use sluice_query::{Comparison, FilterExpression, QueryConfig, SortDirection};
//! use sluice_reactive::Engine;
//!
//! let engine = Engine::new(catalog, executor, source)?;
//! engine.set_principal(Some("u1"));
//!
//! let todos = engine.watch(
//!     &QueryConfig::list("Todo")
//!         .condition(FilterExpression::field("owner", Comparison::eq("u1")))
//!         .sort_by("rank", SortDirection::Asc),
//! )?;
//! todos.subscribe(|response| {
//!     println!("loaded: {}, items: {}", response.loaded, response.items().len());
//! });
//! ```

#![no_std]

extern crate alloc;

pub mod channel;
mod engine;
pub mod event;
mod live;
pub mod reconciler;
pub mod registry;
pub mod response;
pub mod subscription;

pub use channel::{
    ChangeSink, ChangeSource, ChannelManager, ChannelRequest, ChannelToken, Demand, Dispatcher,
    Scope,
};
pub use engine::{Completion, Engine, QueryExecutor};
pub use event::{ChangeEvent, ChangeOperation};
pub use live::LiveQuery;
pub use reconciler::reconcile;
pub use registry::{QueryRegistry, RegisteredQuery, Registration, Release};
pub use response::{QueryResponse, QueryResult};
pub use subscription::{ResponseCallback, SubscriptionId, SubscriptionManager};
