//! In-process document engine for docguard.
//!
//! This crate implements the docguard driver traits entirely in memory. It is what the
//! test suites inject into a [`ConnectionManager`](docguard_core::connection::ConnectionManager)
//! in place of a real server, and it is handy for development.
//!
//! # Features
//!
//! - **Query operators** - comparison, set, element, array and logical operators on dotted paths
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$pull` and friends
//! - **Unique indexes** - enforced on every write, as on a real server
//! - **Change streams** - per-collection event streams filtered by `$match` pipelines
//!
//! # Quick Start
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryConnector};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = ConnectionManager::new(InMemoryConnector::new());
//!     manager.connect("memory://local", "app").await?;
//!
//!     let users = manager.collection("users").await?;
//!     users.insert_one(doc! { "uuid": new_uuid(), "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docguard_memory;

pub mod error;
mod evaluator;
mod modifier;
pub mod store;

pub use error::InMemoryError;
pub use store::{
    InMemoryClient, InMemoryCollection, InMemoryConnector, InMemoryDatabase, InMemoryServer,
};
