//! Main docguard crate: checked access to a document database.
//!
//! This crate is the primary entry point of the docguard project. It re-exports the core
//! types from the sub-crates and gives access to the available drivers.
//!
//! # Features
//!
//! - **Connection guard** - One live connection per manager, with explicit errors for
//!   double connects and stray disconnects
//! - **Checked writes** - `uuid`-deduplicated inserts, and single-document updates and
//!   deletes that fail loudly when nothing matches
//! - **Full driver surface** - Every other collection operation is the driver's own,
//!   reached through the accessor
//! - **Swappable drivers** - MongoDB for production, an in-process engine for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryConnector};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let mut manager = ConnectionManager::new(InMemoryConnector::new());
//!     manager.connect("memory://local", "app").await?;
//!
//!     let users = manager.collection("users").await?;
//!
//!     users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await?;
//!
//!     // Same uuid again: rejected before anything is written.
//!     let err = users.insert_one(doc! { "uuid": "aaa", "foo": "qux" }).await.unwrap_err();
//!     assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
//!
//!     // Checked update, returns the document after the change.
//!     let updated = users.update_one("aaa", doc! { "foo": "baz" }).await?;
//!     assert_eq!(updated.get_str("foo").unwrap(), "baz");
//!
//!     // Anything else is a plain driver call.
//!     let count = users.count_documents(doc! {}).await?;
//!     assert_eq!(count, 1);
//!
//!     manager.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Typed Records
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryConnector};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub uuid: String,
//!     pub name: String,
//! }
//!
//! impl Record for User {
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! let users = manager.typed_collection::<User>().await?;
//! users.insert_one(&User { uuid: new_uuid(), name: "Alice".into() }).await?;
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-process engine for development and testing
//! - [`mongodb`] - The official MongoDB async driver (requires `mongodb` feature)

pub mod prelude;

pub use docguard_core::{collection, config, connection, document, driver, error, model, update};

// Re-export BSON types for convenience
pub use bson;

/// In-process driver.
pub mod memory {
    pub use docguard_memory::{
        InMemoryClient, InMemoryCollection, InMemoryConnector, InMemoryDatabase, InMemoryError,
        InMemoryServer,
    };
}

/// MongoDB driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docguard_mongodb::{MongoClient, MongoCollection, MongoConnector, MongoDatabase};
}
