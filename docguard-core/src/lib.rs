//! A thin guard layer over document database clients.
//!
//! This crate is the core of the docguard project and provides:
//!
//! - **Connection lifecycle** ([`connection`]) - Connect/disconnect guard and database administration
//! - **Collection accessors** ([`collection`]) - Checked inserts, updates and deletes over a driver collection
//! - **Driver abstraction** ([`driver`]) - Traits a database driver implements to be wrapped
//! - **Documents and records** ([`document`]) - The `uuid` field and typed record conversions
//! - **Options and results** ([`model`]) - Driver-neutral option and result types
//! - **Update strategies** ([`update`]) - Update operators and document selectors
//! - **Configuration** ([`config`]) - Connection settings, from code or the environment
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docguard::{prelude::*, memory::InMemoryConnector};
//! use bson::doc;
//!
//! let mut manager = ConnectionManager::new(InMemoryConnector::new());
//! manager.connect("memory://local", "app").await?;
//!
//! let users = manager.collection("users").await?;
//! users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await?;
//!
//! // A second insert with the same uuid is rejected.
//! assert!(users.insert_one(doc! { "uuid": "aaa" }).await.is_err());
//! ```

#[allow(unused_extern_crates)]
extern crate self as docguard_core;

pub mod collection;
pub mod config;
pub mod connection;
pub mod document;
pub mod driver;
pub mod error;
pub mod model;
pub mod update;
