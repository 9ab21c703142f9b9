//! MongoDB driver for docguard.
//!
//! This crate implements the docguard driver traits on top of the official async
//! `mongodb` driver. Filters, updates and pipelines are handed to the server untouched;
//! only option and result types are converted.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docguard = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! [`MongoConnector`] parses the address of a
//! [`ConnectionConfig`](docguard_core::config::ConnectionConfig) as a connection string
//! and layers the remaining settings (application name, timeouts, pool size) on top.
//!
//! # Example
//!
//! ```ignore
//! use docguard::{prelude::*, mongodb::MongoConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = ConnectionManager::new(MongoConnector::new());
//!     manager.connect_with(ConnectionConfig::from_env()?).await?;
//!
//!     println!("{:?}", manager.list_collection_names(None).await?);
//!
//!     manager.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docguard_mongodb;

pub mod convert;
pub mod store;

pub use store::{MongoClient, MongoCollection, MongoConnector, MongoDatabase};
