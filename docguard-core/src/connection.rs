//! Connection lifecycle and database-level administration.
//!
//! [`ConnectionManager`] owns the connection state for one driver [`Connector`]. It is
//! created disconnected, moves to connected through [`ConnectionManager::connect`], and
//! back through [`ConnectionManager::disconnect`].
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
//! users.insert_one(doc! { "uuid": new_uuid(), "name": "Alice" }).await?;
//!
//! manager.disconnect().await?;
//! ```

use bson::Document;
use tracing::{debug, info};

use crate::{
    collection::{CollectionAccessor, TypedCollectionAccessor},
    config::ConnectionConfig,
    document::Record,
    driver::{ClientDriver, ClientOf, CollectionOf, Connector, DatabaseDriver, DatabaseOf},
    error::{StoreError, StoreResult},
    model::{CollectionInfo, CreateCollectionOptions},
};

/// Connection state. Handles only exist while connected.
#[derive(Debug)]
enum ConnectionState<Cl: ClientDriver> {
    Disconnected,
    Connected {
        client: Cl,
        database: Cl::Database,
        config: ConnectionConfig,
    },
}

/// Owns a driver connector and at most one live connection made with it.
///
/// Administrative calls are forwarded to the selected database as-is. While disconnected
/// they fail with [`StoreError::NotConnected`].
#[derive(Debug)]
pub struct ConnectionManager<C: Connector> {
    connector: C,
    state: ConnectionState<C::Client>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a disconnected manager around `connector`.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: ConnectionState::Disconnected,
        }
    }

    /// Returns the connector this manager was built with.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connects to `address` and selects `database`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyConnected`] if a connection is already open, in which
    /// case the existing connection is left as it was. Driver failures are passed through.
    pub async fn connect(&mut self, address: &str, database: &str) -> StoreResult<&mut Self> {
        self.connect_with(ConnectionConfig::new(address, database))
            .await
    }

    /// Connects using a full [`ConnectionConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::connect`].
    pub async fn connect_with(&mut self, config: ConnectionConfig) -> StoreResult<&mut Self> {
        if self.is_connected() {
            return Err(StoreError::AlreadyConnected);
        }

        debug!(address = %config.address, database = %config.database, "opening client");

        let client = self.connector.connect(&config).await?;
        let database = client.database(&config.database);

        info!(database = %config.database, "connected");

        self.state = ConnectionState::Connected { client, database, config };

        Ok(self)
    }

    /// Closes the connection and clears the client and database handles.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotConnected`] if there is no open connection. A failure while
    /// shutting the client down is passed through; the manager is disconnected either way.
    pub async fn disconnect(&mut self) -> StoreResult<()> {
        match std::mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Disconnected => Err(StoreError::NotConnected),
            ConnectionState::Connected { client, config, .. } => {
                client.shutdown().await?;

                info!(database = %config.database, "disconnected");

                Ok(())
            }
        }
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// Returns the live client, if connected.
    pub fn client(&self) -> Option<&ClientOf<C>> {
        match &self.state {
            ConnectionState::Connected { client, .. } => Some(client),
            ConnectionState::Disconnected => None,
        }
    }

    /// Returns the selected database, if connected.
    pub fn database(&self) -> Option<&DatabaseOf<C>> {
        match &self.state {
            ConnectionState::Connected { database, .. } => Some(database),
            ConnectionState::Disconnected => None,
        }
    }

    /// Returns the configuration of the open connection, if connected.
    pub fn config(&self) -> Option<&ConnectionConfig> {
        match &self.state {
            ConnectionState::Connected { config, .. } => Some(config),
            ConnectionState::Disconnected => None,
        }
    }

    fn connected_database(&self) -> StoreResult<&DatabaseOf<C>> {
        self.database().ok_or(StoreError::NotConnected)
    }

    /// Opens an accessor for the named collection on the selected database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingClient`] while disconnected and
    /// [`StoreError::MissingCollectionName`] for an empty name.
    pub async fn collection(&self, name: &str) -> StoreResult<CollectionAccessor<CollectionOf<C>>> {
        CollectionAccessor::builder(self.database(), name)
            .open()
            .await
    }

    /// Opens a typed accessor for the collection `R` is stored in.
    pub async fn typed_collection<R: Record>(
        &self,
    ) -> StoreResult<TypedCollectionAccessor<CollectionOf<C>, R>> {
        Ok(TypedCollectionAccessor::new(
            self.collection(R::collection_name()).await?,
        ))
    }

    /// Lists collections of the selected database.
    pub async fn list_collections(
        &self,
        filter: Option<Document>,
    ) -> StoreResult<Vec<CollectionInfo>> {
        self.connected_database()?
            .list_collections(filter)
            .await
    }

    /// Lists collection names of the selected database.
    pub async fn list_collection_names(&self, filter: Option<Document>) -> StoreResult<Vec<String>> {
        self.connected_database()?
            .list_collection_names(filter)
            .await
    }

    /// Creates a collection in the selected database.
    pub async fn create_collection(
        &self,
        name: &str,
        options: CreateCollectionOptions,
    ) -> StoreResult<()> {
        self.connected_database()?
            .create_collection(name, options)
            .await
    }

    /// Drops a collection from the selected database.
    pub async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.connected_database()?
            .drop_collection(name)
            .await
    }

    /// Returns driver handles for every collection of the selected database.
    pub async fn collections(&self) -> StoreResult<Vec<CollectionOf<C>>> {
        self.connected_database()?
            .collections()
            .await
    }

    /// Returns the engine's statistics for the selected database.
    pub async fn stats(&self) -> StoreResult<Document> {
        self.connected_database()?
            .stats()
            .await
    }

    /// Runs a raw command against the selected database.
    pub async fn run_command(&self, command: Document) -> StoreResult<Document> {
        self.connected_database()?
            .run_command(command)
            .await
    }
}
