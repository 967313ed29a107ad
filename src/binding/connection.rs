//! Connections
//!
//! A connection owns the models registered against it. Opening it compiles
//! every model, merges the results per collection, folds them into the
//! caller's auto-encryption options and hands the outcome to a `Connector`.
//! The compiled configuration is cached until the connection is closed;
//! model registration is refused while the connection is open.

use std::future::Future;
use std::sync::Arc;

use crate::errors::{FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::schema::SchemaNode;

use super::collection::{merge_for_connection, ConnectionEncryptionConfig};
use super::config::AutoEncryptionOptions;
use super::model::Model;

/// Options supplied when opening a connection
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// Database holding every bound collection
    pub db_name: String,
    pub auto_encryption: Option<AutoEncryptionOptions>,
}

impl OpenOptions {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            auto_encryption: None,
        }
    }

    pub fn auto_encryption(mut self, options: AutoEncryptionOptions) -> Self {
        self.auto_encryption = Some(options);
        self
    }
}

/// What the connector receives: the URI's database plus final encryption options
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub db_name: String,
    pub auto_encryption: Option<AutoEncryptionOptions>,
}

/// Establishes the underlying client connection
pub trait Connector {
    type Handle;

    fn connect(
        &self,
        uri: &str,
        options: &ClientOptions,
    ) -> impl Future<Output = FleResult<Self::Handle>> + Send;
}

struct OpenState {
    db_name: String,
    config: Arc<ConnectionEncryptionConfig>,
}

/// A set of models sharing one client connection
#[derive(Default)]
pub struct Connection {
    models: Vec<Model>,
    open: Option<OpenState>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model.
    pub fn model(&mut self, name: &str, schema: Arc<SchemaNode>) -> FleResult<&mut Model> {
        self.ensure_closed(name)?;
        if self.models.iter().any(|m| m.name() == name) {
            return Err(FleError::DuplicateModel(name.to_string()));
        }
        self.models.push(Model::new(name, schema));
        let index = self.models.len() - 1;
        Ok(&mut self.models[index])
    }

    /// Mutable access for registering discriminators before open
    pub fn model_mut(&mut self, name: &str) -> FleResult<&mut Model> {
        self.ensure_closed(name)?;
        self.models
            .iter_mut()
            .find(|m| m.name() == name)
            .ok_or_else(|| FleError::config(format!("model '{}' is not registered", name)))
    }

    pub fn get_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name() == name)
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn db_name(&self) -> Option<&str> {
        self.open.as_ref().map(|s| s.db_name.as_str())
    }

    /// Configuration compiled by the last successful open
    pub fn encryption_config(&self) -> Option<Arc<ConnectionEncryptionConfig>> {
        self.open.as_ref().map(|s| Arc::clone(&s.config))
    }

    /// Compiles and merges every registered model without opening.
    pub fn compile(&self) -> FleResult<ConnectionEncryptionConfig> {
        let bindings = self
            .models
            .iter()
            .map(Model::bind)
            .collect::<FleResult<Vec<_>>>()?;
        merge_for_connection(bindings)
    }

    /// Opens the connection through `connector`.
    ///
    /// Compilation and merging complete before the connector is called; any
    /// failure leaves the connection closed.
    pub async fn open_uri<C: Connector>(
        &mut self,
        uri: &str,
        options: OpenOptions,
        connector: &C,
    ) -> FleResult<C::Handle> {
        if self.open.is_some() {
            return Err(FleError::Connection("connection is already open".to_string()));
        }

        log_event_with_fields(
            Event::ConnectionOpenStart,
            &[("db", options.db_name.as_str())],
        );

        let (config, client_options) = match self.prepare(options) {
            Ok(prepared) => prepared,
            Err(err) => return Err(open_failed(err)),
        };

        let handle = connector
            .connect(uri, &client_options)
            .await
            .map_err(open_failed)?;

        let collections = config.collections().count().to_string();
        log_event_with_fields(
            Event::ConnectionOpenComplete,
            &[
                ("db", client_options.db_name.as_str()),
                ("encrypted_collections", collections.as_str()),
            ],
        );

        self.open = Some(OpenState {
            db_name: client_options.db_name,
            config: Arc::new(config),
        });
        Ok(handle)
    }

    /// Drops the cached configuration; models may be registered again.
    pub fn close(&mut self) {
        self.open = None;
    }

    fn prepare(
        &self,
        options: OpenOptions,
    ) -> FleResult<(ConnectionEncryptionConfig, ClientOptions)> {
        let config = self.compile()?;

        let auto_encryption = match options.auto_encryption {
            Some(user) => Some(config.into_auto_encryption(&options.db_name, user)?),
            None if config.is_empty() => None,
            None => {
                return Err(FleError::config(
                    "encrypted schemas are bound but no auto-encryption options were given",
                ))
            }
        };

        Ok((
            config,
            ClientOptions {
                db_name: options.db_name,
                auto_encryption,
            },
        ))
    }

    fn ensure_closed(&self, name: &str) -> FleResult<()> {
        if self.open.is_some() {
            return Err(FleError::config(format!(
                "cannot register model '{}' on an open connection",
                name
            )));
        }
        Ok(())
    }
}

fn open_failed(err: FleError) -> FleError {
    let code = err.code().code();
    let message = err.to_string();
    log_event_with_fields(
        Event::ConnectionOpenFailed,
        &[("code", code), ("error", message.as_str())],
    );
    err
}
