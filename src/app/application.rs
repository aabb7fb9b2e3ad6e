//! Hosted applications and their handler tables.
//!
//! # Design Decisions
//! - Built once through `ApplicationBuilder`, then shared read-only
//! - Handlers are `Arc<dyn Handler>` so connections and fan-out share one
//!   instance per (application, path)
//! - Virtual hosts are stored normalized (lowercase, no port)

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::app::handler::{Handler, HandlerConfig, HandlerError};
use crate::http::request::normalize_host;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("application name '{0}' is invalid")]
    InvalidName(String),
    #[error("application '{0}' is already registered")]
    DuplicateApplication(String),
    #[error("virtual host '{host}' already belongs to '{owner}'")]
    DuplicateVirtualHost { host: String, owner: String },
    #[error("application '{application}': handler path '{path}' is invalid")]
    InvalidPath { application: String, path: String },
    #[error("application '{application}': handler path '{path}' registered twice")]
    DuplicatePath { application: String, path: String },
    #[error("application '{application}': unknown handler kind '{kind}'")]
    UnknownKind { application: String, kind: String },
    #[error("application '{application}': handler '{path}' failed to initialize: {source}")]
    Init {
        application: String,
        path: String,
        #[source]
        source: HandlerError,
    },
}

pub struct Application {
    name: String,
    virtual_hosts: HashSet<String>,
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl Application {
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `host` (any case, port ignored) is one of this application's
    /// virtual hosts.
    pub fn is_virtual_host_of(&self, host: &str) -> bool {
        !host.is_empty() && self.virtual_hosts.contains(&normalize_host(host))
    }

    pub fn virtual_hosts(&self) -> impl Iterator<Item = &str> {
        self.virtual_hosts.iter().map(String::as_str)
    }

    /// Handler bound to `path`; an empty path is treated as `/`.
    pub fn locate_handler(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        let path = if path.is_empty() { "/" } else { path };
        self.handlers.get(path)
    }

    /// Handlers in path order.
    pub fn handlers(&self) -> impl Iterator<Item = (&str, &Arc<dyn Handler>)> {
        self.handlers.iter().map(|(path, handler)| (path.as_str(), handler))
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("virtual_hosts", &self.virtual_hosts)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects handlers, initializes each one and produces an `Application`.
pub struct ApplicationBuilder {
    name: String,
    virtual_hosts: Vec<String>,
    handlers: Vec<(String, Box<dyn Handler>, toml::Table, String)>,
}

impl ApplicationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_hosts: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_hosts.push(host.into());
        self
    }

    pub fn handler(self, path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.boxed_handler(path, Box::new(handler), toml::Table::new(), "custom")
    }

    /// Register a handler with its configuration parameters and kind name.
    pub fn boxed_handler(
        mut self,
        path: impl Into<String>,
        handler: Box<dyn Handler>,
        params: toml::Table,
        kind: impl Into<String>,
    ) -> Self {
        self.handlers.push((path.into(), handler, params, kind.into()));
        self
    }

    pub fn build(self) -> Result<Application, RegistrationError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(RegistrationError::InvalidName(self.name));
        }

        let mut handlers = BTreeMap::new();
        for (path, mut handler, params, kind) in self.handlers {
            if !path.starts_with('/') {
                return Err(RegistrationError::InvalidPath {
                    application: self.name,
                    path,
                });
            }
            if handlers.contains_key(&path) {
                return Err(RegistrationError::DuplicatePath {
                    application: self.name,
                    path,
                });
            }
            let config = HandlerConfig {
                name: kind,
                application: self.name.clone(),
                path: path.clone(),
                params,
            };
            if let Err(source) = handler.init(&config) {
                return Err(RegistrationError::Init {
                    application: self.name,
                    path,
                    source,
                });
            }
            tracing::debug!(application = %self.name, path = %path, kind = %config.name, "Handler registered");
            handlers.insert(path, Arc::from(handler));
        }

        Ok(Application {
            virtual_hosts: self.virtual_hosts.iter().map(|h| normalize_host(h)).collect(),
            name: self.name,
            handlers,
        })
    }
}
