//! Application lookup by path segment and virtual host.
//!
//! # Responsibilities
//! - Register applications, rejecting duplicate names and virtual hosts
//! - Resolve (host, path) to an application, context path and handler path
//! - Enumerate every registered handler for lifecycle fan-out
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Path routing beats host routing: an exact name match on the first
//!   segment wins before any virtual host is consulted
//! - Host scan is first-match in registration order; duplicates are
//!   rejected at registration so the order never decides a tie
//! - Explicit NotFound rather than silent default

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::{builtin_handler, Application, Handler, RegistrationError};
use crate::config::ApplicationConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no application for host '{host}' path '{path}'")]
    ApplicationNotFound { host: String, path: String },
    #[error("application '{application}' has no handler at '{handler_path}'")]
    HandlerNotFound {
        application: String,
        handler_path: String,
    },
}

/// Outcome of application resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub application: Arc<Application>,
    /// `/` + application name.
    pub context_path: String,
    /// Path the handler is looked up by.
    pub handler_path: String,
    /// True if the application was found through its virtual host.
    pub by_virtual_host: bool,
}

/// A resolution plus the handler it names.
#[derive(Clone)]
pub struct Route {
    pub resolution: Resolution,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("resolution", &self.resolution).finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ApplicationDirectory {
    applications: Vec<Arc<Application>>,
    by_name: HashMap<String, usize>,
}

impl ApplicationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured application with its built-in handlers.
    pub fn from_config(applications: &[ApplicationConfig]) -> Result<Self, RegistrationError> {
        let mut directory = Self::new();
        for config in applications {
            let mut builder = Application::builder(config.name.clone());
            for host in &config.virtual_hosts {
                builder = builder.virtual_host(host.clone());
            }
            for spec in &config.handlers {
                let handler = builtin_handler(&spec.kind, spec.sub_protocols.clone()).ok_or_else(|| {
                    RegistrationError::UnknownKind {
                        application: config.name.clone(),
                        kind: spec.kind.clone(),
                    }
                })?;
                builder = builder.boxed_handler(spec.path.clone(), handler, spec.params.clone(), spec.kind.clone());
            }
            directory.register(builder.build()?)?;
        }
        Ok(directory)
    }

    pub fn register(&mut self, application: Application) -> Result<&mut Self, RegistrationError> {
        if self.by_name.contains_key(application.name()) {
            return Err(RegistrationError::DuplicateApplication(application.name().to_string()));
        }
        for host in application.virtual_hosts() {
            if let Some(owner) = self.applications.iter().find(|app| app.is_virtual_host_of(host)) {
                return Err(RegistrationError::DuplicateVirtualHost {
                    host: host.to_string(),
                    owner: owner.name().to_string(),
                });
            }
        }

        tracing::info!(application = %application.name(), "Application registered");
        self.by_name.insert(application.name().to_string(), self.applications.len());
        self.applications.push(Arc::new(application));
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Application>> {
        self.by_name.get(name).map(|&idx| &self.applications[idx])
    }

    /// Applications in registration order.
    pub fn applications(&self) -> impl Iterator<Item = &Arc<Application>> {
        self.applications.iter()
    }

    /// Every handler of every application.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.applications
            .iter()
            .flat_map(|app| app.handlers().map(|(_, handler)| handler))
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Find the application for a request.
    pub fn resolve(&self, host: &str, path: &str) -> Result<Resolution, RouteError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (candidate, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

        if let Some(application) = self.get(candidate) {
            return Ok(Resolution {
                context_path: format!("/{}", application.name()),
                handler_path: format!("/{rest}"),
                application: Arc::clone(application),
                by_virtual_host: false,
            });
        }

        let application = self
            .applications
            .iter()
            .find(|app| app.is_virtual_host_of(host))
            .ok_or_else(|| RouteError::ApplicationNotFound {
                host: host.to_string(),
                path: path.to_string(),
            })?;

        Ok(Resolution {
            context_path: format!("/{}", application.name()),
            handler_path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            application: Arc::clone(application),
            by_virtual_host: true,
        })
    }

    /// Resolve the application, then the handler inside it.
    pub fn locate(&self, host: &str, path: &str) -> Result<Route, RouteError> {
        let resolution = self.resolve(host, path)?;
        let handler = resolution
            .application
            .locate_handler(&resolution.handler_path)
            .cloned()
            .ok_or_else(|| RouteError::HandlerNotFound {
                application: resolution.application.name().to_string(),
                handler_path: resolution.handler_path.clone(),
            })?;
        Ok(Route { resolution, handler })
    }
}
