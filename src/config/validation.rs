//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect conflicting applications, virtual hosts and handler paths
//! - Check that protocol versions and handler kinds are known
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MediatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::app::builtin::BUILTIN_KINDS;
use crate::config::schema::MediatorConfig;
use crate::http::request::normalize_host;
use crate::protocol::registry::KNOWN_VERSIONS;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("protocol.versions: unknown version '{0}'")]
    UnknownVersion(String),
    #[error("protocol.versions: '{0}' listed more than once")]
    DuplicateVersion(String),
    #[error("application name '{0}' is invalid (empty or contains '/')")]
    InvalidApplicationName(String),
    #[error("application '{0}' is defined more than once")]
    DuplicateApplication(String),
    #[error("virtual host '{host}' is claimed by both '{first}' and '{second}'")]
    DuplicateVirtualHost {
        host: String,
        first: String,
        second: String,
    },
    #[error("application '{application}': handler path '{path}' must start with '/'")]
    InvalidHandlerPath { application: String, path: String },
    #[error("application '{application}': handler path '{path}' is defined more than once")]
    DuplicateHandlerPath { application: String, path: String },
    #[error("application '{application}': unknown handler kind '{kind}'")]
    UnknownHandlerKind { application: String, kind: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &MediatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let limits = [
        ("listener.max_connections", config.listener.max_connections),
        ("limits.max_request_bytes", config.limits.max_request_bytes),
        ("limits.max_frame_bytes", config.limits.max_frame_bytes),
        ("limits.max_message_bytes", config.limits.max_message_bytes),
    ];
    for (field, value) in limits {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(field));
        }
    }

    let mut versions = HashSet::new();
    for version in &config.protocol.versions {
        if !KNOWN_VERSIONS.contains(&version.as_str()) {
            errors.push(ValidationError::UnknownVersion(version.clone()));
        } else if !versions.insert(version.as_str()) {
            errors.push(ValidationError::DuplicateVersion(version.clone()));
        }
    }

    let mut names = HashSet::new();
    let mut hosts: Vec<(String, &str)> = Vec::new();
    for app in &config.applications {
        if app.name.is_empty() || app.name.contains('/') {
            errors.push(ValidationError::InvalidApplicationName(app.name.clone()));
        } else if !names.insert(app.name.as_str()) {
            errors.push(ValidationError::DuplicateApplication(app.name.clone()));
        }

        for host in &app.virtual_hosts {
            let host = normalize_host(host);
            match hosts.iter().find(|(seen, _)| *seen == host) {
                Some((_, owner)) if *owner != app.name => {
                    errors.push(ValidationError::DuplicateVirtualHost {
                        host,
                        first: owner.to_string(),
                        second: app.name.clone(),
                    });
                }
                Some(_) => {}
                None => hosts.push((host, &app.name)),
            }
        }

        let mut paths = HashSet::new();
        for handler in &app.handlers {
            if !handler.path.starts_with('/') {
                errors.push(ValidationError::InvalidHandlerPath {
                    application: app.name.clone(),
                    path: handler.path.clone(),
                });
            } else if !paths.insert(handler.path.as_str()) {
                errors.push(ValidationError::DuplicateHandlerPath {
                    application: app.name.clone(),
                    path: handler.path.clone(),
                });
            }
            if !BUILTIN_KINDS.contains(&handler.kind.as_str()) {
                errors.push(ValidationError::UnknownHandlerKind {
                    application: app.name.clone(),
                    kind: handler.kind.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
