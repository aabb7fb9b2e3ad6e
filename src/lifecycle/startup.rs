//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the version registry and application directory from config
//! - Assemble the mediator
//! - Bind the listener last (traffic only when ready)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use crate::app::RegistrationError;
use crate::config::MediatorConfig;
use crate::mediator::{ConnectionMediator, MediatorSettings};
use crate::net::{Listener, ListenerError};
use crate::protocol::registry::VersionError;
use crate::protocol::VersionRegistry;
use crate::routing::ApplicationDirectory;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("protocol setup failed: {0}")]
    Version(#[from] VersionError),
    #[error("application setup failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Build the mediator described by `config`.
pub fn build_mediator(config: &MediatorConfig) -> Result<ConnectionMediator, StartupError> {
    let versions = VersionRegistry::from_config(&config.protocol, &config.limits)?;
    tracing::info!(versions = ?versions.ids(), supported = %versions.supported_versions(), "Protocol versions enabled");

    let directory = ApplicationDirectory::from_config(&config.applications)?;
    tracing::info!(applications = directory.len(), "Applications registered");

    let settings = MediatorSettings {
        max_request_bytes: config.limits.max_request_bytes,
        server_name: config.protocol.server_name.clone(),
        fanout: config.fanout,
    };
    Ok(ConnectionMediator::new(Arc::new(directory), Arc::new(versions), settings))
}

/// Build the mediator and bind the listener.
pub async fn start(config: &MediatorConfig) -> Result<(ConnectionMediator, Listener), StartupError> {
    let mediator = build_mediator(config)?;
    let listener = Listener::bind(&config.listener).await?;
    Ok((mediator, listener))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::mediator::FanoutPolicy;

    #[test]
    fn builds_from_config() {
        let config = parse_config(
            r#"
            fanout = "owner"

            [protocol]
            versions = ["hybi10"]

            [[applications]]
            name = "echo"
            [[applications.handlers]]
            path = "/"
            kind = "echo"
            "#,
        )
        .unwrap();
        let mediator = build_mediator(&config).unwrap();
        assert_eq!(mediator.versions().supported_versions(), "6");
        assert!(mediator.directory().get("echo").is_some());
        assert_eq!(mediator.settings().fanout, FanoutPolicy::Owner);
    }

    #[test]
    fn handler_init_errors_fail_startup() {
        let config = parse_config(
            r#"
            [[applications]]
            name = "echo"
            [[applications.handlers]]
            path = "/"
            kind = "echo"
            params = { prefix = 7 }
            "#,
        )
        .unwrap();
        assert!(matches!(build_mediator(&config), Err(StartupError::Registration(_))));
    }
}
