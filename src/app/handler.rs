//! The handler capability consumed by the mediator.

use crate::net::{ConnectionError, WsConnection};
use crate::protocol::Message;

/// Settings handed to a handler once, at registration.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Handler kind or display name.
    pub name: String,
    /// Name of the owning application.
    pub application: String,
    /// Path inside the application.
    pub path: String,
    /// Free-form parameters from configuration.
    pub params: toml::Table,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },
    #[error("{0}")]
    Other(String),
}

/// Business-logic endpoint bound to one path of one application.
///
/// A single instance serves every connection routed to it, so callbacks take
/// `&self`; any shared state inside is the handler's own concern.
pub trait Handler: Send + Sync {
    /// Called once before the handler is shared.
    fn init(&mut self, _config: &HandlerConfig) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_open(&self, conn: &WsConnection);

    fn on_message(&self, conn: &WsConnection, message: Message);

    fn on_close(&self, conn: &WsConnection);

    fn on_error(&self, conn: &WsConnection, cause: &ConnectionError);

    /// Sub-protocols this handler agrees to, in no particular order.
    fn supported_sub_protocols(&self) -> &[String] {
        &[]
    }
}
