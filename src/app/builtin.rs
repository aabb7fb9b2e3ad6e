//! Handler kinds that can be bound from configuration.

use crate::app::handler::{Handler, HandlerConfig, HandlerError};
use crate::net::{ConnectionError, WsConnection};
use crate::protocol::Message;

/// Kinds accepted in `applications.handlers.kind`.
pub const BUILTIN_KINDS: &[&str] = &["echo"];

/// Instantiate a built-in handler by kind.
pub fn builtin_handler(kind: &str, sub_protocols: Vec<String>) -> Option<Box<dyn Handler>> {
    match kind {
        "echo" => Some(Box::new(EchoHandler::new(sub_protocols))),
        _ => None,
    }
}

/// Sends every text and binary message back to its sender.
///
/// The optional `prefix` parameter is prepended to echoed text.
#[derive(Debug, Default)]
pub struct EchoHandler {
    prefix: String,
    sub_protocols: Vec<String>,
}

impl EchoHandler {
    pub fn new(sub_protocols: Vec<String>) -> Self {
        Self {
            prefix: String::new(),
            sub_protocols,
        }
    }
}

impl Handler for EchoHandler {
    fn init(&mut self, config: &HandlerConfig) -> Result<(), HandlerError> {
        match config.params.get("prefix") {
            None => {}
            Some(toml::Value::String(prefix)) => self.prefix = prefix.clone(),
            Some(other) => {
                return Err(HandlerError::InvalidParam {
                    key: "prefix".into(),
                    reason: format!("expected a string, found {}", other.type_str()),
                })
            }
        }
        Ok(())
    }

    fn on_open(&self, conn: &WsConnection) {
        tracing::debug!(connection_id = %conn.id(), path = %conn.request().handler_path(), "Echo opened");
    }

    fn on_message(&self, conn: &WsConnection, message: Message) {
        let reply = match message {
            Message::Text(text) => Message::Text(format!("{}{}", self.prefix, text)),
            Message::Binary(data) => Message::Binary(data),
            _ => return,
        };
        if let Err(e) = conn.send(&reply) {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Echo dropped");
        }
    }

    fn on_close(&self, conn: &WsConnection) {
        tracing::trace!(connection_id = %conn.id(), "Echo observed close");
    }

    fn on_error(&self, conn: &WsConnection, cause: &ConnectionError) {
        tracing::trace!(connection_id = %conn.id(), error = %cause, "Echo observed error");
    }

    fn supported_sub_protocols(&self) -> &[String] {
        &self.sub_protocols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_has_no_handler() {
        assert!(builtin_handler("echo", Vec::new()).is_some());
        assert!(builtin_handler("chat", Vec::new()).is_none());
    }

    #[test]
    fn prefix_must_be_a_string() {
        let mut handler = EchoHandler::default();
        let mut params = toml::Table::new();
        params.insert("prefix".into(), toml::Value::Integer(3));
        let config = HandlerConfig {
            params,
            ..HandlerConfig::default()
        };
        assert!(matches!(handler.init(&config), Err(HandlerError::InvalidParam { .. })));
    }

    #[test]
    fn keeps_declared_sub_protocols() {
        let handler = builtin_handler("echo", vec!["chat.v1".into()]).unwrap();
        assert_eq!(handler.supported_sub_protocols(), ["chat.v1".to_string()]);
    }
}
