//! Which handlers observe close and error events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::Handler;
use crate::routing::ApplicationDirectory;

/// Fan-out scope for `on_close` and `on_error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutPolicy {
    /// Every handler of every registered application.
    #[default]
    Broadcast,
    /// Only the handler that owns the connection.
    Owner,
}

impl FanoutPolicy {
    /// Handlers to notify for a connection owned by `owner`.
    pub fn targets(&self, directory: &ApplicationDirectory, owner: &Arc<dyn Handler>) -> Vec<Arc<dyn Handler>> {
        match self {
            FanoutPolicy::Broadcast => directory.handlers().cloned().collect(),
            FanoutPolicy::Owner => vec![Arc::clone(owner)],
        }
    }
}
