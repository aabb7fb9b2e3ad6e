//! Mediator configuration.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MediatorConfig (validated, immutable)
//!     → lifecycle::startup builds the mediator from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - Every field has a default; an empty file is a valid config
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ApplicationConfig, HandlerSpec, LimitsConfig, ListenerConfig, MediatorConfig,
    ObservabilityConfig, ProtocolConfig,
};
pub use validation::ValidationError;
