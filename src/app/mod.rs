//! Hosted applications and the handler capability.
//!
//! # Responsibilities
//! - Define the `Handler` trait the mediator calls into
//! - Group handlers by path into named applications with virtual hosts
//! - Provide the built-in handler kinds usable from configuration

pub mod application;
pub mod builtin;
pub mod handler;

pub use application::{Application, ApplicationBuilder, RegistrationError};
pub use builtin::{builtin_handler, EchoHandler};
pub use handler::{Handler, HandlerConfig, HandlerError};
