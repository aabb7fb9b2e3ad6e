//! Ordered registry of enabled protocol versions.
//!
//! # Responsibilities
//! - Hold the enabled codecs in registration order
//! - Select the first codec that accepts a request
//! - Advertise supported versions in failure responses
//!
//! # Design Decisions
//! - Mutated only while the server is being assembled; shared read-only
//!   (`Arc<VersionRegistry>`) once traffic flows
//! - Selection is first-match in registration order, never by type

use std::sync::Arc;

use crate::config::schema::{LimitsConfig, ProtocolConfig};
use crate::http::ParsedRequest;
use crate::protocol::{FrameLimits, HybiCodec, Utf8Validator, VersionCodec};

/// Codec identifiers accepted in configuration.
pub const KNOWN_VERSIONS: &[&str] = &["rfc6455", "hybi10"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("unknown protocol version '{0}'")]
    Unknown(String),
}

#[derive(Debug)]
pub struct VersionRegistry {
    codecs: Vec<Arc<dyn VersionCodec>>,
    validator: Arc<Utf8Validator>,
}

impl VersionRegistry {
    /// An empty registry sharing `validator` with the codecs it will hold.
    pub fn new(validator: Arc<Utf8Validator>) -> Self {
        Self {
            codecs: Vec::new(),
            validator,
        }
    }

    /// Build the registry from the `protocol` and `limits` sections.
    pub fn from_config(protocol: &ProtocolConfig, limits: &LimitsConfig) -> Result<Self, VersionError> {
        let validator = Arc::new(Utf8Validator::default());
        let frame_limits = FrameLimits {
            max_frame_bytes: limits.max_frame_bytes,
            max_message_bytes: limits.max_message_bytes,
        };
        let mut registry = Self::new(Arc::clone(&validator));
        registry.set_encoding_checks(protocol.utf8_checks);
        for id in &protocol.versions {
            let codec: Arc<dyn VersionCodec> = match id.as_str() {
                "rfc6455" => Arc::new(HybiCodec::rfc6455(Arc::clone(&validator), frame_limits)),
                "hybi10" => Arc::new(HybiCodec::hybi10(Arc::clone(&validator), frame_limits)),
                other => return Err(VersionError::Unknown(other.to_string())),
            };
            registry.enable(codec);
        }
        Ok(registry)
    }

    /// Append a codec. A codec with the same id replaces the earlier one in place.
    pub fn enable(&mut self, codec: Arc<dyn VersionCodec>) -> &mut Self {
        match self.codecs.iter().position(|c| c.id() == codec.id()) {
            Some(idx) => self.codecs[idx] = codec,
            None => self.codecs.push(codec),
        }
        self
    }

    pub fn disable(&mut self, id: &str) -> &mut Self {
        self.codecs.retain(|codec| codec.id() != id);
        self
    }

    /// First enabled codec, in registration order, that accepts `request`.
    pub fn select(&self, request: &ParsedRequest) -> Option<Arc<dyn VersionCodec>> {
        self.codecs.iter().find(|codec| codec.matches(request)).cloned()
    }

    pub fn is_supported(&self, request: &ParsedRequest) -> bool {
        self.codecs.iter().any(|codec| codec.matches(request))
    }

    /// Comma-joined version numbers, e.g. `13,6`.
    pub fn supported_versions(&self) -> String {
        self.codecs
            .iter()
            .map(|codec| codec.version_number().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Toggle strict UTF-8 checking for every codec at once.
    pub fn set_encoding_checks(&self, enabled: bool) {
        self.validator.set_enabled(enabled);
    }

    pub fn encoding_checks(&self) -> bool {
        self.validator.is_enabled()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|codec| codec.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}
