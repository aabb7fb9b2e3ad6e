//! Sub-protocol negotiation.
//!
//! The agreed list is the client's requested list filtered to what the
//! handler supports, in the client's order. Supported sets are cached per
//! (application, handler path) on first negotiation; the directory never
//! changes after startup so the cache is never invalidated.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::app::Handler;
use crate::routing::ApplicationDirectory;

/// Requested entries the handler supports, preserving request order.
pub fn negotiate(requested: &[String], handler: &dyn Handler) -> Vec<String> {
    let supported: HashSet<&str> = handler.supported_sub_protocols().iter().map(String::as_str).collect();
    filter(requested, |protocol| supported.contains(protocol))
}

fn filter(requested: &[String], supported: impl Fn(&str) -> bool) -> Vec<String> {
    requested.iter().filter(|p| supported(p.as_str())).cloned().collect()
}

type SupportCache = HashMap<(String, String), HashSet<String>>;

#[derive(Debug, Default)]
pub struct SubProtocolNegotiator {
    cache: OnceLock<SupportCache>,
}

impl SubProtocolNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negotiate for the handler at (`application`, `handler_path`).
    pub fn negotiate(
        &self,
        directory: &ApplicationDirectory,
        application: &str,
        handler_path: &str,
        requested: &[String],
    ) -> Vec<String> {
        if requested.is_empty() {
            return Vec::new();
        }
        let cache = self.cache.get_or_init(|| build_cache(directory));
        match cache.get(&(application.to_string(), handler_path.to_string())) {
            Some(supported) => filter(requested, |protocol| supported.contains(protocol)),
            None => Vec::new(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.get().is_some()
    }
}

fn build_cache(directory: &ApplicationDirectory) -> SupportCache {
    let mut cache = HashMap::new();
    for app in directory.applications() {
        for (path, handler) in app.handlers() {
            let supported = handler.supported_sub_protocols().iter().cloned().collect();
            cache.insert((app.name().to_string(), path.to_string()), supported);
        }
    }
    tracing::debug!(entries = cache.len(), "Sub-protocol cache built");
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Application, EchoHandler};
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_client_order() {
        let handler = EchoHandler::new(strings(&["z", "y"]));
        assert_eq!(negotiate(&strings(&["x", "y", "z"]), &handler), strings(&["y", "z"]));
    }

    #[test]
    fn no_overlap_is_empty() {
        let handler = EchoHandler::new(strings(&["a"]));
        assert!(negotiate(&strings(&["x"]), &handler).is_empty());
    }

    #[test]
    fn cache_is_built_lazily() {
        let mut directory = ApplicationDirectory::new();
        directory
            .register(
                Application::builder("chat")
                    .handler("/room", EchoHandler::new(strings(&["v2", "v1"])))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let negotiator = SubProtocolNegotiator::new();
        assert!(!negotiator.is_cached());

        let agreed = negotiator.negotiate(&directory, "chat", "/room", &strings(&["v1", "v3", "v2"]));
        assert_eq!(agreed, strings(&["v1", "v2"]));
        assert!(negotiator.is_cached());
        assert!(negotiator.negotiate(&directory, "chat", "/other", &strings(&["v1"])).is_empty());
    }

    proptest! {
        #[test]
        fn result_is_ordered_subset(
            requested in proptest::collection::vec("[a-e]", 0..8),
            supported in proptest::collection::vec("[a-e]", 0..5),
        ) {
            let handler = EchoHandler::new(supported.clone());
            let agreed = negotiate(&requested, &handler);

            prop_assert!(agreed.iter().all(|p| supported.contains(p)));
            let expected: Vec<String> =
                requested.iter().filter(|p| supported.contains(*p)).cloned().collect();
            prop_assert_eq!(agreed, expected);
        }
    }
}
