//! Parsed upgrade requests.
//!
//! # Responsibilities
//! - Hold the immutable result of parsing one HTTP upgrade request
//! - Case-insensitive header lookup (last write wins on duplicates)
//! - Extract routing-relevant information (host without port, path)
//! - Carry the routing decision once the directory resolved it

use std::collections::HashMap;

use bytes::Bytes;

/// Header map keyed by lowercased name.
///
/// Duplicate header lines overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Split a comma-separated header into trimmed, non-empty tokens.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if the comma-separated header contains `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_list(name)
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(token))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One complete HTTP upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    method: String,
    target: String,
    version: u8,
    host: String,
    path: String,
    query: Option<String>,
    headers: Headers,
    raw_headers: Bytes,
    body: Bytes,
}

impl ParsedRequest {
    /// Build a request from its parts.
    ///
    /// `target` may be origin-form (`/a/b?q`) or absolute-form
    /// (`http://host/a/b`).
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        version: u8,
        headers: Headers,
        raw_headers: Bytes,
        body: Bytes,
    ) -> Self {
        let target = target.into();
        let (authority, path, query) = split_target(&target);
        let host_header = headers.get("host").or(authority).unwrap_or_default();
        Self {
            method: method.into(),
            host: normalize_host(host_header),
            path,
            query,
            target,
            version,
            headers,
            raw_headers,
            body,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// HTTP minor version (`1` for HTTP/1.1).
    pub fn http_version(&self) -> u8 {
        self.version
    }

    /// Host name, lowercased and without port.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The header block as received, terminator included.
    pub fn raw_headers(&self) -> &Bytes {
        &self.raw_headers
    }

    /// Bytes received after the header terminator.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Sub-protocols requested by the client, in the client's order.
    pub fn requested_sub_protocols(&self) -> Vec<String> {
        self.headers.get_list("sec-websocket-protocol")
    }

    /// Attach the routing decision.
    pub fn into_routed(
        self,
        application_name: impl Into<String>,
        context_path: impl Into<String>,
        handler_path: impl Into<String>,
    ) -> RoutedRequest {
        RoutedRequest {
            request: self,
            application_name: application_name.into(),
            context_path: context_path.into(),
            handler_path: handler_path.into(),
        }
    }
}

/// An upgrade request together with the application it was routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRequest {
    request: ParsedRequest,
    application_name: String,
    context_path: String,
    handler_path: String,
}

impl RoutedRequest {
    pub fn request(&self) -> &ParsedRequest {
        &self.request
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Always `/` followed by the application name.
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Path of the handler inside its application.
    pub fn handler_path(&self) -> &str {
        &self.handler_path
    }
}

impl std::ops::Deref for RoutedRequest {
    type Target = ParsedRequest;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

/// Split a request target into (authority, path, query).
fn split_target(target: &str) -> (Option<&str>, String, Option<String>) {
    let (authority, rest) = match target.split_once("://") {
        Some((_, after_scheme)) => match after_scheme.find('/') {
            Some(idx) => (Some(&after_scheme[..idx]), &after_scheme[idx..]),
            None => (Some(after_scheme), "/"),
        },
        None => (None, target),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (rest, None),
    };
    let path = if path.is_empty() { "/" } else { path };
    (authority, path.to_string(), query)
}

/// Lowercase a host header value and drop any port.
pub(crate) fn normalize_host(value: &str) -> String {
    let value = value.trim();
    let host = if let Some(rest) = value.strip_prefix('[') {
        // IPv6 literal: keep the brackets, drop what follows them.
        match rest.find(']') {
            Some(end) => &value[..end + 2],
            None => value,
        }
    } else {
        match value.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
            _ => value,
        }
    };
    host.to_ascii_lowercase()
}
