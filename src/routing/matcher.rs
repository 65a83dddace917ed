//! Route matching logic.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Base path matching is case-sensitive and respects segment boundaries
//! - Empty condition = always matches (wildcard)

use axum::body::Body;
use axum::http::{header, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host());

        host.map(strip_port)
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.expected_host))
    }
}

/// Matches a base path: `/orders` matches `/orders` and `/orders/1` but not `/ordersx`.
#[derive(Debug, Clone)]
pub struct BasePathMatcher {
    base_path: String,
}

impl BasePathMatcher {
    /// Trailing slashes are ignored, so `/orders/` behaves like `/orders`.
    pub fn new(base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn matches_path(&self, path: &str) -> bool {
        match path.strip_prefix(&self.base_path) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Number of bytes of the base path; longer bases are more specific.
    pub fn specificity(&self) -> usize {
        self.base_path.len()
    }

    /// Remove the base path, keeping a leading `/`.
    pub fn strip<'p>(&self, path: &'p str) -> std::borrow::Cow<'p, str> {
        match path.strip_prefix(&self.base_path) {
            Some("") => "/".into(),
            Some(rest) => rest.into(),
            None => path.into(),
        }
    }
}

impl Matcher for BasePathMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matches_path(req.uri().path())
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split_once(']').map_or(host, |(addr, _)| &addr[1..]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}
