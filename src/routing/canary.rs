//! Canary routing decisions.
//!
//! Decision order for an enabled policy:
//! 1. header `header == header_value`
//! 2. cookie `cookie_name == cookie_value`
//! 3. weighted, sticky per client IP: `md5(ip)[0] % 100 < weight` for `0 < weight < 100`
//!
//! Anything else routes to the primary targets. The weighted split uses the
//! first hash byte modulo 100, so buckets 0..56 are slightly overweighted.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use md5::{Digest, Md5};

use crate::config::{CanaryConfig, ServiceConfig};

/// The parts of a request that canary routing looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub headers: &'a HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl<'a> RequestInfo<'a> {
    pub fn new(headers: &'a HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            headers,
            remote_addr,
        }
    }

    /// Borrow headers and the peer address (when served with connect info).
    pub fn from_request(req: &'a Request<Body>) -> Self {
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::new(req.headers(), remote_addr)
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
    pub fn client_ip(&self) -> String {
        if let Some(first) = self
            .header("x-forwarded-for")
            .filter(|xff| !xff.is_empty())
            .and_then(|xff| xff.split(',').next())
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = self.header("x-real-ip").filter(|ip| !ip.is_empty()) {
            return real_ip.to_string();
        }

        // IPv6 peers hash without brackets or port: "2001:db8::1", not "[2001:db8::1]".
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Value of the first cookie named `name` across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }
}

/// Stateless canary decision maker.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanaryRouter;

impl CanaryRouter {
    pub fn new() -> Self {
        Self
    }

    /// Whether this request should go to the canary targets.
    pub fn should_use_canary(&self, req: &RequestInfo<'_>, policy: Option<&CanaryConfig>) -> bool {
        let Some(policy) = policy.filter(|p| p.enabled) else {
            return false;
        };

        if let (Some(name), Some(expected)) = (non_empty(&policy.header), non_empty(&policy.header_value)) {
            if req.header(name) == Some(expected) {
                return true;
            }
        }

        if let (Some(name), Some(expected)) =
            (non_empty(&policy.cookie_name), non_empty(&policy.cookie_value))
        {
            if req.cookie(name) == Some(expected) {
                return true;
            }
        }

        if policy.weight > 0 && policy.weight < 100 {
            return weight_bucket(&req.client_ip()) < policy.weight;
        }

        false
    }

    /// Candidate targets for the request: canary targets when chosen and non-empty,
    /// the service's primary targets otherwise.
    pub fn get_targets<'s>(&self, req: &RequestInfo<'_>, service: &'s ServiceConfig) -> &'s [String] {
        match &service.canary {
            Some(canary) if !canary.targets.is_empty() && self.should_use_canary(req, Some(canary)) => {
                &canary.targets
            }
            _ => &service.targets,
        }
    }
}

/// Sticky bucket in 0..100 for a client IP.
pub fn weight_bucket(client_ip: &str) -> u32 {
    let digest = Md5::digest(client_ip.as_bytes());
    u32::from(digest[0]) % 100
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
