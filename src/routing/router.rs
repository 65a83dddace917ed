//! Service lookup.
//!
//! Immutable after construction; a config reload builds a new router and
//! swaps it in. Routes are ordered by base path length so the most specific
//! base path wins, and host-bound routes beat host-less ones of equal length.

use std::borrow::Cow;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;

use crate::config::ServiceConfig;
use crate::routing::matcher::{AndMatcher, BasePathMatcher, HostMatcher, Matcher};

/// A compiled route to one service.
#[derive(Debug)]
pub struct Route {
    pub service: Arc<ServiceConfig>,
    base_path: BasePathMatcher,
    matcher: AndMatcher,
}

impl Route {
    fn new(service: Arc<ServiceConfig>) -> Self {
        let base_path = BasePathMatcher::new(service.base_path.clone());
        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(base_path.clone())];
        if let Some(host) = &service.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }

        Self {
            service,
            base_path,
            matcher: AndMatcher::new(matchers),
        }
    }

    /// Path to send upstream, with the base path removed if the service asks for it.
    pub fn upstream_path<'p>(&self, path: &'p str) -> Cow<'p, str> {
        if self.service.strip_base_path {
            self.base_path.strip(path)
        } else {
            Cow::Borrowed(path)
        }
    }
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(services: &[ServiceConfig]) -> Self {
        let mut routes: Vec<Route> = services
            .iter()
            .map(|s| Route::new(Arc::new(s.clone())))
            .collect();

        routes.sort_by(|a, b| {
            b.base_path
                .specificity()
                .cmp(&a.base_path.specificity())
                .then_with(|| b.service.host.is_some().cmp(&a.service.host.is_some()))
        });

        Self { routes }
    }

    pub fn match_request(&self, req: &Request<Body>) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(req))
    }

    pub fn service(&self, name: &str) -> Option<&Arc<ServiceConfig>> {
        self.routes
            .iter()
            .map(|r| &r.service)
            .find(|s| s.name == name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceConfig>> {
        self.routes.iter().map(|r| &r.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, base_path: &str, host: Option<&str>) -> ServiceConfig {
        let mut s = ServiceConfig::new(name, vec![format!("http://{}", name)]);
        s.base_path = base_path.to_string();
        s.host = host.map(str::to_string);
        s
    }

    fn req(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::new(&[
            service("fallback", "/", None),
            service("orders", "/orders", None),
            service("order-items", "/orders/items", None),
        ]);

        let name = |path: &str| router.match_request(&req("gw", path)).map(|r| r.service.name.clone());
        assert_eq!(name("/orders/items/3").as_deref(), Some("order-items"));
        assert_eq!(name("/orders/3").as_deref(), Some("orders"));
        assert_eq!(name("/users").as_deref(), Some("fallback"));
    }

    #[test]
    fn test_host_routes() {
        let router = Router::new(&[
            service("public", "/api", None),
            service("internal", "/api", Some("internal.example.com")),
        ]);

        let hit = router.match_request(&req("internal.example.com", "/api/x")).unwrap();
        assert_eq!(hit.service.name, "internal");

        let hit = router.match_request(&req("www.example.com", "/api/x")).unwrap();
        assert_eq!(hit.service.name, "public");
    }

    #[test]
    fn test_no_match() {
        let router = Router::new(&[service("orders", "/orders", None)]);
        assert!(router.match_request(&req("gw", "/users")).is_none());
        assert!(router.service("orders").is_some());
    }

    #[test]
    fn test_upstream_path() {
        let mut orders = service("orders", "/orders", None);
        orders.strip_base_path = true;
        let router = Router::new(&[orders]);

        let route = router.match_request(&req("gw", "/orders/42")).unwrap();
        assert_eq!(route.upstream_path("/orders/42"), "/42");
    }
}
