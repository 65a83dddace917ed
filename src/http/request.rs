//! Request identification and forwarding helpers.
//!
//! Every request gets an `x-request-id` as early as possible; an id sent by
//! the client is kept. The id is forwarded upstream and echoed in the response.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The request id set by [`set_request_id_layer`], or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Build the request sent to `target` (a base URL such as `http://10.0.0.1:3000`).
pub fn upstream_request(
    target: &str,
    method: &Method,
    headers: &HeaderMap,
    path_and_query: &str,
    body: Bytes,
) -> Result<Request<Body>, axum::http::Error> {
    let uri: Uri = format!("{}{}", target.trim_end_matches('/'), path_and_query).parse()?;

    let mut builder = Request::builder().method(method.clone()).uri(uri);
    if let Some(out) = builder.headers_mut() {
        for (name, value) in headers {
            if name == header::HOST || HOP_BY_HOP.contains(name) {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
    }

    builder.body(Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc"));

        let req = upstream_request(
            "http://10.0.0.1:3000/",
            &Method::GET,
            &headers,
            "/orders/1?expand=items",
            Bytes::new(),
        )
        .unwrap();

        assert_eq!(req.uri(), "http://10.0.0.1:3000/orders/1?expand=items");
        assert!(req.headers().get(header::HOST).is_none());
        assert!(req.headers().get(header::CONNECTION).is_none());
        assert_eq!(request_id(req.headers()), "abc");
    }

    #[test]
    fn test_make_request_uuid() {
        let req = Request::new(());
        let id = MakeRequestUuid.make_request_id(&req).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }
}
