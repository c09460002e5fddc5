// src/server/cors.rs
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, VARY,
};
use hyper::{Body, Response, StatusCode};

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const PREFLIGHT_MAX_AGE: &str = "600";

/// Cross-origin policy. Credentials are allowed, so a wildcard policy
/// echoes the caller's `Origin` rather than answering `*`.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        Self {
            allow_any: origins.is_empty() || origins.iter().any(|o| o == "*"),
            origins: origins.iter().map(|o| o.trim_end_matches('/').to_string()).collect(),
        }
    }

    pub fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match origin {
            Some(origin) => {
                let value = origin.to_str().ok()?;
                if self.allow_any || self.origins.iter().any(|o| o == value) {
                    Some(origin.clone())
                } else {
                    None
                }
            }
            None if self.allow_any => Some(HeaderValue::from_static("*")),
            None => None,
        }
    }

    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(allowed) = self.allow_origin(origin) {
            let echoed = allowed != "*";
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
            if echoed {
                headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
                headers.append(VARY, HeaderValue::from_static("Origin"));
            }
        }
    }

    /// Answer an `OPTIONS` preflight.
    pub fn preflight(&self, request_headers: Option<&HeaderValue>) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;

        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            request_headers
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("*")),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
        response
    }
}

pub(crate) fn requested_headers(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers.get(ACCESS_CONTROL_REQUEST_HEADERS)
}
