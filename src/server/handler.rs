// src/server/handler.rs
use crate::health::HealthEvaluator;
use crate::metrics::{MetricsCollector, Timer};
use crate::server::cors::{requested_headers, CorsPolicy};
use crate::server::listener::ClientAddr;
use crate::server::rate_limit::{RateDecision, RateLimiter};
use crate::server::request_id::RequestId;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE, ORIGIN, RETRY_AFTER};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, Instrument};

const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to build response: {0}")]
    Http(#[from] hyper::http::Error),
}

impl From<HandlerError> for Response<Body> {
    fn from(err: HandlerError) -> Self {
        let body = serde_json::json!({
            "detail": "An unexpected internal server error occurred.",
            "error": err.to_string(),
        });
        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Routes requests to the health endpoint and wraps every response with
/// CORS, rate-limit headers and request metrics.
#[derive(Clone)]
pub struct RequestHandler {
    evaluator: Arc<HealthEvaluator>,
    health_path: Arc<str>,
    cors: Arc<CorsPolicy>,
    rate_limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RequestHandler {
    pub fn new(evaluator: Arc<HealthEvaluator>, health_path: &str, cors: CorsPolicy) -> Self {
        Self {
            evaluator,
            health_path: Arc::from(normalize(health_path)),
            cors: Arc::new(cors),
            rate_limiter: None,
            metrics: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let timer = Timer::new();
        let method = req.method().clone();
        let route = self.route_label(req.uri().path());
        let origin = req.headers().get(ORIGIN).cloned();
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|r| r.0.clone())
            .unwrap_or_default();
        let client = req.extensions().get::<ClientAddr>().map(|c| c.0.ip());

        let span = tracing::info_span!("request", %method, route, request_id = %request_id);

        async move {
            let decision = match (&self.rate_limiter, client) {
                (Some(limiter), Some(ip)) if method != Method::OPTIONS => Some(limiter.check(ip)),
                _ => None,
            };

            let mut response = match decision {
                Some(d) if !d.allowed => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rate_limited();
                    }
                    debug!(client = ?client, "Rate limit exceeded");
                    too_many_requests(&d)
                }
                _ => match self.route(req).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Request handling failed");
                        e.into()
                    }
                },
            };

            if let Some(d) = decision {
                apply_rate_headers(&d, &mut response);
            }
            self.cors.apply(origin.as_ref(), response.headers_mut());

            let elapsed = timer.elapsed();
            if let Some(metrics) = &self.metrics {
                metrics.record_request(method.as_str(), route, response.status().as_u16(), elapsed);
            }
            debug!(status = response.status().as_u16(), elapsed = ?elapsed, "Request complete");

            response
        }
        .instrument(span)
        .await
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, HandlerError> {
        if req.method() == Method::OPTIONS {
            return Ok(self.cors.preflight(requested_headers(req.headers())));
        }

        if !self.is_health_path(req.uri().path()) {
            return json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({"detail": "Not Found"}),
            );
        }

        if req.method() != Method::GET {
            let mut response = json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &serde_json::json!({"detail": "Method Not Allowed"}),
            )?;
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, OPTIONS"));
            return Ok(response);
        }

        // Always 200: the level is carried in the body.
        let report = self.evaluator.evaluate().await;
        json_response(StatusCode::OK, &report)
    }

    fn is_health_path(&self, path: &str) -> bool {
        normalize(path) == &*self.health_path
    }

    fn route_label(&self, path: &str) -> &'static str {
        if self.is_health_path(path) {
            "health_check"
        } else {
            UNMATCHED_ROUTE
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, HandlerError> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn too_many_requests(decision: &RateDecision) -> Response<Body> {
    let body = serde_json::json!({"detail": "Too many requests"});
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        RETRY_AFTER,
        HeaderValue::from(decision.retry_after.as_secs().max(1)),
    );
    response
}

fn apply_rate_headers(decision: &RateDecision, response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
}
