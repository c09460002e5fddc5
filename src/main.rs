// src/main.rs
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use storefront_api::{
    config::{self, LoggingConfig},
    health::{CacheProbe, HealthEvaluator},
    metrics::MetricsRegistry,
    retry::RetryStrategy,
    server::{CorsPolicy, RateLimiter, RequestHandler, RequestIdLayer, ServerBuilder},
    store::{CacheClient, Database},
};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    // An explicit path must exist; the default one is optional.
    let config_path = std::env::args().nth(1).or_else(|| {
        Path::new(DEFAULT_CONFIG_PATH)
            .exists()
            .then(|| DEFAULT_CONFIG_PATH.to_string())
    });

    let config = config::load_config(config_path.as_deref()).await?;
    init_tracing(&config.logging)?;

    match &config_path {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("No config file found, using defaults and environment"),
    }

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    // Open the datastore and cache handles
    let retry = RetryStrategy::new(config.retry.clone());
    let database = Database::open(&config.database, &retry)
        .await
        .context("Failed to open database pool")?;
    let cache = CacheClient::open(&config.cache).await;

    let evaluator = Arc::new(
        HealthEvaluator::new(
            Arc::new(database.clone()),
            Arc::new(database.clone()),
            cache
                .clone()
                .map(|c| Arc::new(c) as Arc<dyn CacheProbe>),
            config.health.thresholds,
        )
        .with_metrics(metrics.clone()),
    );

    let initial = evaluator.evaluate().await;
    info!(status = %initial.status, "Initial health evaluation");

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let mut handler = RequestHandler::new(
        evaluator,
        &config.health.path,
        CorsPolicy::new(&config.server.cors_origins),
    )
    .with_metrics(metrics);

    let purge_task = if config.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        handler = handler.with_rate_limiter(limiter.clone());
        info!(
            "Rate limiting enabled ({} req / {}s)",
            config.rate_limit.calls, config.rate_limit.period_secs
        );
        Some(tokio::spawn(limiter.run_purge()))
    } else {
        None
    };

    let service = ServiceBuilder::new()
        .layer(RequestIdLayer)
        .service(handler);

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server.host: {}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    info!(
        "Starting storefront API on {} (health check at {})",
        addr, config.health.path
    );

    ServerBuilder::new(addr)
        .with_handler(service)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Some(task) = purge_task {
        task.abort();
    }
    if let Some(cache) = cache {
        cache.close();
    }
    database.close().await;
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "{level},storefront_api={level},hyper=info",
            level = logging.level
        ))
        .with_context(|| format!("Invalid logging.level: {}", logging.level))?,
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path); // keep this for logging
    let service_path = metrics_path.clone(); // clone for the service closure

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    Ok::<_, Infallible>(metrics_response(&req, &registry, path.as_str()))
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

fn metrics_response(req: &Request<Body>, registry: &MetricsRegistry, path: &str) -> Response<Body> {
    if req.uri().path() != path {
        let mut response = Response::new(Body::from("Not Found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    match registry.gather() {
        Ok(metrics) => {
            let mut response = Response::new(Body::from(metrics));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("Failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
