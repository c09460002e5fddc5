// src/server/builder.rs
use crate::server::listener::{bind_tcp, ClientAddr};
use anyhow::{Context, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::{Service, ServiceExt};

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// Builder pattern so `main.rs` can inject the request handler stack.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    bind: Bind,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            bind: Bind::Addr(addr),
            handler: None,
        }
    }

    /// Serve on an already bound listener (e.g. an ephemeral port).
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            bind: Bind::Listener(listener),
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Accept connections until `signal` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;

        let listener = match self.bind {
            Bind::Addr(addr) => bind_tcp(addr).await?,
            Bind::Listener(listener) => listener,
        };
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            tracing::warn!(%err, "accept failed");
                            continue;
                        }
                    };

                    let svc = handler.clone().map_request(move |mut req: Request<Body>| {
                        req.extensions_mut().insert(ClientAddr(peer));
                        req
                    });

                    // One Tokio task per connection.
                    tokio::spawn(async move {
                        if let Err(err) = Http::new().serve_connection(stream, svc).await {
                            tracing::warn!(%peer, %err, "connection error");
                        }
                    });
                }
                _ = &mut signal => {
                    tracing::info!("HTTP server no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }
}
