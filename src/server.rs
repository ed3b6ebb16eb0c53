//! Mirror server
//! HTTP/1.1 accept loop with one task per connection and graceful shutdown

use crate::config::MirrorConfig;
use crate::engine::{HttpTransport, Transport};
use crate::error::ConfigError;
use crate::router::RequestRouter;
use anyhow::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Mirror server
pub struct MirrorServer {
    router: Arc<RequestRouter>,
}

impl MirrorServer {
    /// Create a server that mirrors over HTTP(S)
    pub fn new(config: MirrorConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config.upstream_timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a server with a custom outbound transport
    pub fn with_transport(
        config: MirrorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let router = RequestRouter::new(Arc::new(config), transport)?;
        Ok(Self {
            router: Arc::new(router),
        })
    }

    /// Listen on the configured port until ctrl-c
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.router.config().port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// stop accepting and wait for in-flight connections to finish
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = accepted?;
                    self.spawn_connection(stream, remote_addr, &graceful);
                }
                _ = &mut shutdown => {
                    info!("Gracefully shutting down...");
                    break;
                }
            }
        }

        drop(listener);
        graceful.shutdown().await;
        info!("All connections closed");

        Ok(())
    }

    /// Handle a single HTTP connection
    fn spawn_connection(&self, stream: TcpStream, remote_addr: SocketAddr, graceful: &GracefulShutdown) {
        let router = self.router.clone();
        let io = TokioIo::new(stream);

        let conn = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.handle(req).await) }
                }),
            );
        let conn = graceful.watch(conn);

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("HTTP connection error from {}: {}", remote_addr, e);
            }
        });
    }
}

/// Resolves on ctrl-c. If the signal handler cannot be installed, never resolves.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
