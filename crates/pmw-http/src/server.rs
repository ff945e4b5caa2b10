//! HTTP Server
//!
//! Serves the composed router over plain HTTP with connect info enabled
//! (handlers and middleware can see the peer address) and shuts down
//! gracefully on Ctrl-C or SIGTERM.

use crate::middleware::{apply_middleware, MiddlewareConfig};
use crate::{Result, ServerError};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    /// Public hostname for logging/display
    pub public_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            public_host: gethostname::gethostname().to_string_lossy().to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.port)
            .parse()
            .map_err(|_| ServerError::AddressError(format!("{}:{}", self.bind_host, self.port)))
    }
}

/// HTTP server for the gateway router
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Bind the configured address and serve until `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!("HTTP server listening on http://{}", local_addr);
        info!("Public URL: http://{}:{}", self.config.public_host, local_addr.port());

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

/// Builder for HttpServer
pub struct HttpServerBuilder {
    bind_host: String,
    port: u16,
    public_host: Option<String>,
    router: Option<Router>,
    middleware_config: MiddlewareConfig,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            public_host: None,
            router: None,
            middleware_config: MiddlewareConfig::default(),
        }
    }

    /// Set bind address (host:port format or just port)
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        if let Some((host, port)) = addr.rsplit_once(':') {
            self.bind_host = host.to_string();
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        } else if let Ok(p) = addr.parse::<u16>() {
            self.port = p;
        }
        self
    }

    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = Some(host.into());
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn middleware(mut self, config: MiddlewareConfig) -> Self {
        self.middleware_config = config;
        self
    }

    /// Build the server with the middleware stack applied
    pub fn build(self) -> Result<HttpServer> {
        let router = self
            .router
            .ok_or_else(|| ServerError::RouterError("no router configured".to_string()))?;
        let router = apply_middleware(router, &self.middleware_config);

        let public_host = self
            .public_host
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string());

        let config = ServerConfig {
            bind_host: self.bind_host,
            port: self.port,
            public_host,
        };

        Ok(HttpServer { config, router })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[test]
    fn test_bind_parsing() {
        let server = HttpServer::builder()
            .bind("127.0.0.1:9090")
            .router(Router::new())
            .build()
            .unwrap();
        assert_eq!(server.config().bind_host, "127.0.0.1");
        assert_eq!(server.config().port, 9090);

        let server = HttpServer::builder()
            .bind("[::1]:7070")
            .router(Router::new())
            .build()
            .unwrap();
        assert_eq!(server.config().socket_addr().unwrap().port(), 7070);

        let server = HttpServer::builder()
            .bind("3000")
            .router(Router::new())
            .build()
            .unwrap();
        assert_eq!(server.config().port, 3000);
        assert_eq!(server.config().bind_host, "0.0.0.0");
    }

    #[test]
    fn test_build_requires_router() {
        assert!(matches!(
            HttpServer::builder().build(),
            Err(ServerError::RouterError(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_with_peer_address_and_shuts_down() {
        let router = Router::new().route(
            "/peer",
            get(|ConnectInfo(addr): ConnectInfo<SocketAddr>| async move { addr.ip().to_string() }),
        );
        let server = HttpServer::builder()
            .router(router)
            .public_host("test")
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_on(listener, async move {
            let _ = stopped.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /peer HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("127.0.0.1"), "{response}");

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
