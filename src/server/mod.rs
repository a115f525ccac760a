//! Server infrastructure: acceptor, session driver, telemetry.
//!
//! The acceptor owns the listening socket and spawns one task per
//! accepted connection. Accept errors are logged and never terminate the
//! server; the only fatal condition outside a session is a bind failure
//! at startup. Each session runs the handshake state machine under a
//! deadline, then hands the transport pair to the relay with the deadline
//! cleared.

mod config;
mod metrics;

pub use config::{Credentials, ServerConfig, ServerConfigFile};
pub use metrics::{MetricsSnapshot, ServerMetrics};

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::pool::BufferPool;
use crate::proxy::handshake::Handshake;
use crate::proxy::relay;

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    pool: BufferPool,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let pool = BufferPool::new(config.buffer_size, config.max_idle_buffers);

        Self {
            config: Arc::new(config),
            pool,
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    /// Get a handle to the server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind the listening socket.
    ///
    /// Failure here is fatal: the caller is expected to terminate the
    /// process, since nothing can be served without a listener.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.listen_addr, self.config.listen_port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("listening on {}", addr);
        Ok(listener)
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until the task is dropped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        // Telemetry task: periodically log the in-flight session count.
        // Observational only, nothing acts on the value.
        let report_metrics = Arc::clone(&self.metrics);
        let report_interval = self.config.report_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(report_interval).await;
                tracing::info!(
                    "status: {} active connections",
                    report_metrics.active_connections()
                );
                tracing::debug!("{}", report_metrics.format_report());
            }
        });

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let config = Arc::clone(&self.config);
                    let pool = self.pool.clone();
                    let metrics = Arc::clone(&self.metrics);

                    tokio::spawn(async move {
                        metrics.increment_connections();

                        if let Err(e) =
                            handle_session(config, pool, Arc::clone(&metrics), stream).await
                        {
                            tracing::debug!("session from {} ended: {}", peer_addr, e);
                        }

                        // Every exit path of the handler runs through here
                        metrics.decrement_connections();
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
    }
}

/// Drive one session: handshake under the deadline, then the relay with
/// the deadline cleared.
///
/// Dropping `stream` on any error path is what closes the transport; the
/// pooled handshake buffer rides along into the relay as the
/// client-to-destination copy buffer.
async fn handle_session(
    config: Arc<ServerConfig>,
    pool: BufferPool,
    metrics: Arc<ServerMetrics>,
    mut stream: TcpStream,
) -> Result<()> {
    stream.set_nodelay(true)?;

    let mut buf = pool.acquire();
    let deadline = config.handshake_timeout;

    let handshake = Handshake::new(&mut stream, &mut buf, &config.credentials);
    let established = match timeout(deadline, handshake.run()).await {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => {
            match &e {
                Error::Authentication => metrics.increment_auth_failures(),
                Error::Dial(_) => metrics.increment_dial_failures(),
                _ => metrics.increment_handshake_errors(),
            }
            return Err(e);
        }
        Err(_) => {
            metrics.increment_handshake_errors();
            return Err(Error::Timeout(deadline.as_millis() as u64));
        }
    };

    tracing::debug!("tunnel established to {}", established.request.endpoint());

    let down_buf = pool.acquire();
    relay::run(stream, established.upstream, buf, down_buf, metrics).await;

    Ok(())
}
