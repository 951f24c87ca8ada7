//! Minimal SOCKS5 relay
//!
//! This crate accepts SOCKS5 CONNECT requests without authentication and
//! relays each one either directly to its destination or through an
//! upstream SOCKS5 proxy.

pub mod config;
pub mod error;
pub mod relay;
pub mod router;
pub mod socks5;

pub use config::{LimitsConfig, ProxyConfig};
pub use error::{ProxyError, Result};
pub use relay::RelayStats;
pub use router::ConnectionRouter;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Listening SOCKS5 relay
pub struct ProxyServer {
    config: ProxyConfig,
    listener: TcpListener,
    sessions: Option<Arc<Semaphore>>,
    handler: socks5::Socks5Server,
}

impl ProxyServer {
    /// Validate the configuration and bind the listen address
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen.as_str()).await?;
        let router = ConnectionRouter::from_config(&config);
        let handler = socks5::Socks5Server::new(
            router,
            config.limits.handshake_timeout(),
            config.limits.idle_timeout(),
        );
        let sessions = config
            .limits
            .max_sessions
            .map(|max| Arc::new(Semaphore::new(max)));

        Ok(Self {
            config,
            listener,
            sessions,
            handler,
        })
    }

    /// Bind and serve until the process exits
    pub async fn start(config: ProxyConfig) -> Result<()> {
        Self::bind(config).await?.serve().await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accept connections and run each session on its own task
    pub async fn serve(self) -> Result<()> {
        info!(
            "SOCKS5 server running on {} ({})",
            self.local_addr()?,
            match self.config.upstream_address() {
                Some(upstream) => format!("via upstream {}", upstream),
                None => "direct".to_string(),
            }
        );

        loop {
            // Wait for a free slot before accepting when sessions are capped
            let permit = match &self.sessions {
                // The semaphore is never closed
                Some(sessions) => sessions.clone().acquire_owned().await.ok(),
                None => None,
            };

            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            info!("New connection from {}", peer_addr);
            let handler = self.handler.clone();

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handler.handle_connection(socket, peer_addr).await {
                    warn!("SOCKS5 session from {} failed: {}", peer_addr, e);
                }
                debug!("Session from {} released", peer_addr);
            });
        }
    }
}

/// Run `fut`, failing with `ProxyError::Timeout` once `limit` elapses
pub(crate) async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ProxyError::Timeout)?,
        None => fut.await,
    }
}
