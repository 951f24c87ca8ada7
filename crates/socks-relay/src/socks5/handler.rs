//! SOCKS5 session handler

use super::{handshake, protocol, DestinationAddr, Reply};
use crate::{
    error::Result,
    relay::{self, RelayStats},
    router::ConnectionRouter,
    with_timeout,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Runs one client session from greeting to the end of its relay
#[derive(Debug, Clone)]
pub struct Socks5Server {
    router: ConnectionRouter,
    handshake_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl Socks5Server {
    pub fn new(
        router: ConnectionRouter,
        handshake_timeout: Option<Duration>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            router,
            handshake_timeout,
            idle_timeout,
        }
    }

    /// Handle an incoming SOCKS5 connection
    pub async fn handle_connection(
        &self,
        mut client: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<RelayStats> {
        let start_time = Instant::now();
        debug!("New SOCKS5 connection from {}", peer_addr);

        let dest = with_timeout(
            self.handshake_timeout,
            self.read_destination(&mut client, peer_addr),
        )
        .await?;

        let outbound = self.open_outbound(&mut client, peer_addr, &dest).await?;

        let stats = relay::relay(client, outbound, self.idle_timeout).await;

        info!(
            "SOCKS5 session {} -> {} closed after {:.1}s (up {} bytes, down {} bytes)",
            peer_addr,
            dest,
            start_time.elapsed().as_secs_f64(),
            stats.upload,
            stats.download
        );

        Ok(stats)
    }

    /// Negotiate and read the CONNECT request.
    async fn read_destination(
        &self,
        client: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<DestinationAddr> {
        handshake::negotiate_as_server(client).await?;

        let dest = protocol::read_client_request(client).await?;
        info!("SOCKS5 CONNECT from {} to {}", peer_addr, dest);

        Ok(dest)
    }

    /// Connect to `dest` and tell the client the outcome.
    ///
    /// Bounded by the router's connect timeout, so a failure always
    /// reaches the client as "connection refused".
    async fn open_outbound(
        &self,
        client: &mut TcpStream,
        peer_addr: SocketAddr,
        dest: &DestinationAddr,
    ) -> Result<TcpStream> {
        let outbound = match self.router.connect(dest).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to connect to {}: {}", dest, e);
                if let Err(reply_err) =
                    protocol::write_server_reply(client, Reply::ConnectionRefused).await
                {
                    debug!("Failure reply to {} not sent: {}", peer_addr, reply_err);
                }
                return Err(e);
            }
        };

        protocol::write_server_reply(client, Reply::Success).await?;

        Ok(outbound)
    }
}
