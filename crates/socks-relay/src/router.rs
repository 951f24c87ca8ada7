//! Outbound connection setup, direct or chained through an upstream SOCKS5 proxy

use crate::{
    config::ProxyConfig,
    error::{ProxyError, Result},
    socks5::{self, DestinationAddr, Host},
    with_timeout,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Decides how a destination is reached and opens the outbound stream
#[derive(Debug, Clone)]
pub struct ConnectionRouter {
    upstream: Option<String>,
    connect_timeout: Option<Duration>,
}

impl ConnectionRouter {
    pub fn new(upstream: Option<String>, connect_timeout: Option<Duration>) -> Self {
        Self {
            upstream,
            connect_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.upstream_address().map(str::to_string),
            config.limits.connect_timeout(),
        )
    }

    pub fn upstream(&self) -> Option<&str> {
        self.upstream.as_deref()
    }

    /// Open a stream that carries bytes to `dest`.
    ///
    /// The connect timeout covers the whole setup, including the chaining
    /// handshake. Every failure is reported as `ProxyError::Connect`.
    pub async fn connect(&self, dest: &DestinationAddr) -> Result<TcpStream> {
        let setup = async {
            match &self.upstream {
                Some(upstream) => self.connect_via_upstream(upstream, dest).await,
                None => self.connect_direct(dest).await,
            }
        };

        with_timeout(self.connect_timeout, setup)
            .await
            .map_err(|e| match (e, &self.upstream) {
                (e @ ProxyError::Connect(_), _) => e,
                (other, Some(upstream)) => ProxyError::connect(format!(
                    "upstream {} for {}: {}",
                    upstream, dest, other
                )),
                (other, None) => ProxyError::connect(format!("{}: {}", dest, other)),
            })
    }

    async fn connect_direct(&self, dest: &DestinationAddr) -> Result<TcpStream> {
        let target = resolve(dest).await?;
        debug!("Dialing {} for {}", target, dest);

        TcpStream::connect(target)
            .await
            .map_err(|e| ProxyError::connect(format!("{} ({}): {}", dest, target, e)))
    }

    async fn connect_via_upstream(
        &self,
        upstream: &str,
        dest: &DestinationAddr,
    ) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(upstream)
            .await
            .map_err(|e| ProxyError::connect(format!("upstream {}: {}", upstream, e)))?;

        socks5::negotiate_as_client(&mut stream).await?;

        let request = socks5::build_upstream_connect_request(dest);
        stream.write_all(&request).await?;
        socks5::parse_upstream_connect_reply(&mut stream).await?;

        debug!("Upstream {} connected to {}", upstream, dest);
        Ok(stream)
    }
}

/// Resolve a destination to the socket address to dial.
///
/// IP destinations are used as given. Domain names are looked up and the
/// first IPv4 result wins, falling back to the first result of any family.
pub async fn resolve(dest: &DestinationAddr) -> Result<SocketAddr> {
    let name = match &dest.host {
        Host::Ipv4(ip) => return Ok(SocketAddr::new(IpAddr::V4(*ip), dest.port)),
        Host::Ipv6(ip) => return Ok(SocketAddr::new(IpAddr::V6(*ip), dest.port)),
        Host::Domain(name) => name,
    };

    let host = name
        .as_str()
        .ok_or_else(|| ProxyError::connect(format!("domain {} is not valid UTF-8", name)))?;

    let resolved: Vec<SocketAddr> = match tokio::net::lookup_host((host, dest.port)).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            warn!("Lookup of {} failed: {}", host, e);
            Vec::new()
        }
    };

    select_address(&resolved)
        .ok_or_else(|| ProxyError::connect(format!("{} resolved to no addresses", host)))
}

/// First IPv4 address, else the first address in resolution order
pub fn select_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio::net::TcpListener;

    #[test]
    fn test_select_prefers_ipv4() {
        let v6: SocketAddr = "[2001:db8::1]:80".parse().unwrap();
        let v4: SocketAddr = "192.0.2.1:80".parse().unwrap();
        assert_eq!(select_address(&[v6, v4]), Some(v4));
        assert_eq!(select_address(&[v6]), Some(v6));
        assert_eq!(select_address(&[]), None);
    }

    #[tokio::test]
    async fn test_resolve_ip_is_direct() {
        let dest = DestinationAddr::ipv6(Ipv6Addr::LOCALHOST, 443);
        assert_eq!(
            resolve(&dest).await.unwrap(),
            "[::1]:443".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_resolve_localhost_prefers_ipv4() {
        let dest = DestinationAddr::domain("localhost", 8080).unwrap();
        let addr = resolve(&dest).await.unwrap();
        assert_eq!(addr, SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)));
    }

    #[tokio::test]
    async fn test_unresolvable_domain_fails_fast() {
        let dest = DestinationAddr::domain("does-not-exist.invalid", 80).unwrap();
        assert!(matches!(resolve(&dest).await, Err(ProxyError::Connect(_))));
    }

    #[tokio::test]
    async fn test_direct_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router = ConnectionRouter::new(None, Some(Duration::from_secs(5)));
        let dest = DestinationAddr::ipv4(Ipv4Addr::LOCALHOST, addr.port());
        let stream = router.connect(&dest).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_direct_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let router = ConnectionRouter::new(None, None);
        let dest = DestinationAddr::ipv4(Ipv4Addr::LOCALHOST, addr.port());
        assert!(matches!(
            router.connect(&dest).await,
            Err(ProxyError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_upstream_unreachable() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let router = ConnectionRouter::new(Some(addr.to_string()), None);
        let dest = DestinationAddr::domain("example.com", 80).unwrap();
        assert!(matches!(
            router.connect(&dest).await,
            Err(ProxyError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_timeout_covers_upstream_handshake() {
        // Upstream accepts but never answers the greeting
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let router = ConnectionRouter::new(
            Some(addr.to_string()),
            Some(Duration::from_millis(200)),
        );
        let dest = DestinationAddr::domain("example.com", 80).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), router.connect(&dest))
            .await
            .unwrap();
        assert!(
            matches!(result, Err(ProxyError::Connect(ref msg)) if msg.contains("Timeout"))
        );
    }
}
