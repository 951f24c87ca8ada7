//! SOCKS5 destination address codec
//!
//! Wire format: atyp(1B) | addr(var) | port(2B BE)
//!   atyp=0x01: IPv4, addr=4 bytes
//!   atyp=0x03: domain, addr=1 byte len + name
//!   atyp=0x04: IPv6, addr=16 bytes

use super::{ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
use crate::error::{ProxyError, Result};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A domain name as carried on the wire: at most 255 raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName(Vec<u8>);

impl DomainName {
    pub const MAX_LEN: usize = u8::MAX as usize;

    pub fn new(name: impl Into<Vec<u8>>) -> Result<Self> {
        let name = name.into();
        if name.len() > Self::MAX_LEN {
            return Err(ProxyError::protocol(format!(
                "domain name of {} bytes exceeds {} bytes",
                name.len(),
                Self::MAX_LEN
            )));
        }
        Ok(Self(name))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The name as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Host part of a destination; the variant is the SOCKS5 address type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ipv4(Ipv4Addr),
    Domain(DomainName),
    Ipv6(Ipv6Addr),
}

impl Host {
    /// SOCKS5 address type tag
    pub fn atyp(&self) -> u8 {
        match self {
            Self::Ipv4(_) => ATYP_IPV4,
            Self::Domain(_) => ATYP_DOMAIN,
            Self::Ipv6(_) => ATYP_IPV6,
        }
    }
}

/// Destination requested by a client, or bound address reported by an upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationAddr {
    pub host: Host,
    pub port: u16,
}

impl DestinationAddr {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Self::new(Host::Ipv4(ip), port)
    }

    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Self::new(Host::Ipv6(ip), port)
    }

    pub fn domain(name: impl Into<Vec<u8>>, port: u16) -> Result<Self> {
        Ok(Self::new(Host::Domain(DomainName::new(name)?), port))
    }

    /// Read the address body and port for an already-consumed type byte.
    pub async fn read_from<R>(reader: &mut R, atyp: u8) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let host = match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                read_field(reader, &mut octets, "IPv4 address").await?;
                Host::Ipv4(Ipv4Addr::from(octets))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                read_field(reader, &mut len, "domain length").await?;
                let mut name = vec![0u8; len[0] as usize];
                read_field(reader, &mut name, "domain name").await?;
                Host::Domain(DomainName(name))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                read_field(reader, &mut octets, "IPv6 address").await?;
                Host::Ipv6(Ipv6Addr::from(octets))
            }
            _ => {
                return Err(ProxyError::protocol(format!(
                    "Invalid address type: {:#04x}",
                    atyp
                )));
            }
        };

        let mut port = [0u8; 2];
        read_field(reader, &mut port, "port").await?;

        Ok(Self::new(host, u16::from_be_bytes(port)))
    }

    /// Append atyp, address body and big-endian port to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.host.atyp());
        match &self.host {
            Host::Ipv4(ip) => buf.put_slice(&ip.octets()),
            Host::Domain(name) => {
                buf.put_u8(name.as_bytes().len() as u8);
                buf.put_slice(name.as_bytes());
            }
            Host::Ipv6(ip) => buf.put_slice(&ip.octets()),
        }
        buf.put_u16(self.port);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.to_vec()
    }

    fn encoded_len(&self) -> usize {
        let body = match &self.host {
            Host::Ipv4(_) => 4,
            Host::Domain(name) => 1 + name.as_bytes().len(),
            Host::Ipv6(_) => 16,
        };
        1 + body + 2
    }
}

impl fmt::Display for DestinationAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv4(ip) => write!(f, "{}:{}", ip, self.port),
            Host::Domain(name) => write!(f, "{}:{}", name, self.port),
            Host::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

async fn read_field<R>(reader: &mut R, buf: &mut [u8], field: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    reader
        .read_exact(buf)
        .await
        .map_err(|e| ProxyError::from_wire(e, field))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(bytes: &[u8]) -> Result<DestinationAddr> {
        let mut body = &bytes[1..];
        tokio_test::block_on(DestinationAddr::read_from(&mut body, bytes[0]))
    }

    #[test]
    fn test_encode_ipv4() {
        let addr = DestinationAddr::ipv4(Ipv4Addr::new(93, 184, 216, 34), 80);
        assert_eq!(addr.to_bytes(), vec![0x01, 93, 184, 216, 34, 0x00, 0x50]);
        assert_eq!(addr.to_string(), "93.184.216.34:80");
    }

    #[test]
    fn test_encode_domain_has_length_prefix() {
        let addr = DestinationAddr::domain("example.com", 443).unwrap();
        let bytes = addr.to_bytes();
        assert_eq!(bytes[0], ATYP_DOMAIN);
        assert_eq!(bytes[1], 11);
        assert_eq!(&bytes[2..13], b"example.com");
        assert_eq!(&bytes[13..], &[0x01, 0xBB]);
        assert_eq!(addr.to_string(), "example.com:443");
    }

    #[test]
    fn test_ipv6_display_uses_brackets() {
        let addr = DestinationAddr::ipv6(Ipv6Addr::LOCALHOST, 22);
        assert_eq!(addr.to_string(), "[::1]:22");
        assert_eq!(addr.to_bytes().len(), 19);
    }

    #[test]
    fn test_domain_length_limit() {
        assert!(DomainName::new(vec![b'a'; 255]).is_ok());
        assert!(matches!(
            DomainName::new(vec![b'a'; 256]),
            Err(ProxyError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_address_type() {
        let result = decode(&[0x02, 1, 2, 3, 4, 0, 80]);
        assert!(matches!(result, Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn test_truncated_body() {
        assert!(matches!(
            decode(&[0x01, 10, 0, 0]),
            Err(ProxyError::Protocol(_))
        ));
        assert!(matches!(
            decode(&[0x03, 5, b'a', b'b']),
            Err(ProxyError::Protocol(_))
        ));
        // Address present, port cut short
        assert!(matches!(
            decode(&[0x01, 10, 0, 0, 1, 0x1F]),
            Err(ProxyError::Protocol(_))
        ));
    }

    fn destination_strategy() -> impl Strategy<Value = DestinationAddr> {
        let host = prop_oneof![
            any::<[u8; 4]>().prop_map(|o| Host::Ipv4(Ipv4Addr::from(o))),
            proptest::collection::vec(any::<u8>(), 0..=255)
                .prop_map(|name| Host::Domain(DomainName(name))),
            any::<[u8; 16]>().prop_map(|o| Host::Ipv6(Ipv6Addr::from(o))),
        ];
        (host, any::<u16>()).prop_map(|(host, port)| DestinationAddr::new(host, port))
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(addr in destination_strategy()) {
            let bytes = addr.to_bytes();
            prop_assert_eq!(bytes.len(), addr.encoded_len());
            prop_assert_eq!(decode(&bytes).unwrap(), addr);
        }
    }
}
