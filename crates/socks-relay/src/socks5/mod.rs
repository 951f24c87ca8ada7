//! SOCKS5 wire protocol (RFC 1928), CONNECT only, no authentication

mod address;
mod handler;
mod handshake;
mod protocol;

pub use address::{DestinationAddr, DomainName, Host};
pub use handler::Socks5Server;
pub use handshake::{negotiate_as_client, negotiate_as_server};
pub use protocol::{
    build_upstream_connect_request, parse_upstream_connect_reply, read_client_request,
    write_server_reply,
};

/// Protocol version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// Address type tags
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 authentication methods
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
    GssApi = 0x01,
    UserPass = 0x02,
    NoAcceptable = 0xFF,
}

/// SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl Command {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::Bind),
            0x03 => Some(Self::UdpAssociate),
            _ => None,
        }
    }
}

/// SOCKS5 reply code
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Reply {
    Success = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}
