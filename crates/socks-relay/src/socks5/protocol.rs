//! SOCKS5 CONNECT requests and replies

use super::{Command, DestinationAddr, Reply, SOCKS_VERSION};
use crate::error::{ProxyError, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Read a client request and return its destination.
///
/// Only CONNECT is accepted; BIND and UDP ASSOCIATE are protocol errors.
pub async fn read_client_request<R>(reader: &mut R) -> Result<DestinationAddr>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| ProxyError::from_wire(e, "request header"))?;

    if header[0] != SOCKS_VERSION {
        return Err(ProxyError::protocol(format!(
            "Invalid SOCKS version: {}",
            header[0]
        )));
    }

    match Command::from_byte(header[1]) {
        Some(Command::Connect) => {}
        Some(command) => {
            return Err(ProxyError::protocol(format!(
                "{:?} command not supported",
                command
            )));
        }
        None => {
            return Err(ProxyError::protocol(format!(
                "Invalid command: {}",
                header[1]
            )));
        }
    }

    DestinationAddr::read_from(reader, header[3]).await
}

/// Send the fixed 10-byte reply; the bound address is always 0.0.0.0:0.
pub async fn write_server_reply<W>(writer: &mut W, reply: Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = [SOCKS_VERSION, reply as u8, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

    writer.write_all(&response).await?;
    writer.flush().await?;

    Ok(())
}

/// CONNECT request sent to an upstream proxy on behalf of a client.
pub fn build_upstream_connect_request(dest: &DestinationAddr) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3 + 1 + 256 + 2);
    buf.put_slice(&[SOCKS_VERSION, Command::Connect as u8, 0x00]);
    dest.encode(&mut buf);
    buf.to_vec()
}

/// Read an upstream reply, failing on a non-zero status.
///
/// The bound address is drained so that the stream is positioned at the
/// first relayed byte.
pub async fn parse_upstream_connect_reply<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| ProxyError::from_wire(e, "upstream reply header"))?;

    if header[1] != Reply::Success as u8 {
        return Err(ProxyError::protocol(format!(
            "Upstream request failed with status {:#04x}",
            header[1]
        )));
    }

    let bound = DestinationAddr::read_from(reader, header[3]).await?;
    debug!("Upstream bound address {}", bound);

    Ok(())
}
