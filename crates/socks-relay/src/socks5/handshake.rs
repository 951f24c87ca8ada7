//! SOCKS5 method negotiation, as server towards clients and as client towards an upstream

use super::{AuthMethod, SOCKS_VERSION};
use crate::error::{ProxyError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Largest greeting a client can send: version, count and 255 methods.
const MAX_GREETING_LEN: usize = 256;

/// Accept a client greeting and select "no authentication".
///
/// The greeting must arrive in a single read. Nothing is written back
/// unless the client offers method 0x00.
pub async fn negotiate_as_server<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_GREETING_LEN];
    let n = stream.read(&mut buf).await?;

    if n < 2 || buf[0] != SOCKS_VERSION {
        return Err(ProxyError::protocol(format!(
            "Invalid SOCKS greeting ({} bytes, version {:#04x})",
            n, buf[0]
        )));
    }

    let nmethods = buf[1] as usize;
    let methods = buf[2..n].get(..nmethods).ok_or_else(|| {
        ProxyError::protocol(format!(
            "Greeting announces {} methods but carries {}",
            nmethods,
            n - 2
        ))
    })?;

    debug!("Client offers auth methods: {:02x?}", methods);

    if !methods.contains(&(AuthMethod::NoAuth as u8)) {
        return Err(ProxyError::protocol("No acceptable authentication method"));
    }

    stream
        .write_all(&[SOCKS_VERSION, AuthMethod::NoAuth as u8])
        .await?;
    Ok(())
}

/// Offer "no authentication" to an upstream proxy and check it was selected.
pub async fn negotiate_as_client<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, 0x01, AuthMethod::NoAuth as u8])
        .await?;

    let mut response = [0u8; 2];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| ProxyError::from_wire(e, "method selection"))?;

    if response != [SOCKS_VERSION, AuthMethod::NoAuth as u8] {
        return Err(ProxyError::protocol(format!(
            "Upstream refused no-auth negotiation: {:02x?}",
            response
        )));
    }

    Ok(())
}
