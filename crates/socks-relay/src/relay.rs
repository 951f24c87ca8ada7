//! Bidirectional byte relay between a client and its outbound connection

use crate::error::{ProxyError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to outbound
    pub upload: u64,
    /// Outbound to client
    pub download: u64,
}

/// Copy bytes both ways until the session is over.
///
/// Each direction runs as its own task. A client that reaches EOF has only
/// half-closed: the outbound write half is shut down and the response keeps
/// flowing until the outbound side ends too. Any other first completion
/// (outbound EOF, an error, an idle timeout) aborts the remaining task,
/// which drops its halves and closes both sockets.
pub async fn relay(
    client: TcpStream,
    outbound: TcpStream,
    idle_timeout: Option<Duration>,
) -> RelayStats {
    let (client_reader, client_writer) = client.into_split();
    let (outbound_reader, outbound_writer) = outbound.into_split();

    let upload = Arc::new(AtomicU64::new(0));
    let download = Arc::new(AtomicU64::new(0));

    let mut client_to_outbound = tokio::spawn(copy_direction(
        client_reader,
        outbound_writer,
        "client->outbound",
        upload.clone(),
        idle_timeout,
    ));

    let mut outbound_to_client = tokio::spawn(copy_direction(
        outbound_reader,
        client_writer,
        "outbound->client",
        download.clone(),
        idle_timeout,
    ));

    let (finished, result) = tokio::select! {
        result = &mut client_to_outbound => {
            if matches!(result, Ok(Ok(()))) {
                debug!("Client half-closed, draining outbound->client");
                ("outbound->client", (&mut outbound_to_client).await)
            } else {
                outbound_to_client.abort();
                ("client->outbound", result)
            }
        }
        result = &mut outbound_to_client => {
            client_to_outbound.abort();
            ("outbound->client", result)
        }
    };

    match result {
        Ok(Ok(())) => debug!("Relay ended at {}", finished),
        Ok(Err(e)) => debug!("Relay ended at {}: {}", finished, e),
        Err(e) => debug!("Relay task {} failed: {}", finished, e),
    }

    RelayStats {
        upload: upload.load(Ordering::Relaxed),
        download: download.load(Ordering::Relaxed),
    }
}

/// Copy one direction, shutting down the writer once the reader hits EOF.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    counter: Arc<AtomicU64>,
    idle_timeout: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer);
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ProxyError::Timeout)??,
            None => read.await?,
        };

        if n == 0 {
            debug!(
                "Connection closed ({}) after {} bytes",
                direction,
                counter.load(Ordering::Relaxed)
            );
            break;
        }

        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;

        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_direction_counts_bytes() {
        let mut input: &[u8] = b"hello relay";
        let mut output = Vec::new();
        let counter = Arc::new(AtomicU64::new(0));

        copy_direction(&mut input, &mut output, "test", counter.clone(), None)
            .await
            .unwrap();

        assert_eq!(output, b"hello relay");
        assert_eq!(counter.load(Ordering::Relaxed), 11);
    }

    #[tokio::test]
    async fn test_copy_direction_idle_timeout() {
        let (reader, _keep_open) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let counter = Arc::new(AtomicU64::new(0));

        let result = copy_direction(
            reader,
            &mut output,
            "test",
            counter,
            Some(Duration::from_millis(50)),
        )
        .await;

        assert!(matches!(result, Err(ProxyError::Timeout)));
    }
}
