use crate::error::{BittorrentError, Result};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Non-blocking byte stream under a wire session.
///
/// Both calls must return `ErrorKind::WouldBlock` instead of waiting.
/// `Ok(0)` from `try_read` means the remote end closed the stream.
pub trait Transport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Open a TCP connection to a peer, bounded by `connect_timeout`
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("Connecting to peer: {}", addr);

    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| BittorrentError::PeerError(format!("Connect to {} timed out", addr)))?
        .map_err(|e| BittorrentError::PeerError(format!("Failed to connect to {}: {}", addr, e)))?;

    stream.set_nodelay(true)?;
    Ok(stream)
}
