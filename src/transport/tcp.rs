use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, lookup_host};

use crate::transport::{Transport, TransportError};

/// Socket-backed transport.
///
/// Starts unconnected; [`Transport::accept`] or [`Transport::connect`]
/// attaches a socket to it.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already connected socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            peer,
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.stream()?.read(buf).await?;
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Ok(stream) = self.stream() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "socket shutdown failed");
            }
        }
    }

    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        let (stream, peer) = listener.accept().await?;
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.closed = false;
        Ok(())
    }

    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("{}:{}", host, port)))?;

        let stream = TcpStream::connect(addr).await?;
        tracing::trace!(%addr, "connected");

        self.stream = Some(stream);
        self.peer = Some(addr);
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping the socket closes it.
        self.stream = None;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn endpoint_description(&self) -> String {
        match self.peer {
            Some(peer) => peer.ip().to_string(),
            None => "unconnected".to_string(),
        }
    }
}
