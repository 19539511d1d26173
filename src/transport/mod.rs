//! Byte-stream transports.
//!
//! Every HTTP connection owns exactly one [`Transport`]. Two implementations
//! exist and are chosen when the connection is built:
//!
//! - **`tcp`**: a network socket, able to accept and connect
//! - **`stdio`**: a reader/writer pair, normally the process's stdin/stdout
//!   ("subprocess mode")
//!
//! Callers only ever see the trait, so the HTTP layer is identical for both.

pub mod stdio;
pub mod tcp;

use std::future::Future;

use thiserror::Error;
use tokio::net::TcpListener;

pub use stdio::StdioTransport;
pub use tcp::TcpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The operation does not exist for this kind of transport.
    #[error("{operation} is not supported by the {transport} transport")]
    Unsupported {
        operation: &'static str,
        transport: &'static str,
    },

    /// The transport was closed locally; reads and writes are abandoned.
    #[error("transport is closed")]
    Closed,

    #[error("transport is not connected")]
    NotConnected,

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A non-blocking byte stream.
///
/// Reads and writes complete through the returned futures; the reactor
/// resumes the caller once the operation has finished.
pub trait Transport {
    /// Short name used in logs and capability errors.
    fn kind(&self) -> &'static str;

    /// Reads whatever is available, returning `Ok(0)` at end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>>;

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), TransportError>>;

    /// Flushes and half-closes the write side once a response is complete.
    fn shutdown(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Waits for the next client on `listener` and binds it to this transport.
    fn accept(&mut self, listener: &TcpListener) -> impl Future<Output = Result<(), TransportError>> {
        let _ = listener;
        let transport = self.kind();
        async move {
            Err(TransportError::Unsupported {
                operation: "accept",
                transport,
            })
        }
    }

    /// Resolves `host` and connects this transport to it.
    fn connect(&mut self, host: &str, port: u16) -> impl Future<Output = Result<(), TransportError>> {
        let _ = (host, port);
        let transport = self.kind();
        async move {
            Err(TransportError::Unsupported {
                operation: "connect",
                transport,
            })
        }
    }

    /// Closes the underlying resource. Calling it again does nothing.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Remote endpoint for diagnostics (an IP address, or `stdio`).
    fn endpoint_description(&self) -> String;
}
