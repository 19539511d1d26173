use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::transport::{TcpTransport, Transport, TransportError};

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {}", addr))?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts the next client. Without a listener (subprocess mode, or after
/// a stop) this never completes.
pub async fn accept_next(listener: Option<&TcpListener>) -> Result<TcpTransport, TransportError> {
    let Some(listener) = listener else {
        return std::future::pending().await;
    };
    let mut transport = TcpTransport::new();
    transport.accept(listener).await?;
    info!("Accepted connection from {}", transport.endpoint_description());
    Ok(transport)
}
