//! Outgoing connections: fetch one remote resource.
//!
//! An [`OutgoingConnection`] connects, writes one prepared request, reads
//! one response with the same [`MessageReader`](crate::http::reader::MessageReader)
//! the server uses, and reports the result to its [`ResponseHandler`].
//! It is consumed by the exchange.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::http::connection::{ConnectionCore, ConnectionError, ConnectionIds, HttpConnection};
use crate::http::message::HttpMessage;
use crate::http::reader::{Direction, UnknownHeaderPolicy};
use crate::transport::{TcpTransport, Transport};

/// Receives the outcome of an outgoing exchange. Exactly one of the two
/// methods is called.
pub trait ResponseHandler {
    fn on_response(&mut self, message: HttpMessage);

    fn on_error(&mut self, description: String);
}

#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    pub connect: Duration,
    /// Covers writing the request and reading the whole response
    pub request: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
        }
    }
}

pub struct OutgoingConnection<H, T = TcpTransport> {
    core: ConnectionCore<T>,
    handler: H,
    host: String,
    port: u16,
    request: Vec<u8>,
    timeouts: FetchTimeouts,
}

impl<H: ResponseHandler> OutgoingConnection<H, TcpTransport> {
    pub fn new(
        ids: Arc<ConnectionIds>,
        host: impl Into<String>,
        port: u16,
        request: Vec<u8>,
        handler: H,
        timeouts: FetchTimeouts,
    ) -> Self {
        Self::with_transport(ids, TcpTransport::new(), host, port, request, handler, timeouts)
    }
}

impl<H: ResponseHandler, T: Transport> OutgoingConnection<H, T> {
    pub fn with_transport(
        ids: Arc<ConnectionIds>,
        transport: T,
        host: impl Into<String>,
        port: u16,
        request: Vec<u8>,
        handler: H,
        timeouts: FetchTimeouts,
    ) -> Self {
        Self {
            core: ConnectionCore::new(ids, transport, Direction::Outgoing),
            handler,
            host: host.into(),
            port,
            request,
            timeouts,
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id()
    }

    /// Performs the exchange and hands the handler back.
    pub async fn fetch(mut self) -> H {
        let target = format!("{}:{}", self.host, self.port);
        tracing::debug!(conn = self.core.id(), %target, "fetching");

        let connected = timeout(
            self.timeouts.connect,
            self.core.transport_mut().connect(&self.host, self.port),
        )
        .await;
        match connected {
            Err(_) => {
                self.handler
                    .on_error(format!("Timed out connecting to {}", target));
                return self.handler;
            }
            Ok(Err(e)) => {
                self.handler
                    .on_error(format!("Unable to connect to {}: {}", target, e));
                return self.handler;
            }
            Ok(Ok(())) => {}
        }

        let request = std::mem::take(&mut self.request);
        let request_timeout = self.timeouts.request;
        let exchange = async {
            if let Err(e) = self.core.send_raw(&request).await {
                self.handler
                    .on_error(format!("Unable to send request to {}: {}", target, e));
                return;
            }
            self.receive(UnknownHeaderPolicy::Ignore).await;
        };
        if timeout(request_timeout, exchange).await.is_err() {
            self.handler
                .on_error(format!("Timed out waiting for a response from {}", target));
        }

        self.core.stop();
        self.handler
    }
}

impl<H: ResponseHandler, T: Transport> HttpConnection for OutgoingConnection<H, T> {
    type Transport = T;

    fn core(&mut self) -> &mut ConnectionCore<T> {
        &mut self.core
    }

    async fn on_message(&mut self, message: HttpMessage) {
        tracing::debug!(
            conn = self.core.id(),
            status = message.status.unwrap_or(0),
            bytes = message.content.len(),
            "response received"
        );
        self.handler.on_response(message);
    }

    async fn on_error(&mut self, error: ConnectionError) {
        self.handler.on_error(error.to_string());
    }

    async fn on_eof(&mut self) {
        self.handler
            .on_error("Connection closed before a response arrived".to_string());
    }
}

/// Request bytes for a plain GET of `path` on `host:port`.
///
/// ```
/// # use docserve::http::outgoing::build_get_request;
/// let req = build_get_request("docs.local", 8080, "/a.xml");
/// assert!(req.starts_with(b"GET /a.xml HTTP/1.0\r\nHost: docs.local:8080\r\n"));
/// ```
pub fn build_get_request(host: &str, port: u16, path: &str) -> Vec<u8> {
    let path = if path.is_empty() { "/" } else { path };
    let host_value = if port == 80 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path, host_value
    )
    .into_bytes()
}
