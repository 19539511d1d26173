use std::io::Write;

use crate::http::response::Response;
use crate::transport::{Transport, TransportError};

/// Responses always go out as HTTP/1.0; the connection (or, in subprocess
/// mode, the message) ends after the body.
const HTTP_VERSION: &str = "HTTP/1.0";

/// Response bytes: status line, headers in insertion order, blank line, body.
pub fn serialize_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(response.body.len() + 128);
    // Writes into a Vec cannot fail.
    let _ = write!(out, "{} {} {}\r\n", HTTP_VERSION, response.status.as_u16(), response.reason);
    for (name, value) in &response.headers {
        let _ = write!(out, "{}: {}\r\n", name, value);
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
    out
}

/// A serialized response, kept so the same bytes can be logged and sent.
pub struct ResponseWriter {
    bytes: Vec<u8>,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            bytes: serialize_response(response),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub async fn write_to<T: Transport>(&self, transport: &mut T) -> Result<(), TransportError> {
        transport.write_all(&self.bytes).await
    }
}
