use std::io::{self, ErrorKind, Read, Write};

use crate::transport::{Transport, TransportError};

/// Transport over a reader/writer pair, normally the process's stdin and
/// stdout.
///
/// Standard streams have no portable asynchronous interface, so reads and
/// writes are performed as blocking calls and the completion is then handed
/// back through the reactor with a yield. Callers still see an ordinary
/// asynchronous transport. Subprocess mode only ever runs one connection, so
/// the blocking call never starves another client.
pub struct StdioTransport<R = io::Stdin, W = io::Stdout> {
    reader: R,
    writer: W,
    closed: bool,
}

impl StdioTransport {
    /// Transport bound to this process's stdin and stdout.
    pub fn from_process() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R: Read, W: Write> StdioTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            closed: false,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<R: Read, W: Write> Transport for StdioTransport<R, W> {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let n = loop {
            match self.reader.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        tokio::task::yield_now().await;
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(buf)?;
        self.writer.flush()?;
        tokio::task::yield_now().await;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.flush() {
            tracing::debug!(error = %e, "flush on close failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn endpoint_description(&self) -> String {
        "stdio".to_string()
    }
}
