use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::http::message::HttpMessage;
use crate::http::reader::{Direction, MessageReader, Progress, ReadError, ReaderState, UnknownHeaderPolicy};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::transport::{Transport, TransportError};

const READ_CHUNK: usize = 8192;

/// Process-wide source of connection ids. Ids only label log lines.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug)]
pub enum ReadOutcome {
    Message(HttpMessage),
    Error(ConnectionError),
    /// Clean end of stream between messages.
    Eof,
    /// The connection was stopped; nothing should be reported.
    Aborted,
}

/// State shared by every HTTP connection: its id, its transport and its
/// message reader.
pub struct ConnectionCore<T> {
    id: u64,
    ids: Arc<ConnectionIds>,
    transport: T,
    reader: MessageReader,
}

impl<T: Transport> ConnectionCore<T> {
    pub fn new(ids: Arc<ConnectionIds>, transport: T, direction: Direction) -> Self {
        Self {
            id: ids.next_id(),
            ids,
            transport,
            reader: MessageReader::new(direction),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn reader(&self) -> &MessageReader {
        &self.reader
    }

    pub fn endpoint_description(&self) -> String {
        self.transport.endpoint_description()
    }

    /// Drives the transport until one message is complete.
    pub async fn read_message(&mut self, policy: UnknownHeaderPolicy) -> ReadOutcome {
        match self.reader.state() {
            ReaderState::Done => return ReadOutcome::Aborted,
            ReaderState::NotStarted => self.reader.start(policy),
            _ => {}
        }

        // Bytes left over from a previous message come first.
        let mut progress = self.reader.feed(&[]);
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            match progress {
                Ok(Progress::Complete(message)) => return ReadOutcome::Message(message),
                Ok(Progress::Ignored) => return ReadOutcome::Aborted,
                Err(e) => return ReadOutcome::Error(e.into()),
                Ok(Progress::NeedMore) => {}
            }

            let n = match self.transport.read_some(&mut chunk).await {
                Ok(n) => n,
                Err(TransportError::Closed) => return ReadOutcome::Aborted,
                Err(e) => return ReadOutcome::Error(e.into()),
            };
            if n == 0 {
                return match self.reader.finish() {
                    Ok(Some(message)) => ReadOutcome::Message(message),
                    Ok(None) => ReadOutcome::Eof,
                    Err(e) => ReadOutcome::Error(e.into()),
                };
            }
            progress = self.reader.feed(&chunk[..n]);
        }
    }

    pub async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        ResponseWriter::new(response).write_to(&mut self.transport).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.transport.write_all(bytes).await
    }

    /// Closes the transport; the reader ignores anything still in flight.
    pub fn stop(&mut self) {
        self.transport.close();
        self.reader.stop();
    }

    /// Re-arms the connection for another message under a fresh id.
    pub fn reset(&mut self) {
        self.reader.reset();
        self.id = self.ids.next_id();
    }
}

/// Read/dispatch lifecycle shared by incoming and outgoing connections.
///
/// Implementors supply the hooks; [`HttpConnection::receive`] reads one
/// message and hands it to exactly one of them.
pub trait HttpConnection {
    type Transport: Transport;

    fn core(&mut self) -> &mut ConnectionCore<Self::Transport>;

    fn on_message(&mut self, message: HttpMessage) -> impl Future<Output = ()>;

    fn on_error(&mut self, error: ConnectionError) -> impl Future<Output = ()>;

    fn on_eof(&mut self) -> impl Future<Output = ()>;

    /// Reads the next message and reports it through the hooks.
    fn receive(&mut self, policy: UnknownHeaderPolicy) -> impl Future<Output = ()> {
        async move {
            match self.core().read_message(policy).await {
                ReadOutcome::Message(message) => self.on_message(message).await,
                ReadOutcome::Error(e) => self.on_error(e).await,
                ReadOutcome::Eof => self.on_eof().await,
                ReadOutcome::Aborted => {}
            }
        }
    }

    fn stop(&mut self) {
        self.core().stop();
    }

    fn reset(&mut self) {
        self.core().reset();
    }
}
