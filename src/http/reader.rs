//! Incremental HTTP message reader.
//!
//! The reader never touches a socket. Bytes are pushed in with
//! [`MessageReader::feed`] as the transport delivers them, and the reader
//! reports when a full message has arrived:
//!
//! ```text
//! NotStarted ─start()─▶ ReadingFirstLine ─▶ ReadingHeaders ─▶ ReadingContent ─▶ Done
//!                                                   └──── no content ────────────▲
//! ```

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use thiserror::Error;

use crate::http::message::{HttpMessage, Method};

/// Upper bound on the size of the request/status line plus headers.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Headers the server recognises. Everything else is "unknown" and handled
/// according to the [`UnknownHeaderPolicy`].
const KNOWN_HEADERS: &[&str] = &[
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Accept-Ranges",
    "Allow",
    "Authorization",
    "Cache-Control",
    "Connection",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Type",
    "Cookie",
    "Date",
    "Expires",
    "From",
    "Host",
    "If-Modified-Since",
    "Keep-Alive",
    "Last-Modified",
    "Link",
    "Location",
    "MIME-Version",
    "Origin",
    "Pragma",
    "Referer",
    "Retry-After",
    "Server",
    "Title",
    "URI",
    "User-Agent",
    "WWW-Authenticate",
    "X-Requested-With",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server side: the first line is a request line.
    Incoming,
    /// Client side: the first line is a status line.
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    ReadingFirstLine,
    ReadingHeaders,
    ReadingContent,
    Done,
}

/// What to do with a header the server does not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownHeaderPolicy {
    /// Fail the message.
    Reject,
    /// Skip the header.
    Ignore,
    /// Skip the header on GET requests, fail any other message.
    #[default]
    IgnoreForGet,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Bad request line: {0}")]
    BadRequestLine(String),

    #[error("Bad status line: {0}")]
    BadStatusLine(String),

    #[error("Unable to parse header line: {0}")]
    BadHeaderLine(String),

    #[error("Unknown header: {0}")]
    UnknownHeader(String),

    #[error("Bad Content-Length: {0}")]
    BadContentLength(String),

    #[error("Bad escape sequence in URI: {0}")]
    BadUriEscape(String),

    #[error("Message header too large")]
    HeadTooLarge,

    #[error("Connection closed before the message was complete")]
    UnexpectedEof,

    #[error("Reader was not started")]
    NotStarted,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    NeedMore,
    Complete(HttpMessage),
    /// The reader is `Done`; the bytes were dropped.
    Ignored,
}

pub struct MessageReader {
    direction: Direction,
    policy: UnknownHeaderPolicy,
    state: ReaderState,
    buf: BytesMut,
    message: HttpMessage,
    /// Header line waiting for possible continuation lines.
    pending_header: Option<String>,
    /// Bytes belonging to the current message, kept for message logs.
    raw: Vec<u8>,
    head_size: usize,
    read_to_eof: bool,
}

impl MessageReader {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            policy: UnknownHeaderPolicy::default(),
            state: ReaderState::NotStarted,
            buf: BytesMut::with_capacity(4096),
            message: HttpMessage::default(),
            pending_header: None,
            raw: Vec::new(),
            head_size: 0,
            read_to_eof: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Arms the reader for a new message.
    pub fn start(&mut self, policy: UnknownHeaderPolicy) {
        self.policy = policy;
        self.message = HttpMessage::default();
        self.pending_header = None;
        self.raw.clear();
        self.head_size = 0;
        self.read_to_eof = false;
        self.state = ReaderState::ReadingFirstLine;
    }

    /// Moves to `Done`; anything fed afterwards is ignored.
    pub fn stop(&mut self) {
        self.state = ReaderState::Done;
        self.buf.clear();
    }

    /// Returns to `NotStarted`, keeping bytes that arrived after the
    /// previous message so a pipelined request is not lost.
    pub fn reset(&mut self) {
        self.state = ReaderState::NotStarted;
        self.message = HttpMessage::default();
        self.pending_header = None;
        self.raw.clear();
        self.head_size = 0;
        self.read_to_eof = false;
    }

    /// Bytes of the current (or just completed) message as received.
    pub fn raw_message(&self) -> &[u8] {
        &self.raw
    }

    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Feeds newly arrived bytes and advances the state machine as far as
    /// possible.
    pub fn feed(&mut self, data: &[u8]) -> Result<Progress, ReadError> {
        match self.state {
            ReaderState::NotStarted => return Err(ReadError::NotStarted),
            ReaderState::Done => return Ok(Progress::Ignored),
            _ => {}
        }
        self.buf.extend_from_slice(data);

        loop {
            match self.state {
                ReaderState::ReadingFirstLine => {
                    let Some(line) = self.next_line()? else {
                        return Ok(Progress::NeedMore);
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.parse_first_line(&line)?;
                    self.state = ReaderState::ReadingHeaders;
                }
                ReaderState::ReadingHeaders => {
                    let Some(line) = self.next_line()? else {
                        return Ok(Progress::NeedMore);
                    };
                    if line.is_empty() {
                        self.flush_pending_header()?;
                        if let Some(message) = self.end_of_headers() {
                            return Ok(Progress::Complete(message));
                        }
                    } else if line.starts_with([' ', '\t']) {
                        match self.pending_header.as_mut() {
                            Some(pending) => {
                                pending.push(' ');
                                pending.push_str(line.trim());
                            }
                            None => return Err(ReadError::BadHeaderLine(line)),
                        }
                    } else {
                        self.flush_pending_header()?;
                        self.pending_header = Some(line);
                    }
                }
                ReaderState::ReadingContent => {
                    if self.read_to_eof {
                        self.take_content(self.buf.len());
                        return Ok(Progress::NeedMore);
                    }
                    let expected = self.message.content_length.unwrap_or(0);
                    let wanted = expected - self.message.content.len();
                    self.take_content(wanted.min(self.buf.len()));
                    if self.message.content.len() == expected {
                        return Ok(Progress::Complete(self.complete()));
                    }
                    return Ok(Progress::NeedMore);
                }
                ReaderState::NotStarted | ReaderState::Done => return Ok(Progress::Ignored),
            }
        }
    }

    /// Called when the transport reaches end of stream.
    ///
    /// Returns `Ok(None)` for a clean end between messages, the message if
    /// it was being read until end of stream, and an error otherwise.
    pub fn finish(&mut self) -> Result<Option<HttpMessage>, ReadError> {
        match self.state {
            ReaderState::ReadingContent if self.read_to_eof => Ok(Some(self.complete())),
            ReaderState::NotStarted | ReaderState::Done => Ok(None),
            ReaderState::ReadingFirstLine
                if self.raw.iter().chain(self.buf.iter()).all(u8::is_ascii_whitespace) =>
            {
                self.state = ReaderState::Done;
                Ok(None)
            }
            _ => {
                self.state = ReaderState::Done;
                Err(ReadError::UnexpectedEof)
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, ReadError> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.head_size + self.buf.len() > MAX_HEAD_SIZE {
                return Err(ReadError::HeadTooLarge);
            }
            return Ok(None);
        };
        let line = self.buf.split_to(pos + 1);
        self.raw.extend_from_slice(&line);
        self.head_size += line.len();
        if self.head_size > MAX_HEAD_SIZE {
            return Err(ReadError::HeadTooLarge);
        }

        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        Ok(Some(String::from_utf8_lossy(&line[..end]).into_owned()))
    }

    fn take_content(&mut self, n: usize) {
        let chunk = &self.buf[..n];
        self.message.content.extend_from_slice(chunk);
        self.raw.extend_from_slice(chunk);
        self.buf.advance(n);
    }

    fn parse_first_line(&mut self, line: &str) -> Result<(), ReadError> {
        match self.direction {
            Direction::Incoming => self.parse_request_line(line),
            Direction::Outgoing => self.parse_status_line(line),
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ReadError> {
        let bad = || ReadError::BadRequestLine(line.trim().to_string());

        let mut parts = line.split_whitespace();
        let method = parts.next().and_then(Method::from_str).ok_or_else(bad)?;
        let uri = parts.next().ok_or_else(bad)?;
        let version = parts.next().and_then(parse_version).ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }

        self.message.method = Some(method);
        self.message.uri = decode_uri(uri)?;
        self.message.version = version.to_string();
        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), ReadError> {
        let bad = || ReadError::BadStatusLine(line.trim().to_string());

        let (version, rest) = line.split_once(char::is_whitespace).ok_or_else(bad)?;
        let version = parse_version(version).ok_or_else(bad)?;
        let rest = rest.trim_start();
        let (code, description) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }

        self.message.version = version.to_string();
        self.message.status = Some(code.parse().map_err(|_| bad())?);
        self.message.status_description = description.trim().to_string();
        Ok(())
    }

    fn flush_pending_header(&mut self) -> Result<(), ReadError> {
        let Some(line) = self.pending_header.take() else {
            return Ok(());
        };
        let (name, value) = split_header(&line).ok_or(ReadError::BadHeaderLine(line.clone()))?;

        let Some(known) = KNOWN_HEADERS.iter().find(|h| h.eq_ignore_ascii_case(name)) else {
            let ignore = match self.policy {
                UnknownHeaderPolicy::Reject => false,
                UnknownHeaderPolicy::Ignore => true,
                UnknownHeaderPolicy::IgnoreForGet => self.message.is_get(),
            };
            if ignore {
                tracing::debug!(header = name, "ignoring unknown header");
                return Ok(());
            }
            return Err(ReadError::UnknownHeader(name.to_string()));
        };

        if known.eq_ignore_ascii_case("Content-Length") {
            let length = value
                .parse::<usize>()
                .map_err(|_| ReadError::BadContentLength(value.clone()))?;
            self.message.content_length = Some(length);
        }
        self.message.headers.push((known.to_string(), value));
        Ok(())
    }

    /// Decides what follows the blank line. Returns the message if it has
    /// no content.
    fn end_of_headers(&mut self) -> Option<HttpMessage> {
        match (self.message.content_length, self.direction) {
            (Some(0), _) | (None, Direction::Incoming) => Some(self.complete()),
            (Some(_), _) => {
                self.state = ReaderState::ReadingContent;
                None
            }
            (None, Direction::Outgoing) => {
                self.read_to_eof = true;
                self.state = ReaderState::ReadingContent;
                None
            }
        }
    }

    fn complete(&mut self) -> HttpMessage {
        self.state = ReaderState::Done;
        std::mem::take(&mut self.message)
    }
}

/// `HTTP/1.1` → `1.1`
fn parse_version(s: &str) -> Option<&str> {
    let version = s.strip_prefix("HTTP/")?;
    let (major, minor) = version.split_once('.')?;
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    (digits(major) && digits(minor)).then_some(version)
}

/// Splits `Name: value`, collapsing runs of blanks in the value.
fn split_header(line: &str) -> Option<(&str, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim_end();
    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid_name {
        return None;
    }

    let value = value.split([' ', '\t']).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    if value.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Percent-decodes a request URI; `+` becomes a space.
pub fn decode_uri(uri: &str) -> Result<String, ReadError> {
    let bytes = uri.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| ReadError::BadUriEscape(uri.to_string()))?;
                out.push(hex);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}
