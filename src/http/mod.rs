//! HTTP protocol implementation.
//!
//! HTTP/1.0 over any [`Transport`](crate::transport::Transport), in both
//! directions.
//!
//! - **`reader`**: incremental message parser shared by both directions
//! - **`message`**: a parsed request or response
//! - **`connection`**: the read/dispatch lifecycle common to all connections
//! - **`incoming`**: server side; routes requests and writes responses
//! - **`outgoing`**: client side; fetches one remote resource
//! - **`response`** / **`writer`**: building and serializing responses
//! - **`pages`**: error pages, status page, admin acknowledgements
//! - **`message_log`**: raw request/response dumps
//!
//! # Incoming connection states
//!
//! ```text
//!        ┌─────────────┐
//!        │  Listening  │
//!        └──────┬──────┘
//!               ▼
//!        ┌──────────────────┐
//!        │  ReadingRequest  │ ── EOF / protocol error ──► Closed
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐      ┌────────────────────────┐
//!        │ ProcessingRequest│ ───► │ DownloadingRemoteFiles │
//!        └──────┬───────────┘      └───────────┬────────────┘
//!               │    ┌─────────────────┐       │
//!               ├──► │ WaitingForTasks │ ◄─────┘
//!               ▼    └────────┬────────┘
//!        ┌──────────────────┐ │
//!        │  SendingResponse │◄┘
//!        └──────┬───────────┘
//!               ├─ subprocess → Listening (same stream)
//!               └─ network → Closed
//! ```

pub mod connection;
pub mod incoming;
pub mod message;
pub mod message_log;
pub mod outgoing;
pub mod pages;
pub mod reader;
pub mod response;
pub mod writer;
