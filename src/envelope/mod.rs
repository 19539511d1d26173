//! Command envelopes.
//!
//! A structured POST carries a small XML document:
//!
//! ```text
//! <Request session_id="s1">
//!   <ProcessDocument language="English" end_stage="parse">
//!     <Document href="http://host:8080/doc.xml"/>
//!   </ProcessDocument>
//!   <PatternMatch pattern_set_name="people"> ... </PatternMatch>
//! </Request>
//! ```
//!
//! [`Envelope`] parses it, lists the remote references that must be
//! resolved first, splices fetched content back in, and finally turns each
//! command element into an engine request.

pub mod command;
pub mod element;
pub mod remote;

use thiserror::Error;

pub use command::{Command, Envelope, valid_session_id};
pub use element::{Element, Node};
pub use remote::{RefTarget, Reference, RemoteRef};

/// Problems with a command envelope. All of them are client errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed XML at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("{0}")]
    Invalid(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unsupported href URL: {0}")]
    UnsupportedHref(String),
}
