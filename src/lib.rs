//! docserve - embedded HTTP front end for a document-processing engine.
//!
//! Network-facing work runs on a single reactor thread; engine work runs on
//! the one worker thread owned by [`queue::WorkQueue`].

pub mod config;
pub mod engine;
pub mod envelope;
pub mod http;
pub mod queue;
pub mod server;
pub mod transport;
