use tokio::sync::oneshot;

use crate::engine::{DocumentEngine, PatternEngine};

/// Which engine a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Document,
    PatternSets,
}

/// Borrow of the engine a task runs against. Only exists on the worker
/// thread, for the duration of one `run`.
pub enum EngineHandle<'a> {
    Document(&'a mut dyn DocumentEngine),
    /// `None` when no pattern sets were configured.
    PatternSets(Option<&'a dyn PatternEngine>),
}

/// Result of a task as seen by the connection that submitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReply {
    /// Engine output, sent as `text/xml`.
    Response(String),
    Error { code: u16, explanation: String },
}

/// Sending half of a task's reply channel.
///
/// The worker thread never touches connection state: it sends a plain
/// [`TaskReply`] and the reactor picks it up. Only the first reply is
/// delivered.
#[derive(Debug)]
pub struct Responder {
    tx: Option<oneshot::Sender<TaskReply>>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<TaskReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn send_response(&mut self, payload: String) {
        self.reply(TaskReply::Response(payload));
    }

    pub fn report_error(&mut self, code: u16, explanation: impl Into<String>) {
        self.reply(TaskReply::Error {
            code,
            explanation: explanation.into(),
        });
    }

    pub fn has_replied(&self) -> bool {
        self.tx.is_none()
    }

    fn reply(&mut self, reply: TaskReply) {
        let Some(tx) = self.tx.take() else {
            tracing::debug!("task already replied; dropping second reply");
            return;
        };
        // The connection may have gone away in the meantime.
        if tx.send(reply).is_err() {
            tracing::debug!("task reply receiver dropped");
        }
    }
}

/// One unit of engine work.
///
/// A task is built on the reactor thread, moved into the queue, and run
/// exactly once on the worker thread.
pub trait Task: Send {
    fn kind(&self) -> EngineKind;

    /// Short label for logs and the status page.
    fn describe(&self) -> String;

    /// Runs the task and reports through its responder. Returns whether it
    /// succeeded.
    fn run(&mut self, engine: EngineHandle<'_>) -> bool;

    fn responder(&mut self) -> &mut Responder;
}
