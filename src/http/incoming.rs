//! Server side of a client connection.
//!
//! An [`IncomingConnection`] reads one request, routes it, and writes at
//! most one response. In network mode the connection is closed after that
//! response; in subprocess mode it is reset and reads the next request from
//! the same stream.
//!
//! Routing:
//!
//! | Method | Path                                   | Handler                    |
//! |--------|----------------------------------------|----------------------------|
//! | GET    | `/status`, `/status.html`              | status page                |
//! | any    | `/Shutdown`, `/Restart`, `Immediate*`  | admin action               |
//! | GET    | anything else                          | static file in `docs_root` |
//! | POST   | `/ProcessRequest`                      | command envelope           |
//! | POST   | `/sgm2apf`, `/rawtext2xml`, ...        | conversion task            |
//! | POST   | `/ping`                                | `pong <content>`           |

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::{ConvertRequest, OutputFormat, SourceKind};
use crate::envelope::{Envelope, EnvelopeError, Reference, RemoteRef};
use crate::http::connection::{ConnectionCore, ConnectionError, HttpConnection};
use crate::http::message::{HttpMessage, Method};
use crate::http::message_log::{LogEntry, MessageLog};
use crate::http::outgoing::{OutgoingConnection, ResponseHandler, build_get_request};
use crate::http::pages::{self, RequestError, VERSION};
use crate::http::reader::Direction;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::queue::task::{Task, TaskReply};
use crate::queue::tasks::{ConvertTask, task_for_command};
use crate::server::{ConnectionHandle, ServerContext, ServerHandle};
use crate::transport::Transport;

/// Delay between acknowledging an admin request and acting on it, so the
/// acknowledgement reaches the browser first.
const ADMIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    Listening,
    ReadingRequest,
    ProcessingRequest,
    DownloadingRemoteFiles,
    WaitingForTasks,
    SendingResponse,
    Closed,
}

impl IncomingState {
    fn label(&self) -> &'static str {
        match self {
            IncomingState::Listening => "Listening",
            IncomingState::ReadingRequest => "Reading request",
            IncomingState::ProcessingRequest => "Processing request",
            IncomingState::DownloadingRemoteFiles => "Downloading remote files",
            IncomingState::WaitingForTasks => "Waiting for the engine",
            IncomingState::SendingResponse => "Sending response",
            IncomingState::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminAction {
    Shutdown,
    ImmediateShutdown,
    Restart,
    ImmediateRestart,
}

impl AdminAction {
    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches('/');
        [
            AdminAction::Shutdown,
            AdminAction::ImmediateShutdown,
            AdminAction::Restart,
            AdminAction::ImmediateRestart,
        ]
        .into_iter()
        .find(|action| action.name().eq_ignore_ascii_case(name))
    }

    fn name(&self) -> &'static str {
        match self {
            AdminAction::Shutdown => "Shutdown",
            AdminAction::ImmediateShutdown => "ImmediateShutdown",
            AdminAction::Restart => "Restart",
            AdminAction::ImmediateRestart => "ImmediateRestart",
        }
    }

    fn force(&self) -> bool {
        matches!(self, AdminAction::ImmediateShutdown | AdminAction::ImmediateRestart)
    }

    fn restarts(&self) -> bool {
        matches!(self, AdminAction::Restart | AdminAction::ImmediateRestart)
    }

    fn apply(&self, server: &ServerHandle, force: bool) {
        if self.restarts() {
            server.restart(force);
        } else {
            server.stop(force);
        }
    }
}

/// Collects the outcome of one remote fetch.
#[derive(Debug, Default)]
struct FetchHandler {
    result: Option<Result<Vec<u8>, String>>,
}

impl FetchHandler {
    fn into_result(self) -> Result<Vec<u8>, String> {
        self.result
            .unwrap_or_else(|| Err("No response was received".to_string()))
    }
}

impl ResponseHandler for FetchHandler {
    fn on_response(&mut self, message: HttpMessage) {
        self.result = Some(match message.status {
            Some(200) => Ok(message.content),
            Some(code) => Err(format!("HTTP {} {}", code, message.status_description)),
            None => Err("Response has no status line".to_string()),
        });
    }

    fn on_error(&mut self, description: String) {
        self.result = Some(Err(description));
    }
}

type Handled = Result<Option<Response>, RequestError>;

pub struct IncomingConnection<T: Transport> {
    core: ConnectionCore<T>,
    ctx: Rc<ServerContext>,
    handle: Rc<ConnectionHandle>,
    state: IncomingState,
    /// `METHOD uri` of the request being served, for the status page
    request_line: String,
    response_sent: bool,
    /// Outgoing fetches started for the current request and not yet resolved
    pending_fetches: usize,
    log: Option<MessageLog>,
    log_entry: Option<LogEntry>,
}

impl<T: Transport> IncomingConnection<T> {
    pub fn new(ctx: Rc<ServerContext>, transport: T) -> Self {
        let core = ConnectionCore::new(Arc::clone(&ctx.ids), transport, Direction::Incoming);
        let endpoint = core.endpoint_description();
        let handle = ConnectionHandle::new(core.id(), endpoint.clone());
        let log = ctx
            .config
            .log_dir
            .as_deref()
            .map(|dir| MessageLog::new(dir, &endpoint));
        Self {
            core,
            ctx,
            handle,
            state: IncomingState::Listening,
            request_line: String::new(),
            response_sent: false,
            pending_fetches: 0,
            log,
            log_entry: None,
        }
    }

    pub fn handle(&self) -> Rc<ConnectionHandle> {
        Rc::clone(&self.handle)
    }

    pub fn id(&self) -> u64 {
        self.core.id()
    }

    pub fn state(&self) -> IncomingState {
        self.state
    }

    pub fn transport(&self) -> &T {
        self.core.transport()
    }

    pub fn pending_fetches(&self) -> usize {
        self.pending_fetches
    }

    /// Serves requests until the connection closes.
    pub async fn serve(&mut self) {
        let policy = self.ctx.config.unknown_header_policy;
        debug!(conn = self.core.id(), peer = %self.core.endpoint_description(), "connection opened");

        while self.state != IncomingState::Closed {
            self.set_state(IncomingState::ReadingRequest);
            self.receive(policy).await;

            match self.state {
                IncomingState::Closed => break,
                // No hook ran: the read was aborted.
                IncomingState::ReadingRequest => break,
                _ => {}
            }
            if !self.ctx.subprocess() {
                break;
            }

            self.reset();
            self.handle.set_id(self.core.id());
            self.request_line.clear();
            self.response_sent = false;
            self.set_state(IncomingState::Listening);
        }

        if !self.core.transport().is_closed() {
            self.core.transport_mut().shutdown().await;
        }
        self.close();
    }

    fn close(&mut self) {
        debug!(conn = self.core.id(), "connection closed");
        self.state = IncomingState::Closed;
        self.core.stop();
        self.handle.close();
    }

    fn set_state(&mut self, state: IncomingState) {
        self.state = state;
        let mut description = format!("{}: {}", self.core.endpoint_description(), state.label());
        if !self.request_line.is_empty() {
            description.push_str(" (");
            description.push_str(&self.request_line);
            description.push(')');
        }
        self.handle.set_description(description);
    }

    /// Sends `response` unless one was already sent for this request.
    async fn respond(&mut self, response: Response) {
        if self.response_sent {
            debug!(conn = self.core.id(), "response already sent; dropping another");
            return;
        }
        self.response_sent = true;
        self.set_state(IncomingState::SendingResponse);

        let writer = ResponseWriter::new(&response);
        if let Some(entry) = self.log_entry.take() {
            entry.write_response(writer.bytes()).await;
        }
        match writer.write_to(self.core.transport_mut()).await {
            Ok(()) => debug!(
                conn = self.core.id(),
                status = response.status.as_u16(),
                bytes = response.body.len(),
                "response sent"
            ),
            Err(e) => {
                warn!(conn = self.core.id(), error = %e, "failed to send response");
                self.state = IncomingState::Closed;
            }
        }
    }

    async fn dispatch(&mut self, message: &HttpMessage) -> Handled {
        match message.method {
            Some(Method::GET) => self.handle_get(message).await,
            Some(Method::POST) => self.handle_post(message).await,
            None => Err(RequestError::bad_request("Bad request line")),
        }
    }

    async fn handle_get(&mut self, message: &HttpMessage) -> Handled {
        let path = message.uri.split('?').next().unwrap_or_default();
        if path.eq_ignore_ascii_case("/status") || path.eq_ignore_ascii_case("/status.html") {
            let page = pages::status_page(&self.ctx.status_view());
            return Ok(Some(Response::ok("text/html", page)));
        }
        if let Some(action) = AdminAction::from_name(path) {
            return self.admin(action, message);
        }
        self.static_file(path).await.map(Some)
    }

    async fn handle_post(&mut self, message: &HttpMessage) -> Handled {
        if let Some(encoding) = message.content_encoding() {
            if !encoding.trim().is_empty() {
                return Err(RequestError::bad_request("Content-Encoding is not supported").with_extra(encoding));
            }
        }

        let name = message.uri.trim_start_matches('/');
        let conversion = match name.to_ascii_lowercase().as_str() {
            "processrequest" => {
                require_content(message)?;
                return self.process_envelope(message).await.map(Some);
            }
            "ping" => {
                let body = format!("pong {}", message.content_text());
                return Ok(Some(Response::ok("text/plain", body)));
            }
            "sgm2apf" => Some((SourceKind::Sgm, OutputFormat::Apf)),
            "rawtext2apf" => Some((SourceKind::RawText, OutputFormat::Apf)),
            "sgm2xml" => Some((SourceKind::Sgm, OutputFormat::Xml)),
            "rawtext2xml" => Some((SourceKind::RawText, OutputFormat::Xml)),
            _ => None,
        };

        if let Some((source, format)) = conversion {
            require_content(message)?;
            let (task, reply) = ConvertTask::new(ConvertRequest {
                session_id: self.default_session_id(),
                source,
                format,
                content: message.content_text(),
            });
            let task: Box<dyn Task> = Box::new(task);
            return self.run_tasks(vec![(task, reply)]).await.map(Some);
        }

        match AdminAction::from_name(name) {
            Some(action) => self.admin(action, message),
            None => Err(RequestError::not_found("Unknown URI").with_extra(message.uri.clone())),
        }
    }

    fn admin(&mut self, action: AdminAction, message: &HttpMessage) -> Handled {
        if let Some(token) = &self.ctx.config.admin_token {
            let expected = format!("Bearer {}", token);
            if message.authorization().map(str::trim) != Some(expected.as_str()) {
                warn!(conn = self.core.id(), action = action.name(), "unauthorized admin request");
                return Err(RequestError::new(StatusCode::Forbidden, "Not authorized").with_extra(action.name()));
            }
        }
        info!(conn = self.core.id(), action = action.name(), "admin request");

        // A parent process gets no acknowledgement; the stream just ends.
        if self.ctx.subprocess() {
            action.apply(&self.ctx.handle, true);
            self.state = IncomingState::Closed;
            return Ok(None);
        }

        let server = self.ctx.handle.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(ADMIN_DELAY).await;
            action.apply(&server, action.force());
        });
        Ok(Some(Response::ok("text/html", pages::admin_page(action.restarts()))))
    }

    async fn static_file(&self, path: &str) -> Result<Response, RequestError> {
        let Some(root) = &self.ctx.config.docs_root else {
            return Err(RequestError::not_found("No document root is configured").with_extra(path));
        };
        if !path.starts_with('/') || path.contains("..") {
            return Err(RequestError::bad_request("Invalid path").with_extra(path));
        }

        let mut relative = path.trim_start_matches('/').to_string();
        if relative.is_empty() || relative.ends_with('/') {
            relative.push_str("index.html");
        }
        let file = root.join(&relative);
        let bytes = tokio::fs::read(&file).await.map_err(|e| {
            debug!(file = %file.display(), error = %e, "static file unavailable");
            RequestError::bad_request("File not found or error reading file").with_extra(path)
        })?;

        let content_type = pages::content_type_for(&relative);
        if relative == "index.html" || relative == "shutdown.html" {
            let page = self.fill_placeholders(&String::from_utf8_lossy(&bytes));
            return Ok(Response::ok(content_type, page));
        }
        Ok(Response::ok(content_type, bytes))
    }

    fn fill_placeholders(&self, page: &str) -> String {
        page.replace("<!--**VERSION**-->", VERSION)
            .replace("<!--**STATUS_SECTION**-->", &pages::status_section(&self.ctx.status_view()))
            .replace("<!--**ACTION_SECTION**-->", &pages::actions_section())
            .replace("<!--**MEMORY_USAGE_SECTION**-->", &self.ctx.queue.memory_table_html())
    }

    async fn process_envelope(&mut self, message: &HttpMessage) -> Result<Response, RequestError> {
        let mut envelope = Envelope::parse(&message.content_text()).map_err(envelope_error)?;
        let references = envelope.references().map_err(envelope_error)?;

        let resolved = self.resolve_references(&mut envelope, &references).await;
        self.pending_fetches = 0;
        resolved?;

        let session_id = envelope
            .session_id()
            .map(str::to_string)
            .unwrap_or_else(|| self.default_session_id());
        let commands = envelope.into_commands(&session_id).map_err(envelope_error)?;
        debug!(conn = self.core.id(), session = %session_id, commands = commands.len(), "envelope parsed");

        let tasks = commands.into_iter().map(task_for_command).collect();
        self.run_tasks(tasks).await
    }

    /// Replaces every reference with the content it points at. Files are
    /// read inline; http references are fetched concurrently and
    /// substituted as they arrive. The first failure abandons the rest.
    async fn resolve_references(
        &mut self,
        envelope: &mut Envelope,
        references: &[Reference],
    ) -> Result<(), RequestError> {
        let mut fetches = JoinSet::new();

        for (index, reference) in references.iter().enumerate() {
            match &reference.remote {
                RemoteRef::File { url, path } => {
                    let bytes = tokio::fs::read(path)
                        .await
                        .map_err(|e| download_error(url, e.to_string()))?;
                    envelope.substitute(reference, &bytes).map_err(envelope_error)?;
                }
                RemoteRef::Http { url, host, port, path } => {
                    let outgoing = OutgoingConnection::new(
                        Arc::clone(&self.ctx.ids),
                        host.clone(),
                        *port,
                        build_get_request(host, *port, path),
                        FetchHandler::default(),
                        self.ctx.config.fetch.timeouts(),
                    );
                    debug!(conn = self.core.id(), fetch = outgoing.id(), %url, "fetching remote reference");
                    self.ctx.note_fetch_started();
                    self.pending_fetches += 1;
                    fetches.spawn_local(async move { (index, outgoing.fetch().await.into_result()) });
                }
            }
        }

        if self.pending_fetches > 0 {
            self.set_state(IncomingState::DownloadingRemoteFiles);
        }
        while let Some(joined) = fetches.join_next().await {
            self.pending_fetches -= 1;
            let (index, fetched) = joined
                .map_err(|e| RequestError::internal("Remote fetch did not complete").with_extra(e.to_string()))?;
            let reference = &references[index];
            let bytes = fetched.map_err(|e| download_error(reference.remote.url(), e))?;
            envelope.substitute(reference, &bytes).map_err(envelope_error)?;
        }
        Ok(())
    }

    /// Submits the tasks in order and merges their replies in the same
    /// order. The first failed reply becomes the response.
    async fn run_tasks(
        &mut self,
        tasks: Vec<(Box<dyn Task>, oneshot::Receiver<TaskReply>)>,
    ) -> Result<Response, RequestError> {
        self.set_state(IncomingState::WaitingForTasks);

        let mut replies = Vec::with_capacity(tasks.len());
        for (task, reply) in tasks {
            debug!(conn = self.core.id(), task = %task.describe(), "submitting task");
            if !self.ctx.queue.add_task(task) {
                return Err(RequestError::internal("Server is shutting down"));
            }
            replies.push(reply);
        }

        let mut outputs = Vec::with_capacity(replies.len());
        for reply in replies {
            match reply.await {
                Ok(TaskReply::Response(payload)) => outputs.push(payload),
                Ok(TaskReply::Error { code, explanation }) => {
                    return Err(RequestError::new(StatusCode::from_u16(code), explanation));
                }
                Err(_) => return Err(RequestError::internal("Task ended without a reply")),
            }
        }

        let body = match outputs.len() {
            1 => outputs.remove(0),
            _ => merge_responses(&outputs),
        };
        Ok(Response::ok("text/xml", body))
    }

    fn default_session_id(&self) -> String {
        format!("session_{}", self.core.id())
    }
}

impl<T: Transport> HttpConnection for IncomingConnection<T> {
    type Transport = T;

    fn core(&mut self) -> &mut ConnectionCore<T> {
        &mut self.core
    }

    async fn on_message(&mut self, message: HttpMessage) {
        let method = message.method.map(|m| m.as_str()).unwrap_or("?");
        self.request_line = format!("{} {}", method, message.uri);
        self.set_state(IncomingState::ProcessingRequest);
        info!(conn = self.core.id(), method, uri = %message.uri, bytes = message.content.len(), "request");

        if !message.is_get() {
            if let Some(log) = &self.log {
                let entry = log.entry(self.core.id());
                entry.write_request(self.core.reader().raw_message()).await;
                self.log_entry = Some(entry);
            }
        }

        match self.dispatch(&message).await {
            Ok(Some(response)) => self.respond(response).await,
            Ok(None) => {}
            Err(e) => {
                warn!(conn = self.core.id(), error = %e, "request failed");
                let response = e.to_response(self.ctx.subprocess());
                self.respond(response).await;
            }
        }
        self.log_entry = None;

        if self.state != IncomingState::Closed && !self.ctx.subprocess() {
            self.state = IncomingState::Closed;
        }
    }

    async fn on_error(&mut self, error: ConnectionError) {
        match error {
            ConnectionError::Read(e) => {
                warn!(conn = self.core.id(), error = %e, "protocol error");
                let response = RequestError::bad_request("Malformed request")
                    .with_extra(e.to_string())
                    .to_response(self.ctx.subprocess());
                self.respond(response).await;
            }
            ConnectionError::Transport(e) => {
                debug!(conn = self.core.id(), error = %e, "transport error");
            }
        }
        self.state = IncomingState::Closed;
        // A broken stream from the parent process cannot be resynchronised.
        if self.ctx.subprocess() {
            self.ctx.handle.stop(true);
        }
    }

    async fn on_eof(&mut self) {
        debug!(conn = self.core.id(), "end of stream");
        self.state = IncomingState::Closed;
        if self.ctx.subprocess() {
            info!("input closed; stopping");
            self.ctx.handle.stop(true);
        }
    }
}

fn require_content(message: &HttpMessage) -> Result<(), RequestError> {
    if message.content.is_empty() {
        return Err(RequestError::bad_request("Expected content").with_extra(message.uri.clone()));
    }
    Ok(())
}

fn envelope_error(error: EnvelopeError) -> RequestError {
    match error {
        EnvelopeError::UnknownCommand(name) => RequestError::bad_request("Unknown command").with_extra(name),
        EnvelopeError::UnsupportedHref(href) => RequestError::bad_request("Unsupported href URL").with_extra(href),
        other => RequestError::bad_request(other.to_string()),
    }
}

fn download_error(url: &str, cause: String) -> RequestError {
    RequestError::not_found(format!("Error while downloading remote URL {}", url)).with_extra(cause)
}

fn merge_responses(outputs: &[String]) -> String {
    let mut merged = String::from("<Responses>\r\n");
    for (index, output) in outputs.iter().enumerate() {
        merged.push_str(&format!("<Response index=\"{}\">{}</Response>\r\n", index, output));
    }
    merged.push_str("</Responses>\r\n");
    merged
}
