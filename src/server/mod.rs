//! The server: reactor, acceptor and lifecycle.
//!
//! Everything network-facing runs on one thread: a `current_thread` tokio
//! runtime driving a [`LocalSet`]. Connections are spawned with
//! `spawn_local` and share an `Rc<ServerContext>`, so connection state
//! cannot leave that thread. The only cross-thread traffic is tasks going
//! to the [`WorkQueue`] and plain replies and [`ServerCommand`]s coming back.

pub mod listener;
pub mod registry;

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinSet, LocalSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::ConnectionIds;
use crate::http::incoming::IncomingConnection;
use crate::http::pages::StatusView;
use crate::queue::{QueueState, WorkQueue};
use crate::transport::{StdioTransport, TcpTransport, Transport};

pub use registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exit,
    /// The process should re-exec itself.
    Restart,
    /// The engines failed to load.
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Stop { force: bool },
    Restart { force: bool },
    Fatal(String),
}

/// Posts lifecycle requests to the reactor. Cheap to clone, usable from any
/// thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Non-forced: stop accepting and let open connections finish.
    /// Forced: also close every open connection.
    pub fn stop(&self, force: bool) {
        self.post(ServerCommand::Stop { force });
    }

    pub fn restart(&self, force: bool) {
        self.post(ServerCommand::Restart { force });
    }

    pub fn fatal(&self, message: &str) {
        self.post(ServerCommand::Fatal(message.to_string()));
    }

    fn post(&self, command: ServerCommand) {
        if self.tx.send(command).is_err() {
            debug!("server already stopped; ignoring command");
        }
    }
}

/// State shared by the connections of one server. Lives on the reactor
/// thread.
pub struct ServerContext {
    pub config: Config,
    pub queue: Arc<WorkQueue>,
    pub handle: ServerHandle,
    pub ids: Arc<ConnectionIds>,
    pub registry: ConnectionRegistry,
    fetches_started: Cell<u64>,
}

impl ServerContext {
    pub fn new(config: Config, queue: Arc<WorkQueue>, handle: ServerHandle) -> Rc<Self> {
        Rc::new(Self {
            config,
            queue,
            handle,
            ids: ConnectionIds::new(),
            registry: ConnectionRegistry::new(),
            fetches_started: Cell::new(0),
        })
    }

    pub fn subprocess(&self) -> bool {
        self.config.subprocess
    }

    pub fn note_fetch_started(&self) {
        self.fetches_started.set(self.fetches_started.get() + 1);
    }

    /// Outgoing fetches started since the server was created.
    pub fn fetches_started(&self) -> u64 {
        self.fetches_started.get()
    }

    pub fn status_view(&self) -> StatusView {
        StatusView {
            queue_status: self.queue.status(),
            connections: self
                .registry
                .active()
                .iter()
                .map(|h| (h.id(), h.description()))
                .collect(),
            tasks_processed: self.queue.tasks_processed(),
            tasks_failed: self.queue.tasks_failed(),
            tasks_remaining: self.queue.num_tasks_remaining(),
            throughput: self.queue.throughput(false),
        }
    }
}

pub struct Server {
    ctx: Rc<ServerContext>,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
}

impl Server {
    /// Wires the server to `queue`. A fatal queue error becomes
    /// [`ExitStatus::Failure`].
    pub fn new(config: Config, queue: Arc<WorkQueue>) -> Self {
        let (handle, commands) = ServerHandle::channel();
        let fatal = handle.clone();
        queue.set_fatal_error_callback(Box::new(move |message| fatal.fatal(message)));
        Self {
            ctx: ServerContext::new(config, queue, handle),
            commands,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.ctx.handle.clone()
    }

    pub fn context(&self) -> Rc<ServerContext> {
        Rc::clone(&self.ctx)
    }

    /// Runs the reactor on the calling thread until the server stops.
    pub fn run(self) -> anyhow::Result<ExitStatus> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = LocalSet::new();
        local.block_on(&runtime, async move {
            let handle = self.handle();
            tokio::task::spawn_local(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                    handle.stop(false);
                }
            });
            self.serve().await
        })
    }

    /// Serves in the configured mode. Must run inside a [`LocalSet`].
    pub async fn serve(self) -> anyhow::Result<ExitStatus> {
        if self.ctx.subprocess() {
            return Ok(self.serve_transport(StdioTransport::from_process()).await);
        }
        let listener = listener::bind(&self.ctx.config.listen_addr).await?;
        self.serve_on(listener).await
    }

    /// Accepts clients on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> anyhow::Result<ExitStatus> {
        let addr = listener.local_addr()?;
        Ok(self.run_loop(Some(listener), Some(addr), None::<TcpTransport>).await)
    }

    /// Serves exactly one pre-attached connection, as in subprocess mode.
    pub async fn serve_transport<T: Transport + 'static>(self, transport: T) -> ExitStatus {
        self.run_loop(None, None, Some(transport)).await
    }

    async fn run_loop<T: Transport + 'static>(
        mut self,
        acceptor: Option<TcpListener>,
        addr: Option<SocketAddr>,
        attached: Option<T>,
    ) -> ExitStatus {
        if let Some(status) = self.wait_for_engine().await {
            drop(acceptor);
            self.shutdown_queue().await;
            return status;
        }
        if let (Some(addr), Some(path)) = (addr, &self.ctx.config.server_info_file) {
            write_server_info(path, &addr.to_string()).await;
        }

        let mut connections = JoinSet::new();
        if let Some(transport) = attached {
            spawn_connection(&self.ctx, &mut connections, transport);
        }

        let mut acceptor = acceptor;
        let mut exit = ExitStatus::Exit;
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    let (force, status) = match command {
                        ServerCommand::Stop { force } => (force, ExitStatus::Exit),
                        ServerCommand::Restart { force } => (force, ExitStatus::Restart),
                        ServerCommand::Fatal(message) => {
                            error!(error = %message, "fatal error; stopping");
                            (true, ExitStatus::Failure)
                        }
                    };
                    info!(force, ?status, "stopping server");
                    exit = status;
                    acceptor = None;
                    if force {
                        self.ctx.registry.close_all();
                    }
                    break;
                }

                accepted = listener::accept_next(acceptor.as_ref()) => match accepted {
                    Ok(transport) => spawn_connection(&self.ctx, &mut connections, transport),
                    Err(e) => warn!(error = %e, "accept failed"),
                },

                Some(joined) = connections.join_next() => log_joined(joined),
            }
        }
        drop(acceptor);

        // Let open connections finish; a later forced stop cuts them off.
        while !connections.is_empty() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ServerCommand::Stop { force: true }) => self.ctx.registry.close_all(),
                    Some(ServerCommand::Restart { force }) => {
                        exit = ExitStatus::Restart;
                        if force {
                            self.ctx.registry.close_all();
                        }
                    }
                    Some(ServerCommand::Fatal(message)) => {
                        error!(error = %message, "fatal error while draining");
                        exit = ExitStatus::Failure;
                        self.ctx.registry.close_all();
                    }
                    Some(_) | None => {}
                },
                Some(joined) = connections.join_next() => log_joined(joined),
            }
        }

        self.shutdown_queue().await;
        info!(?exit, "server stopped");
        exit
    }

    /// Waits until the engines are loaded. Returns the exit status if the
    /// server must stop instead.
    async fn wait_for_engine(&mut self) -> Option<ExitStatus> {
        let mut state = self.ctx.queue.subscribe();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                QueueState::Ready => return None,
                QueueState::Failed(message) => {
                    error!(error = %message, "engine failed to load");
                    return Some(ExitStatus::Failure);
                }
                QueueState::ShutDown => return Some(ExitStatus::Failure),
                QueueState::Starting => {}
            }

            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Some(ExitStatus::Failure);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(ServerCommand::Fatal(message)) => {
                        error!(error = %message, "engine failed to load");
                        return Some(ExitStatus::Failure);
                    }
                    Some(ServerCommand::Stop { .. }) => return Some(ExitStatus::Exit),
                    Some(ServerCommand::Restart { .. }) => return Some(ExitStatus::Restart),
                    None => return Some(ExitStatus::Failure),
                },
            }
        }
    }

    async fn shutdown_queue(&self) {
        let queue = Arc::clone(&self.ctx.queue);
        if let Err(e) = tokio::task::spawn_blocking(move || queue.shutdown(true)).await {
            error!(error = %e, "work queue shutdown failed");
        }
    }
}

fn spawn_connection<T: Transport + 'static>(
    ctx: &Rc<ServerContext>,
    connections: &mut JoinSet<()>,
    transport: T,
) {
    let mut conn = IncomingConnection::new(Rc::clone(ctx), transport);
    let handle = conn.handle();
    ctx.registry.register(&handle);

    connections.spawn_local(async move {
        tokio::select! {
            _ = conn.serve() => {}
            _ = handle.closed() => debug!(conn = handle.id(), "connection closed by server"),
        }
    });
}

fn log_joined(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "connection task panicked");
        }
    }
}

async fn write_server_info(path: &std::path::Path, addr: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(file = %path.display(), error = %e, "cannot create server info directory");
            return;
        }
    }
    match tokio::fs::write(path, format!("{}\n", addr)).await {
        Ok(()) => info!(file = %path.display(), "server info written"),
        Err(e) => warn!(file = %path.display(), error = %e, "cannot write server info"),
    }
}
