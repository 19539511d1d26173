use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use docserve::config::Config;
use docserve::engine::echo::EchoLoader;
use docserve::queue::WorkQueue;
use docserve::server::{ExitStatus, Server};

#[derive(Parser, Debug)]
#[command(name = "docserve", version)]
#[command(about = "HTTP front end for the document engine", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8000
    #[arg(short, long)]
    listen: Option<String>,

    /// Serve one connection over stdin/stdout
    #[arg(long)]
    subprocess: bool,

    /// Directory for request/response logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory of static files served on GET
    #[arg(long)]
    docs_root: Option<PathBuf>,

    /// More output; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = build_config(&cli)?;

    // stdout carries HTTP in subprocess mode; logs always go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level()));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // One queue for the life of the process.
    let queue = WorkQueue::start(Box::new(EchoLoader)).context("cannot start the engine worker")?;
    let settings = cfg.engine_settings();
    let server = Server::new(cfg, queue.clone());
    queue.initialize(settings)?;

    match server.run()? {
        ExitStatus::Exit => Ok(ExitCode::SUCCESS),
        ExitStatus::Failure => Ok(ExitCode::FAILURE),
        ExitStatus::Restart => {
            tracing::info!("Restarting");
            drop(queue);
            restart()
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cfg.apply_env(|key| std::env::var(key).ok());

    if let Some(listen) = &cli.listen {
        cfg.listen_addr = listen.clone();
    }
    if cli.subprocess {
        cfg.subprocess = true;
    }
    if let Some(dir) = &cli.log_dir {
        cfg.log_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.docs_root {
        cfg.docs_root = Some(dir.clone());
    }
    cfg.verbosity += i32::from(cli.verbose);

    cfg.validate()?;
    Ok(cfg)
}

fn restart() -> anyhow::Result<ExitCode> {
    let exe = std::env::current_exe().context("cannot locate the current executable")?;
    let mut command = Command::new(exe);
    command.args(std::env::args_os().skip(1));
    reexec(command)
}

#[cfg(unix)]
fn reexec(mut command: Command) -> anyhow::Result<ExitCode> {
    use std::os::unix::process::CommandExt;

    // Only returns on failure.
    let err = command.exec();
    Err(err).context("cannot re-exec the server")
}

#[cfg(not(unix))]
fn reexec(mut command: Command) -> anyhow::Result<ExitCode> {
    let status = command.status().context("cannot restart the server")?;
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
