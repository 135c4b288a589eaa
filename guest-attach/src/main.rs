// guest-attach - guest-language debugging for a running JVM
//
// Attaches over JDWP, uploads the accessor bundle when a guest runtime shows
// up, and keeps the session alive until the target goes away or Ctrl-C.

use anyhow::{bail, Context, Result};
use clap::Parser;
use guest_inject::{
    jdwp, ArtifactBundle, BoolOption, DebugCoordinator, DebugSession, EngineConfig,
    GuestBreakpoint, SessionEvent,
};
use jdwp_client::JdwpConnection;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "guest-attach", version, about)]
struct Args {
    /// JDWP host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// JDWP port
    #[arg(short, long)]
    port: u16,

    /// Accessor bundle: a jar/zip or a directory of .class files
    #[arg(short, long)]
    bundle: PathBuf,

    /// Engine configuration (JSON); built-in defaults otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Let guest debugging step into internal sources
    #[arg(long)]
    developer_mode: bool,

    /// Resume the VM after attaching, for targets started with suspend=y
    #[arg(long)]
    resume: bool,

    /// Guest breakpoint to install in every runtime
    #[arg(long = "breakpoint", value_name = "URI:LINE")]
    breakpoints: Vec<GuestBreakpoint>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guest_attach=info".parse()?)
                .add_directive("guest_inject=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let bundle = ArtifactBundle::load(&args.bundle)
        .with_context(|| format!("loading bundle {}", args.bundle.display()))?;
    if bundle.is_empty() {
        bail!("no classes found in {}", args.bundle.display());
    }
    info!("Loaded {} classes from {}", bundle.artifacts().len(), args.bundle.display());

    let conn = JdwpConnection::connect(&args.host, args.port)
        .await
        .with_context(|| format!("attaching to {}:{}", args.host, args.port))?;

    // Closing the session must not tear down the connection underneath it
    let disconnected = conn.disconnected().child_token();
    let (parts, dispatcher) = jdwp::session_parts(conn.clone(), disconnected.clone());
    let session = DebugSession::new(
        format!("{}:{}", args.host, args.port),
        parts,
        Arc::new(config),
        Arc::new(bundle),
        BoolOption::new(args.developer_mode),
    );
    let mut events = session.subscribe();

    let coordinator = DebugCoordinator::new();
    for breakpoint in args.breakpoints {
        coordinator.breakpoint_added(breakpoint).await;
    }
    coordinator.session_added(session.clone()).await?;

    if args.resume {
        conn.resume_all().await.context("resuming target")?;
    }
    session.mark_running();
    info!(session = %session.id(), "attached, waiting for guest runtimes");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, detaching");
                break;
            }
            _ = disconnected.cancelled() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::ServiceClassAvailable { accessor }) => {
                    info!("Accessor uploaded (type {:x})", accessor);
                }
                Ok(SessionEvent::ServiceInstanceCreated { service, runtime }) => {
                    info!("Guest debugger service @{:x} for runtime @{:x}", service, runtime);
                }
                Ok(SessionEvent::Disconnected) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(missed)) => warn!("Missed {} session events", missed),
            },
        }
    }

    coordinator.session_removed(session.id()).await;
    dispatcher.abort();
    info!("Detached");
    Ok(())
}
