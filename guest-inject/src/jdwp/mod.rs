// Live collaborators over a JDWP connection

mod breakpoints;
mod target;

pub use breakpoints::JdwpBreakpoints;
pub use target::JdwpTarget;

use crate::session::SessionParts;
use crate::thread::ThreadRegistry;
use jdwp_client::JdwpConnection;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wire a session to `conn` and start dispatching its events.
///
/// `disconnected` is cancelled when the target dies or the socket closes.
pub fn session_parts(
    conn: JdwpConnection,
    disconnected: CancellationToken,
) -> (SessionParts, JoinHandle<()>) {
    let threads = ThreadRegistry::new();
    let breakpoints = JdwpBreakpoints::new(conn.clone(), threads.clone());
    let dispatcher = breakpoints.spawn_dispatcher(disconnected.clone());

    let parts = SessionParts {
        target: Arc::new(JdwpTarget::new(conn)),
        breakpoints,
        threads,
        disconnected,
    };
    (parts, dispatcher)
}
