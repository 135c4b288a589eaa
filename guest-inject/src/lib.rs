// Guest-language debugger injection over JDWP
//
// Uploads a bundle of accessor classes into a running JVM and drives them:
// - Pinning remote objects against collection
// - Class definition through a resolved loader
// - Synchronous calls on stopped threads, with a breakpoint fallback
// - Per-session engine handling and a coordinator across sessions

pub mod breakpoints;
pub mod bundle;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod forward;
pub mod handler;
pub mod inject;
pub mod jdwp;
pub mod options;
pub mod pin;
pub mod session;
pub mod stopped;
pub mod target;
pub mod thread;

#[cfg(test)]
mod mock;

pub use bundle::ArtifactBundle;
pub use config::EngineConfig;
pub use coordinator::{DebugCoordinator, SessionState};
pub use error::{InjectError, InjectResult};
pub use forward::GuestBreakpoint;
pub use handler::EngineHandler;
pub use inject::upload_accessor_bundle;
pub use options::BoolOption;
pub use session::{DebugSession, RemoteAccessor, SessionEvent, SessionParts};
pub use stopped::run_while_thread_stopped;
