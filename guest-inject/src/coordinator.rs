// Debug session coordinator
//
// Watches every attached session for guest runtimes being built, including
// runtimes that existed before the debugger attached, and hands them to the
// session's engine handler.

use crate::breakpoints::{ArmedBreakpoint, BreakpointHit, BreakpointId, TriggerBreakpoint};
use crate::error::InjectResult;
use crate::forward::{GuestBreakpoint, GuestBreakpoints};
use crate::handler::EngineHandler;
use crate::session::{DebugSession, SessionId};
use crate::thread::TargetThread;
use jdwp_client::{ReferenceTypeId, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Attached,
    AwaitingRuntimeBuild,
    RuntimeDetected,
    Detached,
}

/// What the coordinator's listener tasks share about one session
struct SessionWatch {
    session: Arc<DebugSession>,
    handler: Arc<EngineHandler>,
    state: Mutex<SessionState>,
    probed: AtomicBool,
}

impl SessionWatch {
    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(session = %self.session.id(), from = ?*current, to = ?state, "session state");
            *current = state;
        }
    }
}

struct SessionEntry {
    watch: Arc<SessionWatch>,
    breakpoints: Vec<BreakpointId>,
    tasks: Vec<JoinHandle<()>>,
}

/// Holds a session id while its breakpoints are being installed
struct Reservation<'a> {
    adding: &'a Mutex<HashSet<SessionId>>,
    id: SessionId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.adding.lock().remove(&self.id);
    }
}

#[derive(Default)]
pub struct DebugCoordinator {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    adding: Mutex<HashSet<SessionId>>,
    states: Mutex<HashMap<SessionId, SessionState>>,
    breakpoints: GuestBreakpoints,
}

impl DebugCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known guest breakpoints, handed to every session's handler
    pub fn guest_breakpoints(&self) -> &GuestBreakpoints {
        &self.breakpoints
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        if let Some(entry) = self.sessions.lock().get(id) {
            return Some(*entry.watch.state.lock());
        }
        self.states.lock().get(id).copied()
    }

    pub fn handler(&self, id: &str) -> Option<Arc<EngineHandler>> {
        self.sessions
            .lock()
            .get(id)
            .map(|entry| entry.watch.handler.clone())
    }

    /// Start watching a session for guest runtimes
    pub async fn session_added(&self, session: Arc<DebugSession>) -> InjectResult<()> {
        let id = session.id().to_string();
        let Some(_reservation) = self.reserve(&id) else {
            warn!(session = %id, "session already registered");
            return Ok(());
        };

        let watch = Arc::new(SessionWatch {
            handler: EngineHandler::new(session.clone(), self.breakpoints.clone()),
            session,
            state: Mutex::new(SessionState::Attached),
            probed: AtomicBool::new(false),
        });
        let session = &watch.session;
        let runtime = &session.config().runtime;

        // Entry only: a permanent exit breakpoint would slow every method return
        let builder = session
            .breakpoints()
            .add(TriggerBreakpoint::entry(&runtime.builder))
            .await?;
        let trigger = match session
            .breakpoints()
            .add(TriggerBreakpoint::entry(&runtime.service_trigger))
            .await
        {
            Ok(trigger) => trigger,
            Err(e) => {
                remove_breakpoint(session, builder.id).await;
                return Err(e);
            }
        };

        let breakpoints = vec![builder.id, trigger.id];
        let tasks = vec![
            tokio::spawn(watch_builder(watch.clone(), builder.hits)),
            tokio::spawn(watch_service_trigger(watch.clone(), trigger.hits)),
            tokio::spawn(probe_existing_runtimes(watch.clone())),
        ];
        watch.set_state(SessionState::AwaitingRuntimeBuild);
        info!(session = %id, "watching for guest runtimes");

        self.states.lock().remove(&id);
        self.sessions.lock().insert(
            id,
            SessionEntry {
                watch,
                breakpoints,
                tasks,
            },
        );
        Ok(())
    }

    fn reserve(&self, id: &str) -> Option<Reservation<'_>> {
        let sessions = self.sessions.lock();
        let mut adding = self.adding.lock();
        if sessions.contains_key(id) || !adding.insert(id.to_string()) {
            return None;
        }
        Some(Reservation {
            adding: &self.adding,
            id: id.to_string(),
        })
    }

    /// Stop watching a session and release everything it holds in the target
    pub async fn session_removed(&self, id: &str) {
        let Some(entry) = self.sessions.lock().remove(id) else {
            return;
        };
        let watch = entry.watch;

        for breakpoint in entry.breakpoints {
            remove_breakpoint(&watch.session, breakpoint).await;
        }
        for task in &entry.tasks {
            task.abort();
        }
        watch.handler.destroy().await;
        watch.session.close().await;

        watch.set_state(SessionState::Detached);
        self.states
            .lock()
            .insert(id.to_string(), SessionState::Detached);
        info!(session = %id, "session detached");
    }

    pub async fn breakpoint_added(&self, breakpoint: GuestBreakpoint) {
        if !self.breakpoints.add(breakpoint.clone()) {
            return;
        }
        for handler in self.handlers() {
            handler.breakpoint_added(&breakpoint).await;
        }
    }

    pub async fn breakpoint_removed(&self, breakpoint: &GuestBreakpoint) {
        if !self.breakpoints.remove(breakpoint) {
            return;
        }
        for handler in self.handlers() {
            handler.breakpoint_removed(breakpoint).await;
        }
    }

    fn handlers(&self) -> Vec<Arc<EngineHandler>> {
        self.sessions
            .lock()
            .values()
            .map(|entry| entry.watch.handler.clone())
            .collect()
    }
}

async fn watch_builder(watch: Arc<SessionWatch>, mut hits: mpsc::UnboundedReceiver<BreakpointHit>) {
    let session = &watch.session;
    while let Some(hit) = hits.recv().await {
        let thread = hit.thread;
        debug!(session = %session.id(), thread = thread.id(), "guest runtime build entered");

        let exit = TriggerBreakpoint::exit(&session.config().runtime.builder).on_thread(thread.id());
        match session.breakpoints().add(exit).await {
            Ok(armed) => {
                tokio::spawn(capture_built_runtime(watch.clone(), armed));
            }
            Err(e) => warn!(session = %session.id(), error = %e, "failed to arm build exit breakpoint"),
        }
        resume(session, &thread).await;
    }
}

/// One-shot exit breakpoint: takes the built runtime from the return value
async fn capture_built_runtime(watch: Arc<SessionWatch>, mut armed: ArmedBreakpoint) {
    let session = &watch.session;
    let disconnected = session.disconnected();
    let hit = tokio::select! {
        _ = disconnected.cancelled() => None,
        hit = armed.hits.recv() => hit,
    };
    remove_breakpoint(session, armed.id).await;

    let Some(hit) = hit else {
        return;
    };
    match hit.return_value.as_ref().and_then(Value::as_object) {
        Some(runtime) => {
            info!(session = %session.id(), runtime, "guest runtime built");
            watch.set_state(SessionState::RuntimeDetected);
            watch
                .handler
                .new_guest_runtime_instance(runtime, &hit.thread)
                .await;
        }
        None => debug!(session = %session.id(), "runtime builder returned nothing"),
    }
    resume(session, &hit.thread).await;
}

async fn watch_service_trigger(
    watch: Arc<SessionWatch>,
    mut hits: mpsc::UnboundedReceiver<BreakpointHit>,
) {
    while let Some(hit) = hits.recv().await {
        watch.handler.init(&hit.thread).await;
        resume(&watch.session, &hit.thread).await;
    }
}

async fn probe_existing_runtimes(watch: Arc<SessionWatch>) {
    if !watch.session.wait_running().await {
        return;
    }
    if watch.probed.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Err(e) = probe(&watch).await {
        if !e.is_disconnect() {
            warn!(session = %watch.session.id(), error = %e, "probe for existing runtimes failed");
        }
    }
}

/// Pause one thread in guest code and hand every existing runtime to the handler
async fn probe(watch: &SessionWatch) -> InjectResult<()> {
    let session = &watch.session;
    let target = session.target();
    let runtime = &session.config().runtime;

    let runtime_types = target.classes_by_name(&runtime.runtime_type).await?;
    let mut count = 0;
    for ty in &runtime_types {
        count += target.instance_count(*ty).await?;
    }
    if count == 0 {
        debug!(session = %session.id(), "no guest runtimes from before attach");
        return Ok(());
    }
    info!(session = %session.id(), count, "guest runtimes exist from before attach");

    let mut armed = session
        .breakpoints()
        .add(TriggerBreakpoint::entry(&runtime.existing_probe))
        .await?;
    let disconnected = session.disconnected();
    let hit = tokio::select! {
        _ = disconnected.cancelled() => None,
        hit = armed.hits.recv() => hit,
    };
    remove_breakpoint(session, armed.id).await;
    let Some(hit) = hit else {
        return Ok(());
    };

    let result = hand_over_existing(watch, &runtime_types, &hit.thread).await;
    resume(session, &hit.thread).await;
    result
}

async fn hand_over_existing(
    watch: &SessionWatch,
    runtime_types: &[ReferenceTypeId],
    thread: &Arc<TargetThread>,
) -> InjectResult<()> {
    for ty in runtime_types {
        for runtime in watch.session.target().instances(*ty).await? {
            watch.set_state(SessionState::RuntimeDetected);
            watch.handler.new_guest_runtime_instance(runtime, thread).await;
        }
    }
    Ok(())
}

async fn remove_breakpoint(session: &DebugSession, id: BreakpointId) {
    if let Err(e) = session.breakpoints().remove(id).await {
        debug!(session = %session.id(), breakpoint = id.0, error = %e, "failed to remove breakpoint");
    }
}

async fn resume(session: &DebugSession, thread: &TargetThread) {
    if let Err(e) = thread.resume(session.target().as_ref()).await {
        if !e.is_disconnect() {
            debug!(session = %session.id(), thread = thread.id(), error = %e, "resume failed");
        }
    }
}
