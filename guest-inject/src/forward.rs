// Guest breakpoint forwarding
//
// Line breakpoints set in guest-language sources live in the debugger; each
// service instance created in the target gets its own copy through the
// accessor. Remote breakpoint handles stay pinned until the handler goes away.

use crate::error::{InjectError, InjectResult};
use crate::inject::invoke_accessor;
use crate::pin::PinRegistry;
use crate::session::{DebugSession, RemoteAccessor};
use crate::stopped::run_while_thread_stopped;
use crate::thread::TargetThread;
use jdwp_client::{ObjectId, TypeTag, Value};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestBreakpoint {
    pub uri: String,
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub ignore_count: u32,
}

impl GuestBreakpoint {
    pub fn new(uri: impl Into<String>, line: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            condition: None,
            ignore_count: 0,
        }
    }
}

impl fmt::Display for GuestBreakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uri, self.line)
    }
}

/// `<uri>:<line>`; the uri may itself contain colons
impl FromStr for GuestBreakpoint {
    type Err = InjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InjectError::Config(format!("invalid guest breakpoint '{}'", s));
        let (uri, line) = s.rsplit_once(':').ok_or_else(invalid)?;
        if uri.is_empty() {
            return Err(invalid());
        }
        let line = line.parse().map_err(|_| invalid())?;
        Ok(Self::new(uri, line))
    }
}

/// Breakpoints known to the debugger, shared by every session's handler
#[derive(Debug, Clone, Default)]
pub struct GuestBreakpoints {
    inner: Arc<Mutex<Vec<GuestBreakpoint>>>,
}

impl GuestBreakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` when the breakpoint was already known
    pub fn add(&self, breakpoint: GuestBreakpoint) -> bool {
        let mut known = self.inner.lock();
        if known.contains(&breakpoint) {
            return false;
        }
        known.push(breakpoint);
        true
    }

    pub fn remove(&self, breakpoint: &GuestBreakpoint) -> bool {
        let mut known = self.inner.lock();
        let before = known.len();
        known.retain(|b| b != breakpoint);
        known.len() != before
    }

    pub fn snapshot(&self) -> Vec<GuestBreakpoint> {
        self.inner.lock().clone()
    }
}

#[derive(Default)]
struct ForwardState {
    services: Vec<ObjectId>,
    handles: HashMap<(ObjectId, GuestBreakpoint), ObjectId>,
}

pub struct BreakpointForwarder {
    session: Arc<DebugSession>,
    known: GuestBreakpoints,
    state: Mutex<ForwardState>,
    pins: PinRegistry,
}

impl BreakpointForwarder {
    pub fn new(session: Arc<DebugSession>, known: GuestBreakpoints) -> Self {
        let pins = PinRegistry::new(session.target().clone());
        Self {
            session,
            known,
            state: Mutex::new(ForwardState::default()),
            pins,
        }
    }

    /// Give a new service instance every known breakpoint
    pub async fn submit_all(
        &self,
        accessor: &RemoteAccessor,
        service: ObjectId,
        thread: &Arc<TargetThread>,
    ) {
        self.state.lock().services.push(service);
        let breakpoints = self.known.snapshot();
        if breakpoints.is_empty() {
            return;
        }

        let result = run_while_thread_stopped(&self.session, thread, || async {
            for breakpoint in &breakpoints {
                match self.submit(accessor, thread, service, breakpoint).await {
                    Ok(()) => {}
                    Err(e) if e.is_disconnect() => return Err(e),
                    Err(e) => {
                        warn!(session = %self.session.id(), %breakpoint, error = %e, "failed to submit guest breakpoint")
                    }
                }
            }
            Ok(())
        })
        .await;
        self.log_failure(result, "submitting guest breakpoints");
    }

    /// Forward a new breakpoint to every service, through the access thread
    pub async fn breakpoint_added(
        &self,
        accessor: &RemoteAccessor,
        access_thread: &Arc<TargetThread>,
        breakpoint: &GuestBreakpoint,
    ) {
        let services = self.state.lock().services.clone();
        if services.is_empty() {
            return;
        }

        let result = run_while_thread_stopped(&self.session, access_thread, || async {
            for service in services {
                self.submit(accessor, access_thread, service, breakpoint).await?;
            }
            Ok(())
        })
        .await;
        self.log_failure(result, "adding guest breakpoint");
    }

    pub async fn breakpoint_removed(
        &self,
        accessor: &RemoteAccessor,
        access_thread: &Arc<TargetThread>,
        breakpoint: &GuestBreakpoint,
    ) {
        let handles: Vec<ObjectId> = {
            let mut state = self.state.lock();
            let keys: Vec<_> = state
                .handles
                .keys()
                .filter(|(_, b)| b == breakpoint)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| state.handles.remove(key))
                .collect()
        };
        if handles.is_empty() {
            return;
        }

        let remove = &self.session.config().accessor.remove_breakpoint;
        let result = run_while_thread_stopped(&self.session, access_thread, || async {
            for handle in &handles {
                let args = [Value::object(TypeTag::Object, *handle)];
                invoke_accessor(&self.session, accessor, access_thread, remove, &args).await?;
            }
            Ok(())
        })
        .await;
        self.log_failure(result, "removing guest breakpoint");

        for handle in handles {
            self.pins.release(handle).await;
        }
    }

    /// Forget every remote breakpoint and unpin the handles
    pub async fn release(&self) {
        {
            let mut state = self.state.lock();
            state.services.clear();
            state.handles.clear();
        }
        let released = self.pins.collect_all().await;
        debug!(session = %self.session.id(), released, "guest breakpoint handles released");
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    async fn submit(
        &self,
        accessor: &RemoteAccessor,
        thread: &TargetThread,
        service: ObjectId,
        breakpoint: &GuestBreakpoint,
    ) -> InjectResult<()> {
        let unit = PinRegistry::new(self.session.target().clone());
        let result = self
            .submit_pinned(accessor, thread, service, breakpoint, &unit)
            .await;
        unit.collect_all().await;
        result
    }

    async fn submit_pinned(
        &self,
        accessor: &RemoteAccessor,
        thread: &TargetThread,
        service: ObjectId,
        breakpoint: &GuestBreakpoint,
        unit: &PinRegistry,
    ) -> InjectResult<()> {
        let target = self.session.target().as_ref();
        let session = self.session.as_ref();

        let uri = unit.pin(|| target.create_string(&breakpoint.uri)).await?;
        let condition = match &breakpoint.condition {
            Some(condition) => Value::object(
                TypeTag::String,
                unit.pin(|| target.create_string(condition)).await?,
            ),
            None => Value::null(),
        };
        let args = [
            Value::object(TypeTag::Object, service),
            Value::object(TypeTag::String, uri),
            Value::int(breakpoint.line as i32),
            Value::int(breakpoint.ignore_count as i32),
            condition,
        ];
        let args = &args;
        let set = &session.config().accessor.set_breakpoint;

        let handle = self
            .pins
            .pin_optional(|| async move {
                Ok(invoke_accessor(session, accessor, thread, set, args)
                    .await?
                    .as_object())
            })
            .await?;

        match handle {
            Some(handle) => {
                trace!(session = %session.id(), %breakpoint, service, handle, "guest breakpoint submitted");
                self.state
                    .lock()
                    .handles
                    .insert((service, breakpoint.clone()), handle);
            }
            None => debug!(session = %session.id(), %breakpoint, "guest runtime declined breakpoint"),
        }
        Ok(())
    }

    fn log_failure(&self, result: InjectResult<()>, what: &str) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => debug!(session = %self.session.id(), "{}: target gone", what),
            Err(e) => warn!(session = %self.session.id(), error = %e, "{} failed", what),
        }
    }
}
