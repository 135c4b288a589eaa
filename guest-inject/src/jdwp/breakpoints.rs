// Method breakpoints over JDWP event requests
//
// JDWP can only filter method entry/exit events by class, so each
// registration is narrowed to its method name here. Events nobody claims are
// resumed straight away, as are events raised on a thread that is running one
// of our own invocations.

use crate::breakpoints::{
    ArmedBreakpoint, BreakpointHit, BreakpointId, BreakpointService, MethodBreakpointKind,
    TriggerBreakpoint,
};
use crate::error::InjectResult;
use crate::thread::ThreadRegistry;
use async_trait::async_trait;
use jdwp_client::commands::event_kinds;
use jdwp_client::types::{Location, MethodId};
use jdwp_client::{
    Event, EventKind, EventSet, JdwpConnection, ReferenceTypeId, SuspendPolicy, ThreadId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct Registration {
    breakpoint: TriggerBreakpoint,
    hits: mpsc::UnboundedSender<BreakpointHit>,
}

pub struct JdwpBreakpoints {
    conn: JdwpConnection,
    threads: Arc<ThreadRegistry>,
    /// Held across EventRequest.Set so no event can beat its registration
    registrations: tokio::sync::Mutex<HashMap<i32, Registration>>,
    method_names: Mutex<HashMap<(ReferenceTypeId, MethodId), String>>,
}

fn event_kind(kind: MethodBreakpointKind) -> u8 {
    match kind {
        MethodBreakpointKind::Entry => event_kinds::METHOD_ENTRY,
        MethodBreakpointKind::Exit => event_kinds::METHOD_EXIT_WITH_RETURN_VALUE,
    }
}

impl JdwpBreakpoints {
    pub fn new(conn: JdwpConnection, threads: Arc<ThreadRegistry>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            threads,
            registrations: tokio::sync::Mutex::new(HashMap::new()),
            method_names: Mutex::new(HashMap::new()),
        })
    }

    /// Route incoming event sets to armed breakpoints until the target goes away
    pub fn spawn_dispatcher(self: &Arc<Self>, disconnected: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let set = tokio::select! {
                    _ = disconnected.cancelled() => break,
                    set = this.conn.recv_event() => set,
                };
                let Some(set) = set else {
                    info!("event stream closed");
                    disconnected.cancel();
                    break;
                };
                if !this.dispatch(set).await {
                    info!("target VM died");
                    disconnected.cancel();
                    break;
                }
            }
            debug!("event dispatcher stopped");
        })
    }

    /// Returns false once the target reports its death
    async fn dispatch(&self, set: EventSet) -> bool {
        let suspended = set.suspend_policy != SuspendPolicy::None as u8;
        let mut delivered = HashSet::new();
        let mut unclaimed = HashSet::new();

        for event in &set.events {
            match &event.details {
                EventKind::VMDeath => return false,
                EventKind::MethodEntry { thread, location }
                | EventKind::MethodExit {
                    thread, location, ..
                } => {
                    if self.deliver(event, *thread, location, suspended).await {
                        delivered.insert(*thread);
                    } else {
                        unclaimed.insert(*thread);
                    }
                }
                other => {
                    trace!("ignoring event {:?}", other);
                    if let Some(thread) = other.thread() {
                        unclaimed.insert(thread);
                    }
                }
            }
        }

        if !suspended {
            return true;
        }
        if set.suspend_policy == SuspendPolicy::All as u8 {
            if delivered.is_empty() {
                self.resume_all().await;
            }
            return true;
        }
        for thread in unclaimed.difference(&delivered) {
            self.resume_unclaimed(*thread).await;
        }
        true
    }

    async fn deliver(
        &self,
        event: &Event,
        thread_id: ThreadId,
        location: &Location,
        suspended: bool,
    ) -> bool {
        let registrations = self.registrations.lock().await;
        let Some(registration) = registrations.get(&event.request_id) else {
            trace!("event for unknown request {}", event.request_id);
            return false;
        };

        let method = match self.method_name(location).await {
            Ok(name) => name,
            Err(e) => {
                debug!("cannot name method at {:?}: {}", location, e);
                return false;
            }
        };
        if method != registration.breakpoint.method.method {
            return false;
        }

        let thread = self.threads.get(thread_id);
        if thread.is_invoking() {
            trace!(thread = thread_id, "event raised by our own invocation");
            return false;
        }
        if suspended {
            thread.mark_stopped_at_event();
        }

        let return_value = match &event.details {
            EventKind::MethodExit { return_value, .. } => return_value.clone(),
            _ => None,
        };
        let hit = BreakpointHit {
            breakpoint: BreakpointId(event.request_id),
            thread,
            return_value,
        };
        registration.hits.send(hit).is_ok()
    }

    async fn method_name(&self, location: &Location) -> InjectResult<String> {
        let key = (location.class_id, location.method_id);
        if let Some(name) = self.method_names.lock().get(&key) {
            return Ok(name.clone());
        }

        let methods = self.conn.get_methods(location.class_id).await?;
        let mut names = self.method_names.lock();
        for method in methods {
            names.insert((location.class_id, method.method_id), method.name);
        }
        Ok(names.get(&key).cloned().unwrap_or_default())
    }

    async fn resume_unclaimed(&self, thread_id: ThreadId) {
        if let Err(e) = self.conn.resume_thread(thread_id).await {
            warn!(thread = thread_id, "failed to resume thread: {}", e);
            return;
        }
        if let Some(thread) = self.threads.find(thread_id) {
            if !thread.is_invoking() {
                thread.mark_resumed();
            }
        }
    }

    async fn resume_all(&self) {
        if let Err(e) = self.conn.resume_all().await {
            warn!("failed to resume target: {}", e);
        }
    }
}

#[async_trait]
impl BreakpointService for JdwpBreakpoints {
    async fn add(&self, breakpoint: TriggerBreakpoint) -> InjectResult<ArmedBreakpoint> {
        let mut registrations = self.registrations.lock().await;

        let class = &breakpoint.method.class_name;
        let request_id = match breakpoint.kind {
            MethodBreakpointKind::Entry => {
                self.conn
                    .set_method_entry_request(class, breakpoint.thread_filter, breakpoint.suspend)
                    .await?
            }
            MethodBreakpointKind::Exit => {
                self.conn
                    .set_method_exit_request(class, breakpoint.thread_filter, breakpoint.suspend)
                    .await?
            }
        };
        debug!(
            request_id,
            "armed {:?} breakpoint on {}.{}", breakpoint.kind, class, breakpoint.method.method
        );

        let (hits_tx, hits) = mpsc::unbounded_channel();
        registrations.insert(
            request_id,
            Registration {
                breakpoint,
                hits: hits_tx,
            },
        );

        Ok(ArmedBreakpoint {
            id: BreakpointId(request_id),
            hits,
        })
    }

    async fn remove(&self, id: BreakpointId) -> InjectResult<()> {
        let Some(registration) = self.registrations.lock().await.remove(&id.0) else {
            return Ok(());
        };
        self.conn
            .clear_event_request(event_kind(registration.breakpoint.kind), id.0)
            .await?;
        debug!(request_id = id.0, "cleared breakpoint");
        Ok(())
    }
}
