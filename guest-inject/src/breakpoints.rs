// Trigger breakpoint collaborator
//
// Breakpoints used only to get the target into a known stopped state. Hits
// are delivered over a channel owned by whoever armed the breakpoint.

use crate::config::MethodTarget;
use crate::error::InjectResult;
use crate::thread::TargetThread;
use async_trait::async_trait;
use jdwp_client::{SuspendPolicy, ThreadId, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodBreakpointKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBreakpoint {
    pub method: MethodTarget,
    pub kind: MethodBreakpointKind,
    pub thread_filter: Option<ThreadId>,
    pub suspend: SuspendPolicy,
    /// Kept out of user-visible breakpoint lists
    pub hidden: bool,
}

impl TriggerBreakpoint {
    pub fn entry(method: &MethodTarget) -> Self {
        Self::new(method, MethodBreakpointKind::Entry)
    }

    pub fn exit(method: &MethodTarget) -> Self {
        Self::new(method, MethodBreakpointKind::Exit)
    }

    fn new(method: &MethodTarget, kind: MethodBreakpointKind) -> Self {
        Self {
            method: method.clone(),
            kind,
            thread_filter: None,
            suspend: SuspendPolicy::EventThread,
            hidden: true,
        }
    }

    pub fn on_thread(mut self, thread: ThreadId) -> Self {
        self.thread_filter = Some(thread);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BreakpointHit {
    pub breakpoint: BreakpointId,
    /// Left suspended at the event when the suspend policy says so
    pub thread: Arc<TargetThread>,
    /// Value returned by the method, for exit breakpoints
    pub return_value: Option<Value>,
}

/// A live breakpoint; the hit channel closes when it is removed
#[derive(Debug)]
pub struct ArmedBreakpoint {
    pub id: BreakpointId,
    pub hits: mpsc::UnboundedReceiver<BreakpointHit>,
}

#[async_trait]
pub trait BreakpointService: Send + Sync {
    async fn add(&self, breakpoint: TriggerBreakpoint) -> InjectResult<ArmedBreakpoint>;

    async fn remove(&self, id: BreakpointId) -> InjectResult<()>;
}
