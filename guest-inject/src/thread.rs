// Target thread handles
//
// A `TargetThread` carries the debugger's view of one debuggee thread: its
// suspension state, the write lock that orders synchronous invocations on it,
// and the "method invocation in progress" bracket.

use crate::error::InjectResult;
use crate::target::TargetVm;
use jdwp_client::ThreadId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, MutexGuard};
use tracing::trace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadState {
    pub suspended: bool,
    /// Suspended by one of our event requests, so it can run invocations
    pub at_event: bool,
    /// Bumped on every state change not caused by our own invocations
    pub generation: u64,
}

#[derive(Debug)]
pub struct TargetThread {
    id: ThreadId,
    access: tokio::sync::Mutex<()>,
    state: watch::Sender<ThreadState>,
    invoking: AtomicUsize,
}

impl TargetThread {
    pub fn new(id: ThreadId) -> Self {
        let (state, _) = watch::channel(ThreadState::default());
        Self {
            id,
            access: tokio::sync::Mutex::new(()),
            state,
            invoking: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Exclusive access for synchronous calls on this thread
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.access.lock().await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.access.try_lock().ok()
    }

    pub fn state(&self) -> ThreadState {
        *self.state.borrow()
    }

    pub fn mark_stopped_at_event(&self) {
        self.transition(true, true);
    }

    pub fn mark_suspended(&self) {
        self.transition(true, false);
    }

    pub fn mark_resumed(&self) {
        self.transition(false, false);
    }

    fn transition(&self, suspended: bool, at_event: bool) {
        let invoking = self.is_invoking();
        self.state.send_modify(|state| {
            state.suspended = suspended;
            state.at_event = at_event;
            if !invoking {
                state.generation += 1;
            }
        });
        trace!(thread = self.id, suspended, at_event, "thread state changed");
    }

    /// Bracket a remote invocation; released when the guard drops
    pub fn invoking(&self) -> InvocationGuard<'_> {
        self.invoking.fetch_add(1, Ordering::SeqCst);
        InvocationGuard { thread: self }
    }

    pub fn is_invoking(&self) -> bool {
        self.invoking.load(Ordering::SeqCst) > 0
    }

    pub async fn resume(&self, target: &dyn TargetVm) -> InjectResult<()> {
        target.resume_thread(self.id).await?;
        self.mark_resumed();
        Ok(())
    }
}

#[must_use]
pub struct InvocationGuard<'a> {
    thread: &'a TargetThread,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        self.thread.invoking.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-session table of thread handles, shared with the event dispatcher
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<HashMap<ThreadId, Arc<TargetThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle for a thread, created on first use
    pub fn get(&self, id: ThreadId) -> Arc<TargetThread> {
        self.threads
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(TargetThread::new(id)))
            .clone()
    }

    pub fn find(&self, id: ThreadId) -> Option<Arc<TargetThread>> {
        self.threads.lock().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_does_not_bump_generation() {
        let thread = TargetThread::new(1);
        thread.mark_stopped_at_event();
        let before = thread.state().generation;

        {
            let _invoking = thread.invoking();
            assert!(thread.is_invoking());
            thread.mark_resumed();
            thread.mark_stopped_at_event();
        }

        assert!(!thread.is_invoking());
        assert_eq!(thread.state().generation, before);

        thread.mark_resumed();
        assert_eq!(thread.state().generation, before + 1);
        assert!(!thread.state().suspended);
    }

    #[test]
    fn test_registry_returns_shared_handle() {
        let registry = ThreadRegistry::new();
        let a = registry.get(7);
        let b = registry.get(7);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.find(8).is_none());
    }
}
