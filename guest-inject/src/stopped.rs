// Running tasks on a stopped target thread
//
// JDWP can only invoke methods on a thread suspended by an event. Depending on
// what the thread is doing we either run right away, run and resume it again
// a little later, or steer it into a trigger breakpoint first.

use crate::breakpoints::{BreakpointHit, TriggerBreakpoint};
use crate::config::MethodTarget;
use crate::error::{InjectError, InjectResult};
use crate::inject::set_accessor_flag;
use crate::session::DebugSession;
use crate::target::TargetVm;
use crate::thread::TargetThread;
use jdwp_client::ThreadId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `task` while `thread` is stopped at an event
///
/// Tasks on the same thread never overlap. The call returns
/// `InjectError::ProtocolUnavailable` instead of blocking once the session
/// disconnects.
pub async fn run_while_thread_stopped<T, F, Fut>(
    session: &DebugSession,
    thread: &Arc<TargetThread>,
    task: F,
) -> InjectResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = InjectResult<T>>,
{
    if session.is_disconnected() {
        return Err(InjectError::ProtocolUnavailable);
    }

    let _access = thread.lock().await;

    if !thread.state().suspended && session.target().is_suspended(thread.id()).await? {
        thread.mark_suspended();
    }

    let state = thread.state();
    if state.suspended && state.at_event {
        let _invoking = thread.invoking();
        return task().await;
    }

    if state.suspended {
        // Suspended for some other reason: run, then let it go after the grace window
        session.auto_resumer().hold(thread.id());
        let result = {
            let _invoking = thread.invoking();
            task().await
        };
        session.auto_resumer().schedule(thread.clone());
        return result;
    }

    run_on_trigger(session, thread, task).await
}

async fn run_on_trigger<T, F, Fut>(
    session: &DebugSession,
    thread: &Arc<TargetThread>,
    task: F,
) -> InjectResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = InjectResult<T>>,
{
    let Some(accessor) = session.accessor_class() else {
        debug!(session = %session.id(), "no accessor in the target, trigger unreachable");
        return Err(InjectError::MissingMember("accessor class".to_string()));
    };
    let config = &session.config().accessor;

    let trigger = TriggerBreakpoint::entry(&MethodTarget::new(
        &accessor.class_name,
        &config.access_trigger,
    ))
    .on_thread(thread.id());
    let mut armed = session.breakpoints().add(trigger).await?;

    // Armed first, so the access loop cannot pass the trigger unobserved
    if let Err(e) =
        set_accessor_flag(session, &accessor, &config.access_requested_field, true).await
    {
        warn!(session = %session.id(), error = %e, "failed to request access");
    }

    let hit = wait_for_hit(session, &mut armed.hits).await;
    if let Err(e) = session.breakpoints().remove(armed.id).await {
        debug!(session = %session.id(), error = %e, "failed to remove trigger breakpoint");
    }
    // Hits delivered after the wait ended still hold their thread at the event
    while let Ok(late) = armed.hits.try_recv() {
        debug!(session = %session.id(), thread = late.thread.id(), "resuming unclaimed trigger hit");
        resume_after_access(session, &late.thread).await;
    }

    if let Err(e) =
        set_accessor_flag(session, &accessor, &config.access_requested_field, false).await
    {
        debug!(session = %session.id(), error = %e, "failed to clear access request");
    }
    let hit = hit?;

    let result = {
        let _invoking = hit.thread.invoking();
        task().await
    };

    resume_after_access(session, &hit.thread).await;
    result
}

async fn resume_after_access(session: &DebugSession, thread: &Arc<TargetThread>) {
    if let Err(e) = thread.resume(session.target().as_ref()).await {
        debug!(session = %session.id(), thread = thread.id(), error = %e, "resume failed");
    }
}

async fn wait_for_hit(
    session: &DebugSession,
    hits: &mut mpsc::UnboundedReceiver<BreakpointHit>,
) -> InjectResult<BreakpointHit> {
    let disconnected = session.disconnected();
    let wait = async {
        tokio::select! {
            _ = disconnected.cancelled() => Err(InjectError::ProtocolUnavailable),
            hit = hits.recv() => hit.ok_or(InjectError::ProtocolUnavailable),
        }
    };

    match session.config().timing.trigger_wait() {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .unwrap_or(Err(InjectError::TriggerTimeout)),
        None => wait.await,
    }
}

enum ResumeCommand {
    Schedule {
        thread: Arc<TargetThread>,
        generation: u64,
    },
    Hold(ThreadId),
}

struct PendingResume {
    thread: Arc<TargetThread>,
    generation: u64,
    due: Instant,
}

/// Single delayed-task worker resuming threads we left suspended
pub struct AutoResumer {
    tx: mpsc::UnboundedSender<ResumeCommand>,
}

impl AutoResumer {
    pub fn spawn(
        target: Arc<dyn TargetVm>,
        grace: Duration,
        disconnected: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(auto_resume_worker(rx, target, grace, disconnected));
        Self { tx }
    }

    /// Resume `thread` after the grace window unless its state changes first
    pub fn schedule(&self, thread: Arc<TargetThread>) {
        let generation = thread.state().generation;
        self.tx
            .send(ResumeCommand::Schedule { thread, generation })
            .ok();
    }

    /// Drop a pending resume while the thread is in use again
    pub fn hold(&self, thread: ThreadId) {
        self.tx.send(ResumeCommand::Hold(thread)).ok();
    }
}

async fn auto_resume_worker(
    mut rx: mpsc::UnboundedReceiver<ResumeCommand>,
    target: Arc<dyn TargetVm>,
    grace: Duration,
    disconnected: CancellationToken,
) {
    let mut pending: HashMap<ThreadId, PendingResume> = HashMap::new();

    loop {
        let next_due = pending.values().map(|p| p.due).min();

        tokio::select! {
            _ = disconnected.cancelled() => break,

            command = rx.recv() => match command {
                Some(ResumeCommand::Schedule { thread, generation }) => {
                    let due = Instant::now() + grace;
                    pending.insert(thread.id(), PendingResume { thread, generation, due });
                }
                Some(ResumeCommand::Hold(id)) => {
                    pending.remove(&id);
                }
                None => break,
            },

            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let due: Vec<ThreadId> = pending
                    .iter()
                    .filter(|(_, p)| p.due <= now)
                    .map(|(id, _)| *id)
                    .collect();

                for id in due {
                    let Some(p) = pending.remove(&id) else { continue };
                    resume_if_unchanged(target.as_ref(), p).await;
                }
            }
        }
    }

    debug!(abandoned = pending.len(), "auto-resume worker stopped");
}

async fn resume_if_unchanged(target: &dyn TargetVm, pending: PendingResume) {
    let thread = pending.thread;
    // In use by another call; that call decides what happens next
    let Some(_access) = thread.try_lock() else {
        debug!(thread = thread.id(), "auto-resume skipped, thread busy");
        return;
    };

    let state = thread.state();
    if state.generation != pending.generation || !state.suspended {
        debug!(thread = thread.id(), suspended = state.suspended, "auto-resume canceled, thread state changed");
        return;
    }

    if let Err(e) = thread.resume(target).await {
        debug!(thread = thread.id(), error = %e, "auto-resume failed");
    }
}
