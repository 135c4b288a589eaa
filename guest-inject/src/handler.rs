// Session engine handler
//
// Per-session driver of the injected accessor: one-time upload and access
// loop start, one service instance per guest runtime, breakpoint forwarding
// and developer-mode propagation.

use crate::error::{InjectError, InjectResult};
use crate::forward::{BreakpointForwarder, GuestBreakpoint, GuestBreakpoints};
use crate::inject::{invoke_accessor, set_accessor_flag, upload_accessor_bundle};
use crate::session::{DebugSession, RemoteAccessor, SessionEvent};
use crate::stopped::run_while_thread_stopped;
use crate::thread::TargetThread;
use jdwp_client::{ObjectId, ThreadId, TypeTag, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The uploaded accessor and the target thread running its access loop
#[derive(Debug)]
struct AccessLoop {
    accessor: RemoteAccessor,
    thread: Arc<TargetThread>,
}

pub struct EngineHandler {
    session: Arc<DebugSession>,
    forwarder: BreakpointForwarder,
    access: OnceCell<Option<AccessLoop>>,
    step_into: AtomicBool,
    option_watch: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandler {
    pub fn new(session: Arc<DebugSession>, breakpoints: GuestBreakpoints) -> Arc<Self> {
        let handler = Arc::new(Self {
            forwarder: BreakpointForwarder::new(session.clone(), breakpoints),
            session,
            access: OnceCell::new(),
            step_into: AtomicBool::new(false),
            option_watch: Mutex::new(None),
        });
        let watch = tokio::spawn(watch_developer_mode(
            Arc::downgrade(&handler),
            handler.session.clone(),
        ));
        *handler.option_watch.lock() = Some(watch);
        handler
    }

    /// Upload the accessor and start its access loop, once
    ///
    /// `thread` must be stopped at an event and not locked by the caller.
    /// Returns whether guest debugging is available.
    pub async fn init(&self, thread: &Arc<TargetThread>) -> bool {
        self.access
            .get_or_init(|| async {
                let accessor = upload_accessor_bundle(&self.session, thread).await?;
                match self.start_access_loop(&accessor, thread).await {
                    Ok(access_thread) => Some(AccessLoop {
                        accessor,
                        thread: access_thread,
                    }),
                    Err(e) => {
                        warn!(session = %self.session.id(), error = %e, "failed to start access loop");
                        None
                    }
                }
            })
            .await
            .is_some()
    }

    async fn start_access_loop(
        &self,
        accessor: &RemoteAccessor,
        thread: &Arc<TargetThread>,
    ) -> InjectResult<Arc<TargetThread>> {
        let session = self.session.as_ref();
        let start = &session.config().accessor.start_access_loop;

        let loop_thread = run_while_thread_stopped(session, thread, || async move {
            session
                .pins()
                .pin_optional(|| async move {
                    Ok(invoke_accessor(session, accessor, thread, start, &[])
                        .await?
                        .as_object())
                })
                .await
        })
        .await?
        .ok_or_else(|| InjectError::NullReference(start.name.clone()))?;

        info!(session = %session.id(), thread = loop_thread, "access loop started");
        Ok(session.thread(loop_thread))
    }

    /// Attach guest debugging to a freshly detected runtime
    ///
    /// Returns the new service instance, or `None` when guest debugging is
    /// unavailable or the runtime already had one.
    pub async fn new_guest_runtime_instance(
        &self,
        runtime: ObjectId,
        thread: &Arc<TargetThread>,
    ) -> Option<ObjectId> {
        if !self.init(thread).await {
            return None;
        }
        let access = self.access_loop()?;

        match self.set_up_service(&access.accessor, runtime, thread).await {
            Ok(Some(service)) => {
                self.forwarder
                    .submit_all(&access.accessor, service, thread)
                    .await;
                Some(service)
            }
            Ok(None) => {
                debug!(session = %self.session.id(), runtime, "runtime already has a debug manager");
                None
            }
            Err(e) if e.is_disconnect() => None,
            Err(e) => {
                warn!(session = %self.session.id(), runtime, error = %e, "debug manager setup failed");
                None
            }
        }
    }

    async fn set_up_service(
        &self,
        accessor: &RemoteAccessor,
        runtime: ObjectId,
        thread: &Arc<TargetThread>,
    ) -> InjectResult<Option<ObjectId>> {
        let session = self.session.as_ref();
        let setup = &session.config().accessor.setup;
        let args = [
            Value::object(TypeTag::Object, runtime),
            Value::boolean(session.developer_mode().get()),
            Value::boolean(self.step_into.swap(false, Ordering::SeqCst)),
        ];
        let args = &args;

        let service = run_while_thread_stopped(session, thread, || async move {
            session
                .pins()
                .pin_optional(|| async move {
                    Ok(invoke_accessor(session, accessor, thread, setup, args)
                        .await?
                        .as_object())
                })
                .await
        })
        .await?;

        if let Some(service) = service {
            let service_type = session.target().type_of(service).await?;
            session.record_service_class(service_type);
            session.publish(SessionEvent::ServiceInstanceCreated { service, runtime });
        }
        Ok(service)
    }

    /// Step into the guest runtime created next
    pub fn request_step_into(&self) {
        self.step_into.store(true, Ordering::SeqCst);
    }

    pub fn access_thread(&self) -> Option<ThreadId> {
        self.access_loop().map(|access| access.thread.id())
    }

    pub async fn breakpoint_added(&self, breakpoint: &GuestBreakpoint) {
        if let Some(access) = self.access_loop() {
            self.forwarder
                .breakpoint_added(&access.accessor, &access.thread, breakpoint)
                .await;
        }
    }

    pub async fn breakpoint_removed(&self, breakpoint: &GuestBreakpoint) {
        if let Some(access) = self.access_loop() {
            self.forwarder
                .breakpoint_removed(&access.accessor, &access.thread, breakpoint)
                .await;
        }
    }

    async fn apply_developer_mode(&self, include_internal: bool) {
        let Some(access) = self.access_loop() else {
            return;
        };
        let session = self.session.as_ref();
        let setter = &session.config().accessor.include_internal_setter;

        let result = run_while_thread_stopped(session, &access.thread, || async move {
            let args = [Value::boolean(include_internal)];
            invoke_accessor(session, &access.accessor, &access.thread, setter, &args)
                .await
                .map(|_| ())
        })
        .await;

        match result {
            Ok(()) => debug!(session = %session.id(), include_internal, "developer mode applied"),
            Err(e) if e.is_disconnect() => {}
            Err(e) => warn!(session = %session.id(), error = %e, "failed to apply developer mode"),
        }
    }

    /// Stop the access loop and drop forwarded breakpoints; never fails
    pub async fn destroy(&self) {
        if let Some(watch) = self.option_watch.lock().take() {
            watch.abort();
        }
        self.forwarder.release().await;

        let Some(access) = self.access_loop() else {
            return;
        };
        let running = &self.session.config().accessor.running_field;
        if let Err(e) = set_accessor_flag(&self.session, &access.accessor, running, false).await {
            debug!(session = %self.session.id(), error = %e, "failed to stop access loop");
        }
        // Wakes the loop if it is blocked so it notices the flag
        if let Err(e) = self
            .session
            .target()
            .interrupt_thread(access.thread.id())
            .await
        {
            debug!(session = %self.session.id(), error = %e, "failed to interrupt access thread");
        }
    }

    fn access_loop(&self) -> Option<&AccessLoop> {
        self.access.get().and_then(Option::as_ref)
    }
}

async fn watch_developer_mode(handler: Weak<EngineHandler>, session: Arc<DebugSession>) {
    let mut changes = session.developer_mode().subscribe();
    let disconnected = session.disconnected();
    drop(session);

    loop {
        tokio::select! {
            _ = disconnected.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let include_internal = *changes.borrow_and_update();
        let Some(handler) = handler.upgrade() else {
            break;
        };
        handler.apply_developer_mode(include_internal).await;
    }
}
