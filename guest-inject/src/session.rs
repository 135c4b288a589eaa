// Debug session context
//
// One attached target. Everything the engine caches for a target lives here
// and is passed explicitly; dropping the session drops the cache.

use crate::breakpoints::BreakpointService;
use crate::bundle::ArtifactBundle;
use crate::config::EngineConfig;
use crate::options::BoolOption;
use crate::pin::PinRegistry;
use crate::stopped::AutoResumer;
use crate::target::TargetVm;
use crate::thread::{TargetThread, ThreadRegistry};
use jdwp_client::{ObjectId, ReferenceTypeId, ThreadId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type SessionId = String;

/// Notifications for subsystems that consume the injected services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ServiceClassAvailable { accessor: ReferenceTypeId },
    ServiceInstanceCreated { service: ObjectId, runtime: ObjectId },
    Disconnected,
}

/// The uploaded entry class, pinned for the session's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccessor {
    pub class_name: String,
    pub class_type: ReferenceTypeId,
    pub class_object: ObjectId,
}

/// Collaborators a session is built from
pub struct SessionParts {
    pub target: Arc<dyn TargetVm>,
    pub breakpoints: Arc<dyn BreakpointService>,
    pub threads: Arc<ThreadRegistry>,
    /// Cancelled when the target goes away
    pub disconnected: CancellationToken,
}

pub struct DebugSession {
    id: SessionId,
    target: Arc<dyn TargetVm>,
    breakpoints: Arc<dyn BreakpointService>,
    threads: Arc<ThreadRegistry>,
    config: Arc<EngineConfig>,
    bundle: Arc<ArtifactBundle>,
    developer_mode: BoolOption,
    pins: PinRegistry,
    accessor: OnceCell<Option<RemoteAccessor>>,
    upload_attempts: AtomicUsize,
    service_class: Mutex<Option<ReferenceTypeId>>,
    auto_resumer: AutoResumer,
    events: broadcast::Sender<SessionEvent>,
    running: watch::Sender<bool>,
    disconnected: CancellationToken,
}

impl DebugSession {
    pub fn new(
        id: impl Into<SessionId>,
        parts: SessionParts,
        config: Arc<EngineConfig>,
        bundle: Arc<ArtifactBundle>,
        developer_mode: BoolOption,
    ) -> Arc<Self> {
        let id = id.into();
        let (events, _) = broadcast::channel(16);
        let (running, _) = watch::channel(false);
        let auto_resumer = AutoResumer::spawn(
            parts.target.clone(),
            config.timing.auto_resume_grace(),
            parts.disconnected.clone(),
        );

        // Disconnect listener: announce once, whoever cancels the token
        let token = parts.disconnected.clone();
        let announce = events.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            info!(session = %session_id, "target disconnected");
            announce.send(SessionEvent::Disconnected).ok();
        });

        Arc::new(Self {
            id,
            pins: PinRegistry::new(parts.target.clone()),
            target: parts.target,
            breakpoints: parts.breakpoints,
            threads: parts.threads,
            config,
            bundle,
            developer_mode,
            accessor: OnceCell::new(),
            upload_attempts: AtomicUsize::new(0),
            service_class: Mutex::new(None),
            auto_resumer,
            events,
            running,
            disconnected: parts.disconnected,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &Arc<dyn TargetVm> {
        &self.target
    }

    pub fn breakpoints(&self) -> &Arc<dyn BreakpointService> {
        &self.breakpoints
    }

    pub fn thread(&self, id: ThreadId) -> Arc<TargetThread> {
        self.threads.get(id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    pub fn developer_mode(&self) -> &BoolOption {
        &self.developer_mode
    }

    /// Pins held until the session goes away
    pub fn pins(&self) -> &PinRegistry {
        &self.pins
    }

    pub(crate) fn auto_resumer(&self) -> &AutoResumer {
        &self.auto_resumer
    }

    pub(crate) fn accessor_cell(&self) -> &OnceCell<Option<RemoteAccessor>> {
        &self.accessor
    }

    pub(crate) fn count_upload_attempt(&self) {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Current accessor class; gone once the target disconnects
    pub fn accessor_class(&self) -> Option<RemoteAccessor> {
        if self.is_disconnected() {
            return None;
        }
        self.accessor.get().cloned().flatten()
    }

    /// Type of the guest runtime service objects created so far
    pub fn service_class(&self) -> Option<ReferenceTypeId> {
        if self.is_disconnected() {
            return None;
        }
        *self.service_class.lock()
    }

    pub(crate) fn record_service_class(&self, ty: ReferenceTypeId) {
        self.service_class.lock().get_or_insert(ty);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        debug!(session = %self.id, ?event, "session event");
        self.events.send(event).ok();
    }

    /// The target is executing freely (no VM-wide suspension pending)
    pub fn mark_running(&self) {
        self.running.send_replace(true);
    }

    /// Wait until the session runs; `false` if it disconnected first
    pub async fn wait_running(&self) -> bool {
        let mut rx = self.running.subscribe();
        tokio::select! {
            _ = self.disconnected.cancelled() => false,
            running = async { rx.wait_for(|running| *running).await.is_ok() } => running,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_cancelled()
    }

    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    /// Tear down: stop waiters and workers, release the session's pins
    pub async fn close(&self) {
        let released = self.pins.collect_all().await;
        self.disconnected.cancel();
        *self.service_class.lock() = None;
        debug!(session = %self.id, released, "session closed");
    }
}
