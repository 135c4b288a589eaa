// Scripted target and breakpoint service for tests
//
// The target understands the handful of remote methods the engine calls
// (defineClass, the loader lookups, module exports, the accessor API) and
// answers everything else with void. Lookups for `java.*` and array types
// always succeed; other types exist only once defined or preloaded.

use crate::breakpoints::{
    ArmedBreakpoint, BreakpointHit, BreakpointId, BreakpointService, MethodBreakpointKind,
    TriggerBreakpoint,
};
use crate::bundle::{Artifact, ArtifactBundle};
use crate::config::EngineConfig;
use crate::error::{InjectError, InjectResult};
use crate::options::BoolOption;
use crate::session::{DebugSession, RemoteAccessor, SessionParts};
use crate::target::{MethodRef, TargetVm};
use crate::thread::{TargetThread, ThreadRegistry};
use async_trait::async_trait;
use jdwp_client::types::{FieldId, MethodId};
use jdwp_client::{ObjectId, ReferenceTypeId, ThreadId, TypeTag, Value};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const ACCESSOR: &str = "org.example.debug.GuestAccessor";
pub const SERVICE: &str = "org.example.debug.GuestService";
const GENERIC_TYPE: ReferenceTypeId = 0x10;

/// One recorded remote call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub thread: ThreadId,
    pub object: Option<ObjectId>,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct TargetState {
    java_major: Option<u32>,
    next_id: u64,
    classes: HashMap<String, ReferenceTypeId>,
    class_loaders: HashMap<ReferenceTypeId, ObjectId>,
    class_objects: HashMap<ReferenceTypeId, ObjectId>,
    reflected: HashMap<ObjectId, ReferenceTypeId>,
    object_types: HashMap<ObjectId, ReferenceTypeId>,
    strings: HashMap<ObjectId, String>,
    methods: HashMap<String, MethodId>,
    method_names: HashMap<MethodId, String>,
    fields: HashMap<String, FieldId>,
    field_names: HashMap<FieldId, String>,
    statics: HashMap<String, Value>,
    instances: HashMap<ReferenceTypeId, Vec<ObjectId>>,

    pinned: BTreeSet<ObjectId>,
    pin_calls: usize,
    unpin_calls: usize,
    collect_next_pins: usize,
    collect_class_objects: usize,
    forgotten: HashSet<ObjectId>,

    defined: Vec<(String, ObjectId)>,
    calls: Vec<MockCall>,
    failing: HashSet<String>,
    disconnected: bool,

    suspended: HashSet<ThreadId>,
    resumed: Vec<ThreadId>,
    interrupted: Vec<ThreadId>,

    marker_loader: ObjectId,
    system_loader: ObjectId,
    context_loader: ObjectId,
}

impl TargetState {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn alloc_object(&mut self, ty: ReferenceTypeId) -> ObjectId {
        let id = self.alloc();
        self.object_types.insert(id, ty);
        id
    }

    fn add_class(&mut self, name: &str, loader: Option<ObjectId>) -> ReferenceTypeId {
        let ty = self.alloc();
        self.classes.insert(name.to_string(), ty);
        if let Some(loader) = loader {
            self.class_loaders.insert(ty, loader);
        }
        ty
    }

    fn class_type(&mut self, name: &str) -> ReferenceTypeId {
        match self.classes.get(name) {
            Some(ty) => *ty,
            None => self.add_class(name, None),
        }
    }

    fn class_object(&mut self, ty: ReferenceTypeId) -> ObjectId {
        if let Some(object) = self.class_objects.get(&ty) {
            return *object;
        }
        let object = self.alloc();
        self.class_objects.insert(ty, object);
        self.reflected.insert(object, ty);
        object
    }

    fn intern_method(&mut self, name: &str) -> MethodId {
        if let Some(id) = self.methods.get(name) {
            return *id;
        }
        let id = self.alloc();
        self.methods.insert(name.to_string(), id);
        self.method_names.insert(id, name.to_string());
        id
    }

    fn intern_field(&mut self, name: &str) -> FieldId {
        if let Some(id) = self.fields.get(name) {
            return *id;
        }
        let id = self.alloc();
        self.fields.insert(name.to_string(), id);
        self.field_names.insert(id, name.to_string());
        id
    }
}

pub struct MockTarget {
    state: Mutex<TargetState>,
}

impl MockTarget {
    pub fn new() -> Arc<Self> {
        let mut state = TargetState {
            java_major: Some(17),
            next_id: 0x100,
            ..Default::default()
        };
        state.marker_loader = state.alloc_object(GENERIC_TYPE);
        state.system_loader = state.alloc_object(GENERIC_TYPE);
        state.context_loader = state.alloc_object(GENERIC_TYPE);
        let marker = state.marker_loader;
        for name in EngineConfig::default().runtime.loader_markers {
            state.add_class(&name, Some(marker));
        }
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn set_java_major(&self, major: u32) {
        self.state.lock().java_major = Some(major);
    }

    pub fn remove_markers(&self) {
        let mut state = self.state.lock();
        for name in EngineConfig::default().runtime.loader_markers {
            state.classes.remove(&name);
        }
    }

    /// A class loaded by the marker loader before the session started
    pub fn preload_class(&self, name: &str) -> ReferenceTypeId {
        let mut state = self.state.lock();
        let marker = state.marker_loader;
        state.add_class(name, Some(marker))
    }

    /// Live objects of a type, as reported by instance counting
    pub fn add_instances(&self, class_name: &str, count: usize) -> Vec<ObjectId> {
        let mut state = self.state.lock();
        let ty = state.class_type(class_name);
        let objects: Vec<ObjectId> = (0..count).map(|_| state.alloc_object(ty)).collect();
        state.instances.entry(ty).or_default().extend(&objects);
        objects
    }

    pub fn fail_method(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    /// Every later call reports the target as gone
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// The next `n` pin attempts find the object already collected
    pub fn collect_next_pins(&self, n: usize) {
        self.state.lock().collect_next_pins = n;
    }

    /// The next `n` pin attempts on class objects find them collected
    pub fn collect_class_objects(&self, n: usize) {
        self.state.lock().collect_class_objects = n;
    }

    /// Simulate the collector reclaiming an object
    pub fn forget_object(&self, object: ObjectId) {
        self.state.lock().forgotten.insert(object);
    }

    pub fn suspend_thread(&self, thread: ThreadId) {
        self.state.lock().suspended.insert(thread);
    }

    pub fn is_pinned(&self, object: ObjectId) -> bool {
        self.state.lock().pinned.contains(&object)
    }

    pub fn pinned_count(&self) -> usize {
        self.state.lock().pinned.len()
    }

    pub fn pinned_objects(&self) -> Vec<ObjectId> {
        self.state.lock().pinned.iter().copied().collect()
    }

    /// Successful pins
    pub fn pin_calls(&self) -> usize {
        self.state.lock().pin_calls
    }

    pub fn unpin_calls(&self) -> usize {
        self.state.lock().unpin_calls
    }

    pub fn defined_classes(&self) -> Vec<String> {
        self.state
            .lock()
            .defined
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn define_loaders(&self) -> Vec<ObjectId> {
        self.state
            .lock()
            .defined
            .iter()
            .map(|(_, loader)| *loader)
            .collect()
    }

    pub fn marker_loader(&self) -> ObjectId {
        self.state.lock().marker_loader
    }

    pub fn system_loader(&self) -> ObjectId {
        self.state.lock().system_loader
    }

    pub fn invocations(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    pub fn calls(&self, method: &str) -> Vec<MockCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn string(&self, object: ObjectId) -> Option<String> {
        self.state.lock().strings.get(&object).cloned()
    }

    pub fn static_flag(&self, field: &str) -> Option<bool> {
        self.state.lock().statics.get(field).and_then(Value::as_bool)
    }

    pub fn resumed(&self) -> Vec<ThreadId> {
        self.state.lock().resumed.clone()
    }

    pub fn interrupted(&self) -> Vec<ThreadId> {
        self.state.lock().interrupted.clone()
    }

    fn check_connected(&self) -> InjectResult<()> {
        if self.state.lock().disconnected {
            return Err(InjectError::ProtocolUnavailable);
        }
        Ok(())
    }

    fn invoke(
        &self,
        thread: ThreadId,
        object: Option<ObjectId>,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value> {
        self.check_connected()?;
        let mut state = self.state.lock();
        let name = state
            .method_names
            .get(&method.method_id)
            .cloned()
            .unwrap_or_default();
        state.calls.push(MockCall {
            method: name.clone(),
            thread,
            object,
            args: args.to_vec(),
        });

        if state.failing.contains(&name) {
            let exception = state.alloc_object(GENERIC_TYPE);
            return Err(InjectError::TargetInvocationFailed { exception });
        }

        let value = match name.as_str() {
            "defineClass" => {
                let class_name = args
                    .first()
                    .and_then(Value::as_object)
                    .and_then(|id| state.strings.get(&id).cloned())
                    .unwrap_or_default();
                if state.classes.contains_key(&class_name) {
                    let exception = state.alloc_object(GENERIC_TYPE);
                    return Err(InjectError::TargetInvocationFailed { exception });
                }
                let loader = object.unwrap_or_default();
                let ty = state.add_class(&class_name, Some(loader));
                state.defined.push((class_name, loader));
                Value::object(TypeTag::ClassObject, state.class_object(ty))
            }
            "getSystemClassLoader" => Value::object(TypeTag::ClassLoader, state.system_loader),
            "getContextClassLoader" => Value::object(TypeTag::ClassLoader, state.context_loader),
            "getModule" | "getUnnamedModule" | "addExports" => {
                Value::object(TypeTag::Object, state.alloc_object(GENERIC_TYPE))
            }
            "setUpDebugManagerFor" => {
                let ty = state.class_type(SERVICE);
                Value::object(TypeTag::Object, state.alloc_object(ty))
            }
            "startAccessLoop" => {
                let ty = state.class_type("java.lang.Thread");
                Value::object(TypeTag::Thread, state.alloc_object(ty))
            }
            "setLineBreakpoint" => {
                Value::object(TypeTag::Object, state.alloc_object(GENERIC_TYPE))
            }
            _ => Value::void(),
        };
        Ok(value)
    }
}

#[async_trait]
impl TargetVm for MockTarget {
    async fn java_major(&self) -> InjectResult<Option<u32>> {
        self.check_connected()?;
        Ok(self.state.lock().java_major)
    }

    async fn classes_by_name(&self, class_name: &str) -> InjectResult<Vec<ReferenceTypeId>> {
        self.check_connected()?;
        let mut state = self.state.lock();
        if class_name.starts_with("java.") || class_name.ends_with("[]") {
            return Ok(vec![state.class_type(class_name)]);
        }
        Ok(state.classes.get(class_name).copied().into_iter().collect())
    }

    async fn class_loader(&self, ty: ReferenceTypeId) -> InjectResult<Option<ObjectId>> {
        self.check_connected()?;
        Ok(self.state.lock().class_loaders.get(&ty).copied())
    }

    async fn class_object(&self, ty: ReferenceTypeId) -> InjectResult<ObjectId> {
        self.check_connected()?;
        Ok(self.state.lock().class_object(ty))
    }

    async fn reflected_type(&self, class_object: ObjectId) -> InjectResult<ReferenceTypeId> {
        self.check_connected()?;
        self.state
            .lock()
            .reflected
            .get(&class_object)
            .copied()
            .ok_or(InjectError::Collected)
    }

    async fn type_of(&self, object: ObjectId) -> InjectResult<ReferenceTypeId> {
        self.check_connected()?;
        let state = self.state.lock();
        Ok(state.object_types.get(&object).copied().unwrap_or(GENERIC_TYPE))
    }

    async fn find_method(
        &self,
        ty: ReferenceTypeId,
        name: &str,
        _signature: &str,
    ) -> InjectResult<Option<MethodRef>> {
        self.check_connected()?;
        let method_id = self.state.lock().intern_method(name);
        Ok(Some(MethodRef {
            declaring_type: ty,
            method_id,
        }))
    }

    async fn find_field(&self, _ty: ReferenceTypeId, name: &str) -> InjectResult<Option<FieldId>> {
        self.check_connected()?;
        Ok(Some(self.state.lock().intern_field(name)))
    }

    async fn instance_count(&self, ty: ReferenceTypeId) -> InjectResult<i64> {
        self.check_connected()?;
        let state = self.state.lock();
        Ok(state.instances.get(&ty).map_or(0, |objects| objects.len() as i64))
    }

    async fn instances(&self, ty: ReferenceTypeId) -> InjectResult<Vec<ObjectId>> {
        self.check_connected()?;
        Ok(self.state.lock().instances.get(&ty).cloned().unwrap_or_default())
    }

    async fn create_string(&self, value: &str) -> InjectResult<ObjectId> {
        self.check_connected()?;
        let mut state = self.state.lock();
        let ty = state.class_type("java.lang.String");
        let id = state.alloc_object(ty);
        state.strings.insert(id, value.to_string());
        Ok(id)
    }

    async fn new_array(&self, array_type: ReferenceTypeId, _length: i32) -> InjectResult<ObjectId> {
        self.check_connected()?;
        Ok(self.state.lock().alloc_object(array_type))
    }

    async fn set_array_values(
        &self,
        _array: ObjectId,
        _first_index: i32,
        _values: &[Value],
    ) -> InjectResult<()> {
        self.check_connected()
    }

    async fn invoke_static(
        &self,
        thread: ThreadId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value> {
        self.invoke(thread, None, method, args)
    }

    async fn invoke_instance(
        &self,
        thread: ThreadId,
        object: ObjectId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value> {
        self.invoke(thread, Some(object), method, args)
    }

    async fn new_instance(
        &self,
        thread: ThreadId,
        constructor: MethodRef,
        args: &[Value],
    ) -> InjectResult<ObjectId> {
        self.invoke(thread, None, constructor, args)?;
        Ok(self.state.lock().alloc_object(constructor.declaring_type))
    }

    async fn set_static_field(
        &self,
        _class: ReferenceTypeId,
        field: FieldId,
        value: Value,
    ) -> InjectResult<()> {
        self.check_connected()?;
        let mut state = self.state.lock();
        let name = state.field_names.get(&field).cloned().unwrap_or_default();
        state.statics.insert(name, value);
        Ok(())
    }

    async fn disable_collection(&self, object: ObjectId) -> InjectResult<()> {
        self.check_connected()?;
        let mut state = self.state.lock();
        if state.collect_next_pins > 0 {
            state.collect_next_pins -= 1;
            return Err(InjectError::Collected);
        }
        if state.collect_class_objects > 0 && state.reflected.contains_key(&object) {
            state.collect_class_objects -= 1;
            return Err(InjectError::Collected);
        }
        if state.forgotten.contains(&object) {
            return Err(InjectError::Collected);
        }
        state.pinned.insert(object);
        state.pin_calls += 1;
        Ok(())
    }

    async fn enable_collection(&self, object: ObjectId) -> InjectResult<()> {
        self.check_connected()?;
        let mut state = self.state.lock();
        state.pinned.remove(&object);
        if state.forgotten.contains(&object) {
            return Err(InjectError::Collected);
        }
        state.unpin_calls += 1;
        Ok(())
    }

    async fn is_suspended(&self, thread: ThreadId) -> InjectResult<bool> {
        self.check_connected()?;
        Ok(self.state.lock().suspended.contains(&thread))
    }

    async fn resume_thread(&self, thread: ThreadId) -> InjectResult<()> {
        self.check_connected()?;
        let mut state = self.state.lock();
        state.suspended.remove(&thread);
        state.resumed.push(thread);
        Ok(())
    }

    async fn interrupt_thread(&self, thread: ThreadId) -> InjectResult<()> {
        self.check_connected()?;
        self.state.lock().interrupted.push(thread);
        Ok(())
    }
}

struct ActiveBreakpoint {
    breakpoint: TriggerBreakpoint,
    hits: mpsc::UnboundedSender<BreakpointHit>,
}

#[derive(Default)]
struct BreakpointState {
    next_id: i32,
    active: HashMap<BreakpointId, ActiveBreakpoint>,
    added: usize,
    hit_on_remove: Option<Arc<TargetThread>>,
}

#[derive(Default)]
pub struct MockBreakpoints {
    state: Mutex<BreakpointState>,
}

impl MockBreakpoints {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn added_count(&self) -> usize {
        self.state.lock().added
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Most recently added active breakpoint on `method` with the given kind
    pub fn find(
        &self,
        method: &str,
        kind: MethodBreakpointKind,
    ) -> Option<(BreakpointId, TriggerBreakpoint)> {
        self.state
            .lock()
            .active
            .iter()
            .filter(|(_, a)| a.breakpoint.method.method == method && a.breakpoint.kind == kind)
            .max_by_key(|(id, _)| id.0)
            .map(|(id, a)| (*id, a.breakpoint.clone()))
    }

    /// Poll until an entry breakpoint on `method` is armed
    pub async fn wait_for(&self, method: &str) -> (BreakpointId, TriggerBreakpoint) {
        self.wait_for_kind(method, MethodBreakpointKind::Entry).await
    }

    pub async fn wait_for_kind(
        &self,
        method: &str,
        kind: MethodBreakpointKind,
    ) -> (BreakpointId, TriggerBreakpoint) {
        loop {
            if let Some(found) = self.find(method, kind) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Have the next removal race a hit on `thread` into the channel first
    pub fn hit_on_remove(&self, thread: &Arc<TargetThread>) {
        self.state.lock().hit_on_remove = Some(thread.clone());
    }

    /// Deliver a hit the way the event dispatcher would
    pub fn fire(&self, id: BreakpointId, thread: &Arc<TargetThread>, return_value: Option<Value>) {
        let state = self.state.lock();
        let active = state.active.get(&id).expect("breakpoint is armed");
        thread.mark_stopped_at_event();
        active
            .hits
            .send(BreakpointHit {
                breakpoint: id,
                thread: thread.clone(),
                return_value,
            })
            .expect("hit receiver alive");
    }
}

#[async_trait]
impl BreakpointService for MockBreakpoints {
    async fn add(&self, breakpoint: TriggerBreakpoint) -> InjectResult<ArmedBreakpoint> {
        // A real request is a round trip; let other tasks run meanwhile
        tokio::task::yield_now().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_id += 1;
        state.added += 1;
        let id = BreakpointId(state.next_id);
        state.active.insert(
            id,
            ActiveBreakpoint {
                breakpoint,
                hits: tx,
            },
        );
        Ok(ArmedBreakpoint { id, hits: rx })
    }

    async fn remove(&self, id: BreakpointId) -> InjectResult<()> {
        let mut state = self.state.lock();
        let late = state.hit_on_remove.take();
        if let (Some(active), Some(thread)) = (state.active.remove(&id), late) {
            thread.mark_stopped_at_event();
            let hit = BreakpointHit {
                breakpoint: id,
                thread,
                return_value: None,
            };
            active.hits.send(hit).ok();
        }
        Ok(())
    }
}

/// Bootstrap loader, accessor, and one nested accessor class
pub fn test_bundle() -> ArtifactBundle {
    ArtifactBundle::new(vec![
        Artifact {
            name: "org.example.debug.GuestDebugClassLoader".to_string(),
            bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 0x01],
        },
        Artifact {
            name: ACCESSOR.to_string(),
            bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 0x02],
        },
        Artifact {
            name: format!("{}$Loop", ACCESSOR),
            bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 0x03],
        },
    ])
}

pub struct MockSession {
    pub session: Arc<DebugSession>,
    pub target: Arc<MockTarget>,
    pub breakpoints: Arc<MockBreakpoints>,
    pub developer_mode: BoolOption,
}

impl MockSession {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let mut config = EngineConfig::default();
        configure(&mut config);

        let target = MockTarget::new();
        let breakpoints = MockBreakpoints::new();
        let developer_mode = BoolOption::new(false);
        let session = DebugSession::new(
            "mock",
            SessionParts {
                target: target.clone(),
                breakpoints: breakpoints.clone(),
                threads: ThreadRegistry::new(),
                disconnected: CancellationToken::new(),
            },
            Arc::new(config),
            Arc::new(test_bundle()),
            developer_mode.clone(),
        );

        Self {
            session,
            target,
            breakpoints,
            developer_mode,
        }
    }

    /// Make the accessor present without running an upload
    pub async fn install_accessor(&self) -> RemoteAccessor {
        let class_type = self.target.preload_class(ACCESSOR);
        let class_object = self
            .target
            .class_object(class_type)
            .await
            .expect("class object");
        let accessor = RemoteAccessor {
            class_name: ACCESSOR.to_string(),
            class_type,
            class_object,
        };
        let installed = accessor.clone();
        self.session
            .accessor_cell()
            .get_or_init(|| async move { Some(installed) })
            .await;
        accessor
    }
}

pub fn mock_session() -> MockSession {
    MockSession::new()
}

/// Route engine logs through the test harness; RUST_LOG picks the level
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Poll `condition` until it holds; panics after about a second
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}
