// Remote injection engine
//
// Uploads the artifact bundle into the target by calling
// `ClassLoader.defineClass` on a loader that can see the guest runtime.
// Everything created along the way is pinned in a per-upload registry and
// released when the upload finishes, whatever the outcome; only the accessor
// class object stays pinned for the session.

use crate::bundle::Artifact;
use crate::config::MethodSpec;
use crate::error::{InjectError, InjectResult};
use crate::pin::PinRegistry;
use crate::session::{DebugSession, RemoteAccessor, SessionEvent};
use crate::target::{MethodRef, TargetVm};
use crate::thread::TargetThread;
use jdwp_client::{ObjectId, ReferenceTypeId, TypeTag, Value};
use tracing::{debug, info, trace, warn};

const DEFINE_CLASS: &str = "defineClass";
const DEFINE_CLASS_SIGNATURE: &str = "(Ljava/lang/String;[BII)Ljava/lang/Class;";
const CONSTRUCTOR: &str = "<init>";
const NO_ARG_CONSTRUCTOR: &str = "()V";

/// Upload the accessor bundle once per session
///
/// Concurrent callers share one attempt and observe its outcome. `None` means
/// guest debugging is unavailable for this session; the reason is logged.
/// The caller must not hold the thread's lock.
pub async fn upload_accessor_bundle(
    session: &DebugSession,
    thread: &TargetThread,
) -> Option<RemoteAccessor> {
    let accessor = session
        .accessor_cell()
        .get_or_init(|| async {
            session.count_upload_attempt();
            match upload(session, thread).await {
                Ok(accessor) => {
                    info!(
                        session = %session.id(),
                        accessor = %accessor.class_name,
                        "accessor available in target"
                    );
                    session.publish(SessionEvent::ServiceClassAvailable {
                        accessor: accessor.class_type,
                    });
                    Some(accessor)
                }
                Err(e) if e.is_disconnect() => {
                    debug!(session = %session.id(), "target disconnected during upload");
                    None
                }
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "accessor upload failed, guest debugging unavailable");
                    None
                }
            }
        })
        .await;

    if session.is_disconnected() {
        return None;
    }
    accessor.clone()
}

async fn upload(session: &DebugSession, thread: &TargetThread) -> InjectResult<RemoteAccessor> {
    let naming = &session.config().naming;
    let entry = session.bundle().accessor(naming).ok_or_else(|| {
        InjectError::Bundle(format!("no class ending in {}", naming.accessor_suffix))
    })?;
    let target = session.target().as_ref();

    let _access = thread.lock().await;
    let _invoking = thread.invoking();

    // When the entry class is loaded, the rest of the bundle is too
    if let Some(class_type) = target.classes_by_name(&entry.name).await?.first().copied() {
        debug!(session = %session.id(), accessor = %entry.name, "accessor already loaded");
        let class_object = session.pins().pin(|| target.class_object(class_type)).await?;
        return Ok(RemoteAccessor {
            class_name: entry.name.clone(),
            class_type,
            class_object,
        });
    }

    let unit = PinRegistry::new(session.target().clone());
    let result = define_bundle(session, thread, entry, &unit).await;
    let released = unit.collect_all().await;
    trace!(session = %session.id(), released, "upload pins released");
    result
}

async fn define_bundle(
    session: &DebugSession,
    thread: &TargetThread,
    entry: &Artifact,
    unit: &PinRegistry,
) -> InjectResult<RemoteAccessor> {
    let target = session.target().as_ref();
    let loader = resolve_loader(session, thread, unit).await?;
    let definer = ClassDefiner::new(target, thread, unit, loader).await?;

    let mut accessor = None;
    for artifact in session.bundle().uploadable(&session.config().naming) {
        let is_accessor = accessor.is_none() && artifact.name == entry.name;
        let registry = if is_accessor { session.pins() } else { unit };

        let class_object = definer.define(artifact, registry).await?;
        debug!(session = %session.id(), class = %artifact.name, "defined class in target");

        if is_accessor {
            accessor = Some(RemoteAccessor {
                class_name: artifact.name.clone(),
                class_type: target.reflected_type(class_object).await?,
                class_object,
            });
        }
    }

    let accessor =
        accessor.ok_or_else(|| InjectError::Bundle(format!("{} was not uploaded", entry.name)))?;

    // Instantiating runs the accessor's static and instance initialization
    let constructor = target
        .require_method(accessor.class_type, CONSTRUCTOR, NO_ARG_CONSTRUCTOR)
        .await?;
    target.new_instance(thread.id(), constructor, &[]).await?;

    Ok(accessor)
}

/// Pick the loader that will define the bundle
async fn resolve_loader(
    session: &DebugSession,
    thread: &TargetThread,
    unit: &PinRegistry,
) -> InjectResult<ObjectId> {
    let runtime = &session.config().runtime;
    let target = session.target().as_ref();

    let major = target.java_major().await?;
    let isolated = major.map_or(false, |major| major >= runtime.module_isolation_since);
    let marker = marker_loader(session).await?;
    debug!(session = %session.id(), ?major, isolated, marker = ?marker, "resolving class loader");

    if isolated {
        return bootstrap_isolated_loader(session, thread, unit, marker).await;
    }

    if let Some((_, loader)) = marker {
        return Ok(loader);
    }
    if let Some(loader) = fallback(system_loader(target, thread).await)? {
        return Ok(loader);
    }
    if let Some(loader) = fallback(context_loader(target, thread).await)? {
        return Ok(loader);
    }

    Err(InjectError::LoaderResolutionFailed(
        "no marker, system or context class loader".to_string(),
    ))
}

/// Loader of the first marker type present in the target
async fn marker_loader(
    session: &DebugSession,
) -> InjectResult<Option<(ReferenceTypeId, ObjectId)>> {
    let target = session.target().as_ref();
    for marker in &session.config().runtime.loader_markers {
        for class_type in target.classes_by_name(marker).await? {
            if let Some(loader) = target.class_loader(class_type).await? {
                return Ok(Some((class_type, loader)));
            }
        }
    }
    Ok(None)
}

async fn system_loader(
    target: &dyn TargetVm,
    thread: &TargetThread,
) -> InjectResult<Option<ObjectId>> {
    let class_loader = target.require_class("java.lang.ClassLoader").await?;
    let method = target
        .require_method(
            class_loader,
            "getSystemClassLoader",
            "()Ljava/lang/ClassLoader;",
        )
        .await?;
    Ok(target.invoke_static(thread.id(), method, &[]).await?.as_object())
}

async fn context_loader(
    target: &dyn TargetVm,
    thread: &TargetThread,
) -> InjectResult<Option<ObjectId>> {
    let thread_class = target.require_class("java.lang.Thread").await?;
    let method = target
        .require_method(
            thread_class,
            "getContextClassLoader",
            "()Ljava/lang/ClassLoader;",
        )
        .await?;
    // A thread id is also the id of its java.lang.Thread object
    Ok(target
        .invoke_instance(thread.id(), thread.id(), method, &[])
        .await?
        .as_object())
}

/// Lookup failures move on to the next candidate; a lost target does not
fn fallback(result: InjectResult<Option<ObjectId>>) -> InjectResult<Option<ObjectId>> {
    match result {
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            debug!(error = %e, "class loader candidate unavailable");
            Ok(None)
        }
        ok => ok,
    }
}

/// Under module isolation: define the bundle's own loader next to the guest
/// runtime and open the runtime's packages to it
async fn bootstrap_isolated_loader(
    session: &DebugSession,
    thread: &TargetThread,
    unit: &PinRegistry,
    marker: Option<(ReferenceTypeId, ObjectId)>,
) -> InjectResult<ObjectId> {
    let config = session.config();
    let target = session.target().as_ref();

    let (marker_type, marker_loader) = marker.ok_or_else(|| {
        InjectError::LoaderResolutionFailed("no loader marker type is loaded".to_string())
    })?;
    let artifact = session
        .bundle()
        .bootstrap_loader(&config.naming)
        .ok_or_else(|| {
            InjectError::LoaderResolutionFailed(format!(
                "bundle has no class ending in {}",
                config.naming.bootstrap_loader_suffix
            ))
        })?;

    let definer = ClassDefiner::new(target, thread, unit, marker_loader).await?;
    let class_object = definer.define(artifact, unit).await?;
    let loader_class = target.reflected_type(class_object).await?;

    let constructor = target
        .require_method(
            loader_class,
            CONSTRUCTOR,
            &config.accessor.bootstrap_loader_constructor,
        )
        .await?;
    let args = [Value::object(TypeTag::ClassLoader, marker_loader)];
    let loader = unit
        .pin(|| target.new_instance(thread.id(), constructor, &args))
        .await?;
    debug!(session = %session.id(), loader, "bootstrap class loader created");

    export_packages(session, thread, unit, marker_type, loader).await?;
    Ok(loader)
}

/// One `Module.addExports(package, unnamedModule)` per configured package
async fn export_packages(
    session: &DebugSession,
    thread: &TargetThread,
    unit: &PinRegistry,
    marker_type: ReferenceTypeId,
    loader: ObjectId,
) -> InjectResult<()> {
    let target = session.target().as_ref();

    let class_class = target.require_class("java.lang.Class").await?;
    let get_module = target
        .require_method(class_class, "getModule", "()Ljava/lang/Module;")
        .await?;
    let marker_class = target.class_object(marker_type).await?;
    let module = invoke_for_object(target, thread, marker_class, get_module, "getModule").await?;

    let loader_type = target.type_of(loader).await?;
    let get_unnamed = target
        .require_method(loader_type, "getUnnamedModule", "()Ljava/lang/Module;")
        .await?;
    let unnamed = invoke_for_object(target, thread, loader, get_unnamed, "getUnnamedModule").await?;

    let module_class = target.require_class("java.lang.Module").await?;
    let add_exports = target
        .require_method(
            module_class,
            "addExports",
            "(Ljava/lang/String;Ljava/lang/Module;)Ljava/lang/Module;",
        )
        .await?;

    for package in &session.config().runtime.exported_packages {
        let name = unit.pin(|| target.create_string(package)).await?;
        let args = [
            Value::object(TypeTag::String, name),
            Value::object(TypeTag::Object, unnamed),
        ];
        target
            .invoke_instance(thread.id(), module, add_exports, &args)
            .await?;
        trace!(session = %session.id(), package = %package, "package exported");
    }
    Ok(())
}

async fn invoke_for_object(
    target: &dyn TargetVm,
    thread: &TargetThread,
    object: ObjectId,
    method: MethodRef,
    what: &str,
) -> InjectResult<ObjectId> {
    target
        .invoke_instance(thread.id(), object, method, &[])
        .await?
        .as_object()
        .ok_or_else(|| InjectError::NullReference(what.to_string()))
}

/// Byte mirrors indexed by `byte + 128`, built once per definer
struct ByteMirrors(Vec<Value>);

impl ByteMirrors {
    fn new() -> Self {
        Self((i8::MIN..=i8::MAX).map(Value::byte).collect())
    }

    fn get(&self, byte: u8) -> Value {
        self.0[(byte as i8 as i16 + 128) as usize].clone()
    }
}

/// Defines classes through one remote loader
struct ClassDefiner<'a> {
    target: &'a dyn TargetVm,
    thread: &'a TargetThread,
    unit: &'a PinRegistry,
    loader: ObjectId,
    define_class: MethodRef,
    byte_array_type: ReferenceTypeId,
    mirrors: ByteMirrors,
}

impl<'a> ClassDefiner<'a> {
    async fn new(
        target: &'a dyn TargetVm,
        thread: &'a TargetThread,
        unit: &'a PinRegistry,
        loader: ObjectId,
    ) -> InjectResult<Self> {
        let loader_type = target.type_of(loader).await?;
        let define_class = target
            .require_method(loader_type, DEFINE_CLASS, DEFINE_CLASS_SIGNATURE)
            .await?;
        let byte_array_type = target.require_class("byte[]").await?;

        Ok(Self {
            target,
            thread,
            unit,
            loader,
            define_class,
            byte_array_type,
            mirrors: ByteMirrors::new(),
        })
    }

    /// Define one artifact; its class object is pinned in `registry`
    async fn define(&self, artifact: &Artifact, registry: &PinRegistry) -> InjectResult<ObjectId> {
        let target = self.target;
        let length = class_file_length(&artifact.name, artifact.bytes.len())?;
        let name = self.unit.pin(|| target.create_string(&artifact.name)).await?;
        let bytes = self.upload_bytes(&artifact.bytes, length).await?;
        let args = [
            Value::object(TypeTag::String, name),
            Value::object(TypeTag::Array, bytes),
            Value::int(0),
            Value::int(length),
        ];
        let args = &args;

        // Defining twice fails, so a collected class object is looked up by name
        let mut attempt = 0u32;
        registry
            .pin(|| {
                attempt += 1;
                let first = attempt == 1;
                async move {
                    if first {
                        target
                            .invoke_instance(
                                self.thread.id(),
                                self.loader,
                                self.define_class,
                                args,
                            )
                            .await?
                            .as_object()
                            .ok_or_else(|| InjectError::NullReference(DEFINE_CLASS.to_string()))
                    } else {
                        let class_type = target.require_class(&artifact.name).await?;
                        target.class_object(class_type).await
                    }
                }
            })
            .await
    }

    async fn upload_bytes(&self, bytes: &[u8], length: i32) -> InjectResult<ObjectId> {
        let target = self.target;
        let array = self
            .unit
            .pin(|| target.new_array(self.byte_array_type, length))
            .await?;

        if !bytes.is_empty() {
            let values: Vec<Value> = bytes.iter().map(|b| self.mirrors.get(*b)).collect();
            target.set_array_values(array, 0, &values).await?;
        }
        Ok(array)
    }
}

/// Java arrays are indexed by int
fn class_file_length(name: &str, len: usize) -> InjectResult<i32> {
    i32::try_from(len)
        .map_err(|_| InjectError::Bundle(format!("{} is too large to define ({} bytes)", name, len)))
}

/// Write a static boolean on the accessor class
pub(crate) async fn set_accessor_flag(
    session: &DebugSession,
    accessor: &RemoteAccessor,
    field: &str,
    value: bool,
) -> InjectResult<()> {
    let target = session.target();
    let field_id = target.require_field(accessor.class_type, field).await?;
    target
        .set_static_field(accessor.class_type, field_id, Value::boolean(value))
        .await
}

/// Call a static accessor method; the caller holds the thread stopped
pub(crate) async fn invoke_accessor(
    session: &DebugSession,
    accessor: &RemoteAccessor,
    thread: &TargetThread,
    method: &MethodSpec,
    args: &[Value],
) -> InjectResult<Value> {
    let target = session.target();
    let method = target
        .require_method(accessor.class_type, &method.name, &method.signature)
        .await?;
    target.invoke_static(thread.id(), method, args).await
}
