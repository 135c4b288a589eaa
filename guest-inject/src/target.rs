// Target VM collaborator
//
// The engine talks to the debuggee only through this trait. The live
// implementation rides a JDWP connection (see `jdwp::JdwpTarget`); tests use
// a scripted target.

use crate::error::{InjectError, InjectResult};
use async_trait::async_trait;
use jdwp_client::types::{FieldId, MethodId};
use jdwp_client::{ObjectId, ReferenceTypeId, ThreadId, Value};

/// A method together with the type that declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub declaring_type: ReferenceTypeId,
    pub method_id: MethodId,
}

#[async_trait]
pub trait TargetVm: Send + Sync {
    /// Java feature release of the target, when it can be determined
    async fn java_major(&self) -> InjectResult<Option<u32>>;

    /// Loaded types with the given binary name ("a.b.C", "byte[]")
    async fn classes_by_name(&self, class_name: &str) -> InjectResult<Vec<ReferenceTypeId>>;

    /// Defining loader of a type, `None` for the bootstrap loader
    async fn class_loader(&self, ty: ReferenceTypeId) -> InjectResult<Option<ObjectId>>;

    async fn class_object(&self, ty: ReferenceTypeId) -> InjectResult<ObjectId>;

    async fn reflected_type(&self, class_object: ObjectId) -> InjectResult<ReferenceTypeId>;

    async fn type_of(&self, object: ObjectId) -> InjectResult<ReferenceTypeId>;

    /// Method lookup including inherited methods
    async fn find_method(
        &self,
        ty: ReferenceTypeId,
        name: &str,
        signature: &str,
    ) -> InjectResult<Option<MethodRef>>;

    async fn find_field(&self, ty: ReferenceTypeId, name: &str) -> InjectResult<Option<FieldId>>;

    async fn instance_count(&self, ty: ReferenceTypeId) -> InjectResult<i64>;

    async fn instances(&self, ty: ReferenceTypeId) -> InjectResult<Vec<ObjectId>>;

    async fn create_string(&self, value: &str) -> InjectResult<ObjectId>;

    async fn new_array(&self, array_type: ReferenceTypeId, length: i32) -> InjectResult<ObjectId>;

    async fn set_array_values(
        &self,
        array: ObjectId,
        first_index: i32,
        values: &[Value],
    ) -> InjectResult<()>;

    /// Run a static method on a thread stopped at an event
    async fn invoke_static(
        &self,
        thread: ThreadId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value>;

    async fn invoke_instance(
        &self,
        thread: ThreadId,
        object: ObjectId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value>;

    /// Construct an instance of the constructor's declaring type
    async fn new_instance(
        &self,
        thread: ThreadId,
        constructor: MethodRef,
        args: &[Value],
    ) -> InjectResult<ObjectId>;

    async fn set_static_field(
        &self,
        class: ReferenceTypeId,
        field: FieldId,
        value: Value,
    ) -> InjectResult<()>;

    /// Fails with `InjectError::Collected` when the object is already gone
    async fn disable_collection(&self, object: ObjectId) -> InjectResult<()>;

    async fn enable_collection(&self, object: ObjectId) -> InjectResult<()>;

    async fn is_suspended(&self, thread: ThreadId) -> InjectResult<bool>;

    async fn resume_thread(&self, thread: ThreadId) -> InjectResult<()>;

    async fn interrupt_thread(&self, thread: ThreadId) -> InjectResult<()>;

    async fn require_class(&self, class_name: &str) -> InjectResult<ReferenceTypeId> {
        self.classes_by_name(class_name)
            .await?
            .first()
            .copied()
            .ok_or_else(|| InjectError::MissingMember(format!("class {}", class_name)))
    }

    async fn require_method(
        &self,
        ty: ReferenceTypeId,
        name: &str,
        signature: &str,
    ) -> InjectResult<MethodRef> {
        self.find_method(ty, name, signature)
            .await?
            .ok_or_else(|| InjectError::MissingMember(format!("method {}{}", name, signature)))
    }

    async fn require_field(&self, ty: ReferenceTypeId, name: &str) -> InjectResult<FieldId> {
        self.find_field(ty, name)
            .await?
            .ok_or_else(|| InjectError::MissingMember(format!("field {}", name)))
    }
}
