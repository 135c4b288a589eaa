// TargetVm over a JDWP connection
//
// Invocations always use INVOKE_SINGLE_THREADED so other target threads stay
// where they are while accessor code runs.

use crate::error::{InjectError, InjectResult};
use crate::target::{MethodRef, TargetVm};
use async_trait::async_trait;
use jdwp_client::commands::invoke_options::INVOKE_SINGLE_THREADED;
use jdwp_client::reftype::{FieldInfo, MethodInfo};
use jdwp_client::types::FieldId;
use jdwp_client::vm::class_name_to_signature;
use jdwp_client::{InvokeResult, JdwpConnection, ObjectId, ReferenceTypeId, ThreadId, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct JdwpTarget {
    conn: JdwpConnection,
    java_major: OnceCell<Option<u32>>,
    methods: Mutex<HashMap<ReferenceTypeId, Arc<Vec<MethodInfo>>>>,
    fields: Mutex<HashMap<ReferenceTypeId, Arc<Vec<FieldInfo>>>>,
}

impl JdwpTarget {
    pub fn new(conn: JdwpConnection) -> Self {
        Self {
            conn,
            java_major: OnceCell::new(),
            methods: Mutex::new(HashMap::new()),
            fields: Mutex::new(HashMap::new()),
        }
    }

    async fn methods_of(&self, ty: ReferenceTypeId) -> InjectResult<Arc<Vec<MethodInfo>>> {
        if let Some(methods) = self.methods.lock().get(&ty) {
            return Ok(methods.clone());
        }
        let methods = Arc::new(self.conn.get_methods(ty).await?);
        self.methods.lock().insert(ty, methods.clone());
        Ok(methods)
    }

    async fn fields_of(&self, ty: ReferenceTypeId) -> InjectResult<Arc<Vec<FieldInfo>>> {
        if let Some(fields) = self.fields.lock().get(&ty) {
            return Ok(fields.clone());
        }
        let fields = Arc::new(self.conn.get_fields(ty).await?);
        self.fields.lock().insert(ty, fields.clone());
        Ok(fields)
    }

    /// Next type up the hierarchy; interfaces and Object end the walk
    async fn superclass(&self, ty: ReferenceTypeId) -> InjectResult<Option<ReferenceTypeId>> {
        match self.conn.get_superclass(ty).await {
            Ok(superclass) => Ok(superclass),
            Err(e) if e.is_disconnect() => Err(e.into()),
            Err(e) => {
                debug!("no superclass for type {:x}: {}", ty, e);
                Ok(None)
            }
        }
    }
}

fn invoke_outcome(result: InvokeResult) -> InjectResult<Value> {
    if result.threw() {
        return Err(InjectError::TargetInvocationFailed {
            exception: result.exception,
        });
    }
    Ok(result.value)
}

#[async_trait]
impl TargetVm for JdwpTarget {
    async fn java_major(&self) -> InjectResult<Option<u32>> {
        let major = self
            .java_major
            .get_or_try_init(|| async {
                let version = self.conn.get_version().await?;
                debug!("target VM {}", version.vm_version);
                Ok::<_, InjectError>(version.java_major())
            })
            .await?;
        Ok(*major)
    }

    async fn classes_by_name(&self, class_name: &str) -> InjectResult<Vec<ReferenceTypeId>> {
        let signature = class_name_to_signature(class_name);
        let classes = self.conn.classes_by_signature(&signature).await?;
        Ok(classes.into_iter().map(|class| class.type_id).collect())
    }

    async fn class_loader(&self, ty: ReferenceTypeId) -> InjectResult<Option<ObjectId>> {
        Ok(self.conn.get_class_loader(ty).await?)
    }

    async fn class_object(&self, ty: ReferenceTypeId) -> InjectResult<ObjectId> {
        Ok(self.conn.get_class_object(ty).await?)
    }

    async fn reflected_type(&self, class_object: ObjectId) -> InjectResult<ReferenceTypeId> {
        Ok(self.conn.get_reflected_type(class_object).await?)
    }

    async fn type_of(&self, object: ObjectId) -> InjectResult<ReferenceTypeId> {
        Ok(self.conn.get_object_reference_type(object).await?)
    }

    async fn find_method(
        &self,
        ty: ReferenceTypeId,
        name: &str,
        signature: &str,
    ) -> InjectResult<Option<MethodRef>> {
        let mut current = Some(ty);
        while let Some(declaring_type) = current {
            let methods = self.methods_of(declaring_type).await?;
            let found = methods
                .iter()
                .find(|m| m.name == name && m.signature == signature);
            if let Some(method) = found {
                return Ok(Some(MethodRef {
                    declaring_type,
                    method_id: method.method_id,
                }));
            }
            current = self.superclass(declaring_type).await?;
        }
        Ok(None)
    }

    async fn find_field(&self, ty: ReferenceTypeId, name: &str) -> InjectResult<Option<FieldId>> {
        let mut current = Some(ty);
        while let Some(declaring_type) = current {
            let fields = self.fields_of(declaring_type).await?;
            if let Some(field) = fields.iter().find(|f| f.name == name) {
                return Ok(Some(field.field_id));
            }
            current = self.superclass(declaring_type).await?;
        }
        Ok(None)
    }

    async fn instance_count(&self, ty: ReferenceTypeId) -> InjectResult<i64> {
        let counts = self.conn.instance_counts(&[ty]).await?;
        Ok(counts.first().copied().unwrap_or(0))
    }

    async fn instances(&self, ty: ReferenceTypeId) -> InjectResult<Vec<ObjectId>> {
        Ok(self.conn.get_instances(ty, 0).await?)
    }

    async fn create_string(&self, value: &str) -> InjectResult<ObjectId> {
        Ok(self.conn.create_string(value).await?)
    }

    async fn new_array(&self, array_type: ReferenceTypeId, length: i32) -> InjectResult<ObjectId> {
        Ok(self.conn.new_array(array_type, length).await?)
    }

    async fn set_array_values(
        &self,
        array: ObjectId,
        first_index: i32,
        values: &[Value],
    ) -> InjectResult<()> {
        Ok(self.conn.set_array_values(array, first_index, values).await?)
    }

    async fn invoke_static(
        &self,
        thread: ThreadId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value> {
        let result = self
            .conn
            .invoke_static_method(
                method.declaring_type,
                thread,
                method.method_id,
                args,
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        invoke_outcome(result)
    }

    async fn invoke_instance(
        &self,
        thread: ThreadId,
        object: ObjectId,
        method: MethodRef,
        args: &[Value],
    ) -> InjectResult<Value> {
        let result = self
            .conn
            .invoke_method(
                object,
                thread,
                method.declaring_type,
                method.method_id,
                args,
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        invoke_outcome(result)
    }

    async fn new_instance(
        &self,
        thread: ThreadId,
        constructor: MethodRef,
        args: &[Value],
    ) -> InjectResult<ObjectId> {
        let result = self
            .conn
            .new_instance(
                constructor.declaring_type,
                thread,
                constructor.method_id,
                args,
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        invoke_outcome(result)?.as_object().ok_or_else(|| {
            InjectError::NullReference(format!("new instance of {:x}", constructor.declaring_type))
        })
    }

    async fn set_static_field(
        &self,
        class: ReferenceTypeId,
        field: FieldId,
        value: Value,
    ) -> InjectResult<()> {
        Ok(self.conn.set_static_values(class, &[(field, value)]).await?)
    }

    async fn disable_collection(&self, object: ObjectId) -> InjectResult<()> {
        Ok(self.conn.disable_collection(object).await?)
    }

    async fn enable_collection(&self, object: ObjectId) -> InjectResult<()> {
        Ok(self.conn.enable_collection(object).await?)
    }

    async fn is_suspended(&self, thread: ThreadId) -> InjectResult<bool> {
        Ok(self.conn.get_thread_status(thread).await?.suspended)
    }

    async fn resume_thread(&self, thread: ThreadId) -> InjectResult<()> {
        Ok(self.conn.resume_thread(thread).await?)
    }

    async fn interrupt_thread(&self, thread: ThreadId) -> InjectResult<()> {
        Ok(self.conn.interrupt_thread(thread).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thrown_exception_fails_the_invocation() {
        let thrown = InvokeResult {
            value: Value::void(),
            exception: 0x77,
        };
        assert!(matches!(
            invoke_outcome(thrown),
            Err(InjectError::TargetInvocationFailed { exception: 0x77 })
        ));

        let returned = InvokeResult {
            value: Value::int(3),
            exception: 0,
        };
        assert_eq!(invoke_outcome(returned).unwrap(), Value::int(3));
    }
}
