// ObjectReference command implementations
//
// Commands for working with object instances: type lookup, instance
// invocation and collection control (pinning).

use crate::classtype::{put_arguments, InvokeResult};
use crate::commands::{class_object_commands, command_sets, object_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_tagged_object_id, read_tagged_value, read_u64, read_u8};
use crate::types::{ClassId, ClassObjectId, MethodId, ObjectId, ReferenceTypeId, ThreadId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// Get the reference type (class) of an object (ObjectReference.ReferenceType command)
    pub async fn get_object_reference_type(
        &self,
        object_id: ObjectId,
    ) -> JdwpResult<ReferenceTypeId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::REFERENCE_TYPE,
        );

        packet.data.put_u64(object_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        // Read type tag (byte) and class ID (objectID)
        let _type_tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }

    /// Invoke an instance method on a suspended thread (ObjectReference.InvokeMethod command)
    ///
    /// `class_id` is the class declaring `method_id`; it can be a superclass
    /// of the object's runtime type.
    pub async fn invoke_method(
        &self,
        object_id: ObjectId,
        thread_id: ThreadId,
        class_id: ClassId,
        method_id: MethodId,
        args: &[Value],
        options: i32,
    ) -> JdwpResult<InvokeResult> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::INVOKE_METHOD,
        );

        packet.data.put_u64(object_id);
        packet.data.put_u64(thread_id);
        packet.data.put_u64(class_id);
        packet.data.put_u64(method_id);
        put_arguments(&mut packet.data, args, options);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        let exception = read_tagged_object_id(&mut data)?;

        Ok(InvokeResult { value, exception })
    }

    /// Prevent the object from being garbage collected (ObjectReference.DisableCollection command)
    /// Fails with INVALID_OBJECT when the object is already gone.
    pub async fn disable_collection(&self, object_id: ObjectId) -> JdwpResult<()> {
        self.collection_command(object_id, object_reference_commands::DISABLE_COLLECTION)
            .await
    }

    /// Undo a previous DisableCollection (ObjectReference.EnableCollection command)
    pub async fn enable_collection(&self, object_id: ObjectId) -> JdwpResult<()> {
        self.collection_command(object_id, object_reference_commands::ENABLE_COLLECTION)
            .await
    }

    async fn collection_command(&self, object_id: ObjectId, command: u8) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::OBJECT_REFERENCE, command);

        packet.data.put_u64(object_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Type mirrored by a java.lang.Class object (ClassObjectReference.ReflectedType command)
    pub async fn get_reflected_type(
        &self,
        class_object_id: ClassObjectId,
    ) -> JdwpResult<ReferenceTypeId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::CLASS_OBJECT_REFERENCE,
            class_object_commands::REFLECTED_TYPE,
        );

        packet.data.put_u64(class_object_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let _type_tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }
}
