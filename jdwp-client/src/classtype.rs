// ClassType command implementations
//
// Static invocation, instantiation and static field writes. These are the
// commands that run code inside the target, so they require a thread that is
// suspended by an event.

use crate::commands::{class_type_commands, command_sets};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_tagged_object_id, read_tagged_value, read_u64};
use crate::types::{ClassId, FieldId, MethodId, ObjectId, ThreadId, Value};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Outcome of InvokeMethod / NewInstance: either a value or a thrown exception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    pub value: Value,
    /// Exception thrown by the invoked code, 0 if none
    pub exception: ObjectId,
}

impl InvokeResult {
    pub fn threw(&self) -> bool {
        self.exception != 0
    }
}

/// Append the argument block shared by every invoke command
pub(crate) fn put_arguments(data: &mut Vec<u8>, args: &[Value], options: i32) {
    data.put_i32(args.len() as i32);
    for arg in args {
        arg.encode_tagged(data);
    }
    data.put_i32(options);
}

impl JdwpConnection {
    /// Direct superclass, `None` for java.lang.Object (ClassType.Superclass command)
    pub async fn get_superclass(&self, class_id: ClassId) -> JdwpResult<Option<ClassId>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::CLASS_TYPE, class_type_commands::SUPERCLASS);

        packet.data.put_u64(class_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let superclass = read_u64(&mut data)?;
        Ok((superclass != 0).then_some(superclass))
    }

    /// Write static fields (ClassType.SetValues command)
    pub async fn set_static_values(
        &self,
        class_id: ClassId,
        values: &[(FieldId, Value)],
    ) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::CLASS_TYPE, class_type_commands::SET_VALUES);

        packet.data.put_u64(class_id);
        packet.data.put_i32(values.len() as i32);
        for (field_id, value) in values {
            packet.data.put_u64(*field_id);
            value.encode_untagged(&mut packet.data);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Invoke a static method on a suspended thread (ClassType.InvokeMethod command)
    pub async fn invoke_static_method(
        &self,
        class_id: ClassId,
        thread_id: ThreadId,
        method_id: MethodId,
        args: &[Value],
        options: i32,
    ) -> JdwpResult<InvokeResult> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::CLASS_TYPE, class_type_commands::INVOKE_METHOD);

        packet.data.put_u64(class_id);
        packet.data.put_u64(thread_id);
        packet.data.put_u64(method_id);
        put_arguments(&mut packet.data, args, options);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        let exception = read_tagged_object_id(&mut data)?;

        Ok(InvokeResult { value, exception })
    }

    /// Run a constructor on a suspended thread (ClassType.NewInstance command)
    pub async fn new_instance(
        &self,
        class_id: ClassId,
        thread_id: ThreadId,
        constructor_id: MethodId,
        args: &[Value],
        options: i32,
    ) -> JdwpResult<InvokeResult> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::CLASS_TYPE, class_type_commands::NEW_INSTANCE);

        packet.data.put_u64(class_id);
        packet.data.put_u64(thread_id);
        packet.data.put_u64(constructor_id);
        put_arguments(&mut packet.data, args, options);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        let exception = read_tagged_object_id(&mut data)?;

        Ok(InvokeResult { value, exception })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_block_layout() {
        let mut data = Vec::new();
        put_arguments(&mut data, &[Value::boolean(true), Value::int(2)], 1);

        assert_eq!(
            data,
            vec![
                0, 0, 0, 2, // count
                b'Z', 1, // boolean
                b'I', 0, 0, 0, 2, // int
                0, 0, 0, 1, // INVOKE_SINGLE_THREADED
            ]
        );
    }
}
