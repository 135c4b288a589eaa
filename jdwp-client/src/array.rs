// ArrayType / ArrayReference command implementations
//
// Used to materialize raw byte buffers inside the target

use crate::commands::{array_reference_commands, array_type_commands, command_sets};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::read_tagged_object_id;
use crate::types::{ArrayId, ArrayTypeId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// Allocate a new array of the given array type (ArrayType.NewInstance command)
    pub async fn new_array(&self, array_type_id: ArrayTypeId, length: i32) -> JdwpResult<ArrayId> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::ARRAY_TYPE, array_type_commands::NEW_INSTANCE);

        packet.data.put_u64(array_type_id);
        packet.data.put_i32(length);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_tagged_object_id(&mut data)
    }

    /// Write array elements starting at `first_index` (ArrayReference.SetValues command)
    /// Elements are written untagged; all of them must share the array's component type.
    pub async fn set_array_values(
        &self,
        array_id: ArrayId,
        first_index: i32,
        values: &[Value],
    ) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::SET_VALUES,
        );

        packet.data.put_u64(array_id);
        packet.data.put_i32(first_index);
        packet.data.put_i32(values.len() as i32);
        for value in values {
            value.encode_untagged(&mut packet.data);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
