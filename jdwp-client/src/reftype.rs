// ReferenceType command implementations
//
// Commands for working with classes, interfaces, and arrays

use crate::commands::{command_sets, reference_type_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_string, read_tagged_object_id, read_u64};
use crate::types::{ClassLoaderId, ClassObjectId, FieldId, MethodId, ObjectId, ReferenceTypeId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Method information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

/// Field information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

impl JdwpConnection {
    /// Loader that defined a type; `None` for the bootstrap loader (ReferenceType.ClassLoader command)
    pub async fn get_class_loader(
        &self,
        ref_type_id: ReferenceTypeId,
    ) -> JdwpResult<Option<ClassLoaderId>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::CLASS_LOADER,
        );

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let loader = read_u64(&mut data)?;
        Ok((loader != 0).then_some(loader))
    }

    /// Get fields declared by a reference type (ReferenceType.Fields command)
    pub async fn get_fields(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<FieldInfo>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::REFERENCE_TYPE, reference_type_commands::FIELDS);

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let fields_count = read_i32(&mut data)?;
        let mut fields = Vec::with_capacity(fields_count.max(0) as usize);

        for _ in 0..fields_count {
            let field_id = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let mod_bits = read_i32(&mut data)?;

            fields.push(FieldInfo {
                field_id,
                name,
                signature,
                mod_bits,
            });
        }

        Ok(fields)
    }

    /// Get methods for a reference type (ReferenceType.Methods command)
    pub async fn get_methods(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<MethodInfo>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::REFERENCE_TYPE, reference_type_commands::METHODS);

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let methods_count = read_i32(&mut data)?;
        let mut methods = Vec::with_capacity(methods_count.max(0) as usize);

        for _ in 0..methods_count {
            let method_id = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let mod_bits = read_i32(&mut data)?;

            methods.push(MethodInfo {
                method_id,
                name,
                signature,
                mod_bits,
            });
        }

        Ok(methods)
    }

    /// The java.lang.Class mirror of a type (ReferenceType.ClassObject command)
    pub async fn get_class_object(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<ClassObjectId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::CLASS_OBJECT,
        );

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }

    /// Live instances of a type, 0 = no limit (ReferenceType.Instances command)
    pub async fn get_instances(
        &self,
        ref_type_id: ReferenceTypeId,
        max_instances: i32,
    ) -> JdwpResult<Vec<ObjectId>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::REFERENCE_TYPE, reference_type_commands::INSTANCES);

        packet.data.put_u64(ref_type_id);
        packet.data.put_i32(max_instances);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let count = read_i32(&mut data)?;
        let mut instances = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            instances.push(read_tagged_object_id(&mut data)?);
        }

        Ok(instances)
    }
}
