// VirtualMachine command implementations
//
// These are the fundamental commands for interacting with the JVM

use crate::commands::{command_sets, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_i64, read_string, read_u64, read_u8};
use crate::types::{ReferenceTypeId, StringId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// JVM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

impl VmVersion {
    /// Java feature release of the target ("1.8.0_292" -> 8, "17.0.2" -> 17)
    pub fn java_major(&self) -> Option<u32> {
        parse_java_major(&self.vm_version).or_else(|| {
            // Since JDK 9 the JDWP version tracks the Java release
            (self.jdwp_major >= 9).then_some(self.jdwp_major as u32)
        })
    }
}

/// Parse the feature release out of a `java.version`-style string
pub fn parse_java_major(version: &str) -> Option<u32> {
    let mut parts = version
        .split(|c: char| c == '.' || c == '_' || c == '-' || c == '+')
        .map(|p| p.trim());
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Class information from ClassesBySignature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub ref_type_tag: u8, // 1=class, 2=interface, 3=array
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub status: i32,
}

/// Convert a binary class name to a JVM signature
/// e.g. "com.example.MyClass" -> "Lcom/example/MyClass;", "byte[]" -> "[B"
pub fn class_name_to_signature(name: &str) -> String {
    if let Some(element) = name.strip_suffix("[]") {
        let element_sig = match element {
            "boolean" => "Z".to_string(),
            "byte" => "B".to_string(),
            "char" => "C".to_string(),
            "short" => "S".to_string(),
            "int" => "I".to_string(),
            "long" => "J".to_string(),
            "float" => "F".to_string(),
            "double" => "D".to_string(),
            other => class_name_to_signature(other),
        };
        return format!("[{}", element_sig);
    }
    if (name.starts_with('L') && name.ends_with(';')) || name.starts_with('[') {
        return name.to_string();
    }
    format!("L{};", name.replace('.', "/"))
}

impl JdwpConnection {
    /// Get JVM version information (VirtualMachine.Version command)
    pub async fn get_version(&self) -> JdwpResult<VmVersion> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::VERSION);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let description = read_string(&mut data)?;
        let jdwp_major = read_i32(&mut data)?;
        let jdwp_minor = read_i32(&mut data)?;
        let vm_version = read_string(&mut data)?;
        let vm_name = read_string(&mut data)?;

        Ok(VmVersion {
            description,
            jdwp_major,
            jdwp_minor,
            vm_version,
            vm_name,
        })
    }

    /// Find classes by signature (VirtualMachine.ClassesBySignature command)
    /// Signature format: "Lcom/example/MyClass;" for classes
    pub async fn classes_by_signature(&self, signature: &str) -> JdwpResult<Vec<ClassInfo>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::VIRTUAL_MACHINE,
            vm_commands::CLASSES_BY_SIGNATURE,
        );

        packet.put_string(signature);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let classes_count = read_i32(&mut data)?;
        let mut classes = Vec::with_capacity(classes_count.max(0) as usize);

        for _ in 0..classes_count {
            let ref_type_tag = read_u8(&mut data)?;
            let type_id = read_u64(&mut data)?;
            let status = read_i32(&mut data)?;

            classes.push(ClassInfo {
                ref_type_tag,
                type_id,
                signature: signature.to_string(),
                status,
            });
        }

        Ok(classes)
    }

    /// Create a String in the target (VirtualMachine.CreateString command)
    /// The new string is eligible for collection right away; pin it before use.
    pub async fn create_string(&self, value: &str) -> JdwpResult<StringId> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::CREATE_STRING);

        packet.put_string(value);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }

    /// Count live instances of each type (VirtualMachine.InstanceCounts command)
    pub async fn instance_counts(&self, ref_types: &[ReferenceTypeId]) -> JdwpResult<Vec<i64>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::INSTANCE_COUNTS);

        packet.data.put_i32(ref_types.len() as i32);
        for ref_type in ref_types {
            packet.data.put_u64(*ref_type);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let count = read_i32(&mut data)?;
        let mut counts = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            counts.push(read_i64(&mut data)?);
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_java_major() {
        assert_eq!(parse_java_major("1.8.0_292"), Some(8));
        assert_eq!(parse_java_major("11.0.21"), Some(11));
        assert_eq!(parse_java_major("17"), Some(17));
        assert_eq!(parse_java_major("21-ea+7"), Some(21));
        assert_eq!(parse_java_major("unknown"), None);
    }

    #[test]
    fn test_java_major_falls_back_to_jdwp_version() {
        let version = VmVersion {
            description: String::new(),
            jdwp_major: 17,
            jdwp_minor: 0,
            vm_version: "GraalVM".to_string(),
            vm_name: "GraalVM".to_string(),
        };
        assert_eq!(version.java_major(), Some(17));
    }

    #[test]
    fn test_signature_conversions() {
        assert_eq!(class_name_to_signature("a.b.C"), "La/b/C;");
        assert_eq!(class_name_to_signature("a.b.C$D"), "La/b/C$D;");
        assert_eq!(class_name_to_signature("byte[]"), "[B");
        assert_eq!(class_name_to_signature("La/B;"), "La/B;");
    }
}
