// JDWP type definitions
//
// Common types used across the JDWP protocol

use bytes::BufMut;
use serde::{Deserialize, Serialize};

// Object IDs are 8 bytes in JDWP
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type StringId = ObjectId;
pub type ClassLoaderId = ObjectId;
pub type ClassObjectId = ObjectId;
pub type ArrayId = ObjectId;

pub type ReferenceTypeId = u64;
pub type ClassId = ReferenceTypeId;
pub type ArrayTypeId = ReferenceTypeId;

pub type MethodId = u64;
pub type FieldId = u64;

// Location identifies a code position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8, // 1=class, 2=interface, 3=array
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}

// Thread status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ThreadStatus {
    Zombie = 0,
    Running = 1,
    Sleeping = 2,
    Monitor = 3,
    Wait = 4,
}

impl ThreadStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ThreadStatus::Running,
            2 => ThreadStatus::Sleeping,
            3 => ThreadStatus::Monitor,
            4 => ThreadStatus::Wait,
            _ => ThreadStatus::Zombie,
        }
    }
}

// Suspend status bit reported by ThreadReference.Status
pub const SUSPEND_STATUS_SUSPENDED: i32 = 0x1;

// Type tags for values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Array = 91,        // '['
    Byte = 66,         // 'B'
    Char = 67,         // 'C'
    Object = 76,       // 'L'
    Float = 70,        // 'F'
    Double = 68,       // 'D'
    Int = 73,          // 'I'
    Long = 74,         // 'J'
    Short = 83,        // 'S'
    Void = 86,         // 'V'
    Boolean = 90,      // 'Z'
    String = 115,      // 's'
    Thread = 116,      // 't'
    ThreadGroup = 103, // 'g'
    ClassLoader = 108, // 'l'
    ClassObject = 99,  // 'c'
}

impl TypeTag {
    /// Whether values with this tag are carried as object ids
    pub fn is_object(tag: u8) -> bool {
        matches!(tag, 76 | 115 | 116 | 103 | 108 | 99 | 91)
    }
}

// Tagged value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub tag: u8,
    pub data: ValueData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Byte(i8),
    Char(u16),
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(ObjectId),
    Void,
}

impl Value {
    pub fn byte(v: i8) -> Self {
        Self {
            tag: TypeTag::Byte as u8,
            data: ValueData::Byte(v),
        }
    }

    pub fn int(v: i32) -> Self {
        Self {
            tag: TypeTag::Int as u8,
            data: ValueData::Int(v),
        }
    }

    pub fn boolean(v: bool) -> Self {
        Self {
            tag: TypeTag::Boolean as u8,
            data: ValueData::Boolean(v),
        }
    }

    pub fn object(tag: TypeTag, id: ObjectId) -> Self {
        Self {
            tag: tag as u8,
            data: ValueData::Object(id),
        }
    }

    pub fn null() -> Self {
        Self::object(TypeTag::Object, 0)
    }

    pub fn void() -> Self {
        Self {
            tag: TypeTag::Void as u8,
            data: ValueData::Void,
        }
    }

    /// Object id carried by this value, `None` for primitives and null
    pub fn as_object(&self) -> Option<ObjectId> {
        match self.data {
            ValueData::Object(id) if id != 0 => Some(id),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data {
            ValueData::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Write as a tagged value (tag byte followed by the data)
    pub fn encode_tagged(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.tag);
        self.encode_untagged(buf);
    }

    /// Write only the data, as used by ArrayReference.SetValues and ClassType.SetValues
    pub fn encode_untagged(&self, buf: &mut Vec<u8>) {
        match self.data {
            ValueData::Byte(v) => buf.put_i8(v),
            ValueData::Char(v) => buf.put_u16(v),
            ValueData::Float(v) => buf.put_f32(v),
            ValueData::Double(v) => buf.put_f64(v),
            ValueData::Int(v) => buf.put_i32(v),
            ValueData::Long(v) => buf.put_i64(v),
            ValueData::Short(v) => buf.put_i16(v),
            ValueData::Boolean(v) => buf.put_u8(v as u8),
            ValueData::Object(id) => buf.put_u64(id),
            ValueData::Void => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_object_encoding() {
        let mut buf = Vec::new();
        Value::object(TypeTag::String, 0x0102).encode_tagged(&mut buf);
        assert_eq!(buf, vec![b's', 0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_untagged_primitives() {
        let mut buf = Vec::new();
        Value::byte(-1).encode_untagged(&mut buf);
        Value::boolean(true).encode_untagged(&mut buf);
        Value::int(258).encode_untagged(&mut buf);
        assert_eq!(buf, vec![0xff, 1, 0, 0, 1, 2]);
    }

    #[test]
    fn test_null_is_not_an_object() {
        assert_eq!(Value::null().as_object(), None);
        assert_eq!(Value::object(TypeTag::Object, 9).as_object(), Some(9));
        assert_eq!(Value::int(1).as_object(), None);
    }
}
