// Helper functions for reading JDWP data types from buffers

use crate::protocol::{JdwpError, JdwpResult};
use crate::types::{Location, ObjectId, TypeTag, Value, ValueData};
use bytes::Buf;

fn ensure(buf: &&[u8], needed: usize, what: &str) -> JdwpResult<()> {
    if buf.remaining() < needed {
        return Err(JdwpError::Protocol(format!("Not enough data for {}", what)));
    }
    Ok(())
}

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    ensure(buf, 4, "string length")?;

    let len = buf.get_u32() as usize;

    if buf.remaining() < len {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for string: expected {}, got {}",
            len,
            buf.remaining()
        )));
    }

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

/// Read a u32
pub fn read_u32(buf: &mut &[u8]) -> JdwpResult<u32> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

/// Read a i32
pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    ensure(buf, 4, "i32")?;
    Ok(buf.get_i32())
}

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

/// Read a u64
pub fn read_u64(buf: &mut &[u8]) -> JdwpResult<u64> {
    ensure(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

/// Read a i64
pub fn read_i64(buf: &mut &[u8]) -> JdwpResult<i64> {
    ensure(buf, 8, "i64")?;
    Ok(buf.get_i64())
}

/// Read a location (type tag, class, method, index)
pub fn read_location(buf: &mut &[u8]) -> JdwpResult<Location> {
    let type_tag = read_u8(buf)?;
    let class_id = read_u64(buf)?;
    let method_id = read_u64(buf)?;
    let index = read_u64(buf)?;

    Ok(Location {
        type_tag,
        class_id,
        method_id,
        index,
    })
}

/// Read a value whose tag is already known
pub fn read_value(tag: u8, buf: &mut &[u8]) -> JdwpResult<Value> {
    let data = match tag {
        66 => {
            ensure(buf, 1, "byte")?;
            ValueData::Byte(buf.get_i8())
        }
        67 => {
            ensure(buf, 2, "char")?;
            ValueData::Char(buf.get_u16())
        }
        68 => {
            ensure(buf, 8, "double")?;
            ValueData::Double(buf.get_f64())
        }
        70 => {
            ensure(buf, 4, "float")?;
            ValueData::Float(buf.get_f32())
        }
        73 => ValueData::Int(read_i32(buf)?),
        74 => ValueData::Long(read_i64(buf)?),
        83 => {
            ensure(buf, 2, "short")?;
            ValueData::Short(buf.get_i16())
        }
        90 => ValueData::Boolean(read_u8(buf)? != 0),
        86 => ValueData::Void,
        t if TypeTag::is_object(t) => ValueData::Object(read_u64(buf)?),
        _ => {
            return Err(JdwpError::Protocol(format!("Unknown value tag: {}", tag)));
        }
    };

    Ok(Value { tag, data })
}

/// Read a tagged value (tag byte followed by the data)
pub fn read_tagged_value(buf: &mut &[u8]) -> JdwpResult<Value> {
    let tag = read_u8(buf)?;
    read_value(tag, buf)
}

/// Read a tagged object id, returning 0 for null
pub fn read_tagged_object_id(buf: &mut &[u8]) -> JdwpResult<ObjectId> {
    let _tag = read_u8(buf)?;
    read_u64(buf)
}
