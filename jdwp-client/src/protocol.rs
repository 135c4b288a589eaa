// JDWP protocol definitions and packet handling
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

// JDWP uses big-endian (network byte order) for all multi-byte values

pub type JdwpResult<T> = Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("JDWP error code {0}: {1}")]
    JdwpErrorCode(u16, &'static str),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// The target reported that the object behind an id was garbage collected.
    pub fn is_collected(&self) -> bool {
        matches!(self, JdwpError::JdwpErrorCode(error_codes::INVALID_OBJECT, _))
    }

    /// The target can no longer be reached: socket gone, VM dead or torn down.
    pub fn is_disconnect(&self) -> bool {
        match self {
            JdwpError::Io(_) | JdwpError::ConnectionClosed => true,
            JdwpError::JdwpErrorCode(code, _) => {
                matches!(*code, error_codes::VM_DEAD | error_codes::INTERNAL)
            }
            _ => false,
        }
    }
}

// JDWP handshake string
pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet structure:
// length (4 bytes) - includes header
// id (4 bytes)
// flags (1 byte) - 0x00 = command, 0x80 = reply
// [Command packet: command set (1 byte) + command (1 byte)]
// [Reply packet: error code (2 bytes)]
// data (variable)

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

/// Error codes the engine reacts to
pub mod error_codes {
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const VM_DEAD: u16 = 112;
    pub const INTERNAL: u16 = 113;
    pub const ALREADY_INVOKING: u16 = 502;
}

#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

impl CommandPacket {
    pub fn new(id: u32, command_set: u8, command: u8) -> Self {
        Self {
            id,
            command_set,
            command,
            data: Vec::new(),
        }
    }

    /// Append a JDWP string (4-byte length + UTF-8 bytes) to the payload
    pub fn put_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.data.put_u32(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = BytesMut::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(0x00); // command flag
        buf.put_u8(self.command_set);
        buf.put_u8(self.command);
        buf.put_slice(&self.data);

        buf.to_vec()
    }
}

impl ReplyPacket {
    pub fn decode(mut buf: &[u8]) -> JdwpResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(JdwpError::Protocol("Reply packet too short".to_string()));
        }

        let _length = buf.get_u32();
        let id = buf.get_u32();
        let flags = buf.get_u8();

        if flags != REPLY_FLAG {
            return Err(JdwpError::Protocol(format!("Invalid reply flag: {:#x}", flags)));
        }

        let error_code = buf.get_u16();
        let data = buf.to_vec();

        Ok(Self {
            id,
            error_code,
            data,
        })
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    pub fn check_error(&self) -> JdwpResult<()> {
        if self.is_error() {
            Err(JdwpError::JdwpErrorCode(
                self.error_code,
                error_name(self.error_code),
            ))
        } else {
            Ok(())
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Symbolic name of a JDWP error code
pub fn error_name(code: u16) -> &'static str {
    match code {
        0 => "NONE",
        10 => "INVALID_THREAD",
        11 => "INVALID_THREAD_GROUP",
        13 => "THREAD_NOT_SUSPENDED",
        14 => "THREAD_SUSPENDED",
        20 => "INVALID_OBJECT",
        21 => "INVALID_CLASS",
        22 => "CLASS_NOT_PREPARED",
        23 => "INVALID_METHODID",
        25 => "INVALID_FIELDID",
        34 => "TYPE_MISMATCH",
        41 => "NOT_FOUND",
        60 => "INVALID_CLASS_FORMAT",
        61 => "CIRCULAR_CLASS_DEFINITION",
        62 => "FAILS_VERIFICATION",
        99 => "NOT_IMPLEMENTED",
        100 => "NULL_POINTER",
        101 => "ABSENT_INFORMATION",
        102 => "INVALID_EVENT_TYPE",
        103 => "ILLEGAL_ARGUMENT",
        110 => "OUT_OF_MEMORY",
        111 => "ACCESS_DENIED",
        112 => "VM_DEAD",
        113 => "INTERNAL",
        115 => "UNATTACHED_THREAD",
        500 => "INVALID_TAG",
        502 => "ALREADY_INVOKING",
        503 => "INVALID_INDEX",
        504 => "INVALID_LENGTH",
        506 => "INVALID_STRING",
        507 => "INVALID_CLASS_LOADER",
        508 => "INVALID_ARRAY",
        512 => "INVALID_COUNT",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packet_with_string_payload() {
        let mut packet = CommandPacket::new(7, 1, 11);
        packet.put_string("ab");
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 6);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 17]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 7]);
        assert_eq!(encoded[8], 0x00);
        assert_eq!(&encoded[9..11], &[1, 11]);
        assert_eq!(&encoded[11..], &[0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_reply_error_is_classified() {
        let reply_data = vec![
            0, 0, 0, 11, // length
            0, 0, 0, 3, // id
            0x80, // reply flag
            0, 20, // INVALID_OBJECT
        ];

        let packet = ReplyPacket::decode(&reply_data).unwrap();
        let err = packet.check_error().unwrap_err();
        assert!(err.is_collected());
        assert!(!err.is_disconnect());
        assert_eq!(err.to_string(), "JDWP error code 20: INVALID_OBJECT");
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(JdwpError::ConnectionClosed.is_disconnect());
        assert!(JdwpError::JdwpErrorCode(112, "VM_DEAD").is_disconnect());
        assert!(!JdwpError::Protocol("bad".into()).is_disconnect());
    }

    #[test]
    fn test_reply_rejects_command_flag() {
        let data = vec![0, 0, 0, 11, 0, 0, 0, 1, 0x00, 0, 0];
        assert!(ReplyPacket::decode(&data).is_err());
    }
}
