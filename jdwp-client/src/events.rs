// JDWP event handling
//
// Events are sent from the JVM to notify about breakpoints, method entry/exit, etc.

use crate::commands::{event_kinds, modifier_kinds};
use crate::protocol::JdwpResult;
use crate::reader::{read_i32, read_location, read_string, read_tagged_value, read_u64, read_u8};
use crate::types::*;
use bytes::BufMut;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: i32,
    pub details: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VMStart {
        thread: ThreadId,
    },
    VMDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
        return_value: Option<Value>,
    },
    Unknown {
        kind: u8,
    },
}

impl EventKind {
    /// Thread the event happened on, if it is thread-scoped
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventKind::VMStart { thread }
            | EventKind::ThreadStart { thread }
            | EventKind::ThreadDeath { thread }
            | EventKind::ClassPrepare { thread, .. }
            | EventKind::Breakpoint { thread, .. }
            | EventKind::Step { thread, .. }
            | EventKind::MethodEntry { thread, .. }
            | EventKind::MethodExit { thread, .. } => Some(*thread),
            EventKind::VMDeath | EventKind::Unknown { .. } => None,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            EventKind::Breakpoint { location, .. }
            | EventKind::Step { location, .. }
            | EventKind::MethodEntry { location, .. }
            | EventKind::MethodExit { location, .. } => Some(location),
            _ => None,
        }
    }
}

// Event request modifiers
#[derive(Debug, Clone)]
pub enum EventModifier {
    ThreadOnly(ThreadId),
    ClassMatch(String),
}

impl EventModifier {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            EventModifier::ThreadOnly(thread) => {
                buf.put_u8(modifier_kinds::THREAD_ONLY);
                buf.put_u64(*thread);
            }
            EventModifier::ClassMatch(pattern) => {
                buf.put_u8(modifier_kinds::CLASS_MATCH);
                buf.put_u32(pattern.len() as u32);
                buf.extend_from_slice(pattern.as_bytes());
            }
        }
    }
}

/// Parse an event packet from JDWP
pub fn parse_event_packet(data: &[u8]) -> JdwpResult<EventSet> {
    let mut buf = data;

    let suspend_policy = read_u8(&mut buf)?;
    let event_count = read_i32(&mut buf)?;

    let mut events = Vec::with_capacity(event_count.max(0) as usize);

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Breakpoint { thread, location }
            }
            event_kinds::SINGLE_STEP => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Step { thread, location }
            }
            event_kinds::METHOD_ENTRY => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::MethodEntry { thread, location }
            }
            event_kinds::METHOD_EXIT => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::MethodExit {
                    thread,
                    location,
                    return_value: None,
                }
            }
            event_kinds::METHOD_EXIT_WITH_RETURN_VALUE => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                let value = read_tagged_value(&mut buf)?;
                EventKind::MethodExit {
                    thread,
                    location,
                    return_value: Some(value),
                }
            }
            event_kinds::CLASS_PREPARE => {
                let thread = read_u64(&mut buf)?;
                let _ref_type_tag = read_u8(&mut buf)?;
                let ref_type = read_u64(&mut buf)?;
                let signature = read_string(&mut buf)?;
                let status = read_i32(&mut buf)?;
                EventKind::ClassPrepare {
                    thread,
                    ref_type,
                    signature,
                    status,
                }
            }
            event_kinds::VM_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::VMStart { thread }
            }
            event_kinds::VM_DEATH => EventKind::VMDeath,
            event_kinds::THREAD_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadStart { thread }
            }
            event_kinds::THREAD_DEATH => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadDeath { thread }
            }
            _ => {
                // The remainder of the composite packet can't be decoded past an unknown kind
                warn!("Unsupported event kind: {}", kind);
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location_bytes(buf: &mut Vec<u8>, class_id: u64, method_id: u64) {
        buf.put_u8(1);
        buf.put_u64(class_id);
        buf.put_u64(method_id);
        buf.put_u64(0);
    }

    #[test]
    fn test_parse_method_exit_with_return_value() {
        let mut data = Vec::new();
        data.put_u8(1); // suspend policy: event thread
        data.put_i32(1);
        data.put_u8(event_kinds::METHOD_EXIT_WITH_RETURN_VALUE);
        data.put_i32(17);
        data.put_u64(0x55); // thread
        location_bytes(&mut data, 0x10, 0x20);
        data.put_u8(b'L');
        data.put_u64(0x99);

        let set = parse_event_packet(&data).unwrap();
        assert_eq!(set.suspend_policy, 1);
        assert_eq!(set.events.len(), 1);
        let event = &set.events[0];
        assert_eq!(event.request_id, 17);
        assert_eq!(event.details.thread(), Some(0x55));
        match &event.details {
            EventKind::MethodExit { return_value, location, .. } => {
                assert_eq!(location.method_id, 0x20);
                assert_eq!(return_value.as_ref().and_then(Value::as_object), Some(0x99));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_entry_then_vm_death() {
        let mut data = Vec::new();
        data.put_u8(0);
        data.put_i32(2);
        data.put_u8(event_kinds::METHOD_ENTRY);
        data.put_i32(3);
        data.put_u64(7);
        location_bytes(&mut data, 1, 2);
        data.put_u8(event_kinds::VM_DEATH);
        data.put_i32(0);

        let set = parse_event_packet(&data).unwrap();
        assert_eq!(set.events.len(), 2);
        assert!(matches!(set.events[0].details, EventKind::MethodEntry { thread: 7, .. }));
        assert!(matches!(set.events[1].details, EventKind::VMDeath));
    }

    #[test]
    fn test_class_match_modifier_encoding() {
        let mut buf = Vec::new();
        EventModifier::ClassMatch("a.B".to_string()).encode(&mut buf);
        assert_eq!(buf, vec![5, 0, 0, 0, 3, b'a', b'.', b'B']);
    }
}
