// EventRequest command implementations
//
// Set up event requests (method entry/exit, breakpoints, etc.)

use crate::commands::{command_sets, event_commands, event_kinds};
use crate::connection::JdwpConnection;
use crate::events::EventModifier;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::read_i32;
use crate::types::ThreadId;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Suspend policy for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

impl JdwpConnection {
    /// Register an event request (EventRequest.Set command)
    /// Returns the request ID the target will tag matching events with
    pub async fn set_event_request(
        &self,
        event_kind: u8,
        suspend_policy: SuspendPolicy,
        modifiers: &[EventModifier],
    ) -> JdwpResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::SET);

        packet.data.put_u8(event_kind);
        packet.data.put_u8(suspend_policy as u8);
        packet.data.put_i32(modifiers.len() as i32);
        for modifier in modifiers {
            modifier.encode(&mut packet.data);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Request method-entry events for every method of classes matching `class_pattern`
    pub async fn set_method_entry_request(
        &self,
        class_pattern: &str,
        thread: Option<ThreadId>,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<i32> {
        let modifiers = method_modifiers(class_pattern, thread);
        self.set_event_request(event_kinds::METHOD_ENTRY, suspend_policy, &modifiers)
            .await
    }

    /// Request method-exit events (with the returned value) for classes matching `class_pattern`
    pub async fn set_method_exit_request(
        &self,
        class_pattern: &str,
        thread: Option<ThreadId>,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<i32> {
        let modifiers = method_modifiers(class_pattern, thread);
        self.set_event_request(
            event_kinds::METHOD_EXIT_WITH_RETURN_VALUE,
            suspend_policy,
            &modifiers,
        )
        .await
    }

    /// Clear an event request by kind and request ID (EventRequest.Clear command)
    pub async fn clear_event_request(&self, event_kind: u8, request_id: i32) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::CLEAR);

        packet.data.put_u8(event_kind);
        packet.data.put_i32(request_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}

fn method_modifiers(class_pattern: &str, thread: Option<ThreadId>) -> Vec<EventModifier> {
    let mut modifiers = vec![EventModifier::ClassMatch(class_pattern.to_string())];
    if let Some(thread) = thread {
        modifiers.push(EventModifier::ThreadOnly(thread));
    }
    modifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_filter_adds_modifier() {
        assert_eq!(method_modifiers("a.B", None).len(), 1);

        let modifiers = method_modifiers("a.B", Some(42));
        assert_eq!(modifiers.len(), 2);
        assert!(matches!(modifiers[1], EventModifier::ThreadOnly(42)));
    }
}
