// ThreadReference command implementations
//
// Commands for working with threads (status, resume, interrupt)

use crate::commands::{command_sets, thread_commands, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::read_i32;
use crate::types::{ThreadId, ThreadStatus, SUSPEND_STATUS_SUSPENDED};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Thread status as reported by ThreadReference.Status
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreadStatusInfo {
    pub status: ThreadStatus,
    pub suspended: bool,
}

impl JdwpConnection {
    /// Thread status (ThreadReference.Status command)
    pub async fn get_thread_status(&self, thread_id: ThreadId) -> JdwpResult<ThreadStatusInfo> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::STATUS);

        packet.data.put_u64(thread_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let status = read_i32(&mut data)?;
        let suspend_status = read_i32(&mut data)?;

        Ok(ThreadStatusInfo {
            status: ThreadStatus::from_raw(status),
            suspended: suspend_status & SUSPEND_STATUS_SUSPENDED != 0,
        })
    }

    /// Resume a single thread (ThreadReference.Resume command)
    pub async fn resume_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.thread_command(thread_id, thread_commands::RESUME).await
    }

    /// Interrupt a thread, as Thread.interrupt() would (ThreadReference.Interrupt command)
    pub async fn interrupt_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.thread_command(thread_id, thread_commands::INTERRUPT).await
    }

    async fn thread_command(&self, thread_id: ThreadId, command: u8) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::THREAD_REFERENCE, command);

        packet.data.put_u64(thread_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Resume all threads (VirtualMachine.Resume)
    pub async fn resume_all(&self) -> JdwpResult<()> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::RESUME);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
