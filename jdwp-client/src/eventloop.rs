// JDWP Event Loop
//
// Handles concurrent reading of events and replies from the JDWP socket.
// When the socket goes away every waiting command is failed and the
// disconnect token is cancelled, so nothing upstream waits forever.

use crate::commands::{command_sets, event_set_commands};
use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, HEADER_SIZE, REPLY_FLAG};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum allowed JDWP packet size (10MB)
/// This prevents memory exhaustion from malicious or buggy JVMs
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Request to send a command and get reply
pub struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventSet>>>,
    disconnected: CancellationToken,
}

impl EventLoopHandle {
    /// Send a command and wait for reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        if self.disconnected.is_cancelled() {
            return Err(JdwpError::ConnectionClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { packet, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| JdwpError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| JdwpError::ConnectionClosed)?
    }

    /// Wait for the next event set; `None` once the connection is gone
    pub async fn recv_event(&self) -> Option<EventSet> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Token cancelled when the socket closes or the loop stops
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}

/// Start the event loop task
pub fn spawn_event_loop(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> EventLoopHandle {
    let (command_tx, command_rx) = mpsc::channel(32);
    // Events are critical (trigger breakpoints) and shouldn't be dropped
    let (event_tx, event_rx) = mpsc::channel(256);
    let disconnected = CancellationToken::new();

    tokio::spawn(event_loop_task(
        reader,
        writer,
        command_rx,
        event_tx,
        disconnected.clone(),
    ));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        disconnected,
    }
}

/// Main event loop task
async fn event_loop_task(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: mpsc::Sender<EventSet>,
    disconnected: CancellationToken,
) {
    info!("Event loop started");

    let mut pending_replies: HashMap<u32, oneshot::Sender<JdwpResult<ReplyPacket>>> =
        HashMap::new();

    loop {
        tokio::select! {
            _ = disconnected.cancelled() => break,

            // Handle outgoing commands
            Some(cmd) = command_rx.recv() => {
                let packet_id = cmd.packet.id;
                debug!("Sending command id={} set={} cmd={}", packet_id, cmd.packet.command_set, cmd.packet.command);

                let encoded = cmd.packet.encode();
                let written = match writer.write_all(&encoded).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    error!("Failed to write command: {}", e);
                    cmd.reply_tx.send(Err(JdwpError::Io(e))).ok();
                    break;
                }

                pending_replies.insert(packet_id, cmd.reply_tx);
            }

            // Handle incoming packets
            result = read_packet(&mut reader) => {
                match result {
                    Ok(packet) => route_packet(packet, &mut pending_replies, &event_tx),
                    Err(e) => {
                        warn!("Failed to read packet: {}", e);
                        break;
                    }
                }
            }
        }
    }

    disconnected.cancel();
    for (_, tx) in pending_replies.drain() {
        tx.send(Err(JdwpError::ConnectionClosed)).ok();
    }

    info!("Event loop shutting down");
}

struct RawPacket {
    packet_id: u32,
    flags: u8,
    command_set: u8,
    command: u8,
    data: Vec<u8>,
}

fn route_packet(
    packet: RawPacket,
    pending_replies: &mut HashMap<u32, oneshot::Sender<JdwpResult<ReplyPacket>>>,
    event_tx: &mpsc::Sender<EventSet>,
) {
    if packet.flags == REPLY_FLAG {
        debug!("Received reply id={}", packet.packet_id);

        let Some(tx) = pending_replies.remove(&packet.packet_id) else {
            warn!("Received reply for unknown command id={}", packet.packet_id);
            return;
        };
        tx.send(ReplyPacket::decode(&packet.data)).ok();
        return;
    }

    if packet.command_set != command_sets::EVENT || packet.command != event_set_commands::COMPOSITE {
        debug!(
            "Ignoring target command set={} cmd={}",
            packet.command_set, packet.command
        );
        return;
    }

    // Event data starts after the 11-byte header
    match parse_event_packet(&packet.data[HEADER_SIZE..]) {
        Ok(event_set) => {
            debug!(
                "Parsed event set: {} events, suspend_policy={}",
                event_set.events.len(),
                event_set.suspend_policy
            );

            match event_tx.try_send(event_set) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    error!(
                        "Event channel full! Dropping event set with {} events",
                        event.events.len()
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Event receiver dropped, discarding event set");
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse event: {}", e);
        }
    }
}

/// Read a packet from the socket
async fn read_packet(reader: &mut OwnedReadHalf) -> JdwpResult<RawPacket> {
    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    header.resize(HEADER_SIZE, 0);

    reader.read_exact(&mut header).await.map_err(JdwpError::Io)?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Invalid packet length: {}",
            length
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let data_len = length - HEADER_SIZE;
    let mut full_packet = header.to_vec();

    if data_len > 0 {
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data).await.map_err(JdwpError::Io)?;
        full_packet.extend_from_slice(&data);
    }

    Ok(RawPacket {
        packet_id,
        flags,
        command_set: header[9],
        command: header[10],
        data: full_packet,
    })
}
