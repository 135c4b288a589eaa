// JDWP connection management
//
// Handles TCP connection, handshake, and event loop startup.
// The connection is a cheap clone: every clone shares the same event loop.

use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::EventSet;
use crate::protocol::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct JdwpConnection {
    event_loop: EventLoopHandle,
    next_id: Arc<AtomicU32>,
}

impl JdwpConnection {
    /// Connect to a JVM via JDWP
    pub async fn connect(host: &str, port: u16) -> JdwpResult<Self> {
        info!("Connecting to JDWP at {}:{}", host, port);

        let mut stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();

        Self::handshake(&mut stream).await?;

        let (reader, writer) = stream.into_split();
        let event_loop = spawn_event_loop(reader, writer);

        Ok(Self {
            event_loop,
            next_id: Arc::new(AtomicU32::new(1)),
        })
    }

    /// Perform JDWP handshake
    async fn handshake(stream: &mut TcpStream) -> JdwpResult<()> {
        debug!("Performing JDWP handshake");

        stream.write_all(JDWP_HANDSHAKE).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
        stream.read_exact(&mut buf).await?;

        if buf != JDWP_HANDSHAKE {
            warn!("Invalid handshake response: {:?}", buf);
            return Err(JdwpError::InvalidHandshake);
        }

        info!("JDWP handshake successful");
        Ok(())
    }

    /// Send a command and wait for reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        self.event_loop.send_command(packet).await
    }

    /// Wait for the next event set; `None` once the target is gone
    pub async fn recv_event(&self) -> Option<EventSet> {
        self.event_loop.recv_event().await
    }

    /// Token cancelled when the underlying socket closes
    pub fn disconnected(&self) -> CancellationToken {
        self.event_loop.disconnected()
    }

    pub fn is_closed(&self) -> bool {
        self.event_loop.disconnected().is_cancelled()
    }

    /// Generate next packet ID
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(JDWP_HANDSHAKE).await.unwrap();
            // Dropping the socket simulates the target going away
        });

        let connection = JdwpConnection::connect("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), connection.disconnected().cancelled())
            .await
            .unwrap();
        assert!(connection.is_closed());

        let packet = CommandPacket::new(connection.next_id(), 1, 1);
        let err = connection.send_command(packet).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_bad_handshake_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"JDWP-Handshak!").await.unwrap();
        });

        let result = JdwpConnection::connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(JdwpError::InvalidHandshake)));
    }
}
