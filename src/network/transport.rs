use log::debug;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::error::{Error, Phase, Result};
use crate::protocol::{ProtocolMessage, MAX_DATAGRAM_SIZE};

/// Receive buffer size; larger than any datagram `encode` will produce.
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

pub async fn bind(addr: SocketAddr, phase: Phase) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| Error::Bind { phase, addr, source })
}

pub fn encode(message: &ProtocolMessage, phase: Phase) -> Result<Vec<u8>> {
    let data = message.serialize().map_err(|source| Error::Encode { phase, source })?;
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::Oversized {
            phase,
            size: data.len(),
            limit: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(data)
}

pub fn decode(data: &[u8], from: SocketAddr, phase: Phase) -> Result<ProtocolMessage> {
    ProtocolMessage::deserialize(data).map_err(|source| Error::Decode { phase, from, source })
}

/// Sends already-encoded bytes; used when relaying one message to many peers.
pub async fn send_encoded(socket: &UdpSocket, data: &[u8], to: SocketAddr, phase: Phase) -> Result<()> {
    socket
        .send_to(data, to)
        .await
        .map_err(|source| Error::Transport {
            phase,
            operation: "send_to",
            source,
        })?;
    Ok(())
}

pub async fn send_message(socket: &UdpSocket, message: &ProtocolMessage, to: SocketAddr, phase: Phase) -> Result<()> {
    let data = encode(message, phase)?;
    send_encoded(socket, &data, to, phase).await?;
    debug!("→ {} to {} ({} bytes)", message.kind(), to, data.len());
    Ok(())
}

/// Waits for the next datagram. The returned address is the sender taken from the envelope.
pub async fn recv_message(socket: &UdpSocket, buffer: &mut [u8], phase: Phase) -> Result<(ProtocolMessage, SocketAddr)> {
    let (len, from) = socket
        .recv_from(buffer)
        .await
        .map_err(|source| Error::Transport {
            phase,
            operation: "recv_from",
            source,
        })?;
    let message = decode(&buffer[..len], from, phase)?;
    debug!("← {} from {} ({} bytes)", message.kind(), from, len);
    Ok((message, from))
}
