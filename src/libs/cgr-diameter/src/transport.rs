//! Diameter transport layer (TCP)
//!
//! Provides TCP-based transport for Diameter messages per RFC 6733 Section 2.1.
//! Diameter uses a 4-byte length prefix in the message header for framing.
//! The first byte is the version, and the next 3 bytes are the message length.
//!
//! A transport can be split into a reading and a writing half so one task
//! reads requests while another serializes answers onto the wire.

use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{DiameterError, DiameterResult};
use crate::message::{DiameterMessage, DIAMETER_HEADER_SIZE};

/// Maximum Diameter message size (default 64KB, RFC allows up to 16MB)
const MAX_MESSAGE_SIZE: usize = 65536;

/// Diameter transport connection wrapping a TCP stream
pub struct DiameterTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    peer_addr: SocketAddr,
}

impl DiameterTransport {
    /// Wrap an existing TCP stream as a Diameter transport
    pub fn new(stream: TcpStream) -> DiameterResult<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            peer_addr,
        })
    }

    /// Connect to a remote Diameter peer
    pub async fn connect(addr: SocketAddr) -> DiameterResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    /// Get the remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send a Diameter message
    pub async fn send(&mut self, msg: &DiameterMessage) -> DiameterResult<()> {
        msg.check_size()?;
        let encoded = msg.encode();
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive a Diameter message
    ///
    /// Reads from the TCP stream, performing message framing based on the
    /// 3-byte length field in the Diameter header (bytes 1-3).
    pub async fn recv(&mut self) -> DiameterResult<DiameterMessage> {
        loop {
            if let Some(msg) = try_parse_message(&mut self.read_buf)? {
                return Ok(msg);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(closed());
            }
        }
    }

    /// Split into independently owned reading and writing halves
    pub fn into_split(self) -> (DiameterReader, DiameterWriter) {
        let (read, write) = self.stream.into_split();
        (
            DiameterReader {
                half: read,
                read_buf: self.read_buf,
                peer_addr: self.peer_addr,
            },
            DiameterWriter { half: write },
        )
    }

    /// Shutdown the transport connection
    pub async fn shutdown(&mut self) -> DiameterResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Reading half of a split transport
pub struct DiameterReader {
    half: OwnedReadHalf,
    read_buf: BytesMut,
    peer_addr: SocketAddr,
}

impl DiameterReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Receive the next framed message
    pub async fn recv(&mut self) -> DiameterResult<DiameterMessage> {
        loop {
            if let Some(msg) = try_parse_message(&mut self.read_buf)? {
                return Ok(msg);
            }
            let n = self.half.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(closed());
            }
        }
    }
}

/// Writing half of a split transport
pub struct DiameterWriter {
    half: OwnedWriteHalf,
}

impl DiameterWriter {
    pub async fn send(&mut self, msg: &DiameterMessage) -> DiameterResult<()> {
        msg.check_size()?;
        let encoded = msg.encode();
        self.half.write_all(&encoded).await?;
        self.half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> DiameterResult<()> {
        self.half.shutdown().await?;
        Ok(())
    }
}

/// True for the error `recv` returns when the peer closed the connection
pub fn is_closed(err: &DiameterError) -> bool {
    matches!(err, DiameterError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

fn closed() -> DiameterError {
    DiameterError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed by peer",
    ))
}

/// Try to parse a complete Diameter message from the read buffer
fn try_parse_message(read_buf: &mut BytesMut) -> DiameterResult<Option<DiameterMessage>> {
    if read_buf.len() < DIAMETER_HEADER_SIZE {
        return Ok(None);
    }

    // Read message length from header bytes 1-3 (3-byte big-endian)
    let msg_len = ((read_buf[1] as usize) << 16) | ((read_buf[2] as usize) << 8) | read_buf[3] as usize;

    if msg_len < DIAMETER_HEADER_SIZE {
        return Err(DiameterError::InvalidMessage(format!(
            "message length {msg_len} is less than header size"
        )));
    }

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(DiameterError::InvalidMessage(format!(
            "message length {msg_len} exceeds maximum {MAX_MESSAGE_SIZE}"
        )));
    }

    if read_buf.len() < msg_len {
        return Ok(None);
    }

    let mut bytes = read_buf.split_to(msg_len).freeze();
    let msg = DiameterMessage::decode(&mut bytes)?;
    Ok(Some(msg))
}

/// Diameter TCP listener that accepts incoming connections
pub struct DiameterListener {
    listener: TcpListener,
}

impl DiameterListener {
    /// Bind to the given address
    pub async fn bind(addr: SocketAddr) -> DiameterResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept a new incoming connection
    pub async fn accept(&self) -> DiameterResult<DiameterTransport> {
        let (stream, _addr) = self.listener.accept().await?;
        DiameterTransport::new(stream)
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> DiameterResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avp::{Avp, AvpData};
    use crate::message::DiameterMessage;

    #[tokio::test]
    async fn test_transport_send_recv() {
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let listener = DiameterListener::bind(addr).await.unwrap();
        let listen_addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut server = listener.accept().await.unwrap();
            let msg = server.recv().await.unwrap();
            let answer = DiameterMessage::new_answer(&msg);
            server.send(&answer).await.unwrap();
            server.shutdown().await.unwrap();
        });

        let mut client = DiameterTransport::connect(listen_addr).await.unwrap();
        let mut req = DiameterMessage::new_request(272, 4);
        req.add_avp(Avp::mandatory(264, AvpData::DiameterIdentity(
            "client.example.com".to_string(),
        )));
        req.header.hop_by_hop_id = 1;
        req.header.end_to_end_id = 1;
        client.send(&req).await.unwrap();

        let answer = client.recv().await.unwrap();
        assert!(answer.header.is_answer());
        assert_eq!(answer.header.command_code, 272);
        assert_eq!(answer.header.hop_by_hop_id, 1);

        client.shutdown().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_halves() {
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let listener = DiameterListener::bind(addr).await.unwrap();
        let listen_addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut reader, mut writer) = listener.accept().await.unwrap().into_split();
            for _ in 0..3 {
                let msg = reader.recv().await.unwrap();
                writer.send(&DiameterMessage::new_answer(&msg)).await.unwrap();
            }
            let err = reader.recv().await.unwrap_err();
            assert!(is_closed(&err));
        });

        let mut client = DiameterTransport::connect(listen_addr).await.unwrap();
        for i in 0..3u32 {
            let mut req = DiameterMessage::new_request(272, 4);
            req.header.hop_by_hop_id = i;
            client.send(&req).await.unwrap();
            let answer = client.recv().await.unwrap();
            assert_eq!(answer.header.hop_by_hop_id, i);
        }

        client.shutdown().await.unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_framing_rejects_short_length() {
        let mut buf = BytesMut::from(&[1u8, 0, 0, 4][..]);
        buf.extend_from_slice(&[0u8; 16]);
        assert!(try_parse_message(&mut buf).is_err());

        let mut partial = BytesMut::from(&[1u8, 0, 0, 40][..]);
        partial.extend_from_slice(&[0u8; 16]);
        assert!(try_parse_message(&mut partial).unwrap().is_none());
    }
}
