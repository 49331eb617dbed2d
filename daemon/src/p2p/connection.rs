use super::error::P2pError;
use crate::config::PEER_PACKET_CHANNEL_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    select,
    sync::{mpsc, watch},
};

// Every session message is `u16 length (big-endian) || payload`
pub const FRAME_HEADER_SIZE: usize = 2;
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Reads one length-framed message. A zero length or a short read is a
/// framing error and must close the session.
pub async fn read_frame(stream: &mut OwnedReadHalf) -> Result<Vec<u8>, P2pError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let length = u16::from_be_bytes(header) as usize;
    if length == 0 {
        return Err(P2pError::InvalidFrame);
    }

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    trace!("Received frame of {} bytes", length);
    Ok(payload)
}

// Prefixes the payload with its big-endian u16 length
pub fn frame(payload: &[u8]) -> Result<Bytes, P2pError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(P2pError::PacketTooLarge(payload.len()));
    }
    let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buffer.put_u16(payload.len() as u16);
    buffer.put_slice(payload);
    Ok(buffer.freeze())
}

/// Write side of one peer session. Outbound frames go through a channel to
/// a dedicated writer task so senders never block each other on the socket.
pub struct Connection {
    addr: SocketAddr,
    frames: mpsc::Sender<Bytes>,
    close_signal: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(addr: SocketAddr, write_half: OwnedWriteHalf) -> Self {
        let (frames, rx) = mpsc::channel(PEER_PACKET_CHANNEL_SIZE);
        let (close_signal, close_rx) = watch::channel(false);
        tokio::spawn(write_task(addr, write_half, rx, close_rx));
        Connection {
            addr,
            frames,
            close_signal,
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send(&self, bytes: Bytes) -> Result<(), P2pError> {
        if self.is_closed() {
            return Err(P2pError::Closed);
        }
        self.frames
            .send(bytes)
            .await
            .map_err(|_| P2pError::ChannelClosed)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.close_signal.send(true);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // Level-triggered signal observed by the read loop
    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_signal.subscribe()
    }
}

async fn write_task(
    addr: SocketAddr,
    mut write_half: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Bytes>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        select! {
            frame = frames.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = write_half.write_all(&bytes).await {
                        debug!("Write to {} failed: {}", addr, e);
                        break;
                    }
                }
                None => break,
            },
            _ = close_rx.changed() => break,
        }
    }
    let _ = write_half.shutdown().await;
    debug!("Writer for {} terminated", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_frame_layout() {
        let framed = frame(&[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(&framed[..], &[0x00, 0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_frame_rejects_oversize() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            frame(&payload),
            Err(P2pError::PacketTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let peer_addr = stream.peer_addr().unwrap();
            let (_, write_half) = stream.into_split();
            let connection = Connection::new(peer_addr, write_half);
            connection.send(frame(b"hello").unwrap()).await.unwrap();
            connection
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut read_half, _) = stream.into_split();
        let payload = read_frame(&mut read_half).await.unwrap();
        assert_eq!(payload, b"hello");

        let connection = client.await.unwrap();
        connection.close();
        assert!(connection.is_closed());
        assert!(connection.send(frame(b"again").unwrap()).await.is_err());
    }
}
