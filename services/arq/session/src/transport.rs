//! Byte-stream transports for ARQ sessions.
//!
//! A session runs over anything that implements `AsyncRead + AsyncWrite`.
//! This module provides a TCP/in-memory stream wrapper and a noisy wrapper
//! that damages outgoing frames for exercising recovery.

use arq_wire::{ACK, ACK_FRAME_LEN, HEADER_LEN, SOH};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Unified stream type for the supported transports
pub enum IoStream {
    /// Plain TCP stream
    Plain(TcpStream),
    /// In-process pipe
    Duplex(DuplexStream),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::Duplex(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::Duplex(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::Duplex(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::Duplex(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl IoStream {
    /// Get the peer address of the underlying stream, if it has one
    pub fn peer_addr(&self) -> std::io::Result<Option<SocketAddr>> {
        match self {
            IoStream::Plain(stream) => stream.peer_addr().map(Some),
            IoStream::Duplex(_) => Ok(None),
        }
    }

    /// Create a connected pair of in-process streams
    pub fn pair(max_buf_size: usize) -> (IoStream, IoStream) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (IoStream::Duplex(a), IoStream::Duplex(b))
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Which outgoing frames a [`NoisyStream`] damages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    /// Corrupt the first transmission of the first N distinct data frames
    FirstFrames(usize),
    /// Corrupt the first transmission of every distinct data frame
    FirstAttempts,
    /// Swallow the first N ACK frames written
    DropAcks(usize),
}

/// Stream wrapper damaging outgoing frames
///
/// Data frames are recognised by a write starting with the SOH marker and
/// get one body bit flipped; ACK frames are recognised by a write starting
/// with the ACK marker and are dropped whole. Reads pass through unchanged.
/// A data frame split across several writes by the inner stream is only
/// corrupted if the flipped byte lands in the first accepted slice.
pub struct NoisyStream<S> {
    inner: S,
    noise: Noise,
    offset: usize,
    mask: u8,
    corrupted: usize,
    dropped: usize,
    last_frame: Option<Vec<u8>>,
}

impl<S> NoisyStream<S> {
    /// Wrap `inner`, flipping bit 2 of the second body byte
    pub fn new(inner: S, noise: Noise) -> Self {
        Self {
            inner,
            noise,
            offset: HEADER_LEN + 1,
            mask: 0x04,
            corrupted: 0,
            dropped: 0,
            last_frame: None,
        }
    }

    /// Choose which byte of the frame to corrupt and the XOR mask to apply
    pub fn with_flip(mut self, offset: usize, mask: u8) -> Self {
        self.offset = offset;
        self.mask = mask;
        self
    }

    /// Number of data frames corrupted so far
    pub fn corrupted(&self) -> usize {
        self.corrupted
    }

    /// Number of ACK frames dropped so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn should_corrupt(&self, buf: &[u8]) -> bool {
        if buf.first() != Some(&SOH) || buf.len() <= self.offset {
            return false;
        }

        let retransmission = self.last_frame.as_deref() == Some(buf);
        match self.noise {
            Noise::FirstFrames(n) => self.corrupted < n && !retransmission,
            Noise::FirstAttempts => !retransmission,
            Noise::DropAcks(_) => false,
        }
    }

    fn should_drop(&self, buf: &[u8]) -> bool {
        match self.noise {
            Noise::DropAcks(n) => {
                buf.first() == Some(&ACK) && buf.len() >= ACK_FRAME_LEN && self.dropped < n
            }
            _ => false,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for NoisyStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for NoisyStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();

        if this.should_drop(buf) {
            this.dropped += 1;
            debug!("Dropped outgoing ACK frame #{}", this.dropped);
            return Poll::Ready(Ok(ACK_FRAME_LEN));
        }

        if !this.should_corrupt(buf) {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        let mut noisy = buf.to_vec();
        noisy[this.offset] ^= this.mask;

        let result = Pin::new(&mut this.inner).poll_write(cx, &noisy);
        if let Poll::Ready(Ok(_)) = result {
            this.corrupted += 1;
            this.last_frame = Some(buf.to_vec());
            debug!(
                "Corrupted outgoing DATA frame #{} at byte {} (mask {:#04x})",
                this.corrupted, this.offset, this.mask
            );
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_wire::{ack_frame, SeqBit};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect_tcp(bound_addr).await.unwrap();
        let io_stream = IoStream::Plain(stream);

        assert_eq!(io_stream.peer_addr().unwrap(), Some(bound_addr));
    }

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut a, mut b) = IoStream::pair(1024);
        assert!(a.peer_addr().unwrap().is_none());

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_first_frames_corrupted() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut noisy = NoisyStream::new(a, Noise::FirstFrames(1));
        let frame = arq_wire::encode(SeqBit::Zero, "Hello World!").unwrap();
        let next = arq_wire::encode(SeqBit::One, "again").unwrap();

        noisy.write_all(&frame).await.unwrap();
        noisy.write_all(&ack_frame(SeqBit::One)).await.unwrap();
        noisy.write_all(&frame).await.unwrap();
        noisy.write_all(&next).await.unwrap();
        assert_eq!(noisy.corrupted(), 1);

        let n = frame.len();
        let mut received = vec![0u8; n * 2 + 2 + next.len()];
        b.read_exact(&mut received).await.unwrap();

        assert_eq!(received[HEADER_LEN + 1], frame[HEADER_LEN + 1] ^ 0x04);
        assert_eq!(&received[n..n + 2], &ack_frame(SeqBit::One)[..]);
        // Retransmission and the next distinct frame go through intact
        assert_eq!(&received[n + 2..2 * n + 2], &frame[..]);
        assert_eq!(&received[2 * n + 2..], &next[..]);
    }

    #[tokio::test]
    async fn test_first_attempts_corrupted() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut noisy = NoisyStream::new(a, Noise::FirstAttempts).with_flip(HEADER_LEN, 0x03);
        let first = arq_wire::encode(SeqBit::Zero, "A").unwrap();
        let second = arq_wire::encode(SeqBit::One, "B").unwrap();

        for frame in [&first, &first, &second, &second] {
            noisy.write_all(frame).await.unwrap();
        }
        assert_eq!(noisy.corrupted(), 2);

        let mut received = vec![0u8; first.len() * 2 + second.len() * 2];
        b.read_exact(&mut received).await.unwrap();

        let n = first.len();
        assert_ne!(&received[..n], &first[..]);
        assert_eq!(&received[n..2 * n], &first[..]);
        assert_ne!(&received[2 * n..3 * n], &second[..]);
        assert_eq!(&received[3 * n..], &second[..]);
    }

    #[tokio::test]
    async fn test_first_acks_dropped() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut noisy = NoisyStream::new(a, Noise::DropAcks(1));
        let frame = arq_wire::encode(SeqBit::Zero, "data").unwrap();

        noisy.write_all(&ack_frame(SeqBit::Zero)).await.unwrap();
        noisy.write_all(&frame).await.unwrap();
        noisy.write_all(&ack_frame(SeqBit::One)).await.unwrap();
        assert_eq!(noisy.dropped(), 1);
        assert_eq!(noisy.corrupted(), 0);

        let mut received = vec![0u8; frame.len() + 2];
        b.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..frame.len()], &frame[..]);
        assert_eq!(&received[frame.len()..], &ack_frame(SeqBit::One)[..]);
    }
}
