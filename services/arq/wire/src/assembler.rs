//! Stream reassembly for inbound frames.
//!
//! The transport hands over chunks with no alignment to frame boundaries.
//! [`Assembler`] keeps a carry-over buffer, resolves complete frames out of
//! it and applies the receive side of the alternating-bit discipline.

use crate::checksum;
use crate::codec;
use crate::frame::{DataHeader, SeqBit, ACK, ACK_FRAME_LEN, HEADER_LEN, SOH};
use crate::WireError;
use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

/// A frame resolved out of the inbound stream
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<T> {
    /// Peer acknowledged a sequence bit
    Ack(SeqBit),
    /// New payload accepted; the receive bit has flipped
    Message(T),
    /// Retransmission of an already delivered frame, dropped
    Duplicate(SeqBit),
}

/// Receive-side reassembler and sequence tracker
#[derive(Debug)]
pub struct Assembler {
    buffer: BytesMut,
    rx_expected: SeqBit,
}

impl Assembler {
    /// Create an assembler expecting the initial receive bit
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            rx_expected: SeqBit::One,
        }
    }

    /// Current receive bit, which is also the bit to acknowledge
    pub fn rx_expected(&self) -> SeqBit {
        self.rx_expected
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append an inbound chunk to the carry-over buffer
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Resolve the next frame from the buffer
    ///
    /// Returns `Ok(None)` once the buffer is empty or holds only a partial
    /// frame. Integrity failures consume the offending frame, so calling
    /// again after an error continues with the rest of the stream.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<Inbound<T>>, WireError> {
        loop {
            let Some(&first) = self.buffer.first() else {
                return Ok(None);
            };

            if first == ACK {
                if self.buffer.len() < ACK_FRAME_LEN {
                    return Ok(None);
                }
                match SeqBit::try_from(self.buffer[1]) {
                    Ok(bit) => {
                        self.buffer.advance(ACK_FRAME_LEN);
                        trace!("ACK frame: bit={}", bit);
                        return Ok(Some(Inbound::Ack(bit)));
                    }
                    Err(e) => {
                        debug!("Discarding ACK marker: {}", e);
                        self.buffer.advance(1);
                        continue;
                    }
                }
            }

            match self.buffer.iter().position(|&b| b == SOH || b == ACK) {
                None => {
                    debug!("No frame marker in {} bytes; dropping as noise", self.buffer.len());
                    self.buffer.clear();
                    return Ok(None);
                }
                Some(0) => {}
                Some(skip) => {
                    debug!("Dropping {} bytes of noise before frame marker", skip);
                    self.buffer.advance(skip);
                    continue;
                }
            }

            if self.buffer.len() < HEADER_LEN {
                return Ok(None);
            }

            let header = match DataHeader::decode(&self.buffer[..HEADER_LEN]) {
                Ok(header) => header,
                Err(e) => {
                    debug!("Discarding false start marker: {}", e);
                    self.buffer.advance(1);
                    continue;
                }
            };

            let len = header.len as usize;
            if self.buffer.len() < len {
                return Ok(None);
            }

            let frame = self.buffer.split_to(len);

            if header.seq == self.rx_expected {
                debug!("Dropping retransmitted DATA frame: seq={} len={}", header.seq, len);
                return Ok(Some(Inbound::Duplicate(header.seq)));
            }

            let body = &frame[HEADER_LEN..];
            if !checksum::verify(body, header.bcc) {
                return Err(WireError::Checksum {
                    expected: header.bcc,
                    actual: checksum::bcc(body),
                });
            }

            let payload = codec::decode_body(body)?;
            self.rx_expected = self.rx_expected.flip();
            trace!("DATA frame accepted: seq={} len={}", header.seq, len);

            return Ok(Some(Inbound::Message(payload)));
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
