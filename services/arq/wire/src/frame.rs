//! Frame layout for the stop-and-wait link.
//!
//! Two frame kinds share the wire:
//!
//! ```text
//! data: +------+-----+-----------+-----+----------------+
//!       | 0x01 | seq | len (BE)  | bcc | body (len - 5) |
//!       +------+-----+-----------+-----+----------------+
//! ack:  +------+-----+
//!       | 0x06 | seq |
//!       +------+-----+
//! ```
//!
//! `len` counts header and body. `bcc` is the XOR of the body bytes.

use crate::checksum;
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Start-of-header marker opening a data frame
pub const SOH: u8 = 0x01;
/// Marker opening an acknowledgement frame
pub const ACK: u8 = 0x06;

/// Data frame header size in bytes
pub const HEADER_LEN: usize = 5;
/// Acknowledgement frame size in bytes
pub const ACK_FRAME_LEN: usize = 2;

/// Largest data frame the 16-bit length field can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;
/// Largest body a data frame can carry
pub const MAX_BODY_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Alternating sequence bit
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqBit {
    /// Bit value 0
    Zero = 0,
    /// Bit value 1
    One = 1,
}

impl SeqBit {
    /// The other bit value
    pub fn flip(self) -> Self {
        match self {
            SeqBit::Zero => SeqBit::One,
            SeqBit::One => SeqBit::Zero,
        }
    }

    /// Wire representation
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SeqBit {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SeqBit::Zero),
            1 => Ok(SeqBit::One),
            _ => Err(WireError::SeqBit(value)),
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Fixed 5-byte data frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Sequence bit of the frame
    pub seq: SeqBit,
    /// Total frame length, header included
    pub len: u16,
    /// XOR-fold of the body
    pub bcc: u8,
}

impl DataHeader {
    /// Build the header describing `body`
    pub fn for_body(seq: SeqBit, body: &[u8]) -> Result<Self, WireError> {
        if body.len() > MAX_BODY_LEN {
            return Err(WireError::FrameTooLarge(body.len()));
        }

        Ok(Self {
            seq,
            len: (body.len() + HEADER_LEN) as u16,
            bcc: checksum::bcc(body),
        })
    }

    /// Encode header to buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOH);
        buf.put_u8(self.seq.as_u8());
        buf.put_u16(self.len);
        buf.put_u8(self.bcc);
    }

    /// Decode header from the first [`HEADER_LEN`] bytes of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Length(buf.len() as u16));
        }

        let marker = buf.get_u8();
        if marker != SOH {
            return Err(WireError::Marker(marker));
        }

        let seq = SeqBit::try_from(buf.get_u8())?;
        let len = buf.get_u16();
        if (len as usize) < HEADER_LEN {
            return Err(WireError::Length(len));
        }
        let bcc = buf.get_u8();

        Ok(Self { seq, len, bcc })
    }
}

/// A complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Data frame carrying a serialized payload
    Data {
        /// Sequence bit of the frame
        seq: SeqBit,
        /// Serialized payload
        body: Bytes,
    },
    /// Acknowledgement of a sequence bit
    Ack(SeqBit),
}

impl Frame {
    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        match self {
            Frame::Data { body, .. } => HEADER_LEN + body.len(),
            Frame::Ack(_) => ACK_FRAME_LEN,
        }
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        match self {
            Frame::Data { seq, body } => {
                let header = DataHeader::for_body(*seq, body)?;
                let mut buf = BytesMut::with_capacity(self.encoded_size());
                header.encode(&mut buf);
                buf.put_slice(body);
                Ok(buf.freeze())
            }
            Frame::Ack(bit) => Ok(ack_frame(*bit)),
        }
    }
}

/// Encode an acknowledgement frame for `bit`
pub fn ack_frame(bit: SeqBit) -> Bytes {
    Bytes::copy_from_slice(&[ACK, bit.as_u8()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_bit() {
        assert_eq!(SeqBit::Zero.flip(), SeqBit::One);
        assert_eq!(SeqBit::One.flip(), SeqBit::Zero);
        assert_eq!(SeqBit::try_from(1).unwrap(), SeqBit::One);
        assert!(matches!(SeqBit::try_from(2), Err(WireError::SeqBit(2))));
    }

    #[test]
    fn test_data_frame_layout() {
        let body = Bytes::from_static(b"\"Hello World!\"");
        let bytes = Frame::Data {
            seq: SeqBit::One,
            body: body.clone(),
        }
        .encode()
        .unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + body.len());
        assert_eq!(bytes[0], SOH);
        assert_eq!(bytes[1], 1);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, bytes.len());
        assert_eq!(bytes[4], checksum::bcc(&body));
        assert_eq!(&bytes[HEADER_LEN..], &body[..]);
    }

    #[test]
    fn test_header_decode() {
        let header = DataHeader::for_body(SeqBit::Zero, b"[1,2]").unwrap();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let decoded = DataHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.len as usize, HEADER_LEN + 5);
    }

    #[test]
    fn test_header_decode_rejects_short_length() {
        let raw = [SOH, 0, 0x00, 0x03, 0];
        assert!(matches!(DataHeader::decode(&raw), Err(WireError::Length(3))));
        assert!(matches!(DataHeader::decode(&raw[..4]), Err(WireError::Length(4))));
    }

    #[test]
    fn test_empty_body_frame() {
        let bytes = Frame::Data {
            seq: SeqBit::Zero,
            body: Bytes::new(),
        }
        .encode()
        .unwrap();
        assert_eq!(&bytes[..], &[SOH, 0, 0, 5, 0]);
    }

    #[test]
    fn test_frame_too_large() {
        let body = Bytes::from(vec![b'a'; MAX_BODY_LEN + 1]);
        let result = Frame::Data {
            seq: SeqBit::Zero,
            body,
        }
        .encode();
        assert!(matches!(result, Err(WireError::FrameTooLarge(n)) if n == MAX_BODY_LEN + 1));

        let body = Bytes::from(vec![b'a'; MAX_BODY_LEN]);
        let bytes = Frame::Data {
            seq: SeqBit::Zero,
            body,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_ack_frame() {
        assert_eq!(&ack_frame(SeqBit::One)[..], &[ACK, 1]);
        assert_eq!(Frame::Ack(SeqBit::Zero).encode().unwrap(), ack_frame(SeqBit::Zero));
    }
}
