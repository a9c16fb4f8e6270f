//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Serialized payload does not fit in the 16-bit length field
    #[error("frame too large: body of {0} bytes exceeds {max}", max = crate::frame::MAX_BODY_LEN)]
    FrameTooLarge(usize),

    /// Body checksum did not match the header BCC
    #[error("bcc mismatch: header {expected:#04x}, body {actual:#04x}")]
    Checksum {
        /// Checksum carried in the frame header
        expected: u8,
        /// Checksum computed over the received body
        actual: u8,
    },

    /// Payload could not be serialized
    #[error("payload encode failed: {0}")]
    PayloadEncode(#[source] serde_json::Error),

    /// Body passed the checksum but is not a valid payload encoding
    #[error("payload decode failed: {0}")]
    PayloadDecode(#[source] serde_json::Error),

    /// Sequence byte other than 0 or 1
    #[error("invalid sequence bit {0:#04x}")]
    SeqBit(u8),

    /// Declared frame length shorter than the data header
    #[error("declared length {0} shorter than header")]
    Length(u16),

    /// Header does not start with the SOH marker
    #[error("missing start marker, found {0:#04x}")]
    Marker(u8),
}

