//! Wire protocol framing, checksums, and stream reassembly for the ARQ link.
//!
//! This crate holds the pure parts of the stop-and-wait protocol: building
//! data and acknowledgement frames, the XOR block check character, and the
//! receive-side assembler that turns an unaligned byte stream back into
//! frames while enforcing the alternating-bit discipline.
//!
//! ## Wire Format
//!
//! ```text
//! +------+-----+-------------+-----+---------------------+
//! | SOH  | seq | u16 len (BE)| bcc | JSON body (len - 5) |   data frame
//! +------+-----+-------------+-----+---------------------+
//! +------+-----+
//! | ACK  | seq |                                             ack frame
//! +------+-----+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod frame;

// Re-export main types
pub use assembler::{Assembler, Inbound};
pub use checksum::bcc;
pub use codec::{decode_body, encode, encode_body};
pub use error::WireError;
pub use frame::{
    ack_frame, DataHeader, Frame, SeqBit, ACK, ACK_FRAME_LEN, HEADER_LEN, MAX_BODY_LEN,
    MAX_FRAME_LEN, SOH,
};
