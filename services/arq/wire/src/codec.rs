//! Payload encoding and decoding for data frames.
//!
//! Payloads are serialized as JSON. JSON escapes every control character,
//! so neither [`SOH`](crate::SOH) nor [`ACK`](crate::ACK) can appear inside a
//! well-formed body and the assembler may rescan a stream for markers.

use crate::frame::{Frame, SeqBit, MAX_BODY_LEN};
use crate::WireError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a payload into its frame body
pub fn encode_body<T: Serialize + ?Sized>(payload: &T) -> Result<Bytes, WireError> {
    let body = serde_json::to_vec(payload).map_err(WireError::PayloadEncode)?;
    if body.len() > MAX_BODY_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    Ok(Bytes::from(body))
}

/// Encode `payload` as a complete data frame tagged with `seq`
pub fn encode<T: Serialize + ?Sized>(seq: SeqBit, payload: &T) -> Result<Bytes, WireError> {
    let body = encode_body(payload)?;
    Frame::Data { seq, body }.encode()
}

/// Deserialize a frame body
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(body).map_err(WireError::PayloadDecode)
}
