//! Block check character (BCC) for data frame bodies.
//!
//! The BCC is the XOR of every body byte. It detects every error pattern
//! that flips an odd number of bits in the same bit position, which covers
//! all single-bit errors.

/// Compute the XOR-fold of `bytes` (0 for empty input)
pub fn bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Check `bytes` against an expected BCC
pub fn verify(bytes: &[u8], expected: u8) -> bool {
    bcc(bytes) == expected
}
