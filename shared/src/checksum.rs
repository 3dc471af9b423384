//! 16-bit additive checksum used by both the GBridge framing and the flash
//! record format.
//!
//! The sum is deliberately weak: it catches garbled bytes on the wire but
//! is blind to reordering, so `[1, 2]` and `[2, 1]` share a checksum.

/// Size of an encoded checksum on the wire.
pub const CHECKSUM_SIZE: usize = 2;

/// Sum of all bytes, modulo 2^16.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(byte as u16))
}

/// Big-endian encoding of a checksum.
#[inline]
pub fn encode(sum: u16) -> [u8; CHECKSUM_SIZE] {
    sum.to_be_bytes()
}

/// Checksum of `bytes`, encoded.
#[inline]
pub fn seal(bytes: &[u8]) -> [u8; CHECKSUM_SIZE] {
    encode(checksum(bytes))
}

/// Whether `encoded` matches the checksum of `bytes`.
///
/// Returns `false` when `encoded` is not exactly [`CHECKSUM_SIZE`] bytes.
pub fn verify(bytes: &[u8], encoded: &[u8]) -> bool {
    encoded == seal(bytes).as_slice()
}
