/// Additive checksum over the bytes between the frame delimiters, wrapping at 8 bits.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}
