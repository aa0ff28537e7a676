//! Nibble layout shared by the host and the device kernel.
//!
//! A weight row of `K` codes occupies `K / 2` bytes. Within a byte the low
//! nibble holds the even position. Read as a little-endian 16-bit word, four
//! consecutive positions `k..k + 4` land in nibbles 0..4, so code `i` of the
//! word sits under mask `0xf << (4 * i)`.

/// Number of 4-bit codes in one 16-bit word.
pub const CODES_PER_WORD: usize = 4;

pub fn pack_word(codes: [u8; 4]) -> u16 {
    codes
        .iter()
        .enumerate()
        .fold(0u16, |word, (i, &code)| word | (((code & 0x0f) as u16) << (i * 4)))
}

pub fn unpack_word(word: u16) -> [u8; 4] {
    [
        (word & 0x000f) as u8,
        ((word & 0x00f0) >> 4) as u8,
        ((word & 0x0f00) >> 8) as u8,
        ((word & 0xf000) >> 12) as u8,
    ]
}

/// Packs row-major `[n, k]` codes (each in 0..16) into `[n, k / 2]` bytes.
pub fn pack_codes(codes: &[u8], n: usize, k: usize) -> Vec<u8> {
    assert_eq!(codes.len(), n * k, "codes must have n * k elements");
    assert!(k.is_multiple_of(2), "k must be even");

    codes
        .chunks_exact(2)
        .map(|pair| (pair[0] & 0x0f) | ((pair[1] & 0x0f) << 4))
        .collect()
}

pub fn unpack_codes(packed: &[u8], n: usize, k: usize) -> Vec<u8> {
    assert_eq!(packed.len() * 2, n * k, "packed must have n * k / 2 bytes");

    packed
        .iter()
        .flat_map(|&byte| [byte & 0x0f, byte >> 4])
        .collect()
}

/// Reinterprets packed bytes as little-endian `u32` words for device upload.
pub fn bytes_to_words(packed: &[u8]) -> Vec<u32> {
    assert!(
        packed.len().is_multiple_of(4),
        "packed byte count must be a multiple of 4"
    );

    packed
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Reads the 16-bit word covering positions `k..k + 4` of `row`.
pub(crate) fn word_at(packed: &[u8], k_total: usize, row: usize, k: usize) -> u16 {
    let byte = (row * k_total + k) / 2;
    u16::from_le_bytes([packed[byte], packed[byte + 1]])
}
