//! CRC-32 engine for the store image.
//!
//! The on-disk checksum is the raw CRC-32/ISO-HDLC shift register (reflected
//! polynomial `0xEDB88320`, initial value `0xFFFFFFFF`) with **no final
//! XOR**. `crc32fast` computes the conventional finalized form, which differs
//! from the raw register only by a complement, so the adapter complements the
//! value on the way in and on the way out.

use crc32fast::Hasher;

/// Initial value for a fresh checksum run.
pub const CRC_INIT: u32 = 0xFFFF_FFFF;

/// Streaming CRC update: folds `data` into the running checksum `init`.
///
/// `crc_update(CRC_INIT, bytes)` yields the value stored in the file header.
/// Splitting `bytes` across successive calls, feeding each call the previous
/// result, yields the same value.
pub fn crc_update(init: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(!init);
    hasher.update(data);
    !hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_keeps_the_initial_value() {
        assert_eq!(crc_update(CRC_INIT, b""), CRC_INIT);
    }

    #[test]
    fn matches_the_iso_hdlc_register_check_value() {
        // Raw register for the standard "123456789" check input; the
        // finalized CRC-32 of the same input is 0xCBF43926.
        assert_eq!(crc_update(CRC_INIT, b"123456789"), 0x340B_C6D9);
    }

    #[test]
    fn streaming_splits_are_equivalent() {
        let data = b"keelkv streaming checksum";
        let whole = crc_update(CRC_INIT, data);
        let (front, back) = data.split_at(7);
        assert_eq!(crc_update(crc_update(CRC_INIT, front), back), whole);
    }
}
