//! Bit-level helpers for scan-chain vectors.
//!
//! Scan-chain vectors are sequences of bits where bit `i` lives in byte `i / 8`
//! under the mask `0x80 >> (i % 8)`, i.e. the first bit shifted into the chain
//! is the most significant bit of the first byte.
//!
//! Register values are placed into such vectors least significant bit first,
//! which means a packed value is *not* in host byte order. For a 32-bit value
//! `v`, `pack_bits(v, 32)` equals `v.to_le_bytes()` with every byte bit-reversed;
//! [`reverse_bit_order`] converts between the two representations.

#[inline]
fn mask(bit: usize) -> u8 {
    0x80 >> (bit % 8)
}

/// Returns whether bit `bit` of the vector is set.
#[inline]
pub fn bit(buf: &[u8], bit: usize) -> bool {
    buf[bit / 8] & mask(bit) != 0
}

/// Sets bit `bit` of the vector.
#[inline]
pub fn set_bit(buf: &mut [u8], bit: usize) {
    buf[bit / 8] |= mask(bit);
}

/// Number of bytes needed to hold `bit_width` bits.
#[inline]
pub fn byte_len(bit_width: usize) -> usize {
    bit_width.div_ceil(8)
}

/// Packs the lowest `bit_width` bits of `value` into `out`, LSB first.
///
/// The first `ceil(bit_width / 8)` bytes of `out` are cleared before packing,
/// so trailing bits in the last byte are zero afterwards.
///
/// # Panics
///
/// Panics if `out` is shorter than `ceil(bit_width / 8)` bytes or `bit_width`
/// exceeds 32.
pub fn pack_bits(value: u32, bit_width: usize, out: &mut [u8]) {
    assert!(bit_width <= 32, "at most 32 bits can be packed");
    out[..byte_len(bit_width)].fill(0);
    for i in 0..bit_width {
        if value & (1 << i) != 0 {
            set_bit(out, i);
        }
    }
}

/// Reads `bit_width` bits from the vector, bit `i` contributing `1 << i`.
pub fn unpack_bits(bits: &[u8], bit_width: usize) -> u32 {
    assert!(bit_width <= 32, "at most 32 bits can be unpacked");
    (0..bit_width)
        .filter(|i| bit(bits, *i))
        .fold(0, |acc, i| acc | (1 << i))
}

/// Reverses the bit order inside each of the first `bit_count / 8` bytes.
///
/// A trailing partial byte is left untouched.
pub fn reverse_bit_order(buf: &mut [u8], bit_count: usize) {
    for byte in &mut buf[..bit_count / 8] {
        *byte = byte.reverse_bits();
    }
}

/// Appends the device checksum bit at position `bit_count`.
///
/// The checksum is seeded with 1 and XOR-ed with every payload bit; the
/// parity bit is set when the result is 1. Payload plus parity bit therefore
/// always hold an odd number of ones.
pub fn apply_odd_parity(buf: &mut [u8], bit_count: usize) {
    let checksum = (0..bit_count).fold(true, |acc, i| acc ^ bit(buf, i));
    if checksum {
        set_bit(buf, bit_count);
    }
}

/// Checks a checksum produced by [`apply_odd_parity`].
pub fn parity_ok(buf: &[u8], bit_count: usize) -> bool {
    (0..=bit_count).filter(|i| bit(buf, *i)).count() % 2 == 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_places_lsb_in_msb_of_first_byte() {
        let mut out = [0xffu8; 4];
        pack_bits(1, 32, &mut out);
        assert_eq!(out, [0x80, 0, 0, 0]);

        pack_bits(0x0000_0100, 32, &mut out);
        assert_eq!(out, [0, 0x80, 0, 0]);
    }

    #[test]
    fn packed_value_is_bit_reversed_little_endian() {
        for v in [0u32, 1, 0x1234_5678, 0xdead_beef, u32::MAX, 0x8000_0001] {
            let mut packed = [0u8; 4];
            pack_bits(v, 32, &mut packed);
            let mut expected = v.to_le_bytes();
            reverse_bit_order(&mut expected, 32);
            assert_eq!(packed, expected, "value {v:#010x}");
        }
    }

    #[test]
    fn unpack_reads_register_order() {
        // 0x1234_5678 packed LSB first
        let packed = [0x1e, 0x6a, 0x2c, 0x48];
        assert_eq!(unpack_bits(&packed, 32), 0x1234_5678);

        let mut buf = [0u8; 4];
        pack_bits(0xdead_beef, 32, &mut buf);
        assert_eq!(unpack_bits(&buf, 32), 0xdead_beef);
        assert_eq!(unpack_bits(&buf, 8), 0xef);
    }

    #[test]
    fn pack_clears_only_needed_bytes() {
        let mut out = [0xffu8; 2];
        pack_bits(0b1010, 4, &mut out);
        assert_eq!(out, [0b0101_0000, 0xff]);
    }

    #[test]
    fn reverse_is_involutory() {
        let original: Vec<u8> = (0..=255).collect();
        let mut buf = original.clone();
        reverse_bit_order(&mut buf, original.len() * 8);
        assert_ne!(buf, original);
        reverse_bit_order(&mut buf, original.len() * 8);
        assert_eq!(buf, original);
    }

    #[test]
    fn reverse_ignores_partial_byte() {
        let mut buf = [0x01, 0x01];
        reverse_bit_order(&mut buf, 12);
        assert_eq!(buf, [0x80, 0x01]);
    }

    #[test]
    fn parity_is_odd_for_every_payload() {
        for payload in 0..(1u32 << 10) {
            let mut buf = [0u8; 2];
            pack_bits(payload, 10, &mut buf);
            apply_odd_parity(&mut buf, 10);
            let ones: u32 = buf.iter().map(|b| b.count_ones()).sum();
            assert_eq!(ones % 2, 1, "payload {payload:#x}");
            assert!(parity_ok(&buf, 10));
        }
    }

    #[test]
    fn parity_of_read_request() {
        // address 0xD, read flag clear: three ones in the payload
        let mut buf = [0u8; 1];
        pack_bits(0xd, 4, &mut buf);
        apply_odd_parity(&mut buf, 5);
        assert_eq!(buf, [0b1011_0000]);

        // address 0xE: three ones as well
        pack_bits(0xe, 4, &mut buf);
        apply_odd_parity(&mut buf, 5);
        assert_eq!(buf, [0b0111_0000]);

        // address 0x1: one one, parity bit stays clear
        pack_bits(0x1, 4, &mut buf);
        apply_odd_parity(&mut buf, 5);
        assert_eq!(buf, [0b1000_0000]);

        // address 0x3: two ones, parity bit set at position 5
        pack_bits(0x3, 4, &mut buf);
        apply_odd_parity(&mut buf, 5);
        assert_eq!(buf, [0b1100_0100]);
    }
}
