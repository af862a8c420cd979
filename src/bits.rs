//! Two's-complement conversion and bit field helpers shared by the assembler and the CPU.

/// A 16-bit memory or register value. Arithmetic on words wraps modulo 65536.
pub type Word = u16;

/// Mask with the lowest `bits` bits set.
#[inline]
pub const fn mask(bits: u32) -> Word {
    debug_assert!(bits <= 16);
    if bits >= 16 {
        Word::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Encode `n` as a `bits`-wide two's-complement field.
///
/// Values outside the representable range are truncated to the low `bits` bits.
#[inline]
pub fn to_twos_complement(n: i32, bits: u32) -> Word {
    (n as u32 as Word) & mask(bits)
}

/// Decode a `bits`-wide two's-complement field. Bits above the field are ignored.
#[inline]
pub fn from_twos_complement(n: Word, bits: u32) -> i32 {
    debug_assert!(bits > 0 && bits <= 16);
    let field = (n & mask(bits)) as i32;
    let sign = 1 << (bits - 1);
    if field & sign == 0 {
        field
    } else {
        field - (1 << bits)
    }
}

/// Sign-extend the low `bits` bits of `val` to a full word.
#[inline]
pub fn sign_extend(val: Word, bits: u32) -> Word {
    from_twos_complement(val, bits) as Word
}

/// Extract the `width`-bit field that starts at bit `shift`.
#[inline]
pub fn mask_field(word: Word, width: u32, shift: u32) -> Word {
    (word >> shift) & mask(width)
}

/// Place `value` into a `width`-bit field at bit `shift`, truncating any excess.
#[inline]
pub fn pack_field(value: Word, width: u32, shift: u32) -> Word {
    (value & mask(width)) << shift
}

/// Whether `n` fits in a `bits`-wide signed field.
pub fn fits_signed(n: i32, bits: u32) -> bool {
    let range = 1i32 << (bits - 1);
    (-range..range).contains(&n)
}

/// Whether `n` fits in a `bits`-wide field, read either as signed or unsigned.
pub fn fits_either(n: i32, bits: u32) -> bool {
    fits_signed(n, bits) || (0..(1i32 << bits)).contains(&n)
}

/// Swap the two bytes of a word.
#[inline]
pub fn switch_endian(word: Word) -> Word {
    word.rotate_left(8)
}
