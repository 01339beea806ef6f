//! Validity bitmap: one bit per element, set when the element is present.

/// Packed validity bits, least significant bit first within each byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    len: usize,
}

impl Bitmap {
    /// Bitmap of `len` bits, all valid
    pub fn new_valid(len: usize) -> Self {
        let mut bytes = vec![0xFFu8; len.div_ceil(8)];
        if len % 8 != 0 {
            if let Some(last) = bytes.last_mut() {
                *last = (1u8 << (len % 8)) - 1;
            }
        }
        Self { bytes, len }
    }

    /// Bitmap of `len` bits, all null
    pub fn new_null(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut bitmap = Self::new_null(bits.len());
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bitmap.set(i, true);
            }
        }
        bitmap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        (self.bytes[i / 8] >> (i % 8)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, i: usize, valid: bool) {
        debug_assert!(i < self.len);
        set_bit(&mut self.bytes, i, valid);
    }

    /// Number of null bits
    pub fn null_count(&self) -> usize {
        let set: usize = self.bytes.iter().map(|b| b.count_ones() as usize).sum();
        self.len - set
    }

    /// Raw bytes for chunked writers. A chunk of `n * 8` elements owns
    /// exactly `n` bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Set bit `i` in a byte slice that starts on a byte boundary
#[inline]
pub fn set_bit(bytes: &mut [u8], i: usize, valid: bool) {
    let mask = 1u8 << (i % 8);
    if valid {
        bytes[i / 8] |= mask;
    } else {
        bytes[i / 8] &= !mask;
    }
}
