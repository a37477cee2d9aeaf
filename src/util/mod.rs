pub mod bson_utils;

use std::ptr;

/// A trait for reading little-endian integers directly from byte slices
/// without additional allocations. These methods perform **zero-copy**
/// reads using `ptr::read_unaligned()`.
pub trait ZeroCopy {
    /// Reads a 32-bit little-endian unsigned integer (`u32`) from the given offset.
    ///
    /// # Panics
    /// - Panics if the offset is **out of bounds**.
    fn read_u32_le(&self, offset: usize) -> u32;

    /// Reads a 32-bit little-endian signed integer (`i32`) from the given offset.
    ///
    /// # Panics
    /// - Panics if the offset is **out of bounds**.
    fn read_i32_le(&self, offset: usize) -> i32;
}

impl ZeroCopy for [u8] {
    #[inline(always)]
    fn read_u32_le(&self, offset: usize) -> u32 {
        assert!(
            offset + 4 <= self.len(),
            "Offset out of bounds: cannot read u32"
        );
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const u32) }.to_le()
    }

    #[inline(always)]
    fn read_i32_le(&self, offset: usize) -> i32 {
        assert!(
            offset + 4 <= self.len(),
            "Offset out of bounds: cannot read i32"
        );
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const i32) }.to_le()
    }
}

impl ZeroCopy for Vec<u8> {
    #[inline(always)]
    fn read_u32_le(&self, offset: usize) -> u32 {
        self.as_slice().read_u32_le(offset)
    }

    #[inline(always)]
    fn read_i32_le(&self, offset: usize) -> i32 {
        self.as_slice().read_i32_le(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::ZeroCopy;

    #[test]
    fn test_read_u32_le() {
        let mut data: Vec<u8> = Vec::new();
        data.extend(0_u32.to_le_bytes());
        data.extend(12_u32.to_le_bytes());
        data.extend(u32::MAX.to_le_bytes());
        assert_eq!(data.read_u32_le(0), 0);
        assert_eq!(data.read_u32_le(4), 12);
        assert_eq!(data.read_u32_le(8), u32::MAX);
    }

    #[test]
    fn test_read_i32_le() {
        let mut data: Vec<u8> = Vec::new();
        data.extend(i32::MIN.to_le_bytes());
        data.extend((-12_i32).to_le_bytes());
        data.extend(124_i32.to_le_bytes());
        assert_eq!(data.read_i32_le(0), i32::MIN);
        assert_eq!(data.read_i32_le(4), -12);
        assert_eq!(data.read_i32_le(8), 124);
    }
}
