//! Bounds-checked, byte-order-aware view over a binary image.
//!
//! Every accessor validates `offset + size <= len` and fails with
//! [`ParseError::OutOfBounds`] instead of reading adjacent memory.

use crate::{Bitness, Endianness, ParseError};

/// A read-only view over image bytes with a declared byte order.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    endian: Endianness,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader over `data` with the given byte order.
    pub fn new(data: &'a [u8], endian: Endianness) -> Self {
        Self { data, endian }
    }

    /// Returns the underlying bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte order used for multi-byte reads.
    pub fn endianness(&self) -> Endianness {
        self.endian
    }

    /// Returns a reader over `len` bytes at `offset`, sharing the byte order.
    pub fn sub_reader(&self, offset: u64, len: u64) -> Result<ByteReader<'a>, ParseError> {
        Ok(Self::new(self.read_bytes(offset, len)?, self.endian))
    }

    /// Returns `len` bytes at `offset`.
    pub fn read_bytes(&self, offset: u64, len: u64) -> Result<&'a [u8], ParseError> {
        let out_of_bounds = || ParseError::OutOfBounds {
            offset,
            len,
            size: self.data.len() as u64,
        };
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.data.len() as u64 {
            return Err(out_of_bounds());
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N], ParseError> {
        let bytes = self.read_bytes(offset, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8, ParseError> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub fn read_u16(&self, offset: u64) -> Result<u16, ParseError> {
        let raw = self.read_array(offset)?;
        Ok(match self.endian {
            Endianness::Little => u16::from_le_bytes(raw),
            Endianness::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32, ParseError> {
        let raw = self.read_array(offset)?;
        Ok(match self.endian {
            Endianness::Little => u32::from_le_bytes(raw),
            Endianness::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn read_i32(&self, offset: u64) -> Result<i32, ParseError> {
        Ok(self.read_u32(offset)? as i32)
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64, ParseError> {
        let raw = self.read_array(offset)?;
        Ok(match self.endian {
            Endianness::Little => u64::from_le_bytes(raw),
            Endianness::Big => u64::from_be_bytes(raw),
        })
    }

    /// Reads a pointer-sized value, zero-extended to 64 bits.
    pub fn read_pointer(&self, offset: u64, bitness: Bitness) -> Result<u64, ParseError> {
        match bitness {
            Bitness::Bits32 => self.read_u32(offset).map(u64::from),
            Bitness::Bits64 => self.read_u64(offset),
        }
    }

    /// Reads a NUL-terminated string starting at `offset`.
    ///
    /// A string that runs to the end of the image without a terminator is
    /// out of bounds. Invalid UTF-8 is replaced lossily.
    pub fn read_cstring(&self, offset: u64) -> Result<String, ParseError> {
        let rest = self.read_bytes(offset, (self.data.len() as u64).saturating_sub(offset))?;
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ParseError::OutOfBounds {
                offset,
                len: rest.len() as u64 + 1,
                size: self.data.len() as u64,
            })?;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    /// Decodes an unsigned LEB128 value at `offset`.
    /// Returns the value and the number of bytes consumed.
    pub fn read_uleb128(&self, offset: u64) -> Result<(u64, u64), ParseError> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        let mut index = 0u64;

        loop {
            let byte = self.read_u8(offset + index)?;
            index += 1;

            let low_bits = (byte & 0x7F) as u64;
            if shift >= 64 || (shift == 63 && low_bits > 1) {
                return Err(ParseError::InvalidValue("ULEB128 overflow"));
            }

            result |= low_bits << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok((result, index))
    }

    /// Decodes a signed LEB128 value at `offset`.
    /// Returns the value and the number of bytes consumed.
    pub fn read_sleb128(&self, offset: u64) -> Result<(i64, u64), ParseError> {
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        let mut index = 0u64;
        let mut byte;

        loop {
            byte = self.read_u8(offset + index)?;
            index += 1;

            if shift >= 64 {
                return Err(ParseError::InvalidValue("SLEB128 overflow"));
            }
            result |= ((byte & 0x7F) as i64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                break;
            }
        }

        // Sign extend if the sign bit of the last byte is set
        if shift < 64 && (byte & 0x40) != 0 {
            result |= !0i64 << shift;
        }

        Ok((result, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_honor_byte_order() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let le = ByteReader::new(&data, Endianness::Little);
        let be = ByteReader::new(&data, Endianness::Big);

        assert_eq!(le.read_u16(0).unwrap(), 0x0201);
        assert_eq!(be.read_u16(0).unwrap(), 0x0102);
        assert_eq!(le.read_u32(4).unwrap(), 0x0807_0605);
        assert_eq!(be.read_u32(4).unwrap(), 0x0506_0708);
        assert_eq!(le.read_u64(0).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(be.read_pointer(0, Bitness::Bits32).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_out_of_bounds() {
        let data = [0u8; 4];
        let reader = ByteReader::new(&data, Endianness::Little);

        assert!(reader.read_u32(0).is_ok());
        assert_eq!(
            reader.read_u32(1),
            Err(ParseError::OutOfBounds {
                offset: 1,
                len: 4,
                size: 4
            })
        );
        assert!(reader.read_u64(0).is_err());
        assert!(reader.read_bytes(u64::MAX, 2).is_err());
        assert!(reader.read_u8(4).is_err());
    }

    #[test]
    fn test_read_cstring() {
        let data = b"NSObject\0Foo";
        let reader = ByteReader::new(data, Endianness::Little);

        assert_eq!(reader.read_cstring(0).unwrap(), "NSObject");
        assert_eq!(reader.read_cstring(2).unwrap(), "Object");
        // Unterminated
        assert!(reader.read_cstring(9).is_err());
        assert!(reader.read_cstring(100).is_err());
    }

    #[test]
    fn test_leb128() {
        let data = [0xE5, 0x8E, 0x26, 0x7F, 0x80, 0x7F];
        let reader = ByteReader::new(&data, Endianness::Little);

        assert_eq!(reader.read_uleb128(0).unwrap(), (624485, 3));
        assert_eq!(reader.read_sleb128(3).unwrap(), (-1, 1));
        assert_eq!(reader.read_sleb128(4).unwrap(), (-128, 2));
    }

    #[test]
    fn test_sub_reader() {
        let data = [0xAA, 0x01, 0x00, 0x00, 0x00, 0xBB];
        let reader = ByteReader::new(&data, Endianness::Little);
        let sub = reader.sub_reader(1, 4).unwrap();

        assert_eq!(sub.len(), 4);
        assert_eq!(sub.read_u32(0).unwrap(), 1);
        assert!(sub.read_u8(4).is_err());
        assert!(reader.sub_reader(4, 4).is_err());
    }
}
