//! Byte-level readers.
//!
//! The free functions are pure lookups used by detectors: they return
//! `None` instead of panicking when the read runs past the buffer.
//! [`ByteReader`] is a bounded cursor for sequential decoding.

use crate::FormatError;

pub fn u8_at(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

pub fn i8_at(data: &[u8], offset: usize) -> Option<i8> {
    u8_at(data, offset).map(|b| b as i8)
}

pub fn u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let b = bytes_at(data, offset, 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let b = bytes_at(data, offset, 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub fn u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let b = bytes_at(data, offset, 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn u32_be(data: &[u8], offset: usize) -> Option<u32> {
    let b = bytes_at(data, offset, 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Borrow `len` bytes at `offset`, if they are all inside the buffer.
pub fn bytes_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

/// Returns true if `magic` appears at `offset`.
pub fn has_magic(data: &[u8], offset: usize, magic: &[u8]) -> bool {
    bytes_at(data, offset, magic.len()) == Some(magic)
}

/// Extract `width` bits of `value` starting at bit `shift`.
pub const fn bits(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & ((1 << width) - 1)
}

/// Parse a fixed-length, null-terminated string.
///
/// Control characters are dropped and surrounding whitespace trimmed.
pub fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end])
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Returns true if every byte up to the first NUL is printable ASCII.
pub fn is_printable(data: &[u8]) -> bool {
    data.iter()
        .take_while(|&&b| b != 0)
        .all(|&b| (0x20..0x7F).contains(&b))
}

/// Cursor over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// A cursor positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.remaining() == 0
    }

    fn eof(&self) -> FormatError {
        FormatError::UnexpectedEof { offset: self.pos }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        if n > self.remaining() {
            return Err(self.eof());
        }
        self.pos += n;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        let v = u8_at(self.data, self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_i8(&mut self) -> Result<i8, FormatError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, FormatError> {
        let v = u16_le(self.data, self.pos).ok_or_else(|| self.eof())?;
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, FormatError> {
        let v = u16_be(self.data, self.pos).ok_or_else(|| self.eof())?;
        self.pos += 2;
        Ok(v)
    }

    pub fn read_i16_be(&mut self) -> Result<i16, FormatError> {
        Ok(self.read_u16_be()? as i16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, FormatError> {
        let v = u32_le(self.data, self.pos).ok_or_else(|| self.eof())?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, FormatError> {
        let v = u32_be(self.data, self.pos).ok_or_else(|| self.eof())?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let slice = bytes_at(self.data, self.pos, n).ok_or_else(|| self.eof())?;
        self.pos += n;
        Ok(slice)
    }

    /// Read up to `n` bytes, stopping at the end of the buffer.
    pub fn read_upto(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let start = self.pos.min(self.data.len());
        self.pos = start + n;
        &self.data[start..start + n]
    }

    /// Read a fixed-length string field.
    pub fn read_string(&mut self, n: usize) -> Result<String, FormatError> {
        Ok(read_string(self.read_bytes(n)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string() {
        assert_eq!(read_string(b"Hello\0World"), "Hello");
        assert_eq!(read_string(b"  padded  "), "padded");
        assert_eq!(read_string(b"bell\x07ring\0"), "bellring");
        assert_eq!(read_string(b""), "");
    }

    #[test]
    fn pure_readers_stop_at_end() {
        let data = [0x12, 0x34, 0x56];
        assert_eq!(u16_be(&data, 0), Some(0x1234));
        assert_eq!(u16_le(&data, 1), Some(0x5634));
        assert_eq!(u16_le(&data, 2), None);
        assert_eq!(u32_be(&data, 0), None);
        assert_eq!(bytes_at(&data, usize::MAX, 2), None);
    }

    #[test]
    fn bit_fields() {
        assert_eq!(bits(0b1011_0110, 2, 3), 0b101);
        assert_eq!(bits(0xABCD, 12, 4), 0xA);
    }

    #[test]
    fn cursor_reports_offset_on_eof() {
        let data = [1, 2, 3];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16_be().unwrap(), 0x0102);
        assert_eq!(r.read_u16_be(), Err(FormatError::UnexpectedEof { offset: 2 }));
        assert_eq!(r.read_upto(10), &[3]);
        assert!(r.is_eof());
    }

    #[test]
    fn printable_check_stops_at_nul() {
        assert!(is_printable(b"M.K.\0\x01\x02"));
        assert!(!is_printable(b"ab\x01"));
    }
}
