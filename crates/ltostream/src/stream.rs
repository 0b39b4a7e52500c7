//! Growable output streams and bounds-checked input cursors.
//!
//! Integers go out as LEB128: unsigned values in 7-bit little-endian groups
//! with a continuation bit, signed values with sign-extension grouping so
//! small negative numbers stay short.

use crate::error::{Result, StreamError};

/// A varint never needs more than ten bytes for 64 bits.
const MAX_VARINT_LEN: usize = 10;

/// One named byte stream being written.
#[derive(Debug, Clone)]
pub struct OutputStream {
    name: &'static str,
    bytes: Vec<u8>,
}

impl OutputStream {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            bytes: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_uleb(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    pub fn write_sleb(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Total bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read position inside one stream. Reading past the end is an error, never
/// a short read.
#[derive(Debug, Clone)]
pub struct InputCursor<'a> {
    name: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> InputCursor<'a> {
    pub fn new(name: &'static str, data: &'a [u8]) -> Self {
        Self { name, data, pos: 0 }
    }

    /// A cursor over the same bytes positioned at `pos`.
    pub fn at(&self, pos: usize) -> Result<Self> {
        if pos > self.data.len() {
            return Err(self.truncated());
        }
        Ok(Self {
            name: self.name,
            data: self.data,
            pos,
        })
    }

    fn truncated(&self) -> StreamError {
        StreamError::Truncated {
            stream: self.name,
            offset: self.pos,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Bound a count read from this stream before anything is sized by it.
    ///
    /// Every entry the count announces takes at least one byte of what is
    /// left. Tables whose unused entries are not written at all pass with up
    /// to `unwritten` entries regardless.
    pub fn check_count(&self, what: &'static str, count: u64, unwritten: usize) -> Result<usize> {
        let limit = self.remaining().max(unwritten);
        usize::try_from(count)
            .ok()
            .filter(|&n| n <= limit)
            .ok_or(StreamError::IndexOutOfRange {
                what,
                index: i64::try_from(count).unwrap_or(i64::MAX),
                len: limit,
            })
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.truncated())?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_uleb(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut result = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(StreamError::Overlong {
            stream: self.name,
            offset: start,
        })
    }

    pub fn read_sleb(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut result = 0i64;
        let mut shift = 0;
        for _ in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(StreamError::Overlong {
            stream: self.name,
            offset: start,
        })
    }

    /// Unsigned varint that must fit in 32 bits.
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.read_uleb()?;
        u32::try_from(value).map_err(|_| {
            StreamError::consistency(format!("{} stream: {value} does not fit 32 bits", self.name))
        })
    }

    /// Signed varint that must fit in 32 bits.
    pub fn read_i32(&mut self) -> Result<i32> {
        let value = self.read_sleb()?;
        i32::try_from(value).map_err(|_| {
            StreamError::consistency(format!("{} stream: {value} does not fit 32 bits", self.name))
        })
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uleb(value: u64) -> Vec<u8> {
        let mut out = OutputStream::new("test");
        out.write_uleb(value);
        out.into_bytes()
    }

    fn sleb(value: i64) -> Vec<u8> {
        let mut out = OutputStream::new("test");
        out.write_sleb(value);
        out.into_bytes()
    }

    // ── Encoding ──

    #[test]
    fn test_known_encodings() {
        assert_eq!(uleb(0), [0x00]);
        assert_eq!(uleb(127), [0x7f]);
        assert_eq!(uleb(128), [0x80, 0x01]);
        assert_eq!(uleb(624485), [0xe5, 0x8e, 0x26]);
        assert_eq!(sleb(-1), [0x7f]);
        assert_eq!(sleb(63), [0x3f]);
        assert_eq!(sleb(64), [0xc0, 0x00]);
        assert_eq!(sleb(-123456), [0xc0, 0xbb, 0x78]);
        assert_eq!(uleb(u64::MAX).len(), 10);
        assert_eq!(sleb(i64::MIN).len(), 10);
    }

    // ── Decoding ──

    #[test]
    fn test_truncated_varint() {
        let mut cursor = InputCursor::new("main", &[0x80, 0x80]);
        let err = cursor.read_uleb().unwrap_err();
        assert!(matches!(err, StreamError::Truncated { stream: "main", .. }));
    }

    #[test]
    fn test_overlong_varint() {
        let bytes = [0xff; 11];
        let mut cursor = InputCursor::new("main", &bytes);
        assert!(matches!(
            cursor.read_uleb(),
            Err(StreamError::Overlong { offset: 0, .. })
        ));
    }

    #[test]
    fn test_read_bytes_past_end() {
        let mut cursor = InputCursor::new("strings", b"abc");
        assert_eq!(cursor.read_bytes(2).unwrap(), b"ab");
        assert!(cursor.read_bytes(2).is_err());
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut out = OutputStream::new("header");
        out.write_u16_le(0x0102);
        out.write_u32_le(0x0304_0506);
        assert_eq!(out.as_bytes(), [0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
        let mut cursor = InputCursor::new("header", out.as_bytes());
        assert_eq!(cursor.read_u16_le().unwrap(), 0x0102);
        assert_eq!(cursor.read_u32_le().unwrap(), 0x0304_0506);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_count_bounded_by_remaining_bytes() {
        let cursor = InputCursor::new("eh", &[1, 2, 3]);
        assert_eq!(cursor.check_count("eh region", 3, 0).unwrap(), 3);
        assert!(matches!(
            cursor.check_count("eh region", 4, 0),
            Err(StreamError::IndexOutOfRange { what: "eh region", index: 4, len: 3 })
        ));
        assert!(matches!(
            cursor.check_count("eh region", u64::MAX, 0),
            Err(StreamError::IndexOutOfRange { index: i64::MAX, .. })
        ));
        assert_eq!(cursor.check_count("ssa name", 100, 100).unwrap(), 100);
        assert!(cursor.check_count("ssa name", 101, 100).is_err());
    }

    proptest! {
        #[test]
        fn uleb_consumes_exactly_what_was_written(values in proptest::collection::vec(any::<u64>(), 1..16)) {
            let mut out = OutputStream::new("test");
            for v in &values {
                out.write_uleb(*v);
            }
            let mut cursor = InputCursor::new("test", out.as_bytes());
            for v in &values {
                prop_assert_eq!(cursor.read_uleb().unwrap(), *v);
            }
            prop_assert!(cursor.is_at_end());
        }

        #[test]
        fn sleb_consumes_exactly_what_was_written(values in proptest::collection::vec(any::<i64>(), 1..16)) {
            let mut out = OutputStream::new("test");
            for v in &values {
                out.write_sleb(*v);
            }
            let mut cursor = InputCursor::new("test", out.as_bytes());
            for v in &values {
                prop_assert_eq!(cursor.read_sleb().unwrap(), *v);
            }
            prop_assert!(cursor.is_at_end());
        }
    }
}
