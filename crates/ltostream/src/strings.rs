//! Content-interned string table.
//!
//! Each distinct byte sequence is stored once in the section's string stream
//! as `uleb length` + bytes. Other streams refer to it by its offset. Offset 0
//! is a sentinel byte written before any entry and stands for "no string".

use crate::error::{Result, StreamError};
use crate::stream::{InputCursor, OutputStream};
use std::collections::HashMap;

#[derive(Debug)]
pub struct StringTable {
    stream: OutputStream,
    offsets: HashMap<Vec<u8>, u64>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut stream = OutputStream::new("strings");
        stream.write_u8(0);
        Self {
            stream,
            offsets: HashMap::new(),
        }
    }

    /// Offset of `bytes`, appending it on first sight.
    pub fn intern(&mut self, bytes: &[u8]) -> u64 {
        if let Some(&offset) = self.offsets.get(bytes) {
            return offset;
        }
        let offset = self.stream.len() as u64;
        self.stream.write_uleb(bytes.len() as u64);
        self.stream.write_bytes(bytes);
        self.offsets.insert(bytes.to_vec(), offset);
        offset
    }

    /// Write a reference to `bytes` into `out`; `None` writes the null offset.
    pub fn write_ref(&mut self, out: &mut OutputStream, bytes: Option<&[u8]>) {
        let offset = bytes.map_or(0, |b| self.intern(b));
        out.write_uleb(offset);
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// True while only the sentinel has been written.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn into_stream(self) -> OutputStream {
        self.stream
    }
}

/// Read side of [`StringTable`].
#[derive(Debug, Clone, Copy)]
pub struct StringReader<'a> {
    data: &'a [u8],
}

impl<'a> StringReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Entry at `offset`, `None` for the null offset.
    pub fn get(&self, offset: u64) -> Result<Option<&'a [u8]>> {
        if offset == 0 {
            return Ok(None);
        }
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| o < self.data.len())
            .ok_or(StreamError::BadString { offset })?;
        let mut cursor = InputCursor::new("strings", self.data).at(start)?;
        let len = cursor.read_uleb()?;
        let len = usize::try_from(len).map_err(|_| StreamError::BadString { offset })?;
        Ok(Some(cursor.read_bytes(len)?))
    }

    /// Read an offset from `cursor` and resolve it.
    pub fn read_ref(&self, cursor: &mut InputCursor<'_>) -> Result<Option<&'a [u8]>> {
        let offset = cursor.read_uleb()?;
        self.get(offset)
    }

    /// Like [`Self::read_ref`], for entries that must be UTF-8 text.
    pub fn read_str(&self, cursor: &mut InputCursor<'_>) -> Result<Option<String>> {
        let offset = cursor.read_uleb()?;
        match self.get(offset)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StreamError::BadString { offset }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_writes_bytes_once() {
        let mut table = StringTable::new();
        let first = table.intern(b"main");
        let size_after_first = table.len();
        for _ in 0..10 {
            assert_eq!(table.intern(b"main"), first);
        }
        assert_eq!(table.len(), size_after_first);
        assert_ne!(table.intern(b"other"), first);
    }

    #[test]
    fn test_offsets_are_content_based() {
        let mut table = StringTable::new();
        let owned = String::from("counter");
        let a = table.intern(owned.as_bytes());
        let b = table.intern(b"counter");
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_and_empty_strings_differ() {
        let mut table = StringTable::new();
        let mut out = OutputStream::new("main");
        table.write_ref(&mut out, None);
        table.write_ref(&mut out, Some(b""));
        let strings = table.into_stream().into_bytes();

        let reader = StringReader::new(&strings);
        let mut cursor = InputCursor::new("main", out.as_bytes());
        assert_eq!(reader.read_ref(&mut cursor).unwrap(), None);
        assert_eq!(reader.read_ref(&mut cursor).unwrap(), Some(&b""[..]));
    }

    #[test]
    fn test_reader_resolves_offsets() {
        let mut table = StringTable::new();
        let x = table.intern(b"x.c");
        let y = table.intern(b"y.c");
        let strings = table.into_stream().into_bytes();
        let reader = StringReader::new(&strings);
        assert_eq!(reader.get(x).unwrap(), Some(&b"x.c"[..]));
        assert_eq!(reader.get(y).unwrap(), Some(&b"y.c"[..]));
        assert!(matches!(
            reader.get(999),
            Err(StreamError::BadString { offset: 999 })
        ));
    }
}
