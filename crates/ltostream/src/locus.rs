//! Source positions folded into flag words.
//!
//! The low four bits of every flag word say whether a position follows and
//! which of its parts changed since the last position written to the same
//! stream. Only the changed parts are written; the reader carries the others
//! forward.

use crate::error::Result;
use crate::stream::{InputCursor, OutputStream};
use crate::strings::{StringReader, StringTable};
use ltoir::Locus;

pub const HAS_LOC: u64 = 1;
pub const FILE_CHANGED: u64 = 2;
pub const LINE_CHANGED: u64 = 4;
pub const COLUMN_CHANGED: u64 = 8;
pub const LOCUS_BITS: u32 = 4;

#[derive(Debug, Default)]
struct LastLocus {
    file: Option<String>,
    line: u32,
    column: u32,
}

/// Write side: remembers the last position emitted.
#[derive(Debug)]
pub struct LocusWriter {
    last: LastLocus,
    enabled: bool,
}

impl LocusWriter {
    /// With `enabled` false every position is dropped.
    pub fn new(enabled: bool) -> Self {
        Self {
            last: LastLocus::default(),
            enabled,
        }
    }

    /// Write `packed` with the locus bits folded in, then the changed parts.
    pub fn write_flags(
        &mut self,
        out: &mut OutputStream,
        strings: &mut StringTable,
        packed: u64,
        locus: Option<&Locus>,
    ) {
        let Some(locus) = locus.filter(|_| self.enabled) else {
            out.write_uleb(packed << LOCUS_BITS);
            return;
        };
        let mut bits = HAS_LOC;
        let file_changed = self.last.file.as_deref() != Some(locus.file.as_str());
        if file_changed {
            bits |= FILE_CHANGED;
        }
        if self.last.line != locus.line {
            bits |= LINE_CHANGED;
        }
        if self.last.column != locus.column {
            bits |= COLUMN_CHANGED;
        }
        out.write_uleb((packed << LOCUS_BITS) | bits);

        if file_changed {
            strings.write_ref(out, Some(locus.file.as_bytes()));
            self.last.file = Some(locus.file.clone());
        }
        if bits & LINE_CHANGED != 0 {
            out.write_uleb(u64::from(locus.line));
            self.last.line = locus.line;
        }
        if bits & COLUMN_CHANGED != 0 {
            out.write_uleb(u64::from(locus.column));
            self.last.column = locus.column;
        }
    }
}

/// Read side of [`LocusWriter`].
#[derive(Debug, Default)]
pub struct LocusReader {
    last: LastLocus,
}

impl LocusReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a flag word; returns the packed attributes and the position.
    pub fn read_flags(
        &mut self,
        cursor: &mut InputCursor<'_>,
        strings: &StringReader<'_>,
    ) -> Result<(u64, Option<Locus>)> {
        let word = cursor.read_uleb()?;
        let packed = word >> LOCUS_BITS;
        if word & HAS_LOC == 0 {
            return Ok((packed, None));
        }
        if word & FILE_CHANGED != 0 {
            self.last.file = Some(strings.read_str(cursor)?.unwrap_or_default());
        }
        if word & LINE_CHANGED != 0 {
            self.last.line = cursor.read_u32()?;
        }
        if word & COLUMN_CHANGED != 0 {
            self.last.column = cursor.read_u32()?;
        }
        let locus = Locus {
            file: self.last.file.clone().unwrap_or_default(),
            line: self.last.line,
            column: self.last.column,
        };
        Ok((packed, Some(locus)))
    }
}
