//! Deferred reference resolution.
//!
//! Some records name other records of the same table by number before the
//! target has been read (an exception region's outer region, a call-graph
//! node's inline target). Readers keep the raw number next to the slot that
//! needs it and resolve everything in one pass once the whole table exists.

use crate::error::{Result, StreamError};

/// Raw references waiting for their table to be complete.
#[derive(Debug)]
pub struct Fixups<S> {
    what: &'static str,
    pending: Vec<(S, i64)>,
}

impl<S> Fixups<S> {
    /// `what` names the table in error messages.
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            pending: Vec::new(),
        }
    }

    /// Remember that `slot` refers to raw number `raw`.
    pub fn defer(&mut self, slot: S, raw: i64) {
        self.pending.push((slot, raw));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolve every deferred number through `lookup` and hand the result to
    /// `apply`. A number `lookup` does not know is an error; `limit` is only
    /// used to report the table size.
    pub fn resolve<T>(
        self,
        limit: usize,
        lookup: impl Fn(i64) -> Option<T>,
        mut apply: impl FnMut(S, T),
    ) -> Result<()> {
        for (slot, raw) in self.pending {
            let target = lookup(raw).ok_or(StreamError::IndexOutOfRange {
                what: self.what,
                index: raw,
                len: limit,
            })?;
            apply(slot, target);
        }
        Ok(())
    }
}
