//! Control-flow graph stream: blocks, successor edges and the block chain.

use crate::error::{Result, StreamError};
use crate::stream::{InputCursor, OutputStream};
use ltoir::function::{Cfg, Edge, ProfileStatus};

/// Ends the block list and the chain.
const END: i64 = -1;

/// Numbered blocks a graph may leave out of its record list.
pub const MAX_UNWRITTEN_BLOCKS: usize = 1 << 16;

pub fn write_cfg(out: &mut OutputStream, cfg: &Cfg) {
    out.write_uleb(u64::from(cfg.profile_status.as_u8()));
    out.write_uleb(u64::from(cfg.last_basic_block()));
    for block in cfg.blocks() {
        out.write_sleb(i64::from(block.index));
        out.write_uleb(block.succs.len() as u64);
        for edge in &block.succs {
            out.write_uleb(u64::from(edge.dest));
            out.write_sleb(i64::from(edge.probability));
            out.write_sleb(edge.count);
            out.write_uleb(u64::from(edge.flags));
        }
    }
    out.write_sleb(END);
    for &index in &cfg.order {
        out.write_sleb(i64::from(index));
    }
    out.write_sleb(END);
}

fn block_index(raw: i64, last: u32) -> Result<u32> {
    u32::try_from(raw)
        .ok()
        .filter(|&i| i < last)
        .ok_or(StreamError::IndexOutOfRange {
            what: "basic block",
            index: raw,
            len: last as usize,
        })
}

/// Rebuild the graph shape. Block contents come later from the main stream.
pub fn read_cfg(cursor: &mut InputCursor<'_>) -> Result<Cfg> {
    let raw_status = cursor.read_uleb()?;
    let profile_status = u8::try_from(raw_status)
        .ok()
        .and_then(ProfileStatus::from_u8)
        .ok_or(StreamError::UnknownTag {
            tag: raw_status,
            context: "profile status",
        })?;
    let last = cursor.read_u32()?;
    let len = cursor.check_count("basic block", u64::from(last), MAX_UNWRITTEN_BLOCKS)?;

    let mut cfg = Cfg::empty();
    cfg.profile_status = profile_status;
    cfg.blocks.resize(len, None);
    loop {
        let raw = cursor.read_sleb()?;
        if raw == END {
            break;
        }
        let index = block_index(raw, last)?;
        let count = cursor.read_uleb()?;
        let mut succs = Vec::new();
        for _ in 0..count {
            let dest = cursor.read_u32()?;
            block_index(i64::from(dest), last)?;
            succs.push(Edge {
                dest,
                probability: cursor.read_i32()?,
                count: cursor.read_sleb()?,
                flags: cursor.read_u32()?,
            });
        }
        // Destinations may be listed before their own record.
        for edge in &succs {
            cfg.ensure_block(edge.dest);
        }
        cfg.ensure_block(index).succs = succs;
    }
    loop {
        let raw = cursor.read_sleb()?;
        if raw == END {
            break;
        }
        cfg.order.push(block_index(raw, last)?);
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltoir::function::{edge_flags, ENTRY_BLOCK, EXIT_BLOCK};

    #[test]
    fn test_diamond_round_trip() {
        let mut cfg = Cfg::new();
        cfg.profile_status = ProfileStatus::Guessed;
        let head = cfg.add_block();
        let left = cfg.add_block();
        let right = cfg.add_block();
        cfg.add_edge(ENTRY_BLOCK, head, edge_flags::FALLTHRU);
        cfg.add_edge(head, left, edge_flags::TRUE_VALUE).probability = 7000;
        cfg.add_edge(head, right, edge_flags::FALSE_VALUE).probability = 3000;
        cfg.add_edge(left, EXIT_BLOCK, 0).count = -4;
        cfg.add_edge(right, EXIT_BLOCK, 0);

        let mut out = OutputStream::new("cfg");
        write_cfg(&mut out, &cfg);
        let read = read_cfg(&mut InputCursor::new("cfg", out.as_bytes())).unwrap();
        assert_eq!(read, cfg);
        assert!(read.verify().is_ok());
    }

    #[test]
    fn test_holes_survive() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        cfg.blocks[a as usize] = None;
        cfg.order.retain(|&i| i != a);
        cfg.add_edge(ENTRY_BLOCK, b, edge_flags::FALLTHRU);

        let mut out = OutputStream::new("cfg");
        write_cfg(&mut out, &cfg);
        let read = read_cfg(&mut InputCursor::new("cfg", out.as_bytes())).unwrap();
        assert_eq!(read.last_basic_block(), 4);
        assert!(read.block(a).is_none());
        assert_eq!(read, cfg);
    }

    #[test]
    fn test_oversized_block_count_rejected() {
        let mut out = OutputStream::new("cfg");
        out.write_uleb(0);
        out.write_uleb(u64::from(u32::MAX));
        out.write_sleb(END);
        out.write_sleb(END);
        let err = read_cfg(&mut InputCursor::new("cfg", out.as_bytes())).unwrap_err();
        assert!(matches!(
            err,
            StreamError::IndexOutOfRange {
                what: "basic block",
                len: MAX_UNWRITTEN_BLOCKS,
                ..
            }
        ));
    }

    #[test]
    fn test_edge_past_last_block_rejected() {
        let mut out = OutputStream::new("cfg");
        out.write_uleb(0);
        out.write_uleb(2);
        out.write_sleb(0);
        out.write_uleb(1);
        out.write_uleb(5);
        let err = read_cfg(&mut InputCursor::new("cfg", out.as_bytes())).unwrap_err();
        assert!(matches!(
            err,
            StreamError::IndexOutOfRange {
                what: "basic block",
                index: 5,
                ..
            }
        ));
    }
}
