//! Basic-block records: block header, statements and phis.

use crate::codec::{TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::flags;
use crate::pickle::tags;
use crate::stream::{InputCursor, OutputStream};
use ltoir::{BasicBlock, Cfg, Phi, PhiArg, Stmt, StmtCode, StmtFlags};

/// Running exception-region number; statements store the difference to it.
#[derive(Debug, Default)]
pub(crate) struct EhDelta {
    prev: i32,
}

impl<'a> TreeWriter<'a> {
    pub(crate) fn write_block(&mut self, out: &mut OutputStream, block: &BasicBlock) -> Result<()> {
        out.write_u8(if block.is_empty() { tags::BB0 } else { tags::BB1 });
        out.write_uleb(u64::from(block.index));
        out.write_sleb(block.count);
        out.write_uleb(u64::from(block.loop_depth));
        out.write_sleb(i64::from(block.frequency));
        out.write_uleb(u64::from(block.flags));
        if block.is_empty() {
            return Ok(());
        }

        let mut eh = EhDelta::default();
        for stmt in &block.stmts {
            self.write_stmt(out, stmt, &mut eh)?;
        }
        out.write_u8(tags::NULL);
        for phi in &block.phis {
            out.write_u8(tags::PHI);
            out.write_uleb(u64::from(phi.result));
            out.write_uleb(phi.args.len() as u64);
            for arg in &phi.args {
                self.write_tree(out, arg.value)?;
                out.write_uleb(u64::from(arg.src));
            }
        }
        out.write_u8(tags::NULL);
        Ok(())
    }

    fn write_stmt(&mut self, out: &mut OutputStream, stmt: &Stmt, eh: &mut EhDelta) -> Result<()> {
        out.write_u8(tags::STMT + stmt.code as u8);
        let packed = flags::pack(&[flags::STMT], &stmt.flags);
        self.locus
            .write_flags(out, &mut self.strings, packed, stmt.locus.as_ref());
        out.write_uleb(u64::from(stmt.subcode));
        out.write_uleb(u64::from(stmt.uid));
        out.write_sleb(i64::from(stmt.eh_region) - i64::from(eh.prev));
        eh.prev = stmt.eh_region;
        out.write_uleb(stmt.ops.len() as u64);
        for &op in &stmt.ops {
            self.write_tree(out, op)?;
        }
        Ok(())
    }
}

impl<'a, 'p> TreeReader<'a, 'p> {
    /// Read block records up to the terminator and fill their contents into
    /// the blocks `cfg` already has.
    pub(crate) fn read_blocks(&mut self, cursor: &mut InputCursor<'_>, cfg: &mut Cfg) -> Result<()> {
        loop {
            let tag = cursor.read_u8()?;
            let has_contents = match tag {
                tags::NULL => return Ok(()),
                tags::BB0 => false,
                tags::BB1 => true,
                tag => {
                    return Err(StreamError::UnknownTag {
                        tag: u64::from(tag),
                        context: "basic block",
                    })
                }
            };
            let index = cursor.read_u32()?;
            let last = cfg.last_basic_block();
            let block = cfg
                .block_mut(index)
                .ok_or(StreamError::out_of_range("basic block", index, last as usize))?;
            block.count = cursor.read_sleb()?;
            block.loop_depth = cursor.read_u32()?;
            block.frequency = cursor.read_i32()?;
            block.flags = cursor.read_u32()?;
            if !has_contents {
                continue;
            }

            let mut eh = EhDelta::default();
            let mut stmts = Vec::new();
            loop {
                match cursor.read_u8()? {
                    tags::NULL => break,
                    tag => stmts.push(self.read_stmt(cursor, tag, &mut eh)?),
                }
            }
            let mut phis = Vec::new();
            loop {
                match cursor.read_u8()? {
                    tags::NULL => break,
                    tags::PHI => phis.push(self.read_phi(cursor)?),
                    tag => {
                        return Err(StreamError::UnknownTag {
                            tag: u64::from(tag),
                            context: "phi",
                        })
                    }
                }
            }
            if let Some(block) = cfg.block_mut(index) {
                block.stmts = stmts;
                block.phis = phis;
            }
        }
    }

    fn read_stmt(&mut self, cursor: &mut InputCursor<'_>, tag: u8, eh: &mut EhDelta) -> Result<Stmt> {
        let code = tag
            .checked_sub(tags::STMT)
            .and_then(StmtCode::from_u8)
            .ok_or(StreamError::UnknownTag {
                tag: u64::from(tag),
                context: "statement",
            })?;
        let (packed, locus) = self.locus.read_flags(cursor, &self.strings)?;
        let mut stmt_flags = StmtFlags::default();
        flags::unpack(&[flags::STMT], packed, &mut stmt_flags);
        let subcode = cursor.read_u32()?;
        let uid = cursor.read_u32()?;
        let delta = cursor.read_sleb()?;
        let eh_region = i32::try_from(i64::from(eh.prev) + delta).map_err(|_| {
            StreamError::consistency(format!("statement {uid}: EH region delta {delta} overflows"))
        })?;
        eh.prev = eh_region;
        let count = cursor.read_uleb()?;
        let mut ops = Vec::new();
        for _ in 0..count {
            ops.push(self.read_tree(cursor)?);
        }
        Ok(Stmt {
            code,
            subcode,
            uid,
            flags: stmt_flags,
            locus,
            eh_region,
            ops,
        })
    }

    fn read_phi(&mut self, cursor: &mut InputCursor<'_>) -> Result<Phi> {
        let result = cursor.read_u32()?;
        let count = cursor.read_uleb()?;
        let mut args = Vec::new();
        for _ in 0..count {
            args.push(PhiArg {
                value: self.read_tree(cursor)?,
                src: cursor.read_u32()?,
            });
        }
        Ok(Phi { result, args })
    }
}
