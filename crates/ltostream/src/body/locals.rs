//! Function-local declarations.
//!
//! The local-decl stream opens with the function's hoisted statics, then
//! holds one standalone record per automatic variable or parameter. Each
//! record starts with fresh back-reference and source-position state, so the
//! reader can decode records in whatever order the body first mentions them.

use crate::codec::{TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::flags::{self, tree_groups};
use crate::pickle::tags;
use crate::stream::{InputCursor, OutputStream};
use ltoir::{DeclData, Node, NodeData, NodeId, TreeCode};
use log::trace;
use std::collections::HashSet;

/// Absent position in the declaration list.
const NO_POSITION: i64 = -1;

impl<'a> TreeWriter<'a> {
    /// Write each declared local that lives outside the frame (statics and
    /// externs) with its position, and register every automatic one in the
    /// local table.
    pub(crate) fn write_local_preamble(
        &mut self,
        out: &mut OutputStream,
        local_decls: &[NodeId],
    ) -> Result<()> {
        let program = self.program;
        let mut seen = HashSet::new();
        for (position, &decl) in local_decls.iter().enumerate() {
            if program.is_function_local(decl) {
                if let Some(scope) = self.scope.as_mut() {
                    scope.locals.encode(decl);
                }
                continue;
            }
            if !seen.insert(decl) {
                continue;
            }
            self.write_tree(out, Some(decl))?;
            out.write_uleb(position as u64);
        }
        self.write_tree(out, None)
    }

    /// Write a record for every local in the table, including ones the
    /// records themselves add. Returns each record's offset.
    pub(crate) fn write_local_records(&mut self, out: &mut OutputStream) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let mut i = 0;
        loop {
            let Some(decl) = self
                .scope
                .as_ref()
                .and_then(|s| s.locals.trees().get(i).copied())
            else {
                break;
            };
            offsets.push(out.len() as u64);
            let saved = self.begin_record();
            let result = self.write_local(out, decl);
            self.end_record(saved);
            result?;
            i += 1;
        }
        Ok(offsets)
    }

    fn write_local(&mut self, out: &mut OutputStream, decl: NodeId) -> Result<()> {
        let program = self.program;
        let node = &program.arena[decl];
        let d = node.decl().ok_or_else(|| {
            StreamError::consistency(format!("{decl}: local {} is not a declaration", node.code))
        })?;
        let base = match node.code {
            TreeCode::VarDecl => tags::LOCAL_VAR,
            TreeCode::ParmDecl => tags::LOCAL_PARM,
            code => {
                return Err(StreamError::consistency(format!("{decl}: {code} is not a local")))
            }
        };
        let mut variant = 0;
        if d.attributes.is_some() {
            variant |= tags::VARIANT_ATTRIBUTES;
        }
        if d.size_unit.is_some() {
            variant |= tags::VARIANT_SIZE_UNIT;
        }
        if d.debug_expr.is_some() {
            variant |= tags::VARIANT_DEBUG_EXPR;
        }
        out.write_u8(base + variant);

        self.write_tree(out, d.name)?;
        self.write_tree(out, d.assembler_name)?;
        self.write_tree(out, node.ty)?;
        self.write_tree(out, d.context)?;
        if node.code == TreeCode::VarDecl {
            self.write_tree(out, d.initial)?;
            let position = self
                .scope
                .as_ref()
                .and_then(|s| s.positions.get(&decl))
                .map_or(NO_POSITION, |&p| p as i64);
            out.write_sleb(position);
        } else {
            self.write_tree(out, d.arg_type)?;
            self.write_tree(out, d.chain)?;
        }
        let packed = flags::pack(tree_groups(node.code), &node.flags);
        self.locus
            .write_flags(out, &mut self.strings, packed, node.locus.as_ref());
        out.write_uleb(u64::from(d.align));
        out.write_uleb(u64::from(d.mode));
        self.write_tree(out, d.size)?;
        if d.attributes.is_some() {
            self.write_tree(out, d.attributes)?;
        }
        if d.size_unit.is_some() {
            self.write_tree(out, d.size_unit)?;
        }
        if d.debug_expr.is_some() {
            self.write_tree(out, d.debug_expr)?;
        }
        Ok(())
    }
}

impl<'a, 'p> TreeReader<'a, 'p> {
    /// Read the statics that open the local-decl stream.
    pub(crate) fn read_local_preamble(&mut self, cursor: &mut InputCursor<'_>) -> Result<()> {
        while let Some(decl) = self.read_tree(cursor)? {
            let position = cursor.read_uleb()? as i64;
            self.scope_mut("local preamble")?
                .positions
                .push((position, decl));
        }
        Ok(())
    }

    /// Local number `index`, decoding its record on first use.
    pub(crate) fn local(&mut self, index: u64) -> Result<NodeId> {
        let scope = self.scope_mut("local reference")?;
        let len = scope.locals.len();
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or(StreamError::IndexOutOfRange {
                what: "local decl",
                index: index as i64,
                len,
            })?;
        if let Some(id) = scope.locals[slot] {
            return Ok(id);
        }
        let offset = scope.local_offsets.get(slot).copied().ok_or_else(|| {
            StreamError::consistency(format!("local decl {slot} has no index entry"))
        })?;
        let mut cursor = InputCursor::new("local decls", scope.local_data).at(offset as usize)?;

        let tag = cursor.read_u8()?;
        let (code, variant) = match tag {
            t if (tags::LOCAL_VAR..tags::LOCAL_PARM).contains(&t) => {
                (TreeCode::VarDecl, t - tags::LOCAL_VAR)
            }
            t if (tags::LOCAL_PARM..tags::STMT).contains(&t) => {
                (TreeCode::ParmDecl, t - tags::LOCAL_PARM)
            }
            t => {
                return Err(StreamError::UnknownTag {
                    tag: u64::from(t),
                    context: "local decl",
                })
            }
        };

        // Register before reading the fields: they may lead back here.
        let id = self.program.arena.alloc(Node::new(code));
        self.scope_mut("local reference")?.locals[slot] = Some(id);

        let saved = self.begin_record();
        let result = self.read_local_fields(&mut cursor, code, variant);
        self.end_record(saved);
        let (node, position) = result?;
        self.program.arena.replace(id, node);
        if let Some(position) = position.filter(|&p| p != NO_POSITION) {
            self.scope_mut("local reference")?
                .positions
                .push((position, id));
        }
        trace!("materialized local {slot} as {id} ({code})");
        Ok(id)
    }

    fn read_local_fields(
        &mut self,
        cursor: &mut InputCursor<'_>,
        code: TreeCode,
        variant: u8,
    ) -> Result<(Node, Option<i64>)> {
        let mut node = Node::new(code);
        let mut d = DeclData {
            name: self.read_tree(cursor)?,
            assembler_name: self.read_tree(cursor)?,
            ..Default::default()
        };
        node.ty = self.read_tree(cursor)?;
        d.context = self.read_tree(cursor)?;
        let mut position = None;
        if code == TreeCode::VarDecl {
            d.initial = self.read_tree(cursor)?;
            position = Some(cursor.read_sleb()?);
        } else {
            d.arg_type = self.read_tree(cursor)?;
            d.chain = self.read_tree(cursor)?;
        }
        let (packed, locus) = self.locus.read_flags(cursor, &self.strings)?;
        flags::unpack(tree_groups(code), packed, &mut node.flags);
        node.locus = locus;
        d.align = cursor.read_u32()?;
        d.mode = cursor.read_u32()?;
        d.size = self.read_tree(cursor)?;
        if variant & tags::VARIANT_ATTRIBUTES != 0 {
            d.attributes = self.read_tree(cursor)?;
        }
        if variant & tags::VARIANT_SIZE_UNIT != 0 {
            d.size_unit = self.read_tree(cursor)?;
        }
        if variant & tags::VARIANT_DEBUG_EXPR != 0 {
            d.debug_expr = self.read_tree(cursor)?;
        }
        node.data = NodeData::Decl(Box::new(d));
        Ok((node, position))
    }
}
