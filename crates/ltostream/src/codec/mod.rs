//! Tree node codec.
//!
//! [`TreeWriter`] and [`TreeReader`] are the per-section pass contexts: they
//! own the section's string table, back-reference table and source-position
//! state, and borrow the unit-wide declaration tables. Both exist for exactly
//! one section and are dropped with it.
//!
//! Outside a function body every node is written in full the first time and
//! as a back-reference afterwards. Inside a body (`scope` is set) references
//! to global declarations and types go through the unit's category tables,
//! and locals, labels and SSA names through the function's own tables.

mod fields;
pub mod real;
mod tree;

pub use fields::{decl_fields, type_fields, Field, BINFO};

use crate::error::{Result, StreamError};
use crate::locus::{LocusReader, LocusWriter};
use crate::pickle::{OutDeclState, PickleTable, ReadTable, TreeRefEncoder, UnitDecls};
use crate::strings::{StringReader, StringTable};
use ltoir::{Node, NodeId, Program, TreeCode};
use std::collections::HashMap;

/// Numbering of the labels a function body refers to: named labels count up
/// from 0, unnamed ones down from -1.
#[derive(Debug, Default)]
pub struct LabelTable {
    index: HashMap<NodeId, i32>,
    named: Vec<NodeId>,
    unnamed: u32,
}

impl LabelTable {
    pub fn encode(&mut self, label: NodeId, named: bool) -> i32 {
        if let Some(&i) = self.index.get(&label) {
            return i;
        }
        let i = if named {
            self.named.push(label);
            self.named.len() as i32 - 1
        } else {
            self.unnamed += 1;
            -(self.unnamed as i32)
        };
        self.index.insert(label, i);
        i
    }

    pub fn named(&self) -> &[NodeId] {
        &self.named
    }

    pub fn num_unnamed(&self) -> u32 {
        self.unnamed
    }
}

/// Function-local reference tables on the write side.
#[derive(Debug)]
pub struct LocalScope {
    pub function: NodeId,
    pub locals: TreeRefEncoder,
    pub labels: LabelTable,
    /// Position of each declared local in the function's declaration list.
    pub positions: HashMap<NodeId, usize>,
}

impl LocalScope {
    pub fn new(function: NodeId, local_decls: &[NodeId]) -> Self {
        let mut positions = HashMap::new();
        for (i, &decl) in local_decls.iter().enumerate() {
            positions.entry(decl).or_insert(i);
        }
        Self {
            function,
            locals: TreeRefEncoder::new(),
            labels: LabelTable::default(),
            positions,
        }
    }
}

pub struct TreeWriter<'a> {
    pub program: &'a Program,
    pub decls: &'a mut OutDeclState,
    pub strings: StringTable,
    pub pickles: PickleTable,
    pub locus: LocusWriter,
    pub emit_locations: bool,
    pub scope: Option<LocalScope>,
}

impl<'a> TreeWriter<'a> {
    pub fn new(program: &'a Program, decls: &'a mut OutDeclState, emit_locations: bool) -> Self {
        Self {
            program,
            decls,
            strings: StringTable::new(),
            pickles: PickleTable::preloaded(&program.common),
            locus: LocusWriter::new(emit_locations),
            emit_locations,
            scope: None,
        }
    }

    /// Start a standalone record: fresh back-references and positions.
    /// Returns the state to hand back to [`Self::end_record`].
    pub fn begin_record(&mut self) -> (PickleTable, LocusWriter) {
        let pickles = PickleTable::preloaded(&self.program.common);
        let locus = LocusWriter::new(self.emit_locations);
        (
            std::mem::replace(&mut self.pickles, pickles),
            std::mem::replace(&mut self.locus, locus),
        )
    }

    pub fn end_record(&mut self, saved: (PickleTable, LocusWriter)) {
        (self.pickles, self.locus) = saved;
    }
}

/// A fresh label of `function`. Only the name and context of a label are
/// streamed.
pub(crate) fn label_decl(
    program: &mut Program,
    function: NodeId,
    name: Option<NodeId>,
) -> NodeId {
    let mut node = Node::new(TreeCode::LabelDecl).with_type(Some(program.common.void_type));
    if let Some(d) = node.decl_mut() {
        d.name = name;
        d.context = Some(function);
    }
    program.arena.alloc(node)
}

/// Function-local reference tables on the read side.
#[derive(Debug)]
pub struct LocalScopeInput<'a> {
    pub function: NodeId,
    /// Materialized locals by index; `None` until first referenced.
    pub locals: Vec<Option<NodeId>>,
    pub local_offsets: Vec<u64>,
    pub local_data: &'a [u8],
    /// (position in the declaration list, decl) for locals that have one.
    pub positions: Vec<(i64, NodeId)>,
    pub named_labels: Vec<NodeId>,
    pub num_unnamed_labels: u32,
    /// Unnamed labels by slot, created on first reference.
    pub unnamed_labels: HashMap<u32, NodeId>,
    pub ssa_names: Vec<Option<NodeId>>,
}

pub struct TreeReader<'a, 'p> {
    pub program: &'p mut Program,
    pub decls: &'a UnitDecls,
    pub strings: StringReader<'a>,
    pub pickles: ReadTable,
    pub locus: LocusReader,
    pub scope: Option<LocalScopeInput<'a>>,
}

impl<'a, 'p> TreeReader<'a, 'p> {
    pub fn new(program: &'p mut Program, decls: &'a UnitDecls, strings: StringReader<'a>) -> Self {
        let pickles = ReadTable::preloaded(&program.common);
        Self {
            program,
            decls,
            strings,
            pickles,
            locus: LocusReader::new(),
            scope: None,
        }
    }

    pub fn begin_record(&mut self) -> (ReadTable, LocusReader) {
        let pickles = ReadTable::preloaded(&self.program.common);
        (
            std::mem::replace(&mut self.pickles, pickles),
            std::mem::take(&mut self.locus),
        )
    }

    pub fn end_record(&mut self, saved: (ReadTable, LocusReader)) {
        (self.pickles, self.locus) = saved;
    }

    pub(crate) fn scope_mut(&mut self, what: &str) -> Result<&mut LocalScopeInput<'a>> {
        self.scope
            .as_mut()
            .ok_or_else(|| StreamError::consistency(format!("{what} outside a function body")))
    }
}
