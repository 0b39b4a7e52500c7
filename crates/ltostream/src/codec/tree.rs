//! Encoding and decoding of single tree records.

use super::fields::{decl_fields, type_fields, Field, BINFO};
use super::real::{format_real, parse_real};
use super::{label_decl, TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::flags::{self, tree_groups};
use crate::pickle::{tags, tree_code_for_tag, tree_tag, DeclCategory};
use crate::stream::{InputCursor, OutputStream};
use ltoir::{
    BinfoData, CtorElt, DeclData, Layout, ListEntry, Node, NodeData, NodeId, TreeCode, TypeData,
};
use log::trace;

/// `CASE_LABEL_EXPR` variant bits.
const CASE_HAS_LOW: u64 = 1;
const CASE_HAS_HIGH: u64 = 2;

impl<'a> TreeWriter<'a> {
    /// Write a reference to `node`: null, a back-reference, a scoped
    /// reference, or the node in full.
    pub fn write_tree(&mut self, out: &mut OutputStream, node: Option<NodeId>) -> Result<()> {
        let Some(id) = node else {
            out.write_u8(tags::NULL);
            return Ok(());
        };
        if let Some(index) = self.pickles.lookup(id) {
            trace!("{}: back-reference {index} to {id}", out.name());
            out.write_u8(tags::PICKLE_REF);
            out.write_uleb(u64::from(index));
            return Ok(());
        }
        if self.scope.is_some() && self.write_scoped_ref(out, id)? {
            return Ok(());
        }
        self.write_node(out, id)
    }

    fn write_trees(&mut self, out: &mut OutputStream, nodes: &[Option<NodeId>]) -> Result<()> {
        out.write_uleb(nodes.len() as u64);
        for &node in nodes {
            self.write_tree(out, node)?;
        }
        Ok(())
    }

    /// Inside a function body, write `id` through one of the index tables.
    /// Returns false when `id` must be written in full instead.
    fn write_scoped_ref(&mut self, out: &mut OutputStream, id: NodeId) -> Result<bool> {
        let program = self.program;
        let node = &program.arena[id];
        let Some(scope) = self.scope.as_mut() else {
            return Ok(false);
        };
        match node.code {
            TreeCode::SsaName => {
                let NodeData::Ssa { version, .. } = node.data else {
                    return Err(StreamError::consistency(format!("{id}: ssa_name without version")));
                };
                out.write_u8(tags::SSA_NAME_REF);
                out.write_uleb(u64::from(version));
            }
            TreeCode::ParmDecl | TreeCode::VarDecl if program.is_function_local(id) => {
                let index = scope.locals.encode(id);
                out.write_u8(tags::LOCAL_REF);
                out.write_uleb(u64::from(index));
            }
            TreeCode::LabelDecl if !(node.flags.nonlocal || node.flags.forced_label) => {
                let named = node.decl().is_some_and(|d| d.name.is_some());
                let index = scope.labels.encode(id, named);
                out.write_u8(tags::LABEL_REF);
                out.write_sleb(i64::from(index));
            }
            TreeCode::ConstDecl => {
                return Err(StreamError::consistency(format!(
                    "{id}: const_decl referenced from a function body"
                )));
            }
            code => {
                let Some(category) = DeclCategory::for_code(code) else {
                    return Ok(false);
                };
                let index = self.decls.encode(category, id);
                out.write_u8(category.tag());
                out.write_uleb(u64::from(index));
            }
        }
        Ok(true)
    }

    fn write_node(&mut self, out: &mut OutputStream, id: NodeId) -> Result<()> {
        let program = self.program;
        let node = &program.arena[id];
        let code = node.code;
        out.write_u8(tree_tag(code));
        if code.is_global_indexable() {
            self.pickles.register(id);
        }
        if let NodeData::Identifier(name) = &node.data {
            self.strings.write_ref(out, Some(name.as_bytes()));
            return Ok(());
        }
        if code.streams_type() {
            self.write_tree(out, node.ty)?;
        }
        let packed = flags::pack(tree_groups(code), &node.flags);
        self.locus
            .write_flags(out, &mut self.strings, packed, node.locus.as_ref());

        match (code.layout(), &node.data) {
            (Layout::IntegerCst, NodeData::Int { low, high }) => {
                out.write_uleb(*low);
                out.write_sleb(*high);
            }
            (Layout::RealCst, NodeData::Real { bits }) => {
                let text = format_real(*bits);
                self.strings.write_ref(out, Some(text.as_bytes()));
            }
            (Layout::ComplexCst, NodeData::Complex { real, imag }) => {
                self.write_tree(out, *real)?;
                self.write_tree(out, *imag)?;
            }
            (Layout::VectorCst, NodeData::Vector(elts)) | (Layout::Vec, NodeData::Vec(elts)) => {
                self.write_trees(out, elts)?;
            }
            (Layout::StringCst, NodeData::Str(bytes)) => {
                self.strings.write_ref(out, Some(bytes));
            }
            (Layout::List, NodeData::List(entries)) => {
                out.write_uleb(entries.len() as u64);
                for entry in entries {
                    self.write_tree(out, entry.value)?;
                    self.write_tree(out, entry.purpose)?;
                }
            }
            (Layout::Binfo, NodeData::Binfo(binfo)) => self.write_fields(out, &[BINFO], &**binfo)?,
            (Layout::Type, NodeData::Type(ty)) => self.write_fields(out, type_fields(code), &**ty)?,
            (Layout::Decl, NodeData::Decl(decl)) => {
                self.write_fields(out, &[decl_fields(code)], &**decl)?
            }
            (Layout::Constructor, NodeData::Constructor(elts)) => {
                out.write_uleb(elts.len() as u64);
                for elt in elts {
                    self.write_tree(out, elt.index)?;
                    self.write_tree(out, elt.value)?;
                }
            }
            (
                Layout::Call,
                NodeData::Call {
                    func,
                    static_chain,
                    args,
                },
            ) => {
                self.write_tree(out, *func)?;
                self.write_tree(out, *static_chain)?;
                self.write_trees(out, args)?;
            }
            (Layout::CaseLabel, NodeData::CaseLabel { low, high, label }) => {
                let mut variant = 0;
                if low.is_some() {
                    variant |= CASE_HAS_LOW;
                }
                if high.is_some() {
                    variant |= CASE_HAS_HIGH;
                }
                out.write_uleb(variant);
                for bound in [low, high].into_iter().flatten() {
                    self.write_tree(out, Some(*bound))?;
                }
                self.write_tree(out, *label)?;
            }
            (
                Layout::Asm,
                NodeData::Asm {
                    string,
                    inputs,
                    outputs,
                    clobbers,
                },
            ) => {
                self.strings.write_ref(out, Some(string));
                self.write_tree(out, *inputs)?;
                self.write_tree(out, *outputs)?;
                self.write_tree(out, *clobbers)?;
            }
            (Layout::SsaName, NodeData::Ssa { version, var }) => {
                out.write_uleb(u64::from(*version));
                self.write_tree(out, *var)?;
            }
            (Layout::Operands(0), NodeData::Empty) => {}
            (Layout::Operands(n), NodeData::Operands(ops)) if ops.len() == n => {
                for &op in ops {
                    self.write_tree(out, op)?;
                }
            }
            (layout, _) => {
                return Err(StreamError::consistency(format!(
                    "{id}: {code} payload does not match its {layout:?} layout"
                )));
            }
        }
        Ok(())
    }

    /// Write the fields listed in `groups`, in order.
    pub fn write_fields<T>(
        &mut self,
        out: &mut OutputStream,
        groups: &[&[Field<T>]],
        data: &T,
    ) -> Result<()> {
        for field in groups.iter().flat_map(|g| g.iter()) {
            match field {
                Field::Link { get, .. } => self.write_tree(out, get(data))?,
                Field::Links { get, .. } => self.write_trees(out, get(data))?,
                Field::Scalar { get, .. } => out.write_uleb(u64::from(get(data))),
            }
        }
        Ok(())
    }
}

impl<'a, 'p> TreeReader<'a, 'p> {
    /// Read one reference written by [`TreeWriter::write_tree`].
    pub fn read_tree(&mut self, cursor: &mut InputCursor<'_>) -> Result<Option<NodeId>> {
        let tag = cursor.read_u8()?;
        match tag {
            tags::NULL => Ok(None),
            tags::PICKLE_REF => {
                let index = cursor.read_uleb()?;
                self.pickles.get(index).map(Some)
            }
            tags::LOCAL_REF => {
                let index = cursor.read_uleb()?;
                self.local(index).map(Some)
            }
            tags::LABEL_REF => {
                let index = cursor.read_sleb()?;
                self.label(index).map(Some)
            }
            tags::SSA_NAME_REF => {
                let version = cursor.read_uleb()?;
                let scope = self.scope_mut("ssa_name reference")?;
                let len = scope.ssa_names.len();
                usize::try_from(version)
                    .ok()
                    .and_then(|v| scope.ssa_names.get(v).copied().flatten())
                    .map(Some)
                    .ok_or(StreamError::IndexOutOfRange {
                        what: "ssa name",
                        index: version as i64,
                        len,
                    })
            }
            tag => {
                if let Some(category) = DeclCategory::from_tag(tag) {
                    let index = cursor.read_uleb()?;
                    return self.decls.get(category, index).map(Some);
                }
                let code = tree_code_for_tag(tag).ok_or(StreamError::UnknownTag {
                    tag: u64::from(tag),
                    context: "tree",
                })?;
                self.read_node(code, cursor).map(Some)
            }
        }
    }

    /// Read a reference that must not be null.
    pub fn read_tree_required(&mut self, cursor: &mut InputCursor<'_>, what: &str) -> Result<NodeId> {
        self.read_tree(cursor)?
            .ok_or_else(|| StreamError::consistency(format!("null {what}")))
    }

    fn read_trees(&mut self, cursor: &mut InputCursor<'_>) -> Result<Vec<Option<NodeId>>> {
        let count = cursor.read_uleb()?;
        let mut nodes = Vec::new();
        for _ in 0..count {
            nodes.push(self.read_tree(cursor)?);
        }
        Ok(nodes)
    }

    fn label(&mut self, index: i64) -> Result<NodeId> {
        let scope = self.scope_mut("label reference")?;
        if index >= 0 {
            return usize::try_from(index)
                .ok()
                .and_then(|i| scope.named_labels.get(i).copied())
                .ok_or(StreamError::IndexOutOfRange {
                    what: "label",
                    index,
                    len: scope.named_labels.len(),
                });
        }
        // -1 is slot 0.
        let slot = u32::try_from(-(index + 1))
            .ok()
            .filter(|&slot| slot < scope.num_unnamed_labels)
            .ok_or(StreamError::IndexOutOfRange {
                what: "label",
                index,
                len: scope.num_unnamed_labels as usize,
            })?;
        if let Some(&label) = scope.unnamed_labels.get(&slot) {
            return Ok(label);
        }
        let function = scope.function;
        let label = label_decl(self.program, function, None);
        self.scope_mut("label reference")?
            .unnamed_labels
            .insert(slot, label);
        Ok(label)
    }

    fn read_node(&mut self, code: TreeCode, cursor: &mut InputCursor<'_>) -> Result<NodeId> {
        if code == TreeCode::IdentifierNode {
            let name = self
                .strings
                .read_str(cursor)?
                .ok_or(StreamError::BadString { offset: 0 })?;
            return Ok(self.program.arena.identifier(&name));
        }
        // Indexable nodes get their id before their children are read, so
        // a child pointing back at this node resolves to it.
        let placeholder = code.is_global_indexable().then(|| {
            let id = self.program.arena.alloc(Node::new(code));
            self.pickles.register(id);
            id
        });

        let mut node = Node::new(code);
        if code.streams_type() {
            node.ty = self.read_tree(cursor)?;
        }
        let (packed, locus) = self.locus.read_flags(cursor, &self.strings)?;
        flags::unpack(tree_groups(code), packed, &mut node.flags);
        node.locus = locus;
        node.data = self.read_payload(code, cursor)?;

        Ok(match placeholder {
            Some(id) => {
                self.program.arena.replace(id, node);
                id
            }
            None => self.program.arena.alloc(node),
        })
    }

    fn read_payload(&mut self, code: TreeCode, cursor: &mut InputCursor<'_>) -> Result<NodeData> {
        Ok(match code.layout() {
            Layout::Identifier => {
                return Err(StreamError::consistency("identifier payload out of place"))
            }
            Layout::IntegerCst => NodeData::Int {
                low: cursor.read_uleb()?,
                high: cursor.read_sleb()?,
            },
            Layout::RealCst => {
                let text = self
                    .strings
                    .read_str(cursor)?
                    .ok_or(StreamError::BadString { offset: 0 })?;
                NodeData::Real {
                    bits: parse_real(&text)?,
                }
            }
            Layout::ComplexCst => NodeData::Complex {
                real: self.read_tree(cursor)?,
                imag: self.read_tree(cursor)?,
            },
            Layout::VectorCst => NodeData::Vector(self.read_trees(cursor)?),
            Layout::StringCst => {
                let bytes = self
                    .strings
                    .read_ref(cursor)?
                    .ok_or(StreamError::BadString { offset: 0 })?;
                NodeData::Str(bytes.to_vec())
            }
            Layout::List => {
                let count = cursor.read_uleb()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(ListEntry {
                        value: self.read_tree(cursor)?,
                        purpose: self.read_tree(cursor)?,
                    });
                }
                NodeData::List(entries)
            }
            Layout::Vec => NodeData::Vec(self.read_trees(cursor)?),
            Layout::Binfo => {
                let mut binfo = BinfoData::default();
                self.read_fields(cursor, &[BINFO], &mut binfo)?;
                NodeData::Binfo(Box::new(binfo))
            }
            Layout::Type => {
                let mut ty = TypeData::default();
                self.read_fields(cursor, type_fields(code), &mut ty)?;
                NodeData::Type(Box::new(ty))
            }
            Layout::Decl => {
                let mut decl = DeclData::default();
                self.read_fields(cursor, &[decl_fields(code)], &mut decl)?;
                NodeData::Decl(Box::new(decl))
            }
            Layout::Constructor => {
                let count = cursor.read_uleb()?;
                let mut elts = Vec::new();
                for _ in 0..count {
                    elts.push(CtorElt {
                        index: self.read_tree(cursor)?,
                        value: self.read_tree(cursor)?,
                    });
                }
                NodeData::Constructor(elts)
            }
            Layout::Call => NodeData::Call {
                func: self.read_tree(cursor)?,
                static_chain: self.read_tree(cursor)?,
                args: self.read_trees(cursor)?,
            },
            Layout::CaseLabel => {
                let variant = cursor.read_uleb()?;
                let low = match variant & CASE_HAS_LOW {
                    0 => None,
                    _ => self.read_tree(cursor)?,
                };
                let high = match variant & CASE_HAS_HIGH {
                    0 => None,
                    _ => self.read_tree(cursor)?,
                };
                NodeData::CaseLabel {
                    low,
                    high,
                    label: self.read_tree(cursor)?,
                }
            }
            Layout::Asm => NodeData::Asm {
                string: self
                    .strings
                    .read_ref(cursor)?
                    .ok_or(StreamError::BadString { offset: 0 })?
                    .to_vec(),
                inputs: self.read_tree(cursor)?,
                outputs: self.read_tree(cursor)?,
                clobbers: self.read_tree(cursor)?,
            },
            Layout::SsaName => NodeData::Ssa {
                version: cursor.read_u32()?,
                var: self.read_tree(cursor)?,
            },
            Layout::Operands(0) => NodeData::Empty,
            Layout::Operands(n) => {
                let mut ops = Vec::with_capacity(n);
                for _ in 0..n {
                    ops.push(self.read_tree(cursor)?);
                }
                NodeData::Operands(ops)
            }
        })
    }

    /// Fill the fields listed in `groups`, in order.
    pub fn read_fields<T>(
        &mut self,
        cursor: &mut InputCursor<'_>,
        groups: &[&[Field<T>]],
        data: &mut T,
    ) -> Result<()> {
        for field in groups.iter().flat_map(|g| g.iter()) {
            match field {
                Field::Link { slot, .. } => *slot(data) = self.read_tree(cursor)?,
                Field::Links { slot, .. } => *slot(data) = self.read_trees(cursor)?,
                Field::Scalar { set, .. } => set(data, cursor.read_u32()?),
            }
        }
        Ok(())
    }
}
