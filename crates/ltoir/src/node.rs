//! Tree nodes.
//!
//! Nodes live in an [`Arena`](crate::Arena) and refer to each other by
//! [`NodeId`]. Sharing is two parents holding the same id; cycles are ids that
//! lead back to an ancestor. Every child slot is an `Option<NodeId>` so that
//! generic passes (reference rewriting, structural comparison) can walk any
//! node without knowing its kind.

use crate::code::{Layout, TreeCode};
use crate::flags::TreeFlags;
use std::fmt;

/// Index of a node inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locus {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Locus {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One IR node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub code: TreeCode,
    /// The node's own type (`TREE_TYPE`): pointee for pointers, return type
    /// for function types, value type for expressions and decls.
    pub ty: Option<NodeId>,
    pub flags: TreeFlags,
    pub locus: Option<Locus>,
    pub data: NodeData,
}

/// (value, purpose) pair of a `TREE_LIST`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEntry {
    pub value: Option<NodeId>,
    pub purpose: Option<NodeId>,
}

/// (index, value) pair of a `CONSTRUCTOR`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CtorElt {
    pub index: Option<NodeId>,
    pub value: Option<NodeId>,
}

/// Kind-specific payload. The variant is fixed by [`TreeCode::layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Empty,
    Identifier(String),
    /// Two-word integer constant.
    Int { low: u64, high: i64 },
    /// IEEE double, kept as raw bits so equality is exact.
    Real { bits: u64 },
    Str(Vec<u8>),
    Complex {
        real: Option<NodeId>,
        imag: Option<NodeId>,
    },
    Vector(Vec<Option<NodeId>>),
    List(Vec<ListEntry>),
    Vec(Vec<Option<NodeId>>),
    Operands(Vec<Option<NodeId>>),
    Call {
        func: Option<NodeId>,
        static_chain: Option<NodeId>,
        args: Vec<Option<NodeId>>,
    },
    Constructor(Vec<CtorElt>),
    CaseLabel {
        low: Option<NodeId>,
        high: Option<NodeId>,
        label: Option<NodeId>,
    },
    Asm {
        string: Vec<u8>,
        inputs: Option<NodeId>,
        outputs: Option<NodeId>,
        clobbers: Option<NodeId>,
    },
    Ssa {
        version: u32,
        var: Option<NodeId>,
    },
    Type(Box<TypeData>),
    Decl(Box<DeclData>),
    Binfo(Box<BinfoData>),
}

/// Fields of a type node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeData {
    pub size: Option<NodeId>,
    pub size_unit: Option<NodeId>,
    pub attributes: Option<NodeId>,
    pub name: Option<NodeId>,
    pub context: Option<NodeId>,
    pub min_value: Option<NodeId>,
    pub max_value: Option<NodeId>,
    /// Enumerators, fields, argument types or array domain depending on the kind.
    pub values: Option<NodeId>,
    pub binfo: Option<NodeId>,
    pub main_variant: Option<NodeId>,
    pub next_variant: Option<NodeId>,
    pub canonical: Option<NodeId>,
    pub stub_decl: Option<NodeId>,
    pub pointer_to: Option<NodeId>,
    pub reference_to: Option<NodeId>,
    pub precision: u32,
    pub mode: u32,
    pub align: u32,
}

impl TypeData {
    fn links(&self) -> [Option<NodeId>; 15] {
        [
            self.size,
            self.size_unit,
            self.attributes,
            self.name,
            self.context,
            self.min_value,
            self.max_value,
            self.values,
            self.binfo,
            self.main_variant,
            self.next_variant,
            self.canonical,
            self.stub_decl,
            self.pointer_to,
            self.reference_to,
        ]
    }

    fn links_mut(&mut self) -> [&mut Option<NodeId>; 15] {
        [
            &mut self.size,
            &mut self.size_unit,
            &mut self.attributes,
            &mut self.name,
            &mut self.context,
            &mut self.min_value,
            &mut self.max_value,
            &mut self.values,
            &mut self.binfo,
            &mut self.main_variant,
            &mut self.next_variant,
            &mut self.canonical,
            &mut self.stub_decl,
            &mut self.pointer_to,
            &mut self.reference_to,
        ]
    }
}

/// Fields of a declaration node. Kinds use the subset that applies to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclData {
    pub name: Option<NodeId>,
    pub context: Option<NodeId>,
    pub assembler_name: Option<NodeId>,
    pub section_name: Option<NodeId>,
    pub comdat_group: Option<NodeId>,
    pub attributes: Option<NodeId>,
    pub abstract_origin: Option<NodeId>,
    pub size: Option<NodeId>,
    pub size_unit: Option<NodeId>,
    /// Initializer for variables and constants.
    pub initial: Option<NodeId>,
    /// `RESULT_DECL` of a function.
    pub result: Option<NodeId>,
    pub personality: Option<NodeId>,
    pub vindex: Option<NodeId>,
    pub field_offset: Option<NodeId>,
    pub bit_field_type: Option<NodeId>,
    pub qualifier: Option<NodeId>,
    pub bit_offset: Option<NodeId>,
    pub field_context: Option<NodeId>,
    pub arg_type: Option<NodeId>,
    /// Next field or parameter.
    pub chain: Option<NodeId>,
    pub debug_expr: Option<NodeId>,
    pub value_expr: Option<NodeId>,
    pub align: u32,
    pub off_align: u32,
    pub mode: u32,
    pub builtin_code: u32,
}

impl DeclData {
    fn links(&self) -> [Option<NodeId>; 22] {
        [
            self.name,
            self.context,
            self.assembler_name,
            self.section_name,
            self.comdat_group,
            self.attributes,
            self.abstract_origin,
            self.size,
            self.size_unit,
            self.initial,
            self.result,
            self.personality,
            self.vindex,
            self.field_offset,
            self.bit_field_type,
            self.qualifier,
            self.bit_offset,
            self.field_context,
            self.arg_type,
            self.chain,
            self.debug_expr,
            self.value_expr,
        ]
    }

    fn links_mut(&mut self) -> [&mut Option<NodeId>; 22] {
        [
            &mut self.name,
            &mut self.context,
            &mut self.assembler_name,
            &mut self.section_name,
            &mut self.comdat_group,
            &mut self.attributes,
            &mut self.abstract_origin,
            &mut self.size,
            &mut self.size_unit,
            &mut self.initial,
            &mut self.result,
            &mut self.personality,
            &mut self.vindex,
            &mut self.field_offset,
            &mut self.bit_field_type,
            &mut self.qualifier,
            &mut self.bit_offset,
            &mut self.field_context,
            &mut self.arg_type,
            &mut self.chain,
            &mut self.debug_expr,
            &mut self.value_expr,
        ]
    }
}

/// Inheritance descriptor of a record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinfoData {
    pub offset: Option<NodeId>,
    pub vtable: Option<NodeId>,
    pub virtuals: Option<NodeId>,
    pub vptr_field: Option<NodeId>,
    pub vtt_subvtt: Option<NodeId>,
    pub vtt_vptr: Option<NodeId>,
    pub chain: Option<NodeId>,
    pub base_accesses: Vec<Option<NodeId>>,
    pub base_binfos: Vec<Option<NodeId>>,
}

impl NodeData {
    /// Empty payload for a layout.
    pub fn for_layout(layout: Layout) -> NodeData {
        match layout {
            Layout::Identifier => NodeData::Identifier(String::new()),
            Layout::IntegerCst => NodeData::Int { low: 0, high: 0 },
            Layout::RealCst => NodeData::Real { bits: 0 },
            Layout::ComplexCst => NodeData::Complex {
                real: None,
                imag: None,
            },
            Layout::VectorCst => NodeData::Vector(Vec::new()),
            Layout::StringCst => NodeData::Str(Vec::new()),
            Layout::List => NodeData::List(Vec::new()),
            Layout::Vec => NodeData::Vec(Vec::new()),
            Layout::Binfo => NodeData::Binfo(Box::default()),
            Layout::Type => NodeData::Type(Box::default()),
            Layout::Decl => NodeData::Decl(Box::default()),
            Layout::Constructor => NodeData::Constructor(Vec::new()),
            Layout::Call => NodeData::Call {
                func: None,
                static_chain: None,
                args: Vec::new(),
            },
            Layout::CaseLabel => NodeData::CaseLabel {
                low: None,
                high: None,
                label: None,
            },
            Layout::Asm => NodeData::Asm {
                string: Vec::new(),
                inputs: None,
                outputs: None,
                clobbers: None,
            },
            Layout::SsaName => NodeData::Ssa {
                version: 0,
                var: None,
            },
            Layout::Operands(0) => NodeData::Empty,
            Layout::Operands(n) => NodeData::Operands(vec![None; n]),
        }
    }

    /// Visit every child slot in stream order.
    pub fn for_each_child(&self, mut f: impl FnMut(Option<NodeId>)) {
        match self {
            NodeData::Empty
            | NodeData::Identifier(_)
            | NodeData::Int { .. }
            | NodeData::Real { .. }
            | NodeData::Str(_) => {}
            NodeData::Complex { real, imag } => {
                f(*real);
                f(*imag);
            }
            NodeData::Vector(elts) | NodeData::Vec(elts) | NodeData::Operands(elts) => {
                elts.iter().for_each(|e| f(*e))
            }
            NodeData::List(entries) => {
                for e in entries {
                    f(e.value);
                    f(e.purpose);
                }
            }
            NodeData::Call {
                func,
                static_chain,
                args,
            } => {
                f(*func);
                f(*static_chain);
                args.iter().for_each(|a| f(*a));
            }
            NodeData::Constructor(elts) => {
                for e in elts {
                    f(e.index);
                    f(e.value);
                }
            }
            NodeData::CaseLabel { low, high, label } => {
                f(*low);
                f(*high);
                f(*label);
            }
            NodeData::Asm {
                inputs,
                outputs,
                clobbers,
                ..
            } => {
                f(*inputs);
                f(*outputs);
                f(*clobbers);
            }
            NodeData::Ssa { var, .. } => f(*var),
            NodeData::Type(t) => t.links().into_iter().for_each(f),
            NodeData::Decl(d) => d.links().into_iter().for_each(f),
            NodeData::Binfo(b) => {
                for link in [
                    b.offset,
                    b.vtable,
                    b.virtuals,
                    b.vptr_field,
                    b.vtt_subvtt,
                    b.vtt_vptr,
                    b.chain,
                ] {
                    f(link);
                }
                b.base_accesses.iter().for_each(|a| f(*a));
                b.base_binfos.iter().for_each(|a| f(*a));
            }
        }
    }

    /// Visit every child slot mutably, in the same order as [`Self::for_each_child`].
    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut Option<NodeId>)) {
        match self {
            NodeData::Empty
            | NodeData::Identifier(_)
            | NodeData::Int { .. }
            | NodeData::Real { .. }
            | NodeData::Str(_) => {}
            NodeData::Complex { real, imag } => {
                f(real);
                f(imag);
            }
            NodeData::Vector(elts) | NodeData::Vec(elts) | NodeData::Operands(elts) => {
                elts.iter_mut().for_each(f)
            }
            NodeData::List(entries) => {
                for e in entries {
                    f(&mut e.value);
                    f(&mut e.purpose);
                }
            }
            NodeData::Call {
                func,
                static_chain,
                args,
            } => {
                f(func);
                f(static_chain);
                args.iter_mut().for_each(f);
            }
            NodeData::Constructor(elts) => {
                for e in elts {
                    f(&mut e.index);
                    f(&mut e.value);
                }
            }
            NodeData::CaseLabel { low, high, label } => {
                f(low);
                f(high);
                f(label);
            }
            NodeData::Asm {
                inputs,
                outputs,
                clobbers,
                ..
            } => {
                f(inputs);
                f(outputs);
                f(clobbers);
            }
            NodeData::Ssa { var, .. } => f(var),
            NodeData::Type(t) => t.links_mut().into_iter().for_each(f),
            NodeData::Decl(d) => d.links_mut().into_iter().for_each(f),
            NodeData::Binfo(b) => {
                for link in [
                    &mut b.offset,
                    &mut b.vtable,
                    &mut b.virtuals,
                    &mut b.vptr_field,
                    &mut b.vtt_subvtt,
                    &mut b.vtt_vptr,
                    &mut b.chain,
                ] {
                    f(link);
                }
                b.base_accesses.iter_mut().for_each(&mut f);
                b.base_binfos.iter_mut().for_each(f);
            }
        }
    }

    /// Compare everything except child ids: variant, scalar fields and
    /// the length of every variable-length child list.
    pub fn same_shape(&self, other: &NodeData) -> bool {
        use NodeData as D;
        match (self, other) {
            (D::Empty, D::Empty) => true,
            (D::Identifier(a), D::Identifier(b)) => a == b,
            (D::Int { low: a, high: b }, D::Int { low: c, high: d }) => a == c && b == d,
            (D::Real { bits: a }, D::Real { bits: b }) => a == b,
            (D::Str(a), D::Str(b)) => a == b,
            (D::Complex { .. }, D::Complex { .. }) => true,
            (D::Vector(a), D::Vector(b))
            | (D::Vec(a), D::Vec(b))
            | (D::Operands(a), D::Operands(b)) => a.len() == b.len(),
            (D::List(a), D::List(b)) => a.len() == b.len(),
            (D::Call { args: a, .. }, D::Call { args: b, .. }) => a.len() == b.len(),
            (D::Constructor(a), D::Constructor(b)) => a.len() == b.len(),
            (D::CaseLabel { .. }, D::CaseLabel { .. }) => true,
            (D::Asm { string: a, .. }, D::Asm { string: b, .. }) => a == b,
            (D::Ssa { version: a, .. }, D::Ssa { version: b, .. }) => a == b,
            (D::Type(a), D::Type(b)) => {
                a.precision == b.precision && a.mode == b.mode && a.align == b.align
            }
            (D::Decl(a), D::Decl(b)) => {
                a.align == b.align
                    && a.off_align == b.off_align
                    && a.mode == b.mode
                    && a.builtin_code == b.builtin_code
            }
            (D::Binfo(a), D::Binfo(b)) => {
                a.base_accesses.len() == b.base_accesses.len()
                    && a.base_binfos.len() == b.base_binfos.len()
            }
            _ => false,
        }
    }
}

impl Node {
    /// A node of the given kind with an empty payload and default flags.
    pub fn new(code: TreeCode) -> Self {
        Self {
            code,
            ty: None,
            flags: TreeFlags::default(),
            locus: None,
            data: NodeData::for_layout(code.layout()),
        }
    }

    pub fn with_type(mut self, ty: Option<NodeId>) -> Self {
        self.ty = ty;
        self
    }

    pub fn decl(&self) -> Option<&DeclData> {
        match &self.data {
            NodeData::Decl(d) => Some(d),
            _ => None,
        }
    }

    pub fn decl_mut(&mut self) -> Option<&mut DeclData> {
        match &mut self.data {
            NodeData::Decl(d) => Some(d),
            _ => None,
        }
    }

    pub fn type_data(&self) -> Option<&TypeData> {
        match &self.data {
            NodeData::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn type_data_mut(&mut self) -> Option<&mut TypeData> {
        match &mut self.data {
            NodeData::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.data {
            NodeData::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Operand slots of a mechanical node.
    pub fn operands(&self) -> &[Option<NodeId>] {
        match &self.data {
            NodeData::Operands(ops) => ops,
            _ => &[],
        }
    }

    /// The type slot followed by every payload child slot.
    pub fn for_each_child(&self, mut f: impl FnMut(Option<NodeId>)) {
        f(self.ty);
        self.data.for_each_child(f);
    }

    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut Option<NodeId>)) {
        f(&mut self.ty);
        self.data.for_each_child_mut(f);
    }
}
