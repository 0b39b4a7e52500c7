//! Record tags and node identity tables.
//!
//! A node that has already been written in the current section is written
//! again only as a back-reference: [`tags::PICKLE_REF`] followed by the index
//! it was given the first time. Indices are handed out in write order and the
//! reader hands them out in read order, so the two tables stay in lockstep.
//! Both tables start with the program's common nodes at indices `0..k`.

use crate::error::{Result, StreamError};
use ltoir::{CommonNodes, NodeId, TreeCode};
use std::collections::HashMap;

/// Single-byte record tags shared by every stream.
pub mod tags {
    pub const NULL: u8 = 0;
    pub const PICKLE_REF: u8 = 1;
    /// `CATEGORY_REF + category` for references into the unit's decl tables.
    pub const CATEGORY_REF: u8 = 2;
    pub const LOCAL_REF: u8 = 9;
    pub const LABEL_REF: u8 = 10;
    pub const SSA_NAME_REF: u8 = 11;
    pub const FUNCTION: u8 = 12;
    pub const BB0: u8 = 13;
    pub const BB1: u8 = 14;
    pub const PHI: u8 = 15;
    pub const EH_TABLE: u8 = 16;
    pub const EH_SHARED: u8 = 17;
    /// `EH_REGION + 2 * kind + may_contain_throw`.
    pub const EH_REGION: u8 = 18;
    /// `LOCAL_VAR + variant`.
    pub const LOCAL_VAR: u8 = 32;
    /// `LOCAL_PARM + variant`.
    pub const LOCAL_PARM: u8 = 40;
    /// `STMT + statement code`.
    pub const STMT: u8 = 48;
    /// `TREE + tree code`.
    pub const TREE: u8 = 64;

    /// Local record variant bits: which optional trees follow.
    pub const VARIANT_ATTRIBUTES: u8 = 1;
    pub const VARIANT_SIZE_UNIT: u8 = 2;
    pub const VARIANT_DEBUG_EXPR: u8 = 4;
}

/// Tree record tag for `code`.
pub fn tree_tag(code: TreeCode) -> u8 {
    tags::TREE + code as u8
}

/// Inverse of [`tree_tag`].
pub fn tree_code_for_tag(tag: u8) -> Option<TreeCode> {
    tag.checked_sub(tags::TREE).and_then(TreeCode::from_u8)
}

/// Declaration tables of a unit, in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclCategory {
    Function,
    Var,
    Type,
    TypeDecl,
    Field,
    Label,
    Namespace,
}

impl DeclCategory {
    pub const COUNT: usize = 7;

    pub const ALL: [DeclCategory; DeclCategory::COUNT] = [
        DeclCategory::Function,
        DeclCategory::Var,
        DeclCategory::Type,
        DeclCategory::TypeDecl,
        DeclCategory::Field,
        DeclCategory::Label,
        DeclCategory::Namespace,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn tag(self) -> u8 {
        tags::CATEGORY_REF + self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        tag.checked_sub(tags::CATEGORY_REF)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            DeclCategory::Function => "function",
            DeclCategory::Var => "variable",
            DeclCategory::Type => "type",
            DeclCategory::TypeDecl => "type decl",
            DeclCategory::Field => "field",
            DeclCategory::Label => "label",
            DeclCategory::Namespace => "namespace",
        }
    }

    /// Table a node of `code` is referenced through from a function body.
    /// `None` for kinds that are never referenced by category.
    pub fn for_code(code: TreeCode) -> Option<Self> {
        Some(match code {
            TreeCode::FunctionDecl => DeclCategory::Function,
            TreeCode::VarDecl | TreeCode::ResultDecl => DeclCategory::Var,
            TreeCode::TypeDecl => DeclCategory::TypeDecl,
            TreeCode::FieldDecl => DeclCategory::Field,
            TreeCode::LabelDecl => DeclCategory::Label,
            TreeCode::NamespaceDecl | TreeCode::TranslationUnitDecl => DeclCategory::Namespace,
            c if c.is_type() => DeclCategory::Type,
            _ => return None,
        })
    }
}

/// Dense index over a set of nodes, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct TreeRefEncoder {
    index: HashMap<NodeId, u32>,
    trees: Vec<NodeId>,
}

impl TreeRefEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `node`, assigned on first sight.
    pub fn encode(&mut self, node: NodeId) -> u32 {
        if let Some(&i) = self.index.get(&node) {
            return i;
        }
        let i = self.trees.len() as u32;
        self.index.insert(node, i);
        self.trees.push(node);
        i
    }

    pub fn lookup(&self, node: NodeId) -> Option<u32> {
        self.index.get(&node).copied()
    }

    pub fn trees(&self) -> &[NodeId] {
        &self.trees
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Unit-wide declaration tables built while writing.
#[derive(Debug, Clone, Default)]
pub struct OutDeclState {
    categories: [TreeRefEncoder; DeclCategory::COUNT],
}

impl OutDeclState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, category: DeclCategory, node: NodeId) -> u32 {
        self.categories[category.index()].encode(node)
    }

    pub fn category(&self, category: DeclCategory) -> &TreeRefEncoder {
        &self.categories[category.index()]
    }
}

/// Unit-wide declaration tables rebuilt from a decls section.
#[derive(Debug, Clone, Default)]
pub struct UnitDecls {
    categories: [Vec<NodeId>; DeclCategory::COUNT],
}

impl UnitDecls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: DeclCategory, node: NodeId) {
        self.categories[category.index()].push(node);
    }

    pub fn get(&self, category: DeclCategory, index: u64) -> Result<NodeId> {
        let table = &self.categories[category.index()];
        usize::try_from(index)
            .ok()
            .and_then(|i| table.get(i).copied())
            .ok_or(StreamError::IndexOutOfRange {
                what: category.name(),
                index: index as i64,
                len: table.len(),
            })
    }

    pub fn category(&self, category: DeclCategory) -> &[NodeId] {
        &self.categories[category.index()]
    }

    /// Rewrite every entry through `map`.
    pub fn rewrite(&mut self, map: impl Fn(NodeId) -> NodeId) {
        for table in &mut self.categories {
            for node in table.iter_mut() {
                *node = map(*node);
            }
        }
    }
}

/// Write-side back-reference table.
#[derive(Debug, Clone)]
pub struct PickleTable {
    index: HashMap<NodeId, u32>,
}

impl PickleTable {
    /// A table holding `common` at indices `0..k`.
    pub fn preloaded(common: &CommonNodes) -> Self {
        let index = common
            .all()
            .iter()
            .enumerate()
            .map(|(i, &node)| (node, i as u32))
            .collect();
        Self { index }
    }

    pub fn lookup(&self, node: NodeId) -> Option<u32> {
        self.index.get(&node).copied()
    }

    /// Give `node` the next index.
    pub fn register(&mut self, node: NodeId) -> u32 {
        let next = self.index.len() as u32;
        *self.index.entry(node).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Read-side back-reference table.
#[derive(Debug, Clone)]
pub struct ReadTable {
    nodes: Vec<NodeId>,
}

impl ReadTable {
    pub fn preloaded(common: &CommonNodes) -> Self {
        Self {
            nodes: common.all().to_vec(),
        }
    }

    pub fn register(&mut self, node: NodeId) {
        self.nodes.push(node);
    }

    pub fn get(&self, index: u64) -> Result<NodeId> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.nodes.get(i).copied())
            .ok_or(StreamError::BadReference {
                index,
                len: self.nodes.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltoir::{Arena, Program};

    #[test]
    fn test_tag_ranges_do_not_overlap() {
        let last_eh = tags::EH_REGION + 2 * (ltoir::EhRegionKind::COUNT - 1) + 1;
        assert!(last_eh < tags::LOCAL_VAR);
        assert!(DeclCategory::Namespace.tag() < tags::LOCAL_REF);
        assert!(tags::LOCAL_PARM + 7 < tags::STMT);
        assert!(tags::STMT + ltoir::StmtCode::ALL.len() as u8 <= tags::TREE);
    }

    #[test]
    fn test_category_tags_round_trip() {
        for cat in DeclCategory::ALL {
            assert_eq!(DeclCategory::from_tag(cat.tag()), Some(cat));
        }
        assert_eq!(DeclCategory::from_tag(tags::LOCAL_REF), None);
        assert_eq!(DeclCategory::from_tag(tags::PICKLE_REF), None);
    }

    #[test]
    fn test_tree_tags_round_trip() {
        for &code in TreeCode::ALL {
            assert_eq!(tree_code_for_tag(tree_tag(code)), Some(code));
        }
        assert_eq!(tree_code_for_tag(tags::STMT), None);
    }

    #[test]
    fn test_tables_agree_on_preloaded_nodes() {
        let mut writer_arena = Arena::new();
        let writer = CommonNodes::build(&mut writer_arena);
        let mut reader_arena = Arena::new();
        reader_arena.identifier("shift every id");
        let reader = CommonNodes::build(&mut reader_arena);

        let out = PickleTable::preloaded(&writer);
        let input = ReadTable::preloaded(&reader);
        assert_eq!(out.len(), input.len());
        let i = out.lookup(writer.int_type).unwrap();
        assert_eq!(input.get(u64::from(i)).unwrap(), reader.int_type);
    }

    #[test]
    fn test_register_is_sequential() {
        let p = Program::new();
        let mut table = PickleTable::preloaded(&p.common);
        let base = table.len() as u32;
        assert_eq!(table.register(NodeId(1000)), base);
        assert_eq!(table.register(NodeId(1001)), base + 1);
        assert_eq!(table.register(NodeId(1000)), base);
    }

    #[test]
    fn test_read_table_rejects_unknown_index() {
        let p = Program::new();
        let table = ReadTable::preloaded(&p.common);
        assert!(matches!(
            table.get(500),
            Err(StreamError::BadReference { index: 500, .. })
        ));
    }

    #[test]
    fn test_decl_state_indices() {
        let mut state = OutDeclState::new();
        assert_eq!(state.encode(DeclCategory::Var, NodeId(5)), 0);
        assert_eq!(state.encode(DeclCategory::Var, NodeId(6)), 1);
        assert_eq!(state.encode(DeclCategory::Function, NodeId(5)), 0);
        assert_eq!(state.encode(DeclCategory::Var, NodeId(5)), 0);
        assert_eq!(state.category(DeclCategory::Var).trees(), &[NodeId(5), NodeId(6)]);
    }
}
