//! Program image: the arena plus everything that refers into it.

use crate::arena::Arena;
use crate::cgraph::CallGraph;
use crate::code::TreeCode;
use crate::common::CommonNodes;
use crate::function::FunctionBody;
use crate::node::{ListEntry, Node, NodeData, NodeId, TypeData};
use std::collections::BTreeMap;

/// All IR of one translation unit, or of several merged ones.
#[derive(Debug, Clone)]
pub struct Program {
    pub arena: Arena,
    pub common: CommonNodes,
    /// File-scope declarations, in declaration order.
    pub globals: Vec<NodeId>,
    /// Bodies keyed by their `FUNCTION_DECL`.
    pub functions: BTreeMap<NodeId, FunctionBody>,
    pub callgraph: CallGraph,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let common = CommonNodes::build(&mut arena);
        Self {
            arena,
            common,
            globals: Vec::new(),
            functions: BTreeMap::new(),
            callgraph: CallGraph::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    pub fn identifier(&mut self, name: &str) -> NodeId {
        self.arena.identifier(name)
    }

    /// Integer constant of type `ty`, split into its two words.
    pub fn int_cst(&mut self, ty: NodeId, value: i128) -> NodeId {
        let mut node = Node::new(TreeCode::IntegerCst).with_type(Some(ty));
        node.flags.constant = true;
        node.data = NodeData::Int {
            low: value as u64,
            high: (value >> 64) as i64,
        };
        self.arena.alloc(node)
    }

    pub fn real_cst(&mut self, ty: NodeId, value: f64) -> NodeId {
        let mut node = Node::new(TreeCode::RealCst).with_type(Some(ty));
        node.flags.constant = true;
        node.data = NodeData::Real {
            bits: value.to_bits(),
        };
        self.arena.alloc(node)
    }

    pub fn string_cst(&mut self, ty: NodeId, bytes: &[u8]) -> NodeId {
        let mut node = Node::new(TreeCode::StringCst).with_type(Some(ty));
        node.flags.constant = true;
        node.data = NodeData::Str(bytes.to_vec());
        self.arena.alloc(node)
    }

    /// A type node whose main variant is itself.
    pub fn build_type(&mut self, code: TreeCode, ty: Option<NodeId>, data: TypeData) -> NodeId {
        let mut node = Node::new(code).with_type(ty);
        node.data = NodeData::Type(Box::new(data));
        let id = self.arena.alloc(node);
        if let Some(t) = self.arena[id].type_data_mut() {
            t.main_variant.get_or_insert(id);
        }
        id
    }

    /// A declaration named `name` of type `ty`.
    pub fn build_decl(&mut self, code: TreeCode, name: Option<&str>, ty: Option<NodeId>) -> NodeId {
        let name = name.map(|n| self.arena.identifier(n));
        let mut node = Node::new(code).with_type(ty);
        if let Some(d) = node.decl_mut() {
            d.name = name;
        }
        self.arena.alloc(node)
    }

    /// A mechanically laid out expression.
    pub fn build_expr(&mut self, code: TreeCode, ty: Option<NodeId>, ops: &[NodeId]) -> NodeId {
        debug_assert_eq!(code.arity(), Some(ops.len()), "{code} arity");
        let mut node = Node::new(code).with_type(ty);
        node.data = match ops.len() {
            0 => NodeData::Empty,
            _ => NodeData::Operands(ops.iter().copied().map(Some).collect()),
        };
        self.arena.alloc(node)
    }

    pub fn build_call(&mut self, ty: Option<NodeId>, func: NodeId, args: &[NodeId]) -> NodeId {
        let mut node = Node::new(TreeCode::CallExpr).with_type(ty);
        node.flags.side_effects = true;
        node.data = NodeData::Call {
            func: Some(func),
            static_chain: None,
            args: args.iter().copied().map(Some).collect(),
        };
        self.arena.alloc(node)
    }

    /// A `TREE_LIST` of (value, purpose) pairs.
    pub fn build_list(&mut self, entries: &[(Option<NodeId>, Option<NodeId>)]) -> NodeId {
        let mut node = Node::new(TreeCode::TreeList);
        node.data = NodeData::List(
            entries
                .iter()
                .map(|&(value, purpose)| ListEntry { value, purpose })
                .collect(),
        );
        self.arena.alloc(node)
    }

    /// `&decl` with a pointer type.
    pub fn build_addr(&mut self, decl: NodeId) -> NodeId {
        let ty = self.common.ptr_type;
        self.build_expr(TreeCode::AddrExpr, Some(ty), &[decl])
    }

    /// Record `decl` as a file-scope declaration of this unit.
    pub fn add_global(&mut self, decl: NodeId) {
        if !self.globals.contains(&decl) {
            self.globals.push(decl);
        }
    }

    /// Link-time name of a declaration: its assembler name, else its name.
    pub fn symbol_name(&self, decl: NodeId) -> Option<&str> {
        let d = self.arena.get(decl)?.decl()?;
        d.assembler_name
            .or(d.name)
            .and_then(|id| self.arena.identifier_str(id))
    }

    /// Set the assembler name of a declaration.
    pub fn set_assembler_name(&mut self, decl: NodeId, name: &str) {
        let ident = self.arena.identifier(name);
        if let Some(d) = self.arena[decl].decl_mut() {
            d.assembler_name = Some(ident);
        }
    }

    /// Whether `decl` is an automatic variable of some function.
    pub fn is_function_local(&self, decl: NodeId) -> bool {
        let node = &self.arena[decl];
        let Some(d) = node.decl() else { return false };
        let in_function = d
            .context
            .is_some_and(|c| self.arena.code(c) == TreeCode::FunctionDecl);
        match node.code {
            TreeCode::ParmDecl => true,
            TreeCode::VarDecl => in_function && !node.flags.is_static && !node.flags.external,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_cst_splits_words() {
        let mut p = Program::new();
        let ty = p.common.long_type;
        let c = p.int_cst(ty, -2);
        assert_eq!(
            p.node(c).data,
            NodeData::Int {
                low: u64::MAX - 1,
                high: -1
            }
        );
    }

    #[test]
    fn test_symbol_name_prefers_assembler_name() {
        let mut p = Program::new();
        let ty = p.common.int_type;
        let v = p.build_decl(TreeCode::VarDecl, Some("counter"), Some(ty));
        assert_eq!(p.symbol_name(v), Some("counter"));
        p.set_assembler_name(v, "_counter");
        assert_eq!(p.symbol_name(v), Some("_counter"));
    }

    #[test]
    fn test_locals_and_statics() {
        let mut p = Program::new();
        let int = p.common.int_type;
        let f = p.build_decl(TreeCode::FunctionDecl, Some("f"), None);
        let a = p.build_decl(TreeCode::VarDecl, Some("a"), Some(int));
        let s = p.build_decl(TreeCode::VarDecl, Some("s"), Some(int));
        let g = p.build_decl(TreeCode::VarDecl, Some("g"), Some(int));
        for v in [a, s] {
            p.arena[v].decl_mut().unwrap().context = Some(f);
        }
        p.arena[s].flags.is_static = true;

        assert!(p.is_function_local(a));
        assert!(!p.is_function_local(s));
        assert!(!p.is_function_local(g));
    }

    #[test]
    fn test_build_type_is_its_own_main_variant() {
        let mut p = Program::new();
        let rec = p.build_type(TreeCode::RecordType, None, TypeData::default());
        assert_eq!(
            p.node(rec).type_data().and_then(|t| t.main_variant),
            Some(rec)
        );
    }
}
