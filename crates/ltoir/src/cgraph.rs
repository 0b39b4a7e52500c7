//! Inter-procedural call graph.

use crate::node::NodeId;
use std::collections::HashMap;
use std::fmt;

/// Position of a node inside [`CallGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CgNodeId(pub u32);

impl CgNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CgNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cg{}", self.0)
    }
}

/// How much of a function's body the optimizer may rely on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Availability {
    /// No body in this program.
    #[default]
    NotAvailable,
    /// A body exists but may be replaced at link time.
    Overwritable,
    Available,
    /// Available and not visible outside the program.
    Local,
}

/// Why a call was not inlined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InlineFailed {
    /// The call was inlined or no decision was made yet.
    #[default]
    Ok,
    Unspecified,
    BodyNotAvailable,
    FunctionNotInlinable,
    NotDeclaredInline,
    RecursiveInlining,
    UnlikelyCall,
    LargeFunctionGrowth,
    LargeStackFrameGrowth,
    MismatchedArguments,
    OriginallyIndirectCall,
}

impl InlineFailed {
    pub const ALL: [InlineFailed; 11] = [
        InlineFailed::Ok,
        InlineFailed::Unspecified,
        InlineFailed::BodyNotAvailable,
        InlineFailed::FunctionNotInlinable,
        InlineFailed::NotDeclaredInline,
        InlineFailed::RecursiveInlining,
        InlineFailed::UnlikelyCall,
        InlineFailed::LargeFunctionGrowth,
        InlineFailed::LargeStackFrameGrowth,
        InlineFailed::MismatchedArguments,
        InlineFailed::OriginallyIndirectCall,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CgraphFlags {
    pub lowered: bool,
    pub analyzed: bool,
    pub needed: bool,
    pub local: bool,
    pub externally_visible: bool,
    pub finalized: bool,
    pub inlinable: bool,
    pub disregard_inline_limits: bool,
    pub redefined_extern_inline: bool,
    pub for_functions_valid: bool,
    pub vtable_method: bool,
}

/// Size and time estimates of the function itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InlineSummary {
    pub estimated_self_stack_size: i64,
    pub self_size: i32,
    pub size_inlining_benefit: i32,
    pub self_time: i32,
    pub time_inlining_benefit: i32,
}

/// Estimates after inlining decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InlineGlobal {
    pub estimated_stack_size: i64,
    pub stack_frame_offset: i64,
    /// The function this node was inlined into.
    pub inlined_to: Option<CgNodeId>,
    pub time: i32,
    pub size: i32,
    pub estimated_growth: i32,
    pub inlined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgraphNode {
    pub decl: NodeId,
    pub availability: Availability,
    pub flags: CgraphFlags,
    pub count: i64,
    pub summary: InlineSummary,
    pub global: InlineGlobal,
    /// Set on clones: the node whose decl this one shares.
    pub clone_of: Option<CgNodeId>,
}

impl CgraphNode {
    pub fn new(decl: NodeId) -> Self {
        Self {
            decl,
            availability: Availability::NotAvailable,
            flags: CgraphFlags::default(),
            count: 0,
            summary: InlineSummary::default(),
            global: InlineGlobal::default(),
            clone_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgraphEdge {
    pub caller: CgNodeId,
    pub callee: CgNodeId,
    /// Uid of the call statement in the caller's body.
    pub stmt_uid: u32,
    pub inline_failed: InlineFailed,
    pub count: i64,
    pub frequency: u32,
    pub loop_nest: u32,
    pub indirect_call: bool,
    pub call_stmt_cannot_inline: bool,
}

impl CgraphEdge {
    pub fn new(caller: CgNodeId, callee: CgNodeId, stmt_uid: u32) -> Self {
        Self {
            caller,
            callee,
            stmt_uid,
            inline_failed: InlineFailed::Ok,
            count: 0,
            frequency: 0,
            loop_nest: 0,
            indirect_call: false,
            call_stmt_cannot_inline: false,
        }
    }
}

/// Nodes and edges. Removed nodes leave a hole so ids stay stable.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: Vec<Option<CgraphNode>>,
    edges: Vec<CgraphEdge>,
    /// First non-clone node created for each decl.
    by_decl: HashMap<NodeId, CgNodeId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node for `decl`, created if the decl has none yet.
    pub fn get_or_create(&mut self, decl: NodeId) -> CgNodeId {
        if let Some(&id) = self.by_decl.get(&decl) {
            return id;
        }
        let id = self.push(CgraphNode::new(decl));
        self.by_decl.insert(decl, id);
        id
    }

    /// A new node sharing `of`'s decl.
    pub fn create_clone(&mut self, of: CgNodeId) -> Option<CgNodeId> {
        let decl = self.node(of)?.decl;
        let mut node = CgraphNode::new(decl);
        node.clone_of = Some(of);
        Some(self.push(node))
    }

    fn push(&mut self, node: CgraphNode) -> CgNodeId {
        let id = CgNodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    pub fn node_for_decl(&self, decl: NodeId) -> Option<CgNodeId> {
        self.by_decl.get(&decl).copied()
    }

    pub fn node(&self, id: CgNodeId) -> Option<&CgraphNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: CgNodeId) -> Option<&mut CgraphNode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn add_edge(&mut self, edge: CgraphEdge) {
        self.edges.push(edge);
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (CgNodeId, &CgraphNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (CgNodeId(i as u32), n)))
    }

    pub fn node_ids(&self) -> Vec<CgNodeId> {
        self.nodes().map(|(id, _)| id).collect()
    }

    pub fn edges(&self) -> &[CgraphEdge] {
        &self.edges
    }

    pub fn callees(&self, caller: CgNodeId) -> impl Iterator<Item = &CgraphEdge> {
        self.edges.iter().filter(move |e| e.caller == caller)
    }

    pub fn callers(&self, callee: CgNodeId) -> impl Iterator<Item = &CgraphEdge> {
        self.edges.iter().filter(move |e| e.callee == callee)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes().count()
    }

    /// Drop a node together with every edge touching it. Nodes that were
    /// inlined into it lose that link.
    pub fn remove_node(&mut self, id: CgNodeId) {
        let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        if self.by_decl.get(&node.decl) == Some(&id) {
            self.by_decl.remove(&node.decl);
        }
        self.edges.retain(|e| e.caller != id && e.callee != id);
        for other in self.nodes.iter_mut().flatten() {
            if other.global.inlined_to == Some(id) {
                other.global.inlined_to = None;
            }
            if other.clone_of == Some(id) {
                other.clone_of = None;
            }
        }
    }

    /// Point every node and the decl index at `to` where they used `from`.
    pub fn replace_decl(&mut self, from: NodeId, to: NodeId) {
        for node in self.nodes.iter_mut().flatten() {
            if node.decl == from {
                node.decl = to;
            }
        }
        if let Some(id) = self.by_decl.remove(&from) {
            self.by_decl.entry(to).or_insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut cg = CallGraph::new();
        let a = cg.get_or_create(NodeId(10));
        let b = cg.get_or_create(NodeId(10));
        assert_eq!(a, b);
        assert_eq!(cg.num_nodes(), 1);
    }

    #[test]
    fn test_clone_shares_decl() {
        let mut cg = CallGraph::new();
        let a = cg.get_or_create(NodeId(10));
        let c = cg.create_clone(a).unwrap();
        assert_ne!(a, c);
        assert_eq!(cg.node(c).unwrap().decl, NodeId(10));
        assert_eq!(cg.node_for_decl(NodeId(10)), Some(a));
    }

    #[test]
    fn test_remove_node_drops_edges_and_links() {
        let mut cg = CallGraph::new();
        let f = cg.get_or_create(NodeId(1));
        let g = cg.get_or_create(NodeId(2));
        let h = cg.get_or_create(NodeId(3));
        cg.add_edge(CgraphEdge::new(f, g, 1));
        cg.add_edge(CgraphEdge::new(g, h, 2));
        cg.node_mut(h).unwrap().global.inlined_to = Some(g);

        cg.remove_node(g);

        assert!(cg.node(g).is_none());
        assert!(cg.edges().is_empty());
        assert_eq!(cg.node(h).unwrap().global.inlined_to, None);
        assert_eq!(cg.node_for_decl(NodeId(2)), None);
        assert_eq!(cg.node_ids(), vec![f, h]);
    }

    #[test]
    fn test_inline_failed_codes_round_trip() {
        for reason in InlineFailed::ALL {
            assert_eq!(InlineFailed::from_u32(reason.as_u32()), Some(reason));
        }
        assert_eq!(InlineFailed::from_u32(99), None);
    }
}
