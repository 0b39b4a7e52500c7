//! Node storage.

use crate::code::TreeCode;
use crate::node::{Node, NodeData, NodeId};
use std::collections::{HashMap, HashSet};
use std::ops::{Index, IndexMut};

/// Owns every node of a program image.
///
/// Identifiers are hash-consed: there is exactly one `IDENTIFIER_NODE` per
/// spelling. Freed nodes keep their slot (ids are never reused) and are
/// replaced by an error mark.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
    identifiers: HashMap<String, NodeId>,
    freed: HashSet<NodeId>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// The unique identifier node for `name`.
    pub fn identifier(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.identifiers.get(name) {
            return id;
        }
        let mut node = Node::new(TreeCode::IdentifierNode);
        node.data = NodeData::Identifier(name.to_string());
        let id = self.alloc(node);
        self.identifiers.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Overwrite a slot, typically a placeholder allocated before its
    /// children were known.
    pub fn replace(&mut self, id: NodeId, node: Node) {
        self.nodes[id.index()] = node;
    }

    pub fn code(&self, id: NodeId) -> TreeCode {
        self.nodes[id.index()].code
    }

    /// Spelling of an identifier node.
    pub fn identifier_str(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(Node::identifier)
    }

    /// Release a node. Its id stays allocated and now names an error mark.
    pub fn free(&mut self, id: NodeId) {
        if let Some(name) = self.identifier_str(id).map(str::to_string) {
            self.identifiers.remove(&name);
        }
        self.nodes[id.index()] = Node::new(TreeCode::ErrorMark);
        self.freed.insert(id);
    }

    pub fn is_freed(&self, id: NodeId) -> bool {
        self.freed.contains(&id)
    }

    /// Number of slots, freed ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live nodes in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
            .filter(|(id, _)| !self.freed.contains(id))
    }

    /// Ids of live nodes in allocation order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

impl IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }
}
