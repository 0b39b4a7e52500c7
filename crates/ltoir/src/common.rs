//! Well-known nodes present in every program image.
//!
//! They are built in a fixed order so that two independently created images
//! agree on their position. Streaming contexts pre-register them, so they are
//! only ever written as back-references.

use crate::arena::Arena;
use crate::code::TreeCode;
use crate::node::{ListEntry, Node, NodeData, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonNodes {
    pub error_mark: NodeId,
    pub void_type: NodeId,
    pub boolean_type: NodeId,
    pub char_type: NodeId,
    pub signed_char_type: NodeId,
    pub unsigned_char_type: NodeId,
    pub short_type: NodeId,
    pub unsigned_short_type: NodeId,
    pub int_type: NodeId,
    pub unsigned_type: NodeId,
    pub long_type: NodeId,
    pub unsigned_long_type: NodeId,
    pub long_long_type: NodeId,
    pub unsigned_long_long_type: NodeId,
    pub float_type: NodeId,
    pub double_type: NodeId,
    pub long_double_type: NodeId,
    pub size_type: NodeId,
    pub ptr_type: NodeId,
    pub void_list: NodeId,
    pub integer_zero: NodeId,
    pub integer_one: NodeId,
}

fn scalar_type(arena: &mut Arena, code: TreeCode, precision: u32, unsigned: bool) -> NodeId {
    let id = arena.alloc(Node::new(code));
    let node = &mut arena[id];
    node.flags.unsigned = unsigned;
    if let Some(t) = node.type_data_mut() {
        t.precision = precision;
        t.align = precision.min(64);
        t.main_variant = Some(id);
    }
    id
}

fn int_cst(arena: &mut Arena, ty: NodeId, value: u64) -> NodeId {
    let mut node = Node::new(TreeCode::IntegerCst).with_type(Some(ty));
    node.flags.constant = true;
    node.data = NodeData::Int {
        low: value,
        high: 0,
    };
    arena.alloc(node)
}

impl CommonNodes {
    /// Allocate the common nodes into `arena`.
    pub fn build(arena: &mut Arena) -> Self {
        let error_mark = arena.alloc(Node::new(TreeCode::ErrorMark));
        let void_type = scalar_type(arena, TreeCode::VoidType, 0, false);
        let boolean_type = scalar_type(arena, TreeCode::BooleanType, 1, true);
        let char_type = scalar_type(arena, TreeCode::IntegerType, 8, false);
        let signed_char_type = scalar_type(arena, TreeCode::IntegerType, 8, false);
        let unsigned_char_type = scalar_type(arena, TreeCode::IntegerType, 8, true);
        let short_type = scalar_type(arena, TreeCode::IntegerType, 16, false);
        let unsigned_short_type = scalar_type(arena, TreeCode::IntegerType, 16, true);
        let int_type = scalar_type(arena, TreeCode::IntegerType, 32, false);
        let unsigned_type = scalar_type(arena, TreeCode::IntegerType, 32, true);
        let long_type = scalar_type(arena, TreeCode::IntegerType, 64, false);
        let unsigned_long_type = scalar_type(arena, TreeCode::IntegerType, 64, true);
        let long_long_type = scalar_type(arena, TreeCode::IntegerType, 64, false);
        let unsigned_long_long_type = scalar_type(arena, TreeCode::IntegerType, 64, true);
        let float_type = scalar_type(arena, TreeCode::RealType, 32, false);
        let double_type = scalar_type(arena, TreeCode::RealType, 64, false);
        let long_double_type = scalar_type(arena, TreeCode::RealType, 128, false);
        let size_type = scalar_type(arena, TreeCode::IntegerType, 64, true);

        let ptr_type = scalar_type(arena, TreeCode::PointerType, 64, true);
        arena[ptr_type].ty = Some(void_type);
        if let Some(t) = arena[void_type].type_data_mut() {
            t.pointer_to = Some(ptr_type);
        }

        let mut void_list = Node::new(TreeCode::TreeList);
        void_list.data = NodeData::List(vec![ListEntry {
            value: Some(void_type),
            purpose: None,
        }]);
        let void_list = arena.alloc(void_list);

        let integer_zero = int_cst(arena, int_type, 0);
        let integer_one = int_cst(arena, int_type, 1);

        Self {
            error_mark,
            void_type,
            boolean_type,
            char_type,
            signed_char_type,
            unsigned_char_type,
            short_type,
            unsigned_short_type,
            int_type,
            unsigned_type,
            long_type,
            unsigned_long_type,
            long_long_type,
            unsigned_long_long_type,
            float_type,
            double_type,
            long_double_type,
            size_type,
            ptr_type,
            void_list,
            integer_zero,
            integer_one,
        }
    }

    /// Every common node in registration order.
    pub fn all(&self) -> [NodeId; 22] {
        [
            self.error_mark,
            self.void_type,
            self.boolean_type,
            self.char_type,
            self.signed_char_type,
            self.unsigned_char_type,
            self.short_type,
            self.unsigned_short_type,
            self.int_type,
            self.unsigned_type,
            self.long_type,
            self.unsigned_long_type,
            self.long_long_type,
            self.unsigned_long_long_type,
            self.float_type,
            self.double_type,
            self.long_double_type,
            self.size_type,
            self.ptr_type,
            self.void_list,
            self.integer_zero,
            self.integer_one,
        ]
    }
}
