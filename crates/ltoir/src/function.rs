//! Function bodies: control-flow graph, statements, SSA table and locals.

use crate::eh::EhTable;
use crate::error::VerifyError;
use crate::node::{Locus, NodeId};
use std::collections::HashSet;

/// Index of the fixed entry block.
pub const ENTRY_BLOCK: u32 = 0;
/// Index of the fixed exit block.
pub const EXIT_BLOCK: u32 = 1;

/// Edge flag bits.
pub mod edge_flags {
    pub const FALLTHRU: u32 = 0x0001;
    pub const ABNORMAL: u32 = 0x0002;
    pub const ABNORMAL_CALL: u32 = 0x0004;
    pub const EH: u32 = 0x0008;
    pub const FAKE: u32 = 0x0010;
    pub const DFS_BACK: u32 = 0x0020;
    pub const TRUE_VALUE: u32 = 0x0100;
    pub const FALSE_VALUE: u32 = 0x0200;
}

/// Basic-block flag bits.
pub mod block_flags {
    pub const NEW: u32 = 0x0001;
    pub const REACHABLE: u32 = 0x0002;
    pub const IRREDUCIBLE_LOOP: u32 = 0x0004;
    pub const HOT_PARTITION: u32 = 0x0010;
    pub const COLD_PARTITION: u32 = 0x0020;
}

/// Where the block counts came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileStatus {
    #[default]
    Absent,
    Guessed,
    Read,
}

impl ProfileStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            ProfileStatus::Absent => 0,
            ProfileStatus::Guessed => 1,
            ProfileStatus::Read => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ProfileStatus::Absent),
            1 => Some(ProfileStatus::Guessed),
            2 => Some(ProfileStatus::Read),
            _ => None,
        }
    }
}

/// Outgoing edge; the source is the block that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub dest: u32,
    pub probability: i32,
    pub count: i64,
    pub flags: u32,
}

/// Statement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StmtCode {
    Nop = 0,
    Assign,
    Call,
    Cond,
    Goto,
    Label,
    Return,
    Switch,
    Resx,
    Asm,
}

impl StmtCode {
    pub const ALL: [StmtCode; 10] = [
        StmtCode::Nop,
        StmtCode::Assign,
        StmtCode::Call,
        StmtCode::Cond,
        StmtCode::Goto,
        StmtCode::Label,
        StmtCode::Return,
        StmtCode::Switch,
        StmtCode::Resx,
        StmtCode::Asm,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StmtFlags {
    pub no_warning: bool,
    pub has_volatile_ops: bool,
}

/// One statement.
///
/// `ops` holds the operands in kind-specific order: for an assignment the
/// destination then the value, for a call the result, the callee and then the
/// arguments, for a conditional the predicate then the two labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub code: StmtCode,
    /// Kind-specific discriminator (comparison code, resx region, ...).
    pub subcode: u32,
    /// Call-site identity referenced by call-graph edges.
    pub uid: u32,
    pub flags: StmtFlags,
    pub locus: Option<Locus>,
    /// Exception region the statement belongs to; zero when none.
    pub eh_region: i32,
    pub ops: Vec<Option<NodeId>>,
}

impl Stmt {
    pub fn new(code: StmtCode, uid: u32, ops: Vec<Option<NodeId>>) -> Self {
        Self {
            code,
            subcode: 0,
            uid,
            flags: StmtFlags::default(),
            locus: None,
            eh_region: 0,
            ops,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiArg {
    pub value: Option<NodeId>,
    /// Predecessor block the value flows in from.
    pub src: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// SSA version of the result.
    pub result: u32,
    pub args: Vec<PhiArg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub index: u32,
    pub count: i64,
    pub loop_depth: u32,
    pub frequency: i32,
    pub flags: u32,
    pub succs: Vec<Edge>,
    pub stmts: Vec<Stmt>,
    pub phis: Vec<Phi>,
}

impl BasicBlock {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            count: 0,
            loop_depth: 0,
            frequency: 0,
            flags: 0,
            succs: Vec::new(),
            stmts: Vec::new(),
            phis: Vec::new(),
        }
    }

    /// Whether the block has neither statements nor phis.
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty() && self.phis.is_empty()
    }
}

/// Control-flow graph of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfg {
    pub profile_status: ProfileStatus,
    /// Blocks by index; holes are indices with no block.
    pub blocks: Vec<Option<BasicBlock>>,
    /// Layout chain, entry first.
    pub order: Vec<u32>,
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

impl Cfg {
    /// A graph with only the entry and exit blocks.
    pub fn new() -> Self {
        Self {
            profile_status: ProfileStatus::Absent,
            blocks: vec![
                Some(BasicBlock::new(ENTRY_BLOCK)),
                Some(BasicBlock::new(EXIT_BLOCK)),
            ],
            order: vec![ENTRY_BLOCK, EXIT_BLOCK],
        }
    }

    /// An empty graph, without even the fixed blocks. Readers start here.
    pub fn empty() -> Self {
        Self {
            profile_status: ProfileStatus::Absent,
            blocks: Vec::new(),
            order: Vec::new(),
        }
    }

    /// One past the highest block index.
    pub fn last_basic_block(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn block(&self, index: u32) -> Option<&BasicBlock> {
        self.blocks.get(index as usize).and_then(Option::as_ref)
    }

    pub fn block_mut(&mut self, index: u32) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(index as usize).and_then(Option::as_mut)
    }

    /// The block at `index`, created on first use.
    pub fn ensure_block(&mut self, index: u32) -> &mut BasicBlock {
        let slot = index as usize;
        if self.blocks.len() <= slot {
            self.blocks.resize(slot + 1, None);
        }
        self.blocks[slot].get_or_insert_with(|| BasicBlock::new(index))
    }

    /// Append a fresh block and place it just before the exit block in the chain.
    pub fn add_block(&mut self) -> u32 {
        let index = self.last_basic_block();
        self.blocks.push(Some(BasicBlock::new(index)));
        let at = self
            .order
            .iter()
            .position(|&b| b == EXIT_BLOCK)
            .unwrap_or(self.order.len());
        self.order.insert(at, index);
        index
    }

    pub fn add_edge(&mut self, src: u32, dest: u32, flags: u32) -> &mut Edge {
        let block = self.ensure_block(src);
        block.succs.push(Edge {
            dest,
            probability: 10000,
            count: 0,
            flags,
        });
        let last = block.succs.len() - 1;
        &mut block.succs[last]
    }

    /// Existing blocks in index order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().flatten()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks().count()
    }

    pub fn num_edges(&self) -> usize {
        self.blocks().map(|b| b.succs.len()).sum()
    }

    /// Predecessors of `index`, in source index order.
    pub fn preds(&self, index: u32) -> Vec<u32> {
        self.blocks()
            .filter(|b| b.succs.iter().any(|e| e.dest == index))
            .map(|b| b.index)
            .collect()
    }

    /// Check that the fixed blocks exist, every edge lands on a block and the
    /// chain lists every block exactly once starting at the entry.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for fixed in [ENTRY_BLOCK, EXIT_BLOCK] {
            if self.block(fixed).is_none() {
                return Err(VerifyError::MissingFixedBlock { index: fixed });
            }
        }
        for block in self.blocks() {
            for edge in &block.succs {
                if self.block(edge.dest).is_none() {
                    return Err(VerifyError::MissingEdgeTarget {
                        src: block.index,
                        dest: edge.dest,
                    });
                }
            }
        }
        if self.order.first() != Some(&ENTRY_BLOCK) {
            return Err(VerifyError::BadBlockOrder { index: ENTRY_BLOCK });
        }
        let mut seen = HashSet::new();
        for &index in &self.order {
            if self.block(index).is_none() || !seen.insert(index) {
                return Err(VerifyError::BadBlockOrder { index });
            }
        }
        if let Some(missing) = self.blocks().find(|b| !seen.contains(&b.index)) {
            return Err(VerifyError::BadBlockOrder {
                index: missing.index,
            });
        }
        Ok(())
    }
}

/// Per-function attributes streamed with the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FunctionFlags {
    pub is_thunk: bool,
    pub has_local_explicit_reg_vars: bool,
    pub after_tree_profile: bool,
    pub returns_pcc_struct: bool,
    pub returns_struct: bool,
    pub always_inline_functions_inlined: bool,
    pub after_inlining: bool,
    pub dont_save_pending_sizes: bool,
    pub stdarg: bool,
    pub has_nonlocal_label: bool,
    pub calls_alloca: bool,
    pub calls_setjmp: bool,
    /// Two bits: unlikely, normal, hot.
    pub function_frequency: u8,
    pub va_list_fpr_size: u8,
    pub va_list_gpr_size: u8,
}

/// Body of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    pub decl: NodeId,
    pub flags: FunctionFlags,
    pub static_chain: Option<NodeId>,
    pub nonlocal_goto_save_area: Option<NodeId>,
    pub eh: Option<EhTable>,
    /// First parameter; the rest follow through the parameters' chain.
    pub arguments: Option<NodeId>,
    pub cfg: Cfg,
    /// SSA names by version. Slot 0 is never used; `None` marks a released version.
    pub ssa_names: Vec<Option<NodeId>>,
    /// Declared locals in declaration order, hoisted statics included.
    pub local_decls: Vec<NodeId>,
}

impl FunctionBody {
    pub fn new(decl: NodeId) -> Self {
        Self {
            decl,
            flags: FunctionFlags::default(),
            static_chain: None,
            nonlocal_goto_save_area: None,
            eh: None,
            arguments: None,
            cfg: Cfg::new(),
            ssa_names: vec![None],
            local_decls: Vec::new(),
        }
    }

    /// Statements of every block, in block index order.
    pub fn stmts(&self) -> impl Iterator<Item = &Stmt> {
        self.cfg.blocks().flat_map(|b| b.stmts.iter())
    }

    /// Find a statement by uid.
    pub fn stmt_by_uid(&self, uid: u32) -> Option<&Stmt> {
        self.stmts().find(|s| s.uid == uid)
    }

    /// Run the graph, exception-table and SSA checks.
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.cfg.verify()?;
        if let Some(eh) = &self.eh {
            eh.verify()?;
        }
        let limit = self.ssa_names.len() as u32;
        for block in self.cfg.blocks() {
            for phi in &block.phis {
                if phi.result == 0 || phi.result >= limit {
                    return Err(VerifyError::SsaVersionOutOfRange {
                        version: phi.result,
                    });
                }
            }
        }
        Ok(())
    }
}
