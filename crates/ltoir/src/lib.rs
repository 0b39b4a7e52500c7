//! ltoir: tree IR exchanged by the link-time streamer.
//!
//! This crate holds the data model only:
//! - [`Arena`] / [`Node`] / [`TreeCode`]: the tagged node graph, with
//!   hash-consed identifiers and a fixed set of [`CommonNodes`]
//! - [`FunctionBody`]: control-flow graph, statements, phis, SSA names and
//!   locals of one function, plus its [`EhTable`]
//! - [`CallGraph`]: functions and call sites with inlining summaries
//! - [`Program`]: one program image tying the above together
//!
//! Serialization lives in the `ltostream` crate.

mod arena;
pub use arena::Arena;

mod code;
pub use code::{Layout, TreeClass, TreeCode};

mod node;
pub use node::{BinfoData, CtorElt, DeclData, ListEntry, Locus, Node, NodeData, NodeId, TypeData};

pub mod flags;
pub use flags::TreeFlags;

mod common;
pub use common::CommonNodes;

pub mod function;
pub use function::{
    BasicBlock, Cfg, Edge, FunctionBody, FunctionFlags, Phi, PhiArg, ProfileStatus, Stmt,
    StmtCode, StmtFlags, ENTRY_BLOCK, EXIT_BLOCK,
};

mod eh;
pub use eh::{EhRegion, EhRegionKind, EhTable, RegionId};

mod cgraph;
pub use cgraph::{
    Availability, CallGraph, CgNodeId, CgraphEdge, CgraphFlags, CgraphNode, InlineFailed,
    InlineGlobal, InlineSummary,
};

mod program;
pub use program::Program;

pub mod equiv;

mod error;
pub use error::VerifyError;
