//! Call-graph section.
//!
//! Nodes get their own dense numbering, independent of the tree pickler.
//! The partition being written comes first, then every callee reached from
//! it that lies outside it. Those boundary nodes are written as bodiless,
//! externally visible functions whatever they really are.
//!
//! The main stream holds the node records, a terminator, the edge records of
//! partition members and a second terminator. A node's inline target is
//! written as a node number and resolved once the unit's nodes are all read.

use crate::error::{Result, StreamError};
use crate::fixup::Fixups;
use crate::flags::{self, CGRAPH_EDGE, CGRAPH_NODE};
use crate::header::{write_section, BodyCounts, SectionKind, SectionReader, StreamId};
use crate::pickle::{DeclCategory, OutDeclState, UnitDecls};
use crate::stream::{InputCursor, OutputStream};
use crate::symtab::{Resolution, SymbolTable};
use ltoir::{
    Availability, CgNodeId, CgraphEdge, CgraphFlags, CgraphNode, InlineFailed, InlineSummary,
    NodeId, Program,
};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Record tags of the call-graph stream.
pub mod tags {
    pub const END: u8 = 0;
    pub const UNAVAIL_NODE: u8 = 1;
    pub const AVAIL_NODE: u8 = 2;
    pub const OVERWRITABLE_NODE: u8 = 3;
    pub const EDGE: u8 = 4;
}

/// No inline target.
const NOT_FOUND: i64 = -1;

/// Dense numbering of the call-graph nodes written to one section.
#[derive(Debug, Clone, Default)]
pub struct CgraphEncoder {
    index: HashMap<CgNodeId, u32>,
    nodes: Vec<CgNodeId>,
    /// Nodes from this position on are boundary nodes.
    partition_len: usize,
}

impl CgraphEncoder {
    /// Number `set`, then every callee of `set` outside it.
    pub fn build(program: &Program, set: &[CgNodeId]) -> Result<Self> {
        let cg = &program.callgraph;
        let mut encoder = Self::default();
        for &id in set {
            if cg.node(id).is_none() {
                return Err(StreamError::consistency(format!("{id} is not in the call graph")));
            }
            encoder.encode(id);
        }
        encoder.partition_len = encoder.nodes.len();
        for &id in set {
            for edge in cg.callees(id) {
                if encoder.lookup(edge.callee).is_some() {
                    continue;
                }
                let callee = cg.node(edge.callee).ok_or_else(|| {
                    StreamError::consistency(format!("edge from {id} to missing {}", edge.callee))
                })?;
                if callee.global.inlined_to.is_some() {
                    return Err(StreamError::consistency(format!(
                        "boundary node {} is inlined into another function",
                        edge.callee
                    )));
                }
                encoder.encode(edge.callee);
            }
        }
        Ok(encoder)
    }

    pub fn encode(&mut self, id: CgNodeId) -> u32 {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.nodes.len() as u32;
        self.index.insert(id, i);
        self.nodes.push(id);
        i
    }

    pub fn lookup(&self, id: CgNodeId) -> Option<u32> {
        self.index.get(&id).copied()
    }

    pub fn nodes(&self) -> &[CgNodeId] {
        &self.nodes
    }

    pub fn is_boundary(&self, index: usize) -> bool {
        index >= self.partition_len
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn node_tag(node: &CgraphNode, boundary: bool) -> u8 {
    if boundary {
        return tags::UNAVAIL_NODE;
    }
    match node.availability {
        Availability::NotAvailable => tags::UNAVAIL_NODE,
        Availability::Available | Availability::Local => tags::AVAIL_NODE,
        Availability::Overwritable => tags::OVERWRITABLE_NODE,
    }
}

/// Serialize the part of the call graph in `set`. Function declarations are
/// referenced through `decls`.
pub fn write_cgraph(program: &Program, decls: &mut OutDeclState, set: &[CgNodeId]) -> Result<Vec<u8>> {
    let cg = &program.callgraph;
    let encoder = CgraphEncoder::build(program, set)?;
    let mut main = StreamId::Main.output();
    let mut written_decls = HashSet::new();

    for (i, &id) in encoder.nodes().iter().enumerate() {
        let node = cg
            .node(id)
            .ok_or_else(|| StreamError::consistency(format!("{id} vanished while writing")))?;
        let boundary = encoder.is_boundary(i);
        write_node(&mut main, decls, &encoder, node, boundary, &mut written_decls)?;
    }
    main.write_u8(tags::END);

    let mut num_edges = 0;
    for &id in &encoder.nodes()[..encoder.partition_len] {
        for edge in cg.callees(id) {
            write_edge(&mut main, &encoder, edge)?;
            num_edges += 1;
        }
    }
    main.write_u8(tags::END);

    debug!(
        "cgraph: {} nodes ({} boundary), {num_edges} edges",
        encoder.len(),
        encoder.len() - encoder.partition_len
    );
    write_section(
        SectionKind::Cgraph,
        BodyCounts::default(),
        &[
            StreamId::NamedLabels.output(),
            main,
            StreamId::Strings.output(),
        ],
    )
}

fn write_node(
    out: &mut OutputStream,
    decls: &mut OutDeclState,
    encoder: &CgraphEncoder,
    node: &CgraphNode,
    boundary: bool,
    written_decls: &mut HashSet<NodeId>,
) -> Result<()> {
    let tag = node_tag(node, boundary);
    out.write_u8(tag);
    // A decl already written by an earlier node makes this one a clone.
    out.write_uleb(u64::from(!written_decls.insert(node.decl)));
    out.write_uleb(u64::from(decls.encode(DeclCategory::Function, node.decl)));
    out.write_sleb(node.count);

    let mut node_flags = node.flags;
    if boundary {
        node_flags.local = false;
        node_flags.externally_visible = true;
        node_flags.inlinable = false;
    }
    out.write_uleb(flags::pack(&[CGRAPH_NODE], &node_flags));

    if tag != tags::UNAVAIL_NODE {
        let s = &node.summary;
        out.write_sleb(s.estimated_self_stack_size);
        out.write_sleb(i64::from(s.self_size));
        out.write_sleb(i64::from(s.size_inlining_benefit));
        out.write_sleb(i64::from(s.self_time));
        out.write_sleb(i64::from(s.time_inlining_benefit));
    }

    let g = &node.global;
    out.write_sleb(g.estimated_stack_size);
    out.write_sleb(g.stack_frame_offset);
    let inlined_to = match g.inlined_to {
        Some(target) if !boundary => {
            let index = encoder.lookup(target).ok_or_else(|| {
                StreamError::consistency(format!("inline target {target} is not being written"))
            })?;
            i64::from(index)
        }
        _ => NOT_FOUND,
    };
    out.write_sleb(inlined_to);
    out.write_sleb(i64::from(g.time));
    out.write_sleb(i64::from(g.size));
    out.write_sleb(i64::from(g.estimated_growth));
    out.write_uleb(u64::from(g.inlined));
    Ok(())
}

fn write_edge(out: &mut OutputStream, encoder: &CgraphEncoder, edge: &CgraphEdge) -> Result<()> {
    let number = |id: CgNodeId| {
        encoder
            .lookup(id)
            .map(i64::from)
            .ok_or_else(|| StreamError::consistency(format!("edge endpoint {id} not numbered")))
    };
    out.write_u8(tags::EDGE);
    out.write_sleb(number(edge.caller)?);
    out.write_sleb(number(edge.callee)?);
    out.write_uleb(u64::from(edge.stmt_uid));
    out.write_uleb(u64::from(edge.inline_failed.as_u32()));
    out.write_sleb(edge.count);
    out.write_uleb(u64::from(edge.frequency));
    out.write_uleb(u64::from(edge.loop_nest));
    out.write_uleb(flags::pack(&[CGRAPH_EDGE], edge));
    Ok(())
}

/// Merge a section written by [`write_cgraph`] into `program`'s call graph.
///
/// `decls` are the tables of the unit the section came from and `symtab`
/// the merged symbols of every unit. Edges of preempted callers are
/// dropped, callees are rebound to the node of their prevailing copy, and
/// nodes of copies that did not prevail are removed. Returns the unit's
/// nodes in section order, `None` for removed ones.
pub fn read_cgraph(
    program: &mut Program,
    decls: &UnitDecls,
    data: &[u8],
    symtab: &SymbolTable,
) -> Result<Vec<Option<CgNodeId>>> {
    let section = SectionReader::parse(data, SectionKind::Cgraph)?;
    let mut main = section.cursor(StreamId::Main)?;

    let mut nodes = Vec::new();
    let mut inline_targets: Fixups<CgNodeId> = Fixups::new("cgraph node");
    loop {
        let tag = main.read_u8()?;
        if tag == tags::END {
            break;
        }
        let id = read_node(&mut main, tag, program, decls, &mut inline_targets)?;
        nodes.push(id);
    }

    let cg = &mut program.callgraph;
    inline_targets.resolve(
        nodes.len(),
        |raw| usize::try_from(raw).ok().and_then(|i| nodes.get(i).copied()),
        |id, target| {
            if let Some(node) = cg.node_mut(id) {
                node.global.inlined_to = Some(target);
            }
        },
    )?;

    let mut kept = 0;
    let mut dropped = 0;
    loop {
        match main.read_u8()? {
            tags::END => break,
            tags::EDGE => {
                if read_edge(&mut main, program, &nodes, symtab)? {
                    kept += 1;
                } else {
                    dropped += 1;
                }
            }
            tag => {
                return Err(StreamError::UnknownTag {
                    tag: u64::from(tag),
                    context: "cgraph edge",
                })
            }
        }
    }

    let mut out = Vec::with_capacity(nodes.len());
    for id in nodes {
        let decl = program.callgraph.node(id).map(|n| n.decl);
        match decl {
            Some(decl) if !symtab.is_prevailing(decl) => {
                debug!("removing {id}: its declaration did not prevail");
                program.callgraph.remove_node(id);
                out.push(None);
            }
            _ => out.push(Some(id)),
        }
    }
    debug!(
        "read cgraph: {} nodes, {kept} edges, {dropped} dropped",
        out.len()
    );
    Ok(out)
}

fn read_node(
    cursor: &mut InputCursor<'_>,
    tag: u8,
    program: &mut Program,
    decls: &UnitDecls,
    inline_targets: &mut Fixups<CgNodeId>,
) -> Result<CgNodeId> {
    if !matches!(
        tag,
        tags::UNAVAIL_NODE | tags::AVAIL_NODE | tags::OVERWRITABLE_NODE
    ) {
        return Err(StreamError::UnknownTag {
            tag: u64::from(tag),
            context: "cgraph node",
        });
    }
    let clone = cursor.read_uleb()? != 0;
    let decl = decls.get(DeclCategory::Function, cursor.read_uleb()?)?;
    let count = cursor.read_sleb()?;
    let mut node_flags = CgraphFlags::default();
    flags::unpack(&[CGRAPH_NODE], cursor.read_uleb()?, &mut node_flags);

    let mut summary = InlineSummary::default();
    if tag != tags::UNAVAIL_NODE {
        summary.estimated_self_stack_size = cursor.read_sleb()?;
        summary.self_size = cursor.read_i32()?;
        summary.size_inlining_benefit = cursor.read_i32()?;
        summary.self_time = cursor.read_i32()?;
        summary.time_inlining_benefit = cursor.read_i32()?;
    }

    let cg = &mut program.callgraph;
    let id = if clone {
        let of = cg.get_or_create(decl);
        cg.create_clone(of)
            .ok_or_else(|| StreamError::consistency(format!("cannot clone {of}")))?
    } else {
        cg.get_or_create(decl)
    };
    let node = cg
        .node_mut(id)
        .ok_or_else(|| StreamError::consistency(format!("{id} vanished while reading")))?;
    node.availability = match tag {
        tags::UNAVAIL_NODE => Availability::NotAvailable,
        tags::OVERWRITABLE_NODE => Availability::Overwritable,
        _ if node_flags.local => Availability::Local,
        _ => Availability::Available,
    };
    node.flags = node_flags;
    node.count = count;
    node.summary = summary;

    let g = &mut node.global;
    g.estimated_stack_size = cursor.read_sleb()?;
    g.stack_frame_offset = cursor.read_sleb()?;
    let inlined_to = cursor.read_sleb()?;
    g.inlined_to = None;
    if inlined_to != NOT_FOUND {
        inline_targets.defer(id, inlined_to);
    }
    g.time = cursor.read_i32()?;
    g.size = cursor.read_i32()?;
    g.estimated_growth = cursor.read_i32()?;
    g.inlined = cursor.read_uleb()? != 0;
    Ok(id)
}

/// Read one edge. Returns false when the edge was dropped.
fn read_edge(
    cursor: &mut InputCursor<'_>,
    program: &mut Program,
    nodes: &[CgNodeId],
    symtab: &SymbolTable,
) -> Result<bool> {
    let node_at = |raw: i64| {
        usize::try_from(raw)
            .ok()
            .and_then(|i| nodes.get(i).copied())
            .ok_or(StreamError::IndexOutOfRange {
                what: "cgraph node",
                index: raw,
                len: nodes.len(),
            })
    };
    let caller = node_at(cursor.read_sleb()?)?;
    let mut callee = node_at(cursor.read_sleb()?)?;
    let stmt_uid = cursor.read_u32()?;
    let raw_reason = cursor.read_u32()?;
    let inline_failed = InlineFailed::from_u32(raw_reason).ok_or(StreamError::UnknownTag {
        tag: u64::from(raw_reason),
        context: "inline failure reason",
    })?;
    let count = cursor.read_sleb()?;
    let frequency = cursor.read_u32()?;
    let loop_nest = cursor.read_u32()?;
    let packed = cursor.read_uleb()?;

    let decl_of = |id: CgNodeId| {
        program
            .callgraph
            .node(id)
            .map(|n| n.decl)
            .ok_or_else(|| StreamError::consistency(format!("edge endpoint {id} was removed")))
    };
    let caller_decl = decl_of(caller)?;
    let callee_decl = decl_of(callee)?;

    let caller_resolution = symtab.resolution(caller_decl);
    if caller_resolution == Some(Resolution::Preempted) {
        debug!("dropping call {stmt_uid} from preempted {caller}");
        return Ok(false);
    }
    if !caller_resolution.is_some_and(Resolution::is_prevailing) && !symtab.is_prevailing(caller_decl)
    {
        return Err(StreamError::consistency(format!(
            "call {stmt_uid}: caller {caller} is not the prevailing definition"
        )));
    }

    let cg = &mut program.callgraph;
    let prevailing = symtab.prevailing(callee_decl);
    if prevailing != callee_decl {
        if cg.node(callee).is_some_and(|n| n.clone_of.is_some()) {
            return Err(StreamError::consistency(format!(
                "call {stmt_uid}: cannot rebind clone {callee}"
            )));
        }
        let rebound = cg.get_or_create(prevailing);
        debug!("rebinding call {stmt_uid} from {callee} to {rebound}");
        callee = rebound;
    }

    let mut edge = CgraphEdge::new(caller, callee, stmt_uid);
    edge.inline_failed = inline_failed;
    edge.count = count;
    edge.frequency = frequency;
    edge.loop_nest = loop_nest;
    flags::unpack(&[CGRAPH_EDGE], packed, &mut edge);
    cg.add_edge(edge);
    Ok(true)
}
