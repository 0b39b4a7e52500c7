//! Function-body sections.
//!
//! A body section carries one function's statements, control-flow graph,
//! SSA names, locals, labels and exception regions. Global declarations and
//! types are referenced through the unit's declaration tables rather than
//! written here, so a body can only be read after its unit's decls section.
//!
//! Trees in the local preamble, SSA and main streams share the section's
//! back-reference table and are read in the order they were written. Local
//! records and labels do not depend on that order.

mod blocks;
mod cfg;
mod eh;
mod locals;

pub use cfg::{read_cfg, write_cfg};

use crate::codec::{label_decl, LocalScope, LocalScopeInput, TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::flags::{self, tree_groups};
use crate::header::{write_section, BodyCounts, SectionKind, SectionReader, StreamId};
use crate::pickle::{tags, OutDeclState, UnitDecls};
use crate::stream::{InputCursor, OutputStream};
use crate::strings::StringReader;
use ltoir::{FunctionBody, Node, NodeData, NodeId, Program, TreeCode};
use log::debug;
use std::collections::HashMap;

/// Freed SSA versions a table may leave out of its entry list.
pub const MAX_UNWRITTEN_SSA_NAMES: usize = 1 << 20;

/// Serialize `body` into a function-body section. Global declarations it
/// mentions are added to `decls`.
pub fn write_function_body(
    program: &Program,
    decls: &mut OutDeclState,
    body: &FunctionBody,
    emit_locations: bool,
) -> Result<Vec<u8>> {
    let mut writer = TreeWriter::new(program, decls, emit_locations);
    writer.scope = Some(LocalScope::new(body.decl, &body.local_decls));

    let mut local_decls = StreamId::LocalDecls.output();
    writer.write_local_preamble(&mut local_decls, &body.local_decls)?;

    let mut ssa = StreamId::SsaNames.output();
    write_ssa_names(&mut writer, &mut ssa, body)?;

    let mut main = StreamId::Main.output();
    main.write_u8(tags::FUNCTION);
    main.write_uleb(flags::pack(&[flags::FUNCTION_BODY], &body.flags));
    writer.write_tree(&mut main, body.static_chain)?;
    writer.write_tree(&mut main, body.nonlocal_goto_save_area)?;
    match &body.eh {
        Some(eh) => writer.write_eh_table(&mut main, eh)?,
        None => main.write_u8(tags::NULL),
    }
    writer.write_tree(&mut main, body.arguments)?;
    for block in body.cfg.blocks() {
        writer.write_block(&mut main, block)?;
    }
    main.write_u8(tags::NULL);

    let offsets = writer.write_local_records(&mut local_decls)?;
    let mut local_index = StreamId::LocalDeclIndex.output();
    for offset in &offsets {
        local_index.write_uleb(*offset);
    }

    let mut cfg = StreamId::Cfg.output();
    write_cfg(&mut cfg, &body.cfg);

    let scope = writer
        .scope
        .take()
        .ok_or_else(|| StreamError::consistency("function scope lost while writing"))?;
    let mut named_labels = StreamId::NamedLabels.output();
    for &label in scope.labels.named() {
        let name = program.arena[label]
            .decl()
            .and_then(|d| d.name)
            .and_then(|n| program.arena.identifier_str(n));
        writer.strings.write_ref(&mut named_labels, name.map(str::as_bytes));
    }

    let counts = BodyCounts {
        num_local_decls: offsets.len() as u32,
        num_named_labels: scope.labels.named().len() as u32,
        num_unnamed_labels: scope.labels.num_unnamed(),
    };
    let strings = writer.strings.into_stream();
    write_section(
        SectionKind::FunctionBody,
        counts,
        &[named_labels, ssa, cfg, local_index, local_decls, main, strings],
    )
}

fn write_ssa_names(
    writer: &mut TreeWriter<'_>,
    out: &mut OutputStream,
    body: &FunctionBody,
) -> Result<()> {
    let program = writer.program;
    out.write_uleb(body.ssa_names.len() as u64);
    for (version, name) in body.ssa_names.iter().enumerate().skip(1) {
        let Some(name) = *name else { continue };
        let node = &program.arena[name];
        let NodeData::Ssa { var, .. } = node.data else {
            return Err(StreamError::consistency(format!(
                "{name}: ssa version {version} is a {}",
                node.code
            )));
        };
        out.write_uleb(version as u64);
        writer.write_tree(out, var)?;
        out.write_uleb(flags::pack(tree_groups(TreeCode::SsaName), &node.flags));
    }
    out.write_uleb(0);
    Ok(())
}

/// Rebuild the body of `function` from a section written by
/// [`write_function_body`]. `decls` are the tables of the unit the section
/// came from.
pub fn read_function_body(
    program: &mut Program,
    decls: &UnitDecls,
    function: NodeId,
    data: &[u8],
    verify: bool,
) -> Result<FunctionBody> {
    let section = SectionReader::parse(data, SectionKind::FunctionBody)?;
    let counts = section.header.counts;
    let strings = StringReader::new(section.bytes(StreamId::Strings)?);

    let mut named_labels = Vec::new();
    let mut cursor = section.cursor(StreamId::NamedLabels)?;
    for _ in 0..counts.num_named_labels {
        let name = strings
            .read_str(&mut cursor)?
            .map(|name| program.arena.identifier(&name));
        named_labels.push(label_decl(program, function, name));
    }

    let mut cursor = section.cursor(StreamId::LocalDeclIndex)?;
    let mut local_offsets = Vec::new();
    for _ in 0..counts.num_local_decls {
        local_offsets.push(cursor.read_uleb()?);
    }

    let mut reader = TreeReader::new(program, decls, strings);
    reader.scope = Some(LocalScopeInput {
        function,
        locals: vec![None; local_offsets.len()],
        local_offsets,
        local_data: section.bytes(StreamId::LocalDecls)?,
        positions: Vec::new(),
        named_labels,
        num_unnamed_labels: counts.num_unnamed_labels,
        unnamed_labels: HashMap::new(),
        ssa_names: Vec::new(),
    });

    reader.read_local_preamble(&mut section.cursor(StreamId::LocalDecls)?)?;
    let mut cfg = read_cfg(&mut section.cursor(StreamId::Cfg)?)?;
    let ssa_names = read_ssa_names(&mut reader, &mut section.cursor(StreamId::SsaNames)?)?;
    reader.scope_mut("ssa names")?.ssa_names = ssa_names;

    let mut main = section.cursor(StreamId::Main)?;
    let tag = main.read_u8()?;
    if tag != tags::FUNCTION {
        return Err(StreamError::UnknownTag {
            tag: u64::from(tag),
            context: "function record",
        });
    }
    let mut body = FunctionBody::new(function);
    flags::unpack(&[flags::FUNCTION_BODY], main.read_uleb()?, &mut body.flags);
    body.static_chain = reader.read_tree(&mut main)?;
    body.nonlocal_goto_save_area = reader.read_tree(&mut main)?;
    body.eh = match main.read_u8()? {
        tags::NULL => None,
        tags::EH_TABLE => Some(reader.read_eh_table(&mut main)?),
        tag => {
            return Err(StreamError::UnknownTag {
                tag: u64::from(tag),
                context: "eh table",
            })
        }
    };
    body.arguments = reader.read_tree(&mut main)?;
    reader.read_blocks(&mut main, &mut cfg)?;
    body.cfg = cfg;

    for index in 0..u64::from(counts.num_local_decls) {
        reader.local(index)?;
    }
    let scope = reader
        .scope
        .take()
        .ok_or_else(|| StreamError::consistency("function scope lost while reading"))?;
    let mut positions = scope.positions;
    positions.sort_by_key(|&(position, _)| position);
    body.local_decls = positions.into_iter().map(|(_, decl)| decl).collect();
    body.ssa_names = scope.ssa_names;

    debug!(
        "read body of {function}: {} blocks, {} locals, {} ssa names",
        body.cfg.num_blocks(),
        counts.num_local_decls,
        body.ssa_names.len()
    );
    if verify {
        body.verify()?;
    }
    Ok(body)
}

fn read_ssa_names(
    reader: &mut TreeReader<'_, '_>,
    cursor: &mut InputCursor<'_>,
) -> Result<Vec<Option<NodeId>>> {
    let len = cursor.read_uleb()?;
    let len = cursor.check_count("ssa name", len, MAX_UNWRITTEN_SSA_NAMES)?;
    let mut names = vec![None; len.max(1)];
    loop {
        let version = cursor.read_u32()?;
        if version == 0 {
            return Ok(names);
        }
        let var = reader.read_tree(cursor)?;
        let packed = cursor.read_uleb()?;
        let slot = names
            .get_mut(version as usize)
            .ok_or(StreamError::out_of_range("ssa name", version, len))?;
        let ty = var.and_then(|v| reader.program.arena[v].ty);
        let mut node = Node::new(TreeCode::SsaName).with_type(ty);
        flags::unpack(tree_groups(TreeCode::SsaName), packed, &mut node.flags);
        node.data = NodeData::Ssa { version, var };
        *slot = Some(reader.program.arena.alloc(node));
    }
}
