//! End-to-end link scenarios.

use anyhow::Result;
use ltoir::{EhRegionKind, NodeData, StmtCode, TreeCode, ENTRY_BLOCK, EXIT_BLOCK};
use ltostream::{link, FakeResolution, LtoOptions, ReadSession, Resolution, ResolutionMap};
use ltostream_tests::{arith_unit, inlined_unit, static_f_unit, write_object};
use test_log::test;

// ── Single unit ──

#[test]
fn arithmetic_function_with_try_region() -> Result<()> {
    let unit = arith_unit();
    let object = write_object("compute.o", &unit.program)?;
    let (merged, symtab) = link(&[&object], FakeResolution, &LtoOptions::default())?;

    let f = symtab.entry("compute").unwrap().decl;
    let body = &merged.functions[&f];

    let blocks: Vec<_> = body
        .cfg
        .blocks()
        .filter(|b| b.index != ENTRY_BLOCK && b.index != EXIT_BLOCK)
        .collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].stmts.len(), 1);
    let stmt = &blocks[0].stmts[0];
    assert_eq!(stmt.code, StmtCode::Assign);
    let value = stmt.ops[1].unwrap();
    assert_eq!(merged.arena.code(value), TreeCode::PlusExpr);

    assert_eq!(body.local_decls.len(), 2);
    let initial = |decl: ltoir::NodeId| {
        let init = merged.arena[decl].decl().and_then(|d| d.initial).unwrap();
        match merged.arena[init].data {
            NodeData::Int { low, .. } => low,
            _ => panic!("initializer is not an integer constant"),
        }
    };
    assert_eq!(initial(body.local_decls[0]), 1);
    assert_eq!(initial(body.local_decls[1]), 2);
    let NodeData::Operands(ops) = &merged.arena[value].data else {
        panic!("a + b lost its operands");
    };
    assert_eq!(ops.as_slice(), &[Some(body.local_decls[0]), Some(body.local_decls[1])]);

    let eh = body.eh.as_ref().unwrap();
    assert_eq!(eh.slots.len(), 1);
    let region = eh.region(eh.slots[0].unwrap());
    assert_eq!(
        region.kind,
        EhRegionKind::Try {
            first_catch: None,
            last_catch: None
        }
    );
    Ok(())
}

#[test]
fn locations_can_be_left_out() -> Result<()> {
    let unit = arith_unit();
    let options = LtoOptions {
        emit_locations: false,
        ..LtoOptions::default()
    };
    let mut object = ltostream::MemoryObject::new("compute.o");
    ltostream::write_unit(&unit.program, &options, None, &mut object)?;
    let (merged, symtab) = link(&[&object], FakeResolution, &options)?;

    let f = symtab.entry("compute").unwrap().decl;
    assert_eq!(merged.arena[f].locus, None);
    let body = &merged.functions[&f];
    assert!(body.stmts().all(|s| s.locus.is_none()));
    assert!(body.local_decls.iter().all(|&d| merged.arena[d].locus.is_none()));

    let (with_locations, _) = {
        let object = write_object("compute.o", &unit.program)?;
        link(&[&object], FakeResolution, &LtoOptions::default())?
    };
    let f = with_locations.globals[0];
    assert!(with_locations.arena[f].locus.is_some());
    Ok(())
}

#[test]
fn inline_target_is_fixed_up_after_the_unit() -> Result<()> {
    let object = write_object("inline.o", &inlined_unit())?;
    let (merged, symtab) = link(&[&object], FakeResolution, &LtoOptions::default())?;

    let f = symtab.entry("f").unwrap().decl;
    let g = symtab.entry("g").unwrap().decl;
    let f_node = merged.callgraph.node_for_decl(f).unwrap();
    let g_node = merged.callgraph.node_for_decl(g).unwrap();
    let g_info = merged.callgraph.node(g_node).unwrap();
    assert_eq!(g_info.global.inlined_to, Some(f_node));
    assert!(g_info.global.inlined);
    assert!(merged.callgraph.node(f_node).unwrap().global.inlined_to.is_none());
    Ok(())
}

// ── Two units ──

fn static_f_resolution() -> ResolutionMap {
    let mut map = ResolutionMap::new();
    map.insert("a.o", "f", Resolution::PrevailingDef);
    map.insert("b.o", "f", Resolution::Preempted);
    map
}

#[test]
fn static_f_rebinds_to_prevailing_copy() -> Result<()> {
    let a = write_object("a.o", &static_f_unit("main_a"))?;
    let b = write_object("b.o", &static_f_unit("main_b"))?;

    let mut session = ReadSession::new(static_f_resolution(), LtoOptions::default());
    session.add_unit(&a)?;
    session.add_unit(&b)?;
    session.read_call_graph()?;

    let f_entry = session.symtab().entry("f").unwrap().clone();
    assert_eq!(f_entry.unit, 0);
    assert_eq!(f_entry.resolution, Resolution::PrevailingDef);

    let program = session.program();
    let f_a = program.callgraph.node_for_decl(f_entry.decl).unwrap();
    assert_eq!(session.unit_nodes(1)[0], None, "b's f is removed");
    let f_nodes: Vec<_> = program
        .callgraph
        .nodes()
        .filter(|(_, n)| program.symbol_name(n.decl) == Some("f"))
        .collect();
    assert_eq!(f_nodes.len(), 1);

    for caller in ["main_a", "main_b"] {
        let decl = session.symtab().entry(caller).unwrap().decl;
        let node = program.callgraph.node_for_decl(decl).unwrap();
        let callees: Vec<_> = program.callgraph.callees(node).map(|e| e.callee).collect();
        assert_eq!(callees, vec![f_a], "{caller} calls a's f");
    }

    assert_eq!(session.fixup()?, 1);
    session.read_all_bodies()?;
    let (merged, _) = session.finish()?;

    // The call in b's main now names a's f.
    let main_b = merged
        .globals
        .iter()
        .copied()
        .find(|&g| merged.symbol_name(g) == Some("main_b"))
        .unwrap();
    let call = merged.functions[&main_b].stmts().next().unwrap();
    let addr = call.ops[1].unwrap();
    let NodeData::Operands(ops) = &merged.arena[addr].data else {
        panic!("call target is not an address");
    };
    assert_eq!(ops[0], Some(f_entry.decl));
    assert!(merged.functions.contains_key(&f_entry.decl));
    assert_eq!(a.outstanding() + b.outstanding(), 0);
    Ok(())
}

#[test]
fn private_statics_stay_apart_without_resolution() -> Result<()> {
    let a = write_object("a.o", &static_f_unit("main_a"))?;
    let b = write_object("b.o", &static_f_unit("main_b"))?;
    let (merged, symtab) = link(&[&a, &b], FakeResolution, &LtoOptions::default())?;

    assert!(symtab.entry("f").is_none());
    let f_nodes = merged
        .callgraph
        .nodes()
        .filter(|(_, n)| merged.symbol_name(n.decl) == Some("f"))
        .count();
    assert_eq!(f_nodes, 2);
    Ok(())
}
