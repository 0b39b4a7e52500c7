//! Units saved to disk and linked back from the files.

use ltoir::equiv::Equivalence;
use ltoir::{Availability, CgraphEdge, FunctionBody, Program, Stmt, StmtCode, TreeCode};
use ltoir::{ENTRY_BLOCK, EXIT_BLOCK};
use ltostream::{
    link, write_unit, LtoOptions, MemoryObject, Resolution, ResolutionMap, SectionSource,
};
use std::fs;
use test_log::test;

/// `name` with an empty one-block body, calling each of `callees`.
fn define(p: &mut Program, name: &str, weak: bool, callees: &[ltoir::NodeId]) -> ltoir::NodeId {
    let void = p.common.void_type;
    let fn_type = p.build_type(TreeCode::FunctionType, Some(void), Default::default());
    let f = p.build_decl(TreeCode::FunctionDecl, Some(name), Some(fn_type));
    p.arena[f].flags.public = true;
    p.arena[f].flags.weak = weak;
    p.add_global(f);

    let mut body = FunctionBody::new(f);
    let bb = body.cfg.add_block();
    body.cfg.add_edge(ENTRY_BLOCK, bb, 1);
    body.cfg.add_edge(bb, EXIT_BLOCK, 0);
    let node = p.callgraph.get_or_create(f);
    p.callgraph.node_mut(node).unwrap().availability = Availability::Available;
    for (uid, &callee) in callees.iter().enumerate() {
        let uid = uid as u32 + 1;
        let addr = p.build_addr(callee);
        body.cfg
            .block_mut(bb)
            .unwrap()
            .stmts
            .push(Stmt::new(StmtCode::Call, uid, vec![None, Some(addr)]));
        let to = p.callgraph.get_or_create(callee);
        p.callgraph.add_edge(CgraphEdge::new(node, to, uid));
    }
    p.functions.insert(f, body);
    f
}

fn save(dir: &std::path::Path, name: &str, p: &Program) -> std::path::PathBuf {
    let mut object = MemoryObject::new(name);
    write_unit(p, &LtoOptions::default(), None, &mut object).unwrap();
    let path = dir.join(name);
    object.save(&path).unwrap();
    path
}

#[test]
fn weak_definitions_keep_the_first_copy() {
    let dir = tempfile::tempdir().unwrap();

    let mut a = Program::new();
    let hook_a = define(&mut a, "hook", true, &[]);
    define(&mut a, "main", false, &[hook_a]);
    let mut b = Program::new();
    let hook_b = define(&mut b, "hook", true, &[]);
    define(&mut b, "run", false, &[hook_b]);

    let paths = [save(dir.path(), "a.o", &a), save(dir.path(), "b.o", &b)];
    let objects: Vec<MemoryObject> = paths.iter().map(|p| MemoryObject::load(p).unwrap()).collect();
    let sources: Vec<&dyn SectionSource> = objects.iter().map(|o| o as &dyn SectionSource).collect();
    let (merged, symtab) = link(&sources, ResolutionMap::new(), &LtoOptions::default()).unwrap();

    let hook = symtab.entry("hook").unwrap();
    assert_eq!(hook.unit, 0);
    let hook_node = merged.callgraph.node_for_decl(hook.decl).unwrap();
    assert_eq!(merged.callgraph.callers(hook_node).count(), 2);

    let mut eq = Equivalence::new(&a.arena, &merged.arena);
    assert!(eq.check(Some(hook_a), Some(hook.decl)), "{:?}", eq.mismatch());
    assert_eq!(merged.functions.len(), 3);
}

#[test]
fn resolution_file_picks_the_second_copy() {
    let dir = tempfile::tempdir().unwrap();

    let mut a = Program::new();
    let hook_a = define(&mut a, "hook", true, &[]);
    define(&mut a, "main", false, &[hook_a]);
    let mut b = Program::new();
    define(&mut b, "hook", true, &[]);

    let paths = [save(dir.path(), "a.o", &a), save(dir.path(), "b.o", &b)];
    let resolution = dir.path().join("res.txt");
    fs::write(
        &resolution,
        "# hook comes from b\nunit a.o\nhook PREEMPTED_IR\nunit b.o\nhook PREVAILING_DEF_IRONLY\n",
    )
    .unwrap();

    let map = ResolutionMap::parse(&fs::read_to_string(&resolution).unwrap()).unwrap();
    assert_eq!(map.get("a.o", "hook"), Some(Resolution::Preempted));
    let objects: Vec<MemoryObject> = paths.iter().map(|p| MemoryObject::load(p).unwrap()).collect();
    let sources: Vec<&dyn SectionSource> = objects.iter().map(|o| o as &dyn SectionSource).collect();
    let (merged, symtab) = link(&sources, map, &LtoOptions::default()).unwrap();

    let hook = symtab.entry("hook").unwrap();
    assert_eq!(hook.unit, 1);
    assert_eq!(hook.resolution, Resolution::PrevailingDefIronly);
    let main = symtab.entry("main").unwrap().decl;
    let main_node = merged.callgraph.node_for_decl(main).unwrap();
    let edge = merged.callgraph.callees(main_node).next().unwrap();
    assert_eq!(merged.callgraph.node(edge.callee).unwrap().decl, hook.decl);
    assert!(objects.iter().all(|o| o.outstanding() == 0));
}
