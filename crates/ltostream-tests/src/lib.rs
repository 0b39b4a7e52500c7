//! Program fixtures for the end-to-end tests.
//!
//! Each builder returns a complete [`Program`] ready for
//! [`ltostream::write_unit`], plus the handles the tests look at afterwards.

use ltoir::{
    Availability, CgNodeId, CgraphEdge, EhRegionKind, EhTable, FunctionBody, Locus, NodeId,
    Program, Stmt, StmtCode, TreeCode, TypeData, ENTRY_BLOCK, EXIT_BLOCK,
};
use ltostream::{write_unit, LtoOptions, MemoryObject};

/// Stream `program` into a fresh in-memory object called `name`.
pub fn write_object(name: &str, program: &Program) -> anyhow::Result<MemoryObject> {
    let mut object = MemoryObject::new(name);
    write_unit(program, &LtoOptions::default(), None, &mut object)?;
    Ok(object)
}

/// `void name(void)`, public.
pub fn function_decl(p: &mut Program, name: &str) -> NodeId {
    let void = p.common.void_type;
    let fn_type = p.build_type(TreeCode::FunctionType, Some(void), TypeData::default());
    let f = p.build_decl(TreeCode::FunctionDecl, Some(name), Some(fn_type));
    p.arena[f].flags.public = true;
    p.add_global(f);
    f
}

/// A body for `f` with one block holding `stmts`, and an available
/// call-graph node.
pub fn give_body(p: &mut Program, f: NodeId, stmts: Vec<Stmt>) -> CgNodeId {
    let mut body = FunctionBody::new(f);
    let bb = body.cfg.add_block();
    body.cfg.add_edge(ENTRY_BLOCK, bb, 1);
    body.cfg.add_edge(bb, EXIT_BLOCK, 0);
    if let Some(block) = body.cfg.block_mut(bb) {
        block.stmts = stmts;
    }
    p.functions.insert(f, body);
    let node = p.callgraph.get_or_create(f);
    if let Some(n) = p.callgraph.node_mut(node) {
        n.availability = Availability::Available;
    }
    node
}

/// A call statement `callee ()` with call-site `uid`, plus its edge.
pub fn call(p: &mut Program, caller: NodeId, callee: NodeId, uid: u32) -> Stmt {
    let addr = p.build_addr(callee);
    let from = p.callgraph.get_or_create(caller);
    let to = p.callgraph.get_or_create(callee);
    p.callgraph.add_edge(CgraphEdge::new(from, to, uid));
    Stmt::new(StmtCode::Call, uid, vec![None, Some(addr)])
}

pub struct ArithUnit {
    pub program: Program,
    pub function: NodeId,
    pub a: NodeId,
    pub b: NodeId,
}

/// ```c
/// int compute(void) { int a = 1, b = 2; try { a = a + b; } catch {} }
/// ```
/// The try region has no catch handlers yet.
pub fn arith_unit() -> ArithUnit {
    let mut p = Program::new();
    let int = p.common.int_type;
    let fn_type = p.build_type(TreeCode::FunctionType, Some(int), TypeData::default());
    let f = p.build_decl(TreeCode::FunctionDecl, Some("compute"), Some(fn_type));
    p.arena[f].flags.public = true;
    p.arena[f].locus = Some(Locus::new("compute.c", 1, 5));
    p.add_global(f);

    let one = p.common.integer_one;
    let two = p.int_cst(int, 2);
    let mut local = |name: &str, init: NodeId, line: u32| {
        let v = p.build_decl(TreeCode::VarDecl, Some(name), Some(int));
        p.arena[v].locus = Some(Locus::new("compute.c", line, 7));
        if let Some(d) = p.arena[v].decl_mut() {
            d.context = Some(f);
            d.initial = Some(init);
        }
        v
    };
    let a = local("a", one, 2);
    let b = local("b", two, 2);
    let sum = p.build_expr(TreeCode::PlusExpr, Some(int), &[a, b]);

    let mut eh = EhTable::new();
    eh.add_region(
        EhRegionKind::Try {
            first_catch: None,
            last_catch: None,
        },
        None,
    );
    let mut assign = Stmt::new(StmtCode::Assign, 1, vec![Some(a), Some(sum)]);
    assign.locus = Some(Locus::new("compute.c", 3, 11));

    give_body(&mut p, f, vec![assign]);
    if let Some(body) = p.functions.get_mut(&f) {
        body.local_decls = vec![a, b];
        body.eh = Some(eh);
    }
    ArithUnit {
        program: p,
        function: f,
        a,
        b,
    }
}

/// One unit of the two-unit static `f` scenario: a file-scope static `f`
/// and a public `caller_name` that calls it.
pub fn static_f_unit(caller_name: &str) -> Program {
    let mut p = Program::new();
    let f = function_decl(&mut p, "f");
    p.arena[f].flags.public = false;
    p.arena[f].flags.is_static = true;
    give_body(&mut p, f, Vec::new());

    let caller = function_decl(&mut p, caller_name);
    let stmt = call(&mut p, caller, f, 1);
    give_body(&mut p, caller, vec![stmt]);
    p
}

/// `g` inlined into `f`, with `g`'s call-graph node created first so its
/// inline target comes later in the section.
pub fn inlined_unit() -> Program {
    let mut p = Program::new();
    let g = function_decl(&mut p, "g");
    let f = function_decl(&mut p, "f");
    let g_node = give_body(&mut p, g, Vec::new());
    let stmt = call(&mut p, f, g, 7);
    let f_node = give_body(&mut p, f, vec![stmt]);
    if let Some(node) = p.callgraph.node_mut(g_node) {
        node.global.inlined_to = Some(f_node);
        node.global.inlined = true;
    }
    p
}

/// `struct node { struct node *next; int value; } head, tail;` with both
/// variables sharing the record type and the record pointing at itself.
pub fn linked_list_unit() -> Program {
    let mut p = Program::new();
    let int = p.common.int_type;
    let rec = p.build_type(TreeCode::RecordType, None, TypeData::default());
    let ptr = p.build_type(TreeCode::PointerType, Some(rec), TypeData::default());
    let next = p.build_decl(TreeCode::FieldDecl, Some("next"), Some(ptr));
    let value = p.build_decl(TreeCode::FieldDecl, Some("value"), Some(int));
    let tdecl = p.build_decl(TreeCode::TypeDecl, Some("node"), Some(rec));
    for field in [next, value] {
        if let Some(d) = p.arena[field].decl_mut() {
            d.context = Some(rec);
        }
    }
    if let Some(d) = p.arena[next].decl_mut() {
        d.chain = Some(value);
    }
    if let Some(t) = p.arena[rec].type_data_mut() {
        t.values = Some(next);
        t.name = Some(tdecl);
    }
    for name in ["head", "tail"] {
        let v = p.build_decl(TreeCode::VarDecl, Some(name), Some(rec));
        p.arena[v].flags.public = true;
        p.add_global(v);
    }
    p
}
