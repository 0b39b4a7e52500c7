//! Declarations section.
//!
//! Holds the unit's declaration tables, one per [`DeclCategory`] in
//! [`DeclCategory::ALL`] order, each a count followed by that many pickled
//! trees, and then the unit's file-scope declarations. All of it is written
//! in global scope through one back-reference table, so a type shared by two
//! tables is written once.
//!
//! Function bodies and the call graph add to the tables while they are
//! written, which is why this section goes out last.

use crate::codec::{TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::header::{write_section, BodyCounts, SectionKind, SectionReader, StreamId};
use crate::pickle::{DeclCategory, OutDeclState, UnitDecls};
use crate::strings::StringReader;
use ltoir::{NodeId, Program};
use log::debug;

/// A decoded declarations section.
#[derive(Debug, Clone, Default)]
pub struct DeclsSection {
    pub decls: UnitDecls,
    /// The unit's file-scope declarations, in declaration order.
    pub globals: Vec<NodeId>,
}

/// Serialize the unit's declaration tables. Every file-scope declaration of
/// `program` is added to its table first.
pub fn write_decls(
    program: &Program,
    decls: &mut OutDeclState,
    emit_locations: bool,
) -> Result<Vec<u8>> {
    for &global in &program.globals {
        let code = program.arena.code(global);
        let category = DeclCategory::for_code(code).ok_or_else(|| {
            StreamError::consistency(format!("{global}: {code} cannot be a file-scope declaration"))
        })?;
        decls.encode(category, global);
    }

    let snapshot = decls.clone();
    let mut writer = TreeWriter::new(program, decls, emit_locations);
    let mut main = StreamId::Main.output();
    for category in DeclCategory::ALL {
        let trees = snapshot.category(category).trees();
        main.write_uleb(trees.len() as u64);
        for &tree in trees {
            writer.write_tree(&mut main, Some(tree))?;
        }
    }
    main.write_uleb(program.globals.len() as u64);
    for &global in &program.globals {
        writer.write_tree(&mut main, Some(global))?;
    }

    debug!(
        "decls: {} functions, {} variables, {} types, {} globals",
        snapshot.category(DeclCategory::Function).len(),
        snapshot.category(DeclCategory::Var).len(),
        snapshot.category(DeclCategory::Type).len(),
        program.globals.len()
    );
    let strings = writer.strings.into_stream();
    write_section(
        SectionKind::Decls,
        BodyCounts::default(),
        &[StreamId::NamedLabels.output(), main, strings],
    )
}

/// Read a section written by [`write_decls`] into `program`.
pub fn read_decls(program: &mut Program, data: &[u8]) -> Result<DeclsSection> {
    let section = SectionReader::parse(data, SectionKind::Decls)?;
    let strings = StringReader::new(section.bytes(StreamId::Strings)?);
    let empty = UnitDecls::new();
    let mut reader = TreeReader::new(program, &empty, strings);
    let mut main = section.cursor(StreamId::Main)?;

    let mut out = DeclsSection::default();
    for category in DeclCategory::ALL {
        for _ in 0..main.read_uleb()? {
            let tree = reader.read_tree_required(&mut main, category.name())?;
            out.decls.push(category, tree);
        }
    }
    for _ in 0..main.read_uleb()? {
        out.globals
            .push(reader.read_tree_required(&mut main, "file-scope declaration")?);
    }
    if !main.is_at_end() {
        return Err(StreamError::consistency(format!(
            "{} trailing bytes after the declaration tables",
            data.len() - main.position()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltoir::equiv::Equivalence;
    use ltoir::{TreeCode, TypeData};

    // ── Fixtures ──

    /// `struct node { struct node *next; } head; int count(struct node *);`
    fn linked_list() -> (Program, NodeId, NodeId) {
        let mut p = Program::new();
        let rec = p.build_type(TreeCode::RecordType, None, TypeData::default());
        let ptr = p.build_type(TreeCode::PointerType, Some(rec), TypeData::default());
        let field = p.build_decl(TreeCode::FieldDecl, Some("next"), Some(ptr));
        let tdecl = p.build_decl(TreeCode::TypeDecl, Some("node"), Some(rec));
        if let Some(t) = p.arena[rec].type_data_mut() {
            t.values = Some(field);
            t.name = Some(tdecl);
        }
        p.arena[field].decl_mut().unwrap().context = Some(rec);

        let head = p.build_decl(TreeCode::VarDecl, Some("head"), Some(rec));
        p.arena[head].flags.public = true;
        let int = p.common.int_type;
        let fn_type = p.build_type(TreeCode::FunctionType, Some(int), TypeData::default());
        let count = p.build_decl(TreeCode::FunctionDecl, Some("count"), Some(fn_type));
        p.arena[count].flags.public = true;
        p.arena[count].flags.external = true;
        p.add_global(head);
        p.add_global(count);
        (p, head, count)
    }

    // ── Round trips ──

    #[test]
    fn test_globals_round_trip_with_cycles() {
        let (p, head, count) = linked_list();
        let mut decls = OutDeclState::new();
        let bytes = write_decls(&p, &mut decls, true).unwrap();

        let mut q = Program::new();
        let read = read_decls(&mut q, &bytes).unwrap();
        assert_eq!(read.globals.len(), 2);

        let mut eq = Equivalence::new(&p.arena, &q.arena);
        assert!(eq.check(Some(head), Some(read.globals[0])), "{:?}", eq.mismatch());
        assert!(eq.check(Some(count), Some(read.globals[1])), "{:?}", eq.mismatch());

        let rec = q.arena[read.globals[0]].ty.unwrap();
        let field = q.arena[rec].type_data().unwrap().values.unwrap();
        let ptr = q.arena[field].ty.unwrap();
        assert_eq!(q.arena[ptr].ty, Some(rec));
    }

    #[test]
    fn test_category_tables_keep_body_entries_first() {
        let (p, head, count) = linked_list();
        let mut decls = OutDeclState::new();
        decls.encode(DeclCategory::Function, count);
        let bytes = write_decls(&p, &mut decls, true).unwrap();

        let mut q = Program::new();
        let read = read_decls(&mut q, &bytes).unwrap();
        let functions = read.decls.category(DeclCategory::Function);
        let vars = read.decls.category(DeclCategory::Var);
        assert_eq!(functions, &[read.globals[1]]);
        assert_eq!(vars, &[read.globals[0]]);
        assert_eq!(decls.category(DeclCategory::Var).trees(), &[head]);
    }

    #[test]
    fn test_shared_type_stays_shared() {
        let (mut p, head, _) = linked_list();
        let rec = p.arena[head].ty;
        let tail = p.build_decl(TreeCode::VarDecl, Some("tail"), rec);
        p.add_global(tail);
        let bytes = write_decls(&p, &mut OutDeclState::new(), true).unwrap();

        let mut q = Program::new();
        let read = read_decls(&mut q, &bytes).unwrap();
        let (head, tail) = (read.globals[0], read.globals[2]);
        assert!(q.arena[head].ty.is_some());
        assert_eq!(q.arena[head].ty, q.arena[tail].ty);
    }

    // ── Errors ──

    #[test]
    fn test_expression_cannot_be_global() {
        let mut p = Program::new();
        let one = p.common.integer_one;
        let int = p.common.int_type;
        let sum = p.build_expr(TreeCode::PlusExpr, Some(int), &[one, one]);
        p.add_global(sum);
        let err = write_decls(&p, &mut OutDeclState::new(), true).unwrap_err();
        assert!(matches!(err, StreamError::Consistency(_)));
    }

    #[test]
    fn test_wrong_section_kind_rejected() {
        let bytes = write_section(
            SectionKind::Cgraph,
            BodyCounts::default(),
            &[
                StreamId::NamedLabels.output(),
                StreamId::Main.output(),
                StreamId::Strings.output(),
            ],
        )
        .unwrap();
        let err = read_decls(&mut Program::new(), &bytes).unwrap_err();
        assert!(matches!(err, StreamError::BadSectionKind { .. }));
    }
}
