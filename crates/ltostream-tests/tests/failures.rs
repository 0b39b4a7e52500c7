//! Malformed and conflicting input stops the link with a diagnostic.

use anyhow::Result;
use ltostream::header::{write_section, BodyCounts, SectionKind, SectionReader, StreamId};
use ltostream::pickle::tags;
use ltostream::section::{emit_section, CGRAPH_SECTION, DECLS_SECTION};
use ltostream::stream::{InputCursor, OutputStream};
use ltostream::{link, FakeResolution, LtoOptions, MemoryObject, ResolutionMap, StreamError};
use ltostream_tests::{arith_unit, function_decl, give_body, static_f_unit, write_object};
use ltoir::{Program, TreeCode};
use test_log::test;

/// Copy `object`, passing section `name` through `edit`.
fn edited(object: &MemoryObject, name: &str, edit: impl Fn(&mut Vec<u8>)) -> Result<MemoryObject> {
    let mut copy = MemoryObject::new(object.name());
    for section in object.section_names() {
        let mut bytes = object.section(section).unwrap_or_default().to_vec();
        if section == name {
            edit(&mut bytes);
        }
        emit_section(&mut copy, section, &bytes)?;
    }
    Ok(copy)
}

/// Rebuild a function-body section after `edit` has changed its header
/// counts or the bytes of its streams.
fn reframed(bytes: &mut Vec<u8>, edit: impl Fn(&mut BodyCounts, &mut [Vec<u8>])) {
    let kind = SectionKind::FunctionBody;
    let section = SectionReader::parse(bytes, kind).unwrap();
    let mut counts = section.header.counts;
    let mut raw: Vec<Vec<u8>> = kind
        .streams()
        .iter()
        .map(|&id| section.bytes(id).unwrap().to_vec())
        .collect();
    edit(&mut counts, &mut raw);
    let streams: Vec<OutputStream> = kind
        .streams()
        .iter()
        .zip(&raw)
        .map(|(id, data)| {
            let mut stream = id.output();
            stream.write_bytes(data);
            stream
        })
        .collect();
    *bytes = write_section(kind, counts, &streams).unwrap();
}

fn stream_index(id: StreamId) -> usize {
    SectionKind::FunctionBody
        .streams()
        .iter()
        .position(|&s| s == id)
        .unwrap()
}

/// Link the compute unit with its body section replaced.
fn link_with_body(edit: impl Fn(&mut BodyCounts, &mut [Vec<u8>])) -> Result<anyhow::Error> {
    let object = write_object("compute.o", &arith_unit().program)?;
    let object = edited(&object, ".gnu.lto_compute", |bytes| reframed(bytes, &edit))?;
    let err = link(&[&object], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert_eq!(object.outstanding(), 0);
    Ok(err)
}

fn stream_error(err: &anyhow::Error) -> &StreamError {
    err.downcast_ref::<StreamError>()
        .unwrap_or_else(|| panic!("not a stream error: {err:#}"))
}

// ── Format errors ──

#[test]
fn newer_major_version_is_rejected() -> Result<()> {
    let object = write_object("compute.o", &arith_unit().program)?;
    let object = edited(&object, DECLS_SECTION, |bytes| bytes[0] = 2)?;
    let err = link(&[&object], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(
        stream_error(&err),
        StreamError::VersionMismatch { major: 2, .. }
    ));
    assert_eq!(object.outstanding(), 0);
    Ok(())
}

#[test]
fn truncated_call_graph_is_rejected() -> Result<()> {
    let object = write_object("compute.o", &arith_unit().program)?;
    let object = edited(&object, CGRAPH_SECTION, |bytes| {
        bytes.truncate(bytes.len() - 1)
    })?;
    let err = link(&[&object], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(stream_error(&err), StreamError::Truncated { .. }));
    assert_eq!(object.outstanding(), 0);
    Ok(())
}

#[test]
fn truncated_body_is_rejected() -> Result<()> {
    let object = write_object("compute.o", &arith_unit().program)?;
    let object = edited(&object, ".gnu.lto_compute", |bytes| bytes.truncate(8))?;
    let err = link(&[&object], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(stream_error(&err), StreamError::Truncated { .. }));
    assert!(format!("{err:#}").contains("compute"), "{err:#}");
    assert_eq!(object.outstanding(), 0);
    Ok(())
}

#[test]
fn missing_body_section_is_reported() -> Result<()> {
    let object = write_object("compute.o", &arith_unit().program)?;
    let mut stripped = MemoryObject::new("compute.o");
    for name in object.section_names().filter(|n| *n != ".gnu.lto_compute") {
        emit_section(&mut stripped, name, object.section(name).unwrap_or_default())?;
    }
    let err = link(&[&stripped], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(stream_error(&err), StreamError::MissingSection(_)));
    Ok(())
}

// ── Oversized counts ──

#[test]
fn oversized_block_count_is_rejected() -> Result<()> {
    let err = link_with_body(|_, streams| {
        let mut cfg = OutputStream::new("cfg");
        cfg.write_uleb(0);
        cfg.write_uleb(u64::from(u32::MAX));
        cfg.write_sleb(-1);
        cfg.write_sleb(-1);
        streams[stream_index(StreamId::Cfg)] = cfg.into_bytes();
    })?;
    assert!(matches!(
        stream_error(&err),
        StreamError::IndexOutOfRange { what: "basic block", .. }
    ));
    Ok(())
}

#[test]
fn oversized_ssa_table_is_rejected() -> Result<()> {
    let err = link_with_body(|_, streams| {
        let mut ssa = OutputStream::new("ssa names");
        ssa.write_uleb(u64::MAX);
        ssa.write_uleb(0);
        streams[stream_index(StreamId::SsaNames)] = ssa.into_bytes();
    })?;
    assert!(matches!(
        stream_error(&err),
        StreamError::IndexOutOfRange { what: "ssa name", .. }
    ));
    Ok(())
}

#[test]
fn oversized_eh_slot_count_is_rejected() -> Result<()> {
    let err = link_with_body(|_, streams| {
        let main = &mut streams[stream_index(StreamId::Main)];
        let mut cursor = InputCursor::new("main", main);
        assert_eq!(cursor.read_u8().unwrap(), tags::FUNCTION);
        cursor.read_uleb().unwrap();
        // No static chain, no nonlocal goto save area.
        assert_eq!(cursor.read_u8().unwrap(), tags::NULL);
        assert_eq!(cursor.read_u8().unwrap(), tags::NULL);
        assert_eq!(cursor.read_u8().unwrap(), tags::EH_TABLE);
        cursor.read_u32().unwrap();
        cursor.read_sleb().unwrap();
        let start = cursor.position();
        cursor.read_u32().unwrap();
        let end = cursor.position();

        let mut count = OutputStream::new("main");
        count.write_uleb(u64::from(u32::MAX));
        let tail = main.split_off(end);
        main.truncate(start);
        main.extend_from_slice(count.as_bytes());
        main.extend(tail);
    })?;
    assert!(matches!(
        stream_error(&err),
        StreamError::IndexOutOfRange { what: "eh region", .. }
    ));
    Ok(())
}

#[test]
fn forged_unnamed_label_count_allocates_nothing() -> Result<()> {
    let unit = arith_unit();
    let object = write_object("compute.o", &unit.program)?;
    let (plain, _) = link(&[&object], FakeResolution, &LtoOptions::default())?;

    let forged = edited(&object, ".gnu.lto_compute", |bytes| {
        reframed(bytes, |counts, _| counts.num_unnamed_labels = u32::MAX)
    })?;
    let (merged, symtab) = link(&[&forged], FakeResolution, &LtoOptions::default())?;
    assert_eq!(merged.arena.len(), plain.arena.len());
    let f = symtab.entry("compute").unwrap().decl;
    assert_eq!(merged.functions[&f].local_decls.len(), 2);
    Ok(())
}

// ── Resolution conflicts ──

#[test]
fn two_strong_definitions_conflict() -> Result<()> {
    let a = write_object("a.o", &static_f_unit("main"))?;
    let b = write_object("b.o", &static_f_unit("main"))?;
    let err = link(&[&a, &b], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(
        stream_error(&err),
        StreamError::AlreadyDefined { symbol } if symbol == "main"
    ));
    assert_eq!(a.outstanding() + b.outstanding(), 0);
    Ok(())
}

#[test]
fn function_and_variable_of_one_name_conflict() -> Result<()> {
    let mut p = Program::new();
    let f = function_decl(&mut p, "shared");
    give_body(&mut p, f, Vec::new());
    let a = write_object("a.o", &p)?;

    let mut q = Program::new();
    let int = q.common.int_type;
    let v = q.build_decl(TreeCode::VarDecl, Some("shared"), Some(int));
    q.arena[v].flags.public = true;
    q.arena[v].flags.external = true;
    q.add_global(v);
    let b = write_object("b.o", &q)?;

    let err = link(&[&a, &b], FakeResolution, &LtoOptions::default()).unwrap_err();
    assert!(matches!(
        stream_error(&err),
        StreamError::SymbolKindConflict { .. }
    ));
    Ok(())
}

#[test]
fn two_prevailing_resolutions_conflict() -> Result<()> {
    let a = write_object("a.o", &static_f_unit("main_a"))?;
    let b = write_object("b.o", &static_f_unit("main_b"))?;
    let map = ResolutionMap::parse(
        "unit a.o\n\
         f LDPR_PREVAILING_DEF\n\
         unit b.o\n\
         f LDPR_PREVAILING_DEF_IRONLY\n",
    )?;
    let err = link(&[&a, &b], map, &LtoOptions::default()).unwrap_err();
    assert!(matches!(
        stream_error(&err),
        StreamError::AlreadyDefined { symbol } if symbol == "f"
    ));
    Ok(())
}

#[test]
fn losing_caller_resolved_elsewhere_is_a_consistency_error() -> Result<()> {
    // b's copy of `main` still calls out, yet the linker neither kept it
    // nor reported it preempted.
    let a = write_object("a.o", &static_f_unit("main"))?;
    let b = write_object("b.o", &static_f_unit("main"))?;
    let map = ResolutionMap::parse(
        "unit a.o\n\
         main PREVAILING_DEF\n\
         unit b.o\n\
         main RESOLVED_IR\n",
    )?;
    let err = link(&[&a, &b], map, &LtoOptions::default()).unwrap_err();
    assert!(matches!(stream_error(&err), StreamError::Consistency(_)));
    assert_eq!(a.outstanding() + b.outstanding(), 0);
    Ok(())
}

#[test]
fn preempted_copy_of_caller_is_dropped() -> Result<()> {
    let a = write_object("a.o", &static_f_unit("main"))?;
    let b = write_object("b.o", &static_f_unit("main"))?;
    let map = ResolutionMap::parse("unit b.o\nmain PREEMPTED_REG\n")?;
    let (merged, symtab) = link(&[&a, &b], map, &LtoOptions::default())?;

    let main = symtab.entry("main").unwrap();
    assert_eq!(main.unit, 0);
    let node = merged.callgraph.node_for_decl(main.decl).unwrap();
    assert_eq!(merged.callgraph.callees(node).count(), 1);
    // Each unit keeps its own private f; only a's is still called.
    let called: Vec<_> = merged.callgraph.edges().iter().map(|e| e.callee).collect();
    assert_eq!(called.len(), 1);
    Ok(())
}
