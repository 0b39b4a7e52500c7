//! Whole-unit pipeline.
//!
//! [`write_unit`] streams one program image into a set of sections.
//! [`ReadSession`] reads any number of units back into one merged program:
//!
//! 1. [`ReadSession::add_unit`] for every unit: declaration tables are read
//!    and each file-scope symbol is resolved and merged;
//! 2. [`ReadSession::read_call_graph`]: every unit's call graph joins the
//!    merged one, edges rebound to prevailing callees;
//! 3. [`ReadSession::fixup`]: references to discarded copies are rewritten;
//! 4. function bodies are read on demand.
//!
//! [`link`] runs all of it with every body loaded.

use crate::body::{read_function_body, write_function_body};
use crate::cgraph::{read_cgraph, write_cgraph};
use crate::decls::{read_decls, write_decls};
use crate::pickle::{DeclCategory, OutDeclState, UnitDecls};
use crate::section::{
    emit_section, section_name, SectionBytes, SectionSink, SectionSource, CGRAPH_SECTION,
    DECLS_SECTION,
};
use crate::header::SectionKind;
use crate::symtab::{ResolutionPolicy, SymbolInfo, SymbolTable};
use anyhow::{anyhow, bail, ensure, Context, Result};
use ltoir::{Availability, CgNodeId, NodeId, Program};
use log::debug;
use std::collections::HashSet;

/// Options for writing and reading units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtoOptions {
    /// Write source positions. When off, no flag word carries position bits.
    pub emit_locations: bool,
    /// Check graph, exception-table and SSA integrity of every body read.
    pub verify: bool,
}

impl Default for LtoOptions {
    fn default() -> Self {
        Self {
            emit_locations: true,
            verify: true,
        }
    }
}

/// Stream `program` into `sink`: one section per function body, then the
/// call graph, then the declaration tables.
///
/// With `set`, only those call-graph nodes and their bodies are written;
/// callees outside it become boundary nodes. Without, the whole call graph
/// and every body are.
pub fn write_unit(
    program: &Program,
    options: &LtoOptions,
    set: Option<&[CgNodeId]>,
    sink: &mut dyn SectionSink,
) -> Result<()> {
    let (set, bodies): (Vec<CgNodeId>, Vec<NodeId>) = match set {
        Some(set) => (
            set.to_vec(),
            set.iter()
                .filter_map(|&id| program.callgraph.node(id))
                .map(|node| node.decl)
                .collect(),
        ),
        None => (
            program.callgraph.node_ids(),
            program.functions.keys().copied().collect(),
        ),
    };

    let mut decls = OutDeclState::new();
    let mut written = HashSet::new();
    for decl in bodies {
        let Some(body) = program.functions.get(&decl) else {
            continue;
        };
        if !written.insert(decl) {
            continue;
        }
        let name = program
            .symbol_name(decl)
            .ok_or_else(|| anyhow!("function {decl} has a body but no name"))?;
        let bytes = write_function_body(program, &mut decls, body, options.emit_locations)
            .with_context(|| format!("failed to write the body of {name}"))?;
        emit_section(sink, &section_name(SectionKind::FunctionBody, Some(name)), &bytes)?;
    }

    let cgraph = write_cgraph(program, &mut decls, &set).context("failed to write the call graph")?;
    emit_section(sink, CGRAPH_SECTION, &cgraph)?;

    let tables = write_decls(program, &mut decls, options.emit_locations)
        .context("failed to write the declaration tables")?;
    emit_section(sink, DECLS_SECTION, &tables)?;

    debug!(
        "wrote unit: {} bodies, {} cgraph nodes, {} globals",
        written.len(),
        set.len(),
        program.globals.len()
    );
    Ok(())
}

struct Unit<'s> {
    source: &'s dyn SectionSource,
    decls: UnitDecls,
    /// Call-graph nodes in section order, `None` for removed ones.
    nodes: Vec<Option<CgNodeId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AddingUnits,
    GraphRead,
    Merged,
}

/// Reads units into one merged program.
pub struct ReadSession<'s, P> {
    program: Program,
    policy: P,
    options: LtoOptions,
    symtab: SymbolTable,
    units: Vec<Unit<'s>>,
    stage: Stage,
}

impl<'s, P: ResolutionPolicy> ReadSession<'s, P> {
    pub fn new(policy: P, options: LtoOptions) -> Self {
        Self {
            program: Program::new(),
            policy,
            options,
            symtab: SymbolTable::new(),
            units: Vec::new(),
            stage: Stage::AddingUnits,
        }
    }

    /// Read the declaration tables of one unit and merge its symbols.
    /// Returns the unit's index.
    pub fn add_unit(&mut self, source: &'s dyn SectionSource) -> Result<usize> {
        ensure!(
            self.stage == Stage::AddingUnits,
            "unit {} added after the call graph was read",
            source.unit_name()
        );
        let unit_name = source.unit_name();
        let section = {
            let bytes = SectionBytes::acquire(source, DECLS_SECTION)?;
            read_decls(&mut self.program, &bytes)
                .with_context(|| format!("failed to read declarations of {unit_name}"))?
        };

        let index = self.units.len();
        let mut seen = HashSet::new();
        let candidates = section
            .globals
            .iter()
            .chain(section.decls.category(DeclCategory::Function))
            .chain(section.decls.category(DeclCategory::Var))
            .copied();
        let mut merged = 0;
        for decl in candidates {
            if !seen.insert(decl) || self.program.is_function_local(decl) {
                continue;
            }
            let Some(info) = SymbolInfo::of(&self.program, decl) else {
                continue;
            };
            let Some(resolution) = self.policy.resolve(unit_name, &info, &self.symtab) else {
                continue;
            };
            self.symtab
                .merge(index, &info, resolution)
                .with_context(|| format!("failed to merge {} from {unit_name}", info.name))?;
            merged += 1;
        }
        for &global in &section.globals {
            self.program.add_global(global);
        }
        debug!(
            "added unit {unit_name}: {} globals, {merged} symbols",
            section.globals.len()
        );

        self.units.push(Unit {
            source,
            decls: section.decls,
            nodes: Vec::new(),
        });
        Ok(index)
    }

    /// Merge the call graph of every unit added so far. No units can be
    /// added afterwards.
    pub fn read_call_graph(&mut self) -> Result<()> {
        ensure!(
            self.stage == Stage::AddingUnits,
            "call graph already read"
        );
        for unit in &mut self.units {
            let unit_name = unit.source.unit_name();
            let bytes = SectionBytes::acquire(unit.source, CGRAPH_SECTION)?;
            unit.nodes = read_cgraph(&mut self.program, &unit.decls, &bytes, &self.symtab)
                .with_context(|| format!("failed to read the call graph of {unit_name}"))?;
        }
        self.stage = Stage::GraphRead;
        Ok(())
    }

    /// Point every reference to a discarded declaration at its prevailing
    /// copy. Returns how many declarations were replaced.
    pub fn fixup(&mut self) -> Result<usize> {
        ensure!(
            self.stage == Stage::GraphRead,
            "declarations can only be merged once, after the call graph"
        );
        let replaced = self
            .symtab
            .apply(&mut self.program, self.units.iter_mut().map(|u| &mut u.decls));
        self.stage = Stage::Merged;
        Ok(replaced)
    }

    /// Load the body of `decl` from the unit that defines it. Loading a
    /// body twice is a no-op.
    pub fn read_function_body(&mut self, decl: NodeId) -> Result<()> {
        ensure!(
            self.stage == Stage::Merged,
            "function bodies are read after declarations are merged"
        );
        if self.program.functions.contains_key(&decl) {
            return Ok(());
        }
        let name = self
            .program
            .symbol_name(decl)
            .ok_or_else(|| anyhow!("function {decl} has no name"))?
            .to_string();
        let unit = self.owner(decl, &name)?;
        let unit = &self.units[unit];
        let unit_name = unit.source.unit_name();

        let section = section_name(SectionKind::FunctionBody, Some(&name));
        let bytes = SectionBytes::acquire(unit.source, &section)?;
        let body = read_function_body(
            &mut self.program,
            &unit.decls,
            decl,
            &bytes,
            self.options.verify,
        )
        .with_context(|| format!("failed to read the body of {name} from {unit_name}"))?;
        self.program.functions.insert(decl, body);
        Ok(())
    }

    /// Load the body of every call-graph node that has one. Returns how
    /// many were loaded.
    pub fn read_all_bodies(&mut self) -> Result<usize> {
        let decls: Vec<NodeId> = self
            .program
            .callgraph
            .nodes()
            .filter(|(_, node)| node.availability != Availability::NotAvailable)
            .filter(|(_, node)| node.clone_of.is_none())
            .map(|(_, node)| node.decl)
            .collect();
        let mut loaded = 0;
        for decl in decls {
            if !self.program.functions.contains_key(&decl) {
                self.read_function_body(decl)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Index of the unit whose body section defines `decl`.
    fn owner(&self, decl: NodeId, name: &str) -> Result<usize> {
        if self.symtab.resolution(decl).is_some() {
            if let Some(entry) = self.symtab.entry(name).filter(|e| e.decl == decl) {
                return Ok(entry.unit);
            }
        }
        self.units
            .iter()
            .position(|u| u.decls.category(DeclCategory::Function).contains(&decl))
            .ok_or_else(|| anyhow!("no unit declares function {name}"))
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn symtab(&self) -> &SymbolTable {
        &self.symtab
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Call-graph nodes of unit `index` in section order; `None` marks a
    /// node removed because its declaration did not prevail.
    pub fn unit_nodes(&self, index: usize) -> &[Option<CgNodeId>] {
        self.units.get(index).map_or(&[], |u| u.nodes.as_slice())
    }

    /// The merged program and symbol table.
    pub fn finish(self) -> Result<(Program, SymbolTable)> {
        if self.stage != Stage::Merged {
            bail!("read session finished before declarations were merged");
        }
        Ok((self.program, self.symtab))
    }
}

/// Read `sources` into one program with every body loaded.
pub fn link<P: ResolutionPolicy>(
    sources: &[&dyn SectionSource],
    policy: P,
    options: &LtoOptions,
) -> Result<(Program, SymbolTable)> {
    let mut session = ReadSession::new(policy, *options);
    for &source in sources {
        session.add_unit(source)?;
    }
    session.read_call_graph()?;
    let replaced = session.fixup()?;
    let bodies = session.read_all_bodies()?;
    debug!(
        "linked {} units: {replaced} declarations replaced, {bodies} bodies",
        session.num_units()
    );
    session.finish()
}
