//! Symbol resolution and merging of file-scope declarations across units.
//!
//! Every unit brings its own copy of each declaration it mentions. A
//! [`ResolutionPolicy`] says which copy of a symbol prevails; the
//! [`SymbolTable`] records the choice per assembler name and, once all units
//! are in, rewrites every reference to a discarded copy so that it points at
//! the prevailing one.

use crate::error::{Result, StreamError};
use crate::pickle::UnitDecls;
use ltoir::{NodeId, Program, TreeCode};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Linker verdict for one copy of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// This copy is the definition the program uses.
    PrevailingDef,
    /// As [`Resolution::PrevailingDef`], but only referenced from IR.
    PrevailingDefIronly,
    /// Defined in another unit or outside the IR.
    ResolvedElsewhere,
    /// Another definition replaces this one.
    Preempted,
}

impl Resolution {
    pub fn is_prevailing(self) -> bool {
        matches!(self, Resolution::PrevailingDef | Resolution::PrevailingDefIronly)
    }

    /// Parse a linker-plugin resolution name, with or without its `LDPR_`
    /// prefix.
    pub fn from_plugin_name(name: &str) -> Option<Self> {
        Some(match name.strip_prefix("LDPR_").unwrap_or(name) {
            "PREVAILING_DEF" => Resolution::PrevailingDef,
            "PREVAILING_DEF_IRONLY" => Resolution::PrevailingDefIronly,
            "PREEMPTED_REG" | "PREEMPTED_IR" => Resolution::Preempted,
            "RESOLVED_IR" | "RESOLVED_EXEC" | "RESOLVED_DYN" | "UNDEF" => {
                Resolution::ResolvedElsewhere
            }
            _ => return None,
        })
    }

    pub fn plugin_name(self) -> &'static str {
        match self {
            Resolution::PrevailingDef => "PREVAILING_DEF",
            Resolution::PrevailingDefIronly => "PREVAILING_DEF_IRONLY",
            Resolution::ResolvedElsewhere => "RESOLVED_IR",
            Resolution::Preempted => "PREEMPTED_IR",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plugin_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Variable,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolKind::Function => "function",
            SymbolKind::Variable => "variable",
        })
    }
}

/// What resolution needs to know about one copy of a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub decl: NodeId,
    pub kind: SymbolKind,
    pub public: bool,
    pub external: bool,
    pub weak: bool,
}

impl SymbolInfo {
    /// The symbol `decl` declares, if it is a named function or variable.
    pub fn of(program: &Program, decl: NodeId) -> Option<Self> {
        let node = program.arena.get(decl)?;
        let kind = match node.code {
            TreeCode::FunctionDecl => SymbolKind::Function,
            TreeCode::VarDecl => SymbolKind::Variable,
            _ => return None,
        };
        Some(Self {
            name: program.symbol_name(decl)?.to_string(),
            decl,
            kind,
            public: node.flags.public,
            external: node.flags.external,
            weak: node.flags.weak,
        })
    }
}

/// Decides which copy of each symbol prevails.
pub trait ResolutionPolicy {
    /// Resolution of `symbol` as seen by `unit`. `None` keeps the symbol
    /// private to its unit: it takes no part in merging.
    fn resolve(
        &mut self,
        unit: &str,
        symbol: &SymbolInfo,
        table: &SymbolTable,
    ) -> Option<Resolution>;
}

/// Resolution derived from the declarations themselves, for links without
/// a linker-supplied resolution.
///
/// Private symbols stay unit-local. Declarations without a definition are
/// resolved elsewhere. The first definition of a weak symbol prevails over
/// later ones; a strong definition always claims to prevail, so two of them
/// end in [`StreamError::AlreadyDefined`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeResolution;

impl ResolutionPolicy for FakeResolution {
    fn resolve(
        &mut self,
        _unit: &str,
        symbol: &SymbolInfo,
        table: &SymbolTable,
    ) -> Option<Resolution> {
        if !symbol.public {
            return None;
        }
        if symbol.external {
            return Some(Resolution::ResolvedElsewhere);
        }
        if !symbol.weak {
            return Some(Resolution::PrevailingDef);
        }
        let claimed = table
            .entry(&symbol.name)
            .is_some_and(|e| e.resolution.is_prevailing() || !e.external);
        Some(if claimed {
            Resolution::Preempted
        } else {
            Resolution::PrevailingDef
        })
    }
}

/// Resolutions read from a resolution file, falling back to
/// [`FakeResolution`] for symbols the file does not mention.
///
/// ```text
/// # comment
/// unit a.o
/// f PREVAILING_DEF
/// unit b.o
/// f PREEMPTED_IR
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolutionMap {
    units: HashMap<String, HashMap<String, Resolution>>,
    fallback: FakeResolution,
}

impl ResolutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: &str, symbol: &str, resolution: Resolution) {
        self.units
            .entry(unit.to_string())
            .or_default()
            .insert(symbol.to_string(), resolution);
    }

    pub fn get(&self, unit: &str, symbol: &str) -> Option<Resolution> {
        self.units.get(unit)?.get(symbol).copied()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut map = Self::new();
        let mut unit: Option<String> = None;
        for (i, raw) in text.lines().enumerate() {
            let line = i + 1;
            let bad = |message: String| StreamError::BadResolution { line, message };
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let words: Vec<&str> = content.split_whitespace().collect();
            match words.as_slice() {
                ["unit", name] => unit = Some((*name).to_string()),
                ["unit", ..] => return Err(bad("expected `unit <name>`".to_string())),
                [symbol, resolution] => {
                    let unit = unit
                        .as_deref()
                        .ok_or_else(|| bad(format!("symbol {symbol} before any unit")))?;
                    let resolution = Resolution::from_plugin_name(resolution)
                        .ok_or_else(|| bad(format!("unknown resolution {resolution}")))?;
                    map.insert(unit, symbol, resolution);
                }
                _ => return Err(bad(format!("expected `<symbol> <resolution>`, got {content:?}"))),
            }
        }
        Ok(map)
    }
}

impl ResolutionPolicy for ResolutionMap {
    fn resolve(
        &mut self,
        unit: &str,
        symbol: &SymbolInfo,
        table: &SymbolTable,
    ) -> Option<Resolution> {
        self.get(unit, &symbol.name)
            .or_else(|| self.fallback.resolve(unit, symbol, table))
    }
}

/// The copy currently chosen for one symbol name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub decl: NodeId,
    pub kind: SymbolKind,
    pub resolution: Resolution,
    pub external: bool,
    /// Index of the unit the copy came from.
    pub unit: usize,
}

/// Merged view of every unit's symbols, keyed by assembler name.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolEntry>,
    /// Names in first-seen order.
    order: Vec<String>,
    /// Every registered copy: its name and resolution.
    copies: HashMap<NodeId, (String, Resolution)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one copy of a symbol.
    pub fn merge(&mut self, unit: usize, symbol: &SymbolInfo, resolution: Resolution) -> Result<()> {
        self.copies
            .insert(symbol.decl, (symbol.name.clone(), resolution));
        let candidate = SymbolEntry {
            decl: symbol.decl,
            kind: symbol.kind,
            resolution,
            external: symbol.external,
            unit,
        };
        let Some(entry) = self.entries.get_mut(&symbol.name) else {
            self.order.push(symbol.name.clone());
            self.entries.insert(symbol.name.clone(), candidate);
            return Ok(());
        };
        if entry.kind != symbol.kind {
            return Err(StreamError::SymbolKindConflict {
                symbol: symbol.name.clone(),
            });
        }
        if resolution.is_prevailing() {
            if entry.resolution.is_prevailing() {
                return Err(StreamError::AlreadyDefined {
                    symbol: symbol.name.clone(),
                });
            }
            *entry = candidate;
        } else if !entry.resolution.is_prevailing() && entry.external && !symbol.external {
            // A definition resolved elsewhere beats a bare declaration.
            *entry = candidate;
        }
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.get(name)
    }

    /// The copy `decl` stands for after merging: the prevailing copy of its
    /// symbol, or `decl` itself when it is not a registered symbol.
    pub fn prevailing(&self, decl: NodeId) -> NodeId {
        self.copies
            .get(&decl)
            .and_then(|(name, _)| self.entries.get(name))
            .map_or(decl, |e| e.decl)
    }

    pub fn is_prevailing(&self, decl: NodeId) -> bool {
        self.prevailing(decl) == decl
    }

    /// The resolution `decl` was registered with.
    pub fn resolution(&self, decl: NodeId) -> Option<Resolution> {
        self.copies.get(&decl).map(|&(_, r)| r)
    }

    /// Chosen copy of every symbol, in first-seen order.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, &SymbolEntry)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| (name.as_str(), e)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discarded copy to prevailing copy, for every copy that lost.
    pub fn replacements(&self) -> HashMap<NodeId, NodeId> {
        self.copies
            .keys()
            .filter_map(|&decl| {
                let to = self.prevailing(decl);
                (to != decl).then_some((decl, to))
            })
            .collect()
    }

    /// Point everything that refers to a discarded copy at the prevailing
    /// one: node fields, the units' declaration tables, the file-scope list
    /// and the call graph. The discarded copies are freed. Returns how many
    /// were replaced.
    pub fn apply<'u>(
        &self,
        program: &mut Program,
        units: impl IntoIterator<Item = &'u mut UnitDecls>,
    ) -> usize {
        let map = self.replacements();
        if map.is_empty() {
            return 0;
        }
        let resolve = |id: NodeId| map.get(&id).copied().unwrap_or(id);

        for id in program.arena.ids() {
            if map.contains_key(&id) {
                continue;
            }
            if let Some(node) = program.arena.get_mut(id) {
                node.for_each_child_mut(|slot| {
                    if let Some(child) = *slot {
                        *slot = Some(resolve(child));
                    }
                });
            }
        }
        for decls in units {
            decls.rewrite(resolve);
        }

        let mut seen = HashSet::new();
        let globals = std::mem::take(&mut program.globals);
        program.globals = globals
            .into_iter()
            .map(resolve)
            .filter(|&g| seen.insert(g))
            .collect();

        for (&from, &to) in &map {
            program.callgraph.replace_decl(from, to);
            program.functions.remove(&from);
            program.arena.free(from);
        }
        debug!("replaced {} non-prevailing declarations", map.len());
        map.len()
    }
}
