use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ltoir::Program;
use ltostream::decls::read_decls;
use ltostream::header::SectionReader;
use ltostream::section::{section_kind, DECLS_SECTION};
use ltostream::symtab::SymbolInfo;
use ltostream::{link, write_unit, LtoOptions, MemoryObject, ResolutionMap, SectionSource};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// ltostream: inspect and link streamed IR objects.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Do not write source positions
    #[arg(long, global = true)]
    no_locations: bool,

    /// Skip integrity checks on bodies read back
    #[arg(long, global = true)]
    no_verify: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the sections and global symbols of one object
    Inspect {
        object: PathBuf,
    },
    /// Merge objects and print the prevailing symbols and call graph
    Link {
        #[arg(required = true)]
        objects: Vec<PathBuf>,

        /// Linker resolution file
        #[arg(long)]
        resolution: Option<PathBuf>,

        /// Write the merged unit to this object
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    fn options(&self) -> LtoOptions {
        LtoOptions {
            emit_locations: !self.no_locations,
            verify: !self.no_verify,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(&cli, &mut io::stdout().lock())
}

fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Inspect { object } => {
            let object = MemoryObject::load(object)
                .with_context(|| format!("failed to load {}", object.display()))?;
            inspect(&object, out)
        }
        Command::Link {
            objects,
            resolution,
            output,
        } => {
            let policy = match resolution {
                Some(path) => {
                    let text = fs::read_to_string(path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    ResolutionMap::parse(&text)
                        .with_context(|| format!("failed to parse {}", path.display()))?
                }
                None => ResolutionMap::new(),
            };
            let loaded = objects
                .iter()
                .map(|path| {
                    MemoryObject::load(path)
                        .with_context(|| format!("failed to load {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            let sources: Vec<&dyn SectionSource> =
                loaded.iter().map(|o| o as &dyn SectionSource).collect();

            let options = cli.options();
            let (program, symtab) = link(&sources, policy, &options).context("link failed")?;

            writeln!(out, "symbols:")?;
            for (name, entry) in symtab.symbols() {
                writeln!(
                    out,
                    "  {name} {} {} from {}",
                    entry.kind,
                    entry.resolution,
                    sources[entry.unit].unit_name()
                )?;
            }
            print_call_graph(&program, out)?;

            if let Some(path) = output {
                let mut merged = MemoryObject::new(path.display().to_string());
                write_unit(&program, &options, None, &mut merged)
                    .context("failed to write the merged unit")?;
                merged
                    .save(path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                writeln!(out, "wrote {}", path.display())?;
            }
            Ok(())
        }
    }
}

fn inspect(object: &MemoryObject, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}:", object.name())?;
    for name in object.section_names() {
        let Some(kind) = section_kind(name) else {
            writeln!(out, "  {name}: not an LTO section")?;
            continue;
        };
        let bytes = object.section(name).unwrap_or_default();
        let section = SectionReader::parse(bytes, kind)
            .with_context(|| format!("bad section {name}"))?;
        let header = &section.header;
        let sizes = kind
            .streams()
            .iter()
            .zip(&header.stream_sizes)
            .map(|(id, size)| format!("{} {size}", id.name()))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            out,
            "  {name}: {kind} v{}.{}, {} bytes ({sizes})",
            header.major,
            header.minor,
            bytes.len()
        )?;
    }

    let Some(decls) = object.section(DECLS_SECTION) else {
        return Ok(());
    };
    let mut program = Program::new();
    let section = read_decls(&mut program, decls).context("failed to read declarations")?;
    writeln!(out, "globals:")?;
    for &decl in &section.globals {
        match SymbolInfo::of(&program, decl) {
            Some(info) => {
                let mut attrs = Vec::new();
                if info.public {
                    attrs.push("public");
                }
                if info.external {
                    attrs.push("external");
                }
                if info.weak {
                    attrs.push("weak");
                }
                writeln!(out, "  {} {} [{}]", info.kind, info.name, attrs.join(", "))?;
            }
            None => writeln!(out, "  {}", program.arena.code(decl))?,
        }
    }
    Ok(())
}

fn print_call_graph(program: &Program, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "call graph:")?;
    let name = |id| {
        program
            .callgraph
            .node(id)
            .and_then(|n| program.symbol_name(n.decl))
            .unwrap_or("<anonymous>")
    };
    for (id, node) in program.callgraph.nodes() {
        writeln!(out, "  {} ({:?})", name(id), node.availability)?;
        for edge in program.callgraph.callees(id) {
            writeln!(out, "    -> {} (call {})", name(edge.callee), edge.stmt_uid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltoir::TreeCode;

    fn unit_with_counter(path: &std::path::Path) {
        let mut p = Program::new();
        let int = p.common.int_type;
        let counter = p.build_decl(TreeCode::VarDecl, Some("counter"), Some(int));
        p.arena[counter].flags.public = true;
        p.add_global(counter);
        let mut obj = MemoryObject::new("unit.o");
        write_unit(&p, &LtoOptions::default(), None, &mut obj).unwrap();
        obj.save(path).unwrap();
    }

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["ltostream", "inspect", "a.lto"]);
        assert!(matches!(cli.command, Command::Inspect { .. }));
        assert_eq!(cli.options(), LtoOptions::default());
    }

    #[test]
    fn cli_parses_link_flags() {
        let cli = Cli::parse_from([
            "ltostream",
            "link",
            "a.lto",
            "b.lto",
            "--resolution",
            "res.txt",
            "--no-verify",
        ]);
        let Command::Link {
            objects,
            resolution,
            output,
        } = &cli.command
        else {
            panic!("expected link");
        };
        assert_eq!(objects.len(), 2);
        assert_eq!(resolution.as_deref(), Some(std::path::Path::new("res.txt")));
        assert!(output.is_none());
        assert!(!cli.options().verify);
        assert!(cli.options().emit_locations);
    }

    #[test]
    fn cli_link_requires_objects() {
        assert!(Cli::try_parse_from(["ltostream", "link"]).is_err());
    }

    #[test]
    fn inspect_lists_sections_and_globals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.lto");
        unit_with_counter(&path);

        let cli = Cli::parse_from(["ltostream", "inspect", path.to_str().unwrap()]);
        let mut out = Vec::new();
        run(&cli, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(".gnu.lto_.decls: decls v1.0"), "{text}");
        assert!(text.contains(".gnu.lto_.cgraph: cgraph v1.0"), "{text}");
        assert!(text.contains("variable counter [public]"), "{text}");
    }

    #[test]
    fn link_writes_merged_unit() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("unit.lto");
        let merged = dir.path().join("merged.lto");
        unit_with_counter(&input);

        let cli = Cli::parse_from([
            "ltostream",
            "link",
            input.to_str().unwrap(),
            "-o",
            merged.to_str().unwrap(),
        ]);
        let mut out = Vec::new();
        run(&cli, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("counter variable PREVAILING_DEF from unit.lto"), "{text}");

        let object = MemoryObject::load(&merged).unwrap();
        assert!(object.section(DECLS_SECTION).is_some());
    }
}
