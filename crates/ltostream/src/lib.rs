//! ltostream: link-time streaming of tree IR.
//!
//! Writes a [`ltoir::Program`] into self-contained sections and reads any
//! number of them back into one merged program:
//!
//! - [`stream`], [`strings`], [`locus`]: varints, the interned string
//!   table and delta-coded source positions
//! - [`pickle`], [`codec`]: back-referenced node encoding, one layout per
//!   tree code, with flags packed per [`flags`] descriptors
//! - [`body`]: function bodies with their CFG, SSA names, locals and
//!   exception regions
//! - [`decls`], [`cgraph`]: declaration tables and call-graph exchange
//! - [`symtab`]: symbol resolution and merging across units
//! - [`section`], [`header`]: section framing and the object container
//! - [`unit`]: the whole-unit pipeline
//!
//! # Example
//! ```no_run
//! use ltostream::{link, write_unit, FakeResolution, LtoOptions, MemoryObject};
//!
//! let program = ltoir::Program::new();
//! let mut object = MemoryObject::new("a.o");
//! write_unit(&program, &LtoOptions::default(), None, &mut object)?;
//! let (merged, _symbols) = link(&[&object], FakeResolution, &LtoOptions::default())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod body;
pub mod cgraph;
pub mod codec;
pub mod decls;
pub mod error;
pub mod fixup;
pub mod flags;
pub mod header;
pub mod locus;
pub mod pickle;
pub mod section;
pub mod stream;
pub mod strings;
pub mod symtab;
pub mod unit;

pub use error::{Result, StreamError};
pub use section::{MemoryObject, SectionBytes, SectionSink, SectionSource};
pub use symtab::{FakeResolution, Resolution, ResolutionMap, ResolutionPolicy, SymbolTable};
pub use unit::{link, write_unit, LtoOptions, ReadSession};
