//! Named sections of an object file.
//!
//! The streamer never opens object files itself. It writes through a
//! [`SectionSink`] and reads through a [`SectionSource`]; every byte range
//! taken from a source is held in a [`SectionBytes`] guard that hands it
//! back when dropped, on error paths too.
//!
//! [`MemoryObject`] implements both sides in memory and can be saved to a
//! small archive file.

use crate::error::{Result, StreamError};
use crate::header::SectionKind;
use crate::stream::{InputCursor, OutputStream};
use log::debug;
use std::cell::Cell;
use std::fs;
use std::ops::Deref;
use std::path::Path;

pub const SECTION_PREFIX: &str = ".gnu.lto_";
pub const DECLS_SECTION: &str = ".gnu.lto_.decls";
pub const CGRAPH_SECTION: &str = ".gnu.lto_.cgraph";

/// Section name for a section of `kind`. Function bodies are named after
/// the function's assembler name.
pub fn section_name(kind: SectionKind, function: Option<&str>) -> String {
    match kind {
        SectionKind::Decls => DECLS_SECTION.to_string(),
        SectionKind::Cgraph => CGRAPH_SECTION.to_string(),
        SectionKind::FunctionBody => format!("{SECTION_PREFIX}{}", function.unwrap_or_default()),
    }
}

/// Kind of the section called `name`, if it is one of ours.
pub fn section_kind(name: &str) -> Option<SectionKind> {
    match name {
        DECLS_SECTION => Some(SectionKind::Decls),
        CGRAPH_SECTION => Some(SectionKind::Cgraph),
        _ => name
            .strip_prefix(SECTION_PREFIX)
            .filter(|function| !function.is_empty())
            .map(|_| SectionKind::FunctionBody),
    }
}

pub trait SectionSink {
    fn begin_section(&mut self, name: &str) -> Result<()>;
    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    fn end_section(&mut self) -> Result<()>;
}

/// Write `bytes` as one whole section.
pub fn emit_section(sink: &mut dyn SectionSink, name: &str, bytes: &[u8]) -> Result<()> {
    sink.begin_section(name)?;
    sink.append_bytes(bytes)?;
    sink.end_section()?;
    debug!("wrote section {name}: {} bytes", bytes.len());
    Ok(())
}

pub trait SectionSource {
    /// Name of the unit the sections belong to.
    fn unit_name(&self) -> &str;
    /// Bytes of section `name`. Each successful call must be paired with a
    /// [`SectionSource::release_section_bytes`].
    fn get_section_bytes(&self, name: &str) -> Option<&[u8]>;
    fn release_section_bytes(&self, name: &str);
}

/// Bytes of one section, released when dropped.
pub struct SectionBytes<'a> {
    source: &'a dyn SectionSource,
    name: String,
    data: &'a [u8],
}

impl<'a> SectionBytes<'a> {
    pub fn acquire(source: &'a dyn SectionSource, name: &str) -> Result<Self> {
        let data = source.get_section_bytes(name).ok_or_else(|| {
            StreamError::MissingSection(format!("{name} in {}", source.unit_name()))
        })?;
        Ok(Self {
            source,
            name: name.to_string(),
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Deref for SectionBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl Drop for SectionBytes<'_> {
    fn drop(&mut self) {
        self.source.release_section_bytes(&self.name);
    }
}

const MAGIC: &[u8; 8] = b"LTOOBJ01";

/// An object file held in memory: an ordered list of named sections.
#[derive(Debug, Default)]
pub struct MemoryObject {
    name: String,
    sections: Vec<(String, Vec<u8>)>,
    open: Option<(String, Vec<u8>)>,
    /// Sections handed out and not yet released.
    outstanding: Cell<usize>,
}

impl MemoryObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    /// Bytes of a section without acquiring it.
    pub fn section(&self, name: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = OutputStream::new("object");
        out.write_bytes(MAGIC);
        out.write_u32_le(len32(self.sections.len())?);
        for (name, data) in &self.sections {
            out.write_u32_le(len32(name.len())?);
            out.write_bytes(name.as_bytes());
            out.write_u32_le(len32(data.len())?);
            out.write_bytes(data);
        }
        Ok(out.into_bytes())
    }

    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let mut cursor = InputCursor::new("object", data);
        if cursor.read_bytes(MAGIC.len())? != MAGIC {
            return Err(StreamError::consistency("not an LTO object archive"));
        }
        let mut object = Self::new(name);
        for _ in 0..cursor.read_u32_le()? {
            let len = cursor.read_u32_le()? as usize;
            let section = String::from_utf8(cursor.read_bytes(len)?.to_vec())
                .map_err(|_| StreamError::consistency("section name is not UTF-8"))?;
            let len = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(len)?.to_vec();
            object.sections.push((section, bytes));
        }
        Ok(object)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Load an archive; the unit is named after the file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self::from_bytes(name, &data)
    }
}

fn len32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| StreamError::consistency("object member exceeds 4 GiB"))
}

impl SectionSink for MemoryObject {
    fn begin_section(&mut self, name: &str) -> Result<()> {
        if let Some((open, _)) = &self.open {
            return Err(StreamError::consistency(format!(
                "section {name} begun while {open} is open"
            )));
        }
        if self.section(name).is_some() {
            return Err(StreamError::consistency(format!("section {name} written twice")));
        }
        self.open = Some((name.to_string(), Vec::new()));
        Ok(())
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let (_, data) = self
            .open
            .as_mut()
            .ok_or_else(|| StreamError::consistency("append outside a section"))?;
        data.extend_from_slice(bytes);
        Ok(())
    }

    fn end_section(&mut self) -> Result<()> {
        let section = self
            .open
            .take()
            .ok_or_else(|| StreamError::consistency("end of a section never begun"))?;
        self.sections.push(section);
        Ok(())
    }
}

impl SectionSource for MemoryObject {
    fn unit_name(&self) -> &str {
        &self.name
    }

    fn get_section_bytes(&self, name: &str) -> Option<&[u8]> {
        let data = self.section(name)?;
        self.outstanding.set(self.outstanding.get() + 1);
        Some(data)
    }

    fn release_section_bytes(&self, _name: &str) {
        self.outstanding.set(self.outstanding.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> MemoryObject {
        let mut obj = MemoryObject::new("a.o");
        emit_section(&mut obj, DECLS_SECTION, b"decls").unwrap();
        emit_section(&mut obj, &section_name(SectionKind::FunctionBody, Some("main")), b"").unwrap();
        obj
    }

    #[test]
    fn test_section_names() {
        assert_eq!(section_name(SectionKind::Decls, None), ".gnu.lto_.decls");
        assert_eq!(section_name(SectionKind::Cgraph, Some("f")), ".gnu.lto_.cgraph");
        assert_eq!(section_name(SectionKind::FunctionBody, Some("f")), ".gnu.lto_f");

        assert_eq!(section_kind(".gnu.lto_f"), Some(SectionKind::FunctionBody));
        assert_eq!(section_kind(DECLS_SECTION), Some(SectionKind::Decls));
        assert_eq!(section_kind(".gnu.lto_"), None);
        assert_eq!(section_kind(".text"), None);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let obj = object();
        {
            let bytes = SectionBytes::acquire(&obj, DECLS_SECTION).unwrap();
            assert_eq!(&*bytes, b"decls");
            assert_eq!(obj.outstanding(), 1);
        }
        assert_eq!(obj.outstanding(), 0);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn first_byte(source: &dyn SectionSource) -> Result<u8> {
            let bytes = SectionBytes::acquire(source, ".gnu.lto_main")?;
            let byte = bytes
                .first()
                .copied()
                .ok_or_else(|| StreamError::consistency("empty"))?;
            Ok(byte)
        }
        let obj = object();
        assert!(first_byte(&obj).is_err());
        assert_eq!(obj.outstanding(), 0);
    }

    #[test]
    fn test_missing_section() {
        let obj = object();
        let err = SectionBytes::acquire(&obj, CGRAPH_SECTION).err().unwrap();
        assert!(matches!(err, StreamError::MissingSection(_)));
        assert_eq!(obj.outstanding(), 0);
    }

    #[test]
    fn test_sink_rejects_nesting_and_duplicates() {
        let mut obj = object();
        assert!(obj.begin_section(DECLS_SECTION).is_err());
        obj.begin_section("x").unwrap();
        assert!(obj.begin_section("y").is_err());
        obj.end_section().unwrap();
        assert!(obj.end_section().is_err());
        assert!(obj.append_bytes(b"z").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lto");
        object().save(&path).unwrap();

        let loaded = MemoryObject::load(&path).unwrap();
        assert_eq!(loaded.name(), "a.lto");
        assert_eq!(
            loaded.section_names().collect::<Vec<_>>(),
            vec![DECLS_SECTION, ".gnu.lto_main"]
        );
        assert_eq!(loaded.section(DECLS_SECTION), Some(&b"decls"[..]));
    }

    #[test]
    fn test_truncated_archive_rejected() {
        let bytes = object().to_bytes().unwrap();
        let err = MemoryObject::from_bytes("a.o", &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, StreamError::Truncated { .. }));
        let err = MemoryObject::from_bytes("a.o", b"ELF\x7f....").unwrap_err();
        assert!(matches!(err, StreamError::Consistency(_)));
    }
}
