//! Section header and stream framing.
//!
//! Every section starts with a fixed little-endian header: format version,
//! section kind, the per-body counts for function bodies, and the size of
//! each stream. The streams follow back to back in [`SectionKind::streams`]
//! order.

use crate::error::{Result, StreamError};
use crate::stream::{InputCursor, OutputStream};
use log::debug;
use std::fmt;

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Decls,
    Cgraph,
    FunctionBody,
}

impl SectionKind {
    pub fn as_u16(self) -> u16 {
        match self {
            SectionKind::Decls => 0,
            SectionKind::Cgraph => 1,
            SectionKind::FunctionBody => 2,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(SectionKind::Decls),
            1 => Some(SectionKind::Cgraph),
            2 => Some(SectionKind::FunctionBody),
            _ => None,
        }
    }

    /// Streams carried by sections of this kind, in file order.
    pub fn streams(self) -> &'static [StreamId] {
        match self {
            SectionKind::Decls | SectionKind::Cgraph => {
                &[StreamId::NamedLabels, StreamId::Main, StreamId::Strings]
            }
            SectionKind::FunctionBody => &[
                StreamId::NamedLabels,
                StreamId::SsaNames,
                StreamId::Cfg,
                StreamId::LocalDeclIndex,
                StreamId::LocalDecls,
                StreamId::Main,
                StreamId::Strings,
            ],
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionKind::Decls => "decls",
            SectionKind::Cgraph => "cgraph",
            SectionKind::FunctionBody => "function body",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    NamedLabels,
    SsaNames,
    Cfg,
    LocalDeclIndex,
    LocalDecls,
    Main,
    Strings,
}

impl StreamId {
    pub fn name(self) -> &'static str {
        match self {
            StreamId::NamedLabels => "named labels",
            StreamId::SsaNames => "ssa names",
            StreamId::Cfg => "cfg",
            StreamId::LocalDeclIndex => "local decl index",
            StreamId::LocalDecls => "local decls",
            StreamId::Main => "main",
            StreamId::Strings => "strings",
        }
    }

    /// An empty output stream carrying this stream's name.
    pub fn output(self) -> OutputStream {
        OutputStream::new(self.name())
    }
}

/// Counts only function-body sections carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyCounts {
    pub num_local_decls: u32,
    pub num_named_labels: u32,
    pub num_unnamed_labels: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub major: u16,
    pub minor: u16,
    pub kind: SectionKind,
    pub counts: BodyCounts,
    /// One size per stream, in [`SectionKind::streams`] order.
    pub stream_sizes: Vec<u32>,
}

fn stream_size(stream: &OutputStream) -> Result<u32> {
    u32::try_from(stream.len()).map_err(|_| {
        StreamError::consistency(format!("{} stream exceeds 4 GiB", stream.name()))
    })
}

/// Frame `streams` behind a header. `streams` must be given in the order
/// [`SectionKind::streams`] lists for `kind`.
pub fn write_section(
    kind: SectionKind,
    counts: BodyCounts,
    streams: &[OutputStream],
) -> Result<Vec<u8>> {
    let expected = kind.streams();
    if streams.len() != expected.len()
        || streams.iter().zip(expected).any(|(s, id)| s.name() != id.name())
    {
        return Err(StreamError::consistency(format!(
            "{kind} section built with streams {:?}",
            streams.iter().map(OutputStream::name).collect::<Vec<_>>()
        )));
    }

    let mut out = OutputStream::new("header");
    out.write_u16_le(MAJOR_VERSION);
    out.write_u16_le(MINOR_VERSION);
    out.write_u16_le(kind.as_u16());
    if kind == SectionKind::FunctionBody {
        out.write_u32_le(counts.num_local_decls);
        out.write_u32_le(counts.num_named_labels);
        out.write_u32_le(counts.num_unnamed_labels);
    }
    for stream in streams {
        out.write_u32_le(stream_size(stream)?);
    }
    for stream in streams {
        out.write_bytes(stream.as_bytes());
    }
    debug!(
        "wrote {kind} section: {}",
        streams
            .iter()
            .map(|s| format!("{} {}", s.name(), s.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(out.into_bytes())
}

/// A parsed section: its header and a view of each stream.
#[derive(Debug)]
pub struct SectionReader<'a> {
    pub header: SectionHeader,
    streams: Vec<(StreamId, &'a [u8])>,
}

impl<'a> SectionReader<'a> {
    /// Parse the header of `data` and check that it is a section of kind
    /// `expected` with the current major version.
    pub fn parse(data: &'a [u8], expected: SectionKind) -> Result<Self> {
        let mut cursor = InputCursor::new("header", data);
        let major = cursor.read_u16_le()?;
        let minor = cursor.read_u16_le()?;
        if major != MAJOR_VERSION {
            return Err(StreamError::VersionMismatch {
                major,
                minor,
                expected_major: MAJOR_VERSION,
            });
        }
        let raw_kind = cursor.read_u16_le()?;
        let kind = SectionKind::from_u16(raw_kind)
            .filter(|&k| k == expected)
            .ok_or(StreamError::BadSectionKind {
                found: raw_kind,
                expected: expected.as_u16(),
            })?;

        let mut counts = BodyCounts::default();
        if kind == SectionKind::FunctionBody {
            counts.num_local_decls = cursor.read_u32_le()?;
            counts.num_named_labels = cursor.read_u32_le()?;
            counts.num_unnamed_labels = cursor.read_u32_le()?;
        }
        let ids = kind.streams();
        let mut stream_sizes = Vec::with_capacity(ids.len());
        for _ in ids {
            stream_sizes.push(cursor.read_u32_le()?);
        }

        let mut streams = Vec::with_capacity(ids.len());
        for (&id, &size) in ids.iter().zip(&stream_sizes) {
            let bytes = cursor.read_bytes(size as usize).map_err(|_| StreamError::Truncated {
                stream: id.name(),
                offset: cursor.position(),
            })?;
            streams.push((id, bytes));
        }

        Ok(Self {
            header: SectionHeader {
                major,
                minor,
                kind,
                counts,
                stream_sizes,
            },
            streams,
        })
    }

    pub fn bytes(&self, id: StreamId) -> Result<&'a [u8]> {
        self.streams
            .iter()
            .find(|(s, _)| *s == id)
            .map(|&(_, bytes)| bytes)
            .ok_or_else(|| {
                StreamError::consistency(format!(
                    "{} section has no {} stream",
                    self.header.kind,
                    id.name()
                ))
            })
    }

    pub fn cursor(&self, id: StreamId) -> Result<InputCursor<'a>> {
        Ok(InputCursor::new(id.name(), self.bytes(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams(kind: SectionKind) -> Vec<OutputStream> {
        kind.streams()
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut s = id.output();
                s.write_bytes(&vec![i as u8; i]);
                s
            })
            .collect()
    }

    #[test]
    fn test_body_section_layout() {
        let counts = BodyCounts {
            num_local_decls: 3,
            num_named_labels: 1,
            num_unnamed_labels: 2,
        };
        let bytes = write_section(
            SectionKind::FunctionBody,
            counts,
            &streams(SectionKind::FunctionBody),
        )
        .unwrap();
        // 3 u16 + 3 u32 + 7 u32 sizes, then 0 + 1 + ... + 6 stream bytes.
        assert_eq!(bytes.len(), 6 + 12 + 28 + 21);
        assert_eq!(&bytes[..6], &[1, 0, 0, 0, 2, 0]);

        let section = SectionReader::parse(&bytes, SectionKind::FunctionBody).unwrap();
        assert_eq!(section.header.counts, counts);
        assert_eq!(section.header.stream_sizes, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(section.bytes(StreamId::Main).unwrap(), &[5; 5]);
    }

    #[test]
    fn test_decls_section_has_no_counts() {
        let bytes =
            write_section(SectionKind::Decls, BodyCounts::default(), &streams(SectionKind::Decls))
                .unwrap();
        assert_eq!(bytes.len(), 6 + 12 + 3);
        let section = SectionReader::parse(&bytes, SectionKind::Decls).unwrap();
        assert_eq!(section.bytes(StreamId::Strings).unwrap(), &[2, 2]);
        assert!(section.bytes(StreamId::Cfg).is_err());
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes =
            write_section(SectionKind::Cgraph, BodyCounts::default(), &streams(SectionKind::Cgraph))
                .unwrap();
        bytes[0] = 2;
        assert!(matches!(
            SectionReader::parse(&bytes, SectionKind::Cgraph),
            Err(StreamError::VersionMismatch { major: 2, .. })
        ));
    }

    #[test]
    fn test_wrong_kind() {
        let bytes =
            write_section(SectionKind::Cgraph, BodyCounts::default(), &streams(SectionKind::Cgraph))
                .unwrap();
        assert!(matches!(
            SectionReader::parse(&bytes, SectionKind::Decls),
            Err(StreamError::BadSectionKind {
                found: 1,
                expected: 0
            })
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let bytes =
            write_section(SectionKind::Decls, BodyCounts::default(), &streams(SectionKind::Decls))
                .unwrap();
        let err = SectionReader::parse(&bytes[..bytes.len() - 1], SectionKind::Decls).unwrap_err();
        assert!(matches!(err, StreamError::Truncated { stream: "strings", .. }));
        let err = SectionReader::parse(&bytes[..4], SectionKind::Decls).unwrap_err();
        assert!(matches!(err, StreamError::Truncated { stream: "header", .. }));
    }

    #[test]
    fn test_misordered_streams_rejected() {
        let mut s = streams(SectionKind::Decls);
        s.swap(0, 1);
        assert!(write_section(SectionKind::Decls, BodyCounts::default(), &s).is_err());
    }
}
