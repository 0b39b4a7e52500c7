//! Exception-region table.
//!
//! Links between regions are written as `number + 1`, zero meaning no link,
//! and turned back into region ids once every slot has been read.

use crate::codec::{TreeReader, TreeWriter};
use crate::error::{Result, StreamError};
use crate::fixup::Fixups;
use crate::pickle::tags;
use crate::stream::{InputCursor, OutputStream};
use ltoir::{EhRegion, EhRegionKind, EhTable, RegionId};
use std::collections::{BTreeSet, HashMap};

/// Which link of a region a deferred number fills.
#[derive(Debug, Clone, Copy)]
enum Link {
    Outer,
    Inner,
    NextPeer,
    First,
    Last,
    Next,
    Prev,
}

fn link_mut(region: &mut EhRegion, link: Link) -> Option<&mut Option<RegionId>> {
    match (link, &mut region.kind) {
        (Link::Outer, _) => Some(&mut region.outer),
        (Link::Inner, _) => Some(&mut region.inner),
        (Link::NextPeer, _) => Some(&mut region.next_peer),
        (Link::First, EhRegionKind::Try { first_catch, .. }) => Some(first_catch),
        (Link::Last, EhRegionKind::Try { last_catch, .. }) => Some(last_catch),
        (Link::Next, EhRegionKind::Catch { next_catch, .. }) => Some(next_catch),
        (Link::Prev, EhRegionKind::Catch { prev_catch, .. }) => Some(prev_catch),
        _ => None,
    }
}

fn region_tag(region: &EhRegion) -> u8 {
    tags::EH_REGION + 2 * region.kind.ordinal() + u8::from(region.may_contain_throw)
}

impl<'a> TreeWriter<'a> {
    pub(crate) fn write_eh_table(&mut self, out: &mut OutputStream, eh: &EhTable) -> Result<()> {
        let number = |link: Option<RegionId>| -> u64 {
            link.map_or(0, |id| u64::from(eh.region(id).number) + 1)
        };

        out.write_u8(tags::EH_TABLE);
        out.write_uleb(u64::from(eh.last_region_number));
        out.write_sleb(eh.root.map_or(-1, |id| i64::from(eh.region(id).number)));
        out.write_uleb(eh.slots.len() as u64);
        for (slot, entry) in eh.slots.iter().enumerate() {
            let Some(id) = *entry else {
                out.write_u8(tags::NULL);
                continue;
            };
            let region = eh.region(id);
            if region.number as usize != slot {
                out.write_u8(tags::EH_SHARED);
                out.write_uleb(u64::from(region.number));
                continue;
            }
            out.write_u8(region_tag(region));
            out.write_uleb(u64::from(region.number));
            out.write_uleb(region.aka.len() as u64);
            for &alias in &region.aka {
                out.write_uleb(u64::from(alias));
            }
            out.write_uleb(number(region.outer));
            out.write_uleb(number(region.inner));
            out.write_uleb(number(region.next_peer));
            self.write_tree(out, region.label)?;
            match &region.kind {
                EhRegionKind::Cleanup | EhRegionKind::MustNotThrow => {}
                EhRegionKind::Try {
                    first_catch,
                    last_catch,
                } => {
                    out.write_uleb(number(*first_catch));
                    out.write_uleb(number(*last_catch));
                }
                EhRegionKind::Catch {
                    next_catch,
                    prev_catch,
                    type_list,
                    filter_list,
                } => {
                    out.write_uleb(number(*next_catch));
                    out.write_uleb(number(*prev_catch));
                    self.write_tree(out, *type_list)?;
                    self.write_tree(out, *filter_list)?;
                }
                EhRegionKind::AllowedExceptions { type_list, filter } => {
                    self.write_tree(out, *type_list)?;
                    out.write_uleb(u64::from(*filter));
                }
                EhRegionKind::Throw { ty } => self.write_tree(out, *ty)?,
            }
        }
        out.write_u8(tags::NULL);
        Ok(())
    }
}

impl<'a, 'p> TreeReader<'a, 'p> {
    /// Read the table that follows an [`tags::EH_TABLE`] tag.
    pub(crate) fn read_eh_table(&mut self, cursor: &mut InputCursor<'_>) -> Result<EhTable> {
        let last_region_number = cursor.read_u32()?;
        let root = cursor.read_sleb()?;
        let count = cursor.read_u32()?;
        let count = cursor.check_count("eh region", u64::from(count), 0)?;

        let mut eh = EhTable::new();
        eh.last_region_number = last_region_number;
        eh.slots = vec![None; count];
        let mut links: Fixups<(RegionId, Link)> = Fixups::new("eh region");
        let mut aliases = Vec::new();
        let mut shared = Vec::new();

        for slot in 0..count {
            let tag = cursor.read_u8()?;
            match tag {
                tags::NULL => {}
                tags::EH_SHARED => shared.push((slot, cursor.read_u32()?)),
                tag if (tags::EH_REGION..tags::EH_REGION + 2 * EhRegionKind::COUNT)
                    .contains(&tag) =>
                {
                    let id = RegionId(eh.regions.len() as u32);
                    let region = self.read_region(cursor, tag - tags::EH_REGION, id, &mut links)?;
                    if region.number as usize != slot {
                        return Err(StreamError::consistency(format!(
                            "EH region {} stored in slot {slot}",
                            region.number
                        )));
                    }
                    aliases.extend(region.aka.iter().map(|&n| (n, id)));
                    eh.regions.push(region);
                    eh.slots[slot] = Some(id);
                }
                tag => {
                    return Err(StreamError::UnknownTag {
                        tag: u64::from(tag),
                        context: "eh region",
                    })
                }
            }
        }
        let tag = cursor.read_u8()?;
        if tag != tags::NULL {
            return Err(StreamError::UnknownTag {
                tag: u64::from(tag),
                context: "eh table terminator",
            });
        }

        let by_number: HashMap<i64, RegionId> = eh
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| (i64::from(r.number), RegionId(i as u32)))
            .collect();
        let lookup = |n: i64| by_number.get(&n).copied();

        for (alias, id) in aliases {
            let slot = eh
                .slots
                .get_mut(alias as usize)
                .ok_or(StreamError::out_of_range("eh slot", alias, count))?;
            *slot = Some(id);
        }
        for (slot, owner) in shared {
            let expected = lookup(i64::from(owner));
            if expected.is_none() || eh.slots[slot] != expected {
                return Err(StreamError::consistency(format!(
                    "shared EH slot {slot} is not an alias of region {owner}"
                )));
            }
        }
        eh.root = match root {
            -1 => None,
            n => Some(lookup(n).ok_or(StreamError::IndexOutOfRange {
                what: "eh region",
                index: n,
                len: count,
            })?),
        };
        let regions = &mut eh.regions;
        let mut misplaced = None;
        links.resolve(count, lookup, |(id, link), target| {
            match link_mut(&mut regions[id.index()], link) {
                Some(slot) => *slot = Some(target),
                None => misplaced = Some(id),
            }
        })?;
        if let Some(id) = misplaced {
            return Err(StreamError::consistency(format!(
                "EH region {} has a link its kind does not carry",
                eh.regions[id.index()].number
            )));
        }
        Ok(eh)
    }

    fn read_region(
        &mut self,
        cursor: &mut InputCursor<'_>,
        variant: u8,
        id: RegionId,
        links: &mut Fixups<(RegionId, Link)>,
    ) -> Result<EhRegion> {
        let mut defer = |cursor: &mut InputCursor<'_>, link: Link| -> Result<()> {
            match cursor.read_uleb()? {
                0 => {}
                n => links.defer((id, link), n as i64 - 1),
            }
            Ok(())
        };

        let number = cursor.read_u32()?;
        let mut aka = BTreeSet::new();
        for _ in 0..cursor.read_uleb()? {
            aka.insert(cursor.read_u32()?);
        }
        defer(cursor, Link::Outer)?;
        defer(cursor, Link::Inner)?;
        defer(cursor, Link::NextPeer)?;
        let label = self.read_tree(cursor)?;
        let kind = match variant / 2 {
            0 => EhRegionKind::Cleanup,
            1 => {
                defer(cursor, Link::First)?;
                defer(cursor, Link::Last)?;
                EhRegionKind::Try {
                    first_catch: None,
                    last_catch: None,
                }
            }
            2 => {
                defer(cursor, Link::Next)?;
                defer(cursor, Link::Prev)?;
                EhRegionKind::Catch {
                    next_catch: None,
                    prev_catch: None,
                    type_list: self.read_tree(cursor)?,
                    filter_list: self.read_tree(cursor)?,
                }
            }
            3 => EhRegionKind::AllowedExceptions {
                type_list: self.read_tree(cursor)?,
                filter: cursor.read_u32()?,
            },
            4 => EhRegionKind::MustNotThrow,
            _ => EhRegionKind::Throw {
                ty: self.read_tree(cursor)?,
            },
        };

        let mut region = EhRegion::new(number, kind);
        region.may_contain_throw = variant % 2 == 1;
        region.aka = aka;
        region.label = label;
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickle::{OutDeclState, UnitDecls};
    use crate::strings::StringReader;
    use ltoir::Program;

    fn round_trip(eh: &EhTable) -> Result<EhTable> {
        let program = Program::new();
        let mut decls = OutDeclState::new();
        let mut writer = TreeWriter::new(&program, &mut decls, false);
        let mut out = OutputStream::new("main");
        writer.write_eh_table(&mut out, eh)?;
        let strings = writer.strings.into_stream().into_bytes();

        let mut program = Program::new();
        let unit = UnitDecls::new();
        let mut reader = TreeReader::new(&mut program, &unit, StringReader::new(&strings));
        let mut cursor = InputCursor::new("main", out.as_bytes());
        assert_eq!(cursor.read_u8()?, tags::EH_TABLE);
        let read = reader.read_eh_table(&mut cursor)?;
        assert!(cursor.is_at_end());
        Ok(read)
    }

    fn try_with_catches() -> EhTable {
        let mut eh = EhTable::new();
        let cleanup = eh.add_region(EhRegionKind::Cleanup, None);
        let try_region = eh.add_region(
            EhRegionKind::Try {
                first_catch: None,
                last_catch: None,
            },
            Some(cleanup),
        );
        let catch = |next, prev| EhRegionKind::Catch {
            next_catch: next,
            prev_catch: prev,
            type_list: None,
            filter_list: None,
        };
        let first = eh.add_region(catch(None, None), Some(cleanup));
        let second = eh.add_region(catch(None, Some(first)), Some(cleanup));
        if let EhRegionKind::Catch { next_catch, .. } = &mut eh.region_mut(first).kind {
            *next_catch = Some(second);
        }
        eh.region_mut(try_region).kind = EhRegionKind::Try {
            first_catch: Some(first),
            last_catch: Some(second),
        };
        eh.region_mut(second).may_contain_throw = true;
        eh.add_region(
            EhRegionKind::AllowedExceptions {
                type_list: None,
                filter: 3,
            },
            None,
        );
        eh
    }

    #[test]
    fn test_forest_round_trip() {
        let eh = try_with_catches();
        assert_eq!(round_trip(&eh).unwrap(), eh);
    }

    #[test]
    fn test_aliases_share_one_region() {
        let mut eh = try_with_catches();
        let target = eh.slots[1].unwrap();
        let alias = eh.add_alias(target);
        eh.slots.push(None);

        let read = round_trip(&eh).unwrap();
        assert_eq!(read.slots[alias as usize], read.slots[1]);
        assert_eq!(read.lookup(alias).map(|r| r.number), Some(1));
        assert_eq!(read.regions.len(), eh.regions.len());
        assert!(read.verify().is_ok());
        assert_eq!(read, eh);
    }

    #[test]
    fn test_shared_slot_without_alias_rejected() {
        let mut eh = try_with_catches();
        let target = eh.slots[0].unwrap();
        eh.slots.push(Some(target));
        eh.last_region_number += 1;
        assert!(matches!(round_trip(&eh), Err(StreamError::Consistency(_))));
    }

    #[test]
    fn test_oversized_slot_count_rejected() {
        let mut out = OutputStream::new("main");
        out.write_uleb(0);
        out.write_sleb(-1);
        out.write_uleb(u64::from(u32::MAX));
        out.write_u8(tags::NULL);

        let mut program = Program::new();
        let unit = UnitDecls::new();
        let mut reader = TreeReader::new(&mut program, &unit, StringReader::new(&[0]));
        let err = reader
            .read_eh_table(&mut InputCursor::new("main", out.as_bytes()))
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::IndexOutOfRange { what: "eh region", len: 1, .. }
        ));
    }

    #[test]
    fn test_empty_table() {
        let eh = EhTable::new();
        assert_eq!(round_trip(&eh).unwrap(), eh);
    }
}
