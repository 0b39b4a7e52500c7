//! Exception-handling region forest.
//!
//! Regions are stored once in `regions` and named by [`RegionId`]. The slot
//! table maps region numbers to regions; an aliased number shares the region
//! of another slot and is listed in that region's `aka` set.

use crate::error::VerifyError;
use crate::node::NodeId;
use std::collections::BTreeSet;

/// Position of a region inside [`EhTable::regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl RegionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EhRegionKind {
    Cleanup,
    Try {
        first_catch: Option<RegionId>,
        last_catch: Option<RegionId>,
    },
    Catch {
        next_catch: Option<RegionId>,
        prev_catch: Option<RegionId>,
        type_list: Option<NodeId>,
        filter_list: Option<NodeId>,
    },
    AllowedExceptions {
        type_list: Option<NodeId>,
        filter: u32,
    },
    MustNotThrow,
    Throw {
        ty: Option<NodeId>,
    },
}

impl EhRegionKind {
    /// Stable discriminant used on the wire.
    pub fn ordinal(&self) -> u8 {
        match self {
            EhRegionKind::Cleanup => 0,
            EhRegionKind::Try { .. } => 1,
            EhRegionKind::Catch { .. } => 2,
            EhRegionKind::AllowedExceptions { .. } => 3,
            EhRegionKind::MustNotThrow => 4,
            EhRegionKind::Throw { .. } => 5,
        }
    }

    pub const COUNT: u8 = 6;

    fn links(&self) -> Vec<Option<RegionId>> {
        match self {
            EhRegionKind::Try {
                first_catch,
                last_catch,
            } => vec![*first_catch, *last_catch],
            EhRegionKind::Catch {
                next_catch,
                prev_catch,
                ..
            } => vec![*next_catch, *prev_catch],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EhRegion {
    pub number: u32,
    pub may_contain_throw: bool,
    /// Other numbers naming this same region.
    pub aka: BTreeSet<u32>,
    pub outer: Option<RegionId>,
    pub inner: Option<RegionId>,
    pub next_peer: Option<RegionId>,
    /// Landing-pad label.
    pub label: Option<NodeId>,
    pub kind: EhRegionKind,
}

impl EhRegion {
    pub fn new(number: u32, kind: EhRegionKind) -> Self {
        Self {
            number,
            may_contain_throw: false,
            aka: BTreeSet::new(),
            outer: None,
            inner: None,
            next_peer: None,
            label: None,
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EhTable {
    pub regions: Vec<EhRegion>,
    /// Region for each number; `None` where no region exists.
    pub slots: Vec<Option<RegionId>>,
    pub root: Option<RegionId>,
    pub last_region_number: u32,
}

impl EhTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self, id: RegionId) -> &EhRegion {
        &self.regions[id.index()]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut EhRegion {
        &mut self.regions[id.index()]
    }

    /// Region named by number `n`, alias or not.
    pub fn lookup(&self, n: u32) -> Option<&EhRegion> {
        self.slots
            .get(n as usize)
            .copied()
            .flatten()
            .map(|id| self.region(id))
    }

    /// Add a region under its own number. It becomes the innermost child of
    /// `outer`, or a top-level region chained after the current root.
    pub fn add_region(&mut self, kind: EhRegionKind, outer: Option<RegionId>) -> RegionId {
        let number = self.slots.len() as u32;
        let id = RegionId(self.regions.len() as u32);
        let mut region = EhRegion::new(number, kind);
        region.outer = outer;
        match outer {
            Some(parent) => {
                region.next_peer = self.region(parent).inner;
                self.region_mut(parent).inner = Some(id);
            }
            None => {
                region.next_peer = self.root;
                self.root = Some(id);
            }
        }
        self.regions.push(region);
        self.slots.push(Some(id));
        self.last_region_number = number;
        id
    }

    /// Reserve the next number as an alias of `target`.
    pub fn add_alias(&mut self, target: RegionId) -> u32 {
        let number = self.slots.len() as u32;
        self.slots.push(Some(target));
        self.region_mut(target).aka.insert(number);
        self.last_region_number = number;
        number
    }

    /// Every slot names a region that carries that number or lists it as an
    /// alias, and every link stays inside the table.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let in_range = |link: Option<RegionId>| link.map_or(true, |id| id.index() < self.regions.len());
        for (i, region) in self.regions.iter().enumerate() {
            let links = [region.outer, region.inner, region.next_peer]
                .into_iter()
                .chain(region.kind.links());
            if !links.into_iter().all(|l| in_range(l)) {
                return Err(VerifyError::EhDanglingLink { region: i as u32 });
            }
        }
        if !in_range(self.root) {
            return Err(VerifyError::EhDanglingLink {
                region: self.root.map_or(0, |r| r.0),
            });
        }
        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(id) = entry else { continue };
            let region = self.region(*id);
            let slot = slot as u32;
            if region.number != slot && !region.aka.contains(&slot) {
                return Err(VerifyError::EhSlotMismatch {
                    slot,
                    region: region.number,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_region_builds_forest() {
        let mut eh = EhTable::new();
        let outer = eh.add_region(
            EhRegionKind::Try {
                first_catch: None,
                last_catch: None,
            },
            None,
        );
        let a = eh.add_region(EhRegionKind::Cleanup, Some(outer));
        let b = eh.add_region(EhRegionKind::MustNotThrow, Some(outer));

        assert_eq!(eh.root, Some(outer));
        assert_eq!(eh.region(outer).inner, Some(b));
        assert_eq!(eh.region(b).next_peer, Some(a));
        assert_eq!(eh.region(a).outer, Some(outer));
        assert_eq!(eh.last_region_number, 2);
        assert!(eh.verify().is_ok());
    }

    #[test]
    fn test_alias_shares_region() {
        let mut eh = EhTable::new();
        let r = eh.add_region(EhRegionKind::Cleanup, None);
        let alias = eh.add_alias(r);
        assert_eq!(alias, 1);
        assert_eq!(eh.lookup(1).map(|r| r.number), Some(0));
        assert!(eh.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_foreign_slot() {
        let mut eh = EhTable::new();
        let r = eh.add_region(EhRegionKind::Cleanup, None);
        eh.slots.push(Some(r));
        assert_eq!(
            eh.verify(),
            Err(VerifyError::EhSlotMismatch { slot: 1, region: 0 })
        );
    }
}
