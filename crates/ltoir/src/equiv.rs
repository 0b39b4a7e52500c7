//! Structural equivalence between two node graphs.
//!
//! Two graphs are equivalent when there is a bijection between their nodes
//! that preserves kind, flags, source position, scalar payload and every
//! child slot. Because the mapping is a bijection, sharing and cycles must
//! match too: two parents sharing a child on one side must share the mapped
//! child on the other.

use crate::arena::Arena;
use crate::node::NodeId;
use std::collections::HashMap;

/// Incremental equivalence check that keeps its node mapping across calls,
/// so several roots can be compared against one consistent bijection.
pub struct Equivalence<'a> {
    left: &'a Arena,
    right: &'a Arena,
    forward: HashMap<NodeId, NodeId>,
    backward: HashMap<NodeId, NodeId>,
    mismatch: Option<String>,
}

impl<'a> Equivalence<'a> {
    pub fn new(left: &'a Arena, right: &'a Arena) -> Self {
        Self {
            left,
            right,
            forward: HashMap::new(),
            backward: HashMap::new(),
            mismatch: None,
        }
    }

    /// Extend the mapping so that `l` corresponds to `r`.
    pub fn check(&mut self, l: Option<NodeId>, r: Option<NodeId>) -> bool {
        if self.mismatch.is_some() {
            return false;
        }
        let mut work = vec![(l, r)];
        while let Some(pair) = work.pop() {
            let (l, r) = match pair {
                (None, None) => continue,
                (Some(l), Some(r)) => (l, r),
                (l, r) => return self.fail(format!("presence differs: {l:?} vs {r:?}")),
            };
            match (self.forward.get(&l), self.backward.get(&r)) {
                (Some(&mapped), _) if mapped == r => continue,
                (Some(&mapped), _) => {
                    return self.fail(format!("{l} maps to {mapped}, also met as {r}"))
                }
                (None, Some(&back)) => {
                    return self.fail(format!("{r} already paired with {back}, met with {l}"))
                }
                (None, None) => {}
            }
            self.forward.insert(l, r);
            self.backward.insert(r, l);

            let (ln, rn) = (&self.left[l], &self.right[r]);
            if ln.code != rn.code {
                return self.fail(format!("{l}: {} vs {}", ln.code, rn.code));
            }
            if ln.flags != rn.flags {
                return self.fail(format!("{l} ({}): flags differ", ln.code));
            }
            if ln.locus != rn.locus {
                return self.fail(format!(
                    "{l} ({}): locus {:?} vs {:?}",
                    ln.code, ln.locus, rn.locus
                ));
            }
            if !ln.data.same_shape(&rn.data) {
                return self.fail(format!("{l} ({}): payload differs", ln.code));
            }
            let mut lc = Vec::new();
            let mut rc = Vec::new();
            ln.for_each_child(|c| lc.push(c));
            rn.for_each_child(|c| rc.push(c));
            // Reverse so children are visited in slot order.
            work.extend(lc.into_iter().zip(rc).rev());
        }
        true
    }

    fn fail(&mut self, why: String) -> bool {
        self.mismatch = Some(why);
        false
    }

    /// Counterpart of a left node, once it has been visited.
    pub fn mapped(&self, l: NodeId) -> Option<NodeId> {
        self.forward.get(&l).copied()
    }

    /// Description of the first mismatch found.
    pub fn mismatch(&self) -> Option<&str> {
        self.mismatch.as_deref()
    }
}

/// One-shot comparison of two roots.
pub fn equivalent(left: &Arena, l: NodeId, right: &Arena, r: NodeId) -> bool {
    Equivalence::new(left, right).check(Some(l), Some(r))
}
