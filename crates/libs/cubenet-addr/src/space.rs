use std::collections::BTreeSet;

use crate::HypercubeMaskAddress;

/// A set of mask addresses kept in minimal disjoint canonical form.
///
/// Whenever two complementary siblings end up in the set they are coalesced
/// into their common prefix, recursively, so the stored base is always the
/// smallest representation of the covered subset of the cube.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    base: BTreeSet<HypercubeMaskAddress>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sub-cube to the space.
    ///
    /// Returns `false` when the address was already covered and the space
    /// is unchanged.
    pub fn add(&mut self, addr: HypercubeMaskAddress) -> bool {
        if self.contains(&addr) {
            return false;
        }

        // The whole space cannot be searched for a complement.
        if addr.mask() == 0 {
            self.base.clear();
            self.base.insert(addr);
            return true;
        }

        let mut complement = addr.clone();
        complement.flip_bit(addr.mask() - 1);

        if self.base.remove(&complement) {
            // Summarise both halves into the parent prefix, which may in
            // turn find its own complement.
            let mut parent = addr;
            parent.set_bit(parent.mask() - 1, false);
            parent.set_mask(parent.mask() - 1);
            self.add(parent);
        } else {
            // Collect the sub-cubes the new address swallows before
            // touching the set, then replace them.
            let doomed: Vec<_> = self.base.iter().filter(|m| addr.contains(m)).cloned().collect();
            for victim in &doomed {
                self.base.remove(victim);
            }
            self.base.insert(addr);
        }

        true
    }

    /// Whether the space already covers the given sub-cube.
    pub fn contains(&self, addr: &HypercubeMaskAddress) -> bool {
        for member in &self.base {
            if member.mask() > addr.mask() {
                return false;
            }
            if member.contains(addr) {
                return true;
            }
        }
        false
    }

    /// The minimal base, broadest covers first.
    pub fn base(&self) -> impl Iterator<Item = &HypercubeMaskAddress> {
        self.base.iter()
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Whether the space has collapsed to the whole cube (single mask-0
    /// element).
    pub fn is_complete(&self) -> bool {
        self.base.len() == 1 && self.base.iter().next().is_some_and(|m| m.mask() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(addr: &str, m: u16) -> HypercubeMaskAddress {
        HypercubeMaskAddress::new(addr.parse().unwrap(), m)
    }

    fn base_strings(space: &AddressSpace) -> Vec<String> {
        space.base().map(|m| m.to_string()).collect()
    }

    #[test]
    fn add_is_idempotent() {
        let mut space = AddressSpace::new();
        assert!(space.add(mask("1000", 1)));
        assert!(!space.add(mask("1000", 1)));
        assert!(!space.add(mask("1100", 2)));
        assert_eq!(base_strings(&space), ["1000/1"]);
    }

    #[test]
    fn complementary_siblings_coalesce() {
        let mut space = AddressSpace::new();
        space.add(mask("0000", 1));
        space.add(mask("1000", 1));
        assert_eq!(base_strings(&space), ["0000/0"]);
        assert!(space.is_complete());
    }

    #[test]
    fn summarisation_runs_to_fixed_point() {
        let mut space = AddressSpace::new();
        space.add(mask("0000", 1));
        space.add(mask("1100", 2));
        space.add(mask("1010", 3));
        assert!(!space.is_complete());
        space.add(mask("1000", 3));
        assert!(space.is_complete());
    }

    #[test]
    fn broader_add_swallows_children() {
        let mut space = AddressSpace::new();
        space.add(mask("1010", 3));
        space.add(mask("1110", 3));
        // Not siblings: they differ outside the last masked bit.
        assert_eq!(base_strings(&space), ["1010/3", "1110/3"]);
        space.add(mask("1000", 1));
        assert_eq!(base_strings(&space), ["1000/1"]);
    }

    #[test]
    fn whole_space_collapses_everything() {
        let mut space = AddressSpace::new();
        space.add(mask("0100", 2));
        space.add(mask("1111", 4));
        assert!(space.add(mask("0000", 0)));
        assert!(space.is_complete());
        assert!(!space.add(mask("0110", 3)));
    }

    #[test]
    fn add_order_does_not_matter() {
        let parts = ["0000", "0100", "1000", "1100"];
        let mut forward = AddressSpace::new();
        for p in parts {
            forward.add(mask(p, 2));
        }
        let mut backward = AddressSpace::new();
        for p in parts.iter().rev() {
            backward.add(mask(p, 2));
        }
        assert_eq!(base_strings(&forward), base_strings(&backward));
        assert!(forward.is_complete());
    }

    #[test]
    fn contains_stops_at_narrower_masks() {
        let mut space = AddressSpace::new();
        space.add(mask("1010", 3));
        assert!(space.contains(&mask("1010", 4)));
        assert!(!space.contains(&mask("1010", 2)));
    }
}
