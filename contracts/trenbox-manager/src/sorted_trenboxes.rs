//! Sorted position index
//!
//! Doubly linked list of owners ordered by nominal collateral ratio (NICR),
//! highest at the head. Nodes live in an arena and link by slot index;
//! freed slots are reused.
//!
//! Nodes hold no NICR. Pending redistribution rewards move a position's NICR
//! without touching the list, so every comparison asks the caller for the
//! live value through a [`NicrLookup`].
//!
//! Every NICR has exactly one valid position: after all nodes with an equal
//! or higher NICR and before the first strictly lower one. Equal NICRs thus
//! keep insertion order. A correct `(prev, next)` hint makes insertion O(1);
//! a stale hint is walked for at most `max_search_depth` nodes before the
//! search restarts from the head.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tren_common::{
    constants::sorted::MAX_SEARCH_DEPTH,
    errors::{TrenError, TrenResult},
    types::Address,
};

/// Live NICR of an owner currently in the list
pub type NicrLookup<'a> = &'a dyn Fn(&Address) -> TrenResult<u128>;

type Slots = (Option<usize>, Option<usize>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    owner: Address,
    prev: Option<usize>,
    next: Option<usize>,
}

/// NICR-descending list of one asset's Active positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedTrenBoxes {
    nodes: Vec<Node>,
    free: Vec<usize>,
    slots: BTreeMap<Address, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    max_search_depth: usize,
}

impl Default for SortedTrenBoxes {
    fn default() -> Self {
        Self::new(MAX_SEARCH_DEPTH)
    }
}

impl SortedTrenBoxes {
    pub fn new(max_search_depth: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            slots: BTreeMap::new(),
            head: None,
            tail: None,
            max_search_depth: max_search_depth.max(1),
        }
    }

    // ============ Views ============

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, owner: &Address) -> bool {
        self.slots.contains_key(owner)
    }

    pub fn max_search_depth(&self) -> usize {
        self.max_search_depth
    }

    /// Highest NICR
    pub fn first(&self) -> Option<Address> {
        self.head.map(|s| self.node(s).owner)
    }

    /// Lowest NICR
    pub fn last(&self) -> Option<Address> {
        self.tail.map(|s| self.node(s).owner)
    }

    /// Next owner towards the tail (lower NICR)
    pub fn next(&self, owner: &Address) -> Option<Address> {
        let slot = *self.slots.get(owner)?;
        self.node(slot).next.map(|s| self.node(s).owner)
    }

    /// Previous owner towards the head (higher NICR)
    pub fn prev(&self, owner: &Address) -> Option<Address> {
        let slot = *self.slots.get(owner)?;
        self.node(slot).prev.map(|s| self.node(s).owner)
    }

    /// Owners from head to tail
    pub fn iter(&self) -> SortedIter<'_> {
        SortedIter { list: self, cursor: self.head }
    }

    /// Whether `(prev, next)` is the valid position for `nicr`
    pub fn valid_insert_position(
        &self,
        nicr: u128,
        prev: Option<&Address>,
        next: Option<&Address>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<bool> {
        let prev = match prev {
            Some(p) => match self.slots.get(p) {
                Some(s) => Some(*s),
                None => return Ok(false),
            },
            None => None,
        };
        let next = match next {
            Some(n) => match self.slots.get(n) {
                Some(s) => Some(*s),
                None => return Ok(false),
            },
            None => None,
        };
        self.is_valid_slot_pair(nicr, prev, next, nicr_of)
    }

    /// Position for `nicr` found by walking from the head.
    ///
    /// The reference the hinted search must agree with.
    pub fn scan_position(
        &self,
        nicr: u128,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<(Option<Address>, Option<Address>)> {
        let (prev, next) = self.scan_from_head(nicr, nicr_of)?;
        Ok((self.owner_of(prev), self.owner_of(next)))
    }

    /// Position for `nicr`, starting from the hints
    pub fn find_insert_position(
        &self,
        nicr: u128,
        prev_hint: Option<&Address>,
        next_hint: Option<&Address>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<(Option<Address>, Option<Address>)> {
        let (prev, next) = self.find_slots(nicr, prev_hint, next_hint, nicr_of)?;
        Ok((self.owner_of(prev), self.owner_of(next)))
    }

    // ============ Mutations ============

    /// Insert an owner at the position for `nicr`
    pub fn insert(
        &mut self,
        owner: &Address,
        nicr: u128,
        prev_hint: Option<&Address>,
        next_hint: Option<&Address>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<()> {
        if self.contains(owner) {
            return Err(TrenError::NodeAlreadyInList { owner: *owner });
        }
        if nicr == 0 {
            return Err(TrenError::ZeroNicr);
        }

        let (prev, next) = self.find_slots(nicr, prev_hint, next_hint, nicr_of)?;
        let node = Node {
            owner: *owner,
            prev,
            next,
        };
        let slot = match self.free.pop() {
            Some(s) => {
                self.nodes[s] = node;
                s
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        match prev {
            Some(p) => self.node_mut(p).next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.slots.insert(*owner, slot);
        Ok(())
    }

    /// Unlink an owner
    pub fn remove(&mut self, owner: &Address) -> TrenResult<()> {
        let slot = self
            .slots
            .remove(owner)
            .ok_or(TrenError::NodeNotInList { owner: *owner })?;
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.free.push(slot);
        Ok(())
    }

    /// Move an owner to the position for its new NICR
    pub fn reinsert(
        &mut self,
        owner: &Address,
        new_nicr: u128,
        prev_hint: Option<&Address>,
        next_hint: Option<&Address>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<()> {
        if !self.contains(owner) {
            return Err(TrenError::NodeNotInList { owner: *owner });
        }
        if new_nicr == 0 {
            return Err(TrenError::ZeroNicr);
        }
        self.remove(owner)?;
        self.insert(owner, new_nicr, prev_hint, next_hint, nicr_of)
    }

    // ============ Search ============

    fn find_slots(
        &self,
        nicr: u128,
        prev_hint: Option<&Address>,
        next_hint: Option<&Address>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<Slots> {
        // Drop hints that are gone or on the wrong side of nicr
        let prev = match prev_hint.and_then(|p| self.slots.get(p).copied()) {
            Some(s) if self.nicr_at(s, nicr_of)? >= nicr => Some(s),
            _ => None,
        };
        let next = match next_hint.and_then(|n| self.slots.get(n).copied()) {
            Some(s) if nicr > self.nicr_at(s, nicr_of)? => Some(s),
            _ => None,
        };

        let found = match (prev, next) {
            (None, None) => None,
            (Some(p), Some(n)) if self.is_valid_slot_pair(nicr, Some(p), Some(n), nicr_of)? => {
                Some((Some(p), Some(n)))
            }
            (Some(p), _) => self.descend(nicr, p, self.max_search_depth, nicr_of)?,
            (None, Some(n)) => self.ascend(nicr, n, self.max_search_depth, nicr_of)?,
        };

        match found {
            Some(position) => Ok(position),
            None => {
                if prev_hint.is_some() || next_hint.is_some() {
                    log::warn!("stale sort hint for nicr {}, scanning from head", nicr);
                }
                self.scan_from_head(nicr, nicr_of)
            }
        }
    }

    fn scan_from_head(&self, nicr: u128, nicr_of: NicrLookup<'_>) -> TrenResult<Slots> {
        let head = match self.head {
            Some(h) => h,
            None => return Ok((None, None)),
        };
        if nicr > self.nicr_at(head, nicr_of)? {
            return Ok((None, Some(head)));
        }
        Ok(self
            .descend(nicr, head, usize::MAX, nicr_of)?
            .unwrap_or((self.tail, None)))
    }

    // Walk towards the tail from a node with NICR >= nicr
    fn descend(&self, nicr: u128, start: usize, limit: usize, nicr_of: NicrLookup<'_>) -> TrenResult<Option<Slots>> {
        let mut prev = start;
        let mut steps = 0usize;
        loop {
            let next = self.node(prev).next;
            if self.is_valid_slot_pair(nicr, Some(prev), next, nicr_of)? {
                return Ok(Some((Some(prev), next)));
            }
            if steps >= limit {
                return Ok(None);
            }
            prev = match next {
                Some(n) => n,
                None => return Ok(None),
            };
            steps += 1;
        }
    }

    // Walk towards the head from a node with NICR < nicr
    fn ascend(&self, nicr: u128, start: usize, limit: usize, nicr_of: NicrLookup<'_>) -> TrenResult<Option<Slots>> {
        let mut next = start;
        let mut steps = 0usize;
        loop {
            let prev = self.node(next).prev;
            if self.is_valid_slot_pair(nicr, prev, Some(next), nicr_of)? {
                return Ok(Some((prev, Some(next))));
            }
            if steps >= limit {
                return Ok(None);
            }
            next = match prev {
                Some(p) => p,
                None => return Ok(None),
            };
            steps += 1;
        }
    }

    fn is_valid_slot_pair(
        &self,
        nicr: u128,
        prev: Option<usize>,
        next: Option<usize>,
        nicr_of: NicrLookup<'_>,
    ) -> TrenResult<bool> {
        Ok(match (prev, next) {
            (None, None) => self.head.is_none(),
            (None, Some(n)) => self.head == Some(n) && nicr > self.nicr_at(n, nicr_of)?,
            (Some(p), None) => self.tail == Some(p) && self.nicr_at(p, nicr_of)? >= nicr,
            (Some(p), Some(n)) => {
                self.node(p).next == Some(n)
                    && self.nicr_at(p, nicr_of)? >= nicr
                    && nicr > self.nicr_at(n, nicr_of)?
            }
        })
    }

    // ============ Arena ============

    fn nicr_at(&self, slot: usize, nicr_of: NicrLookup<'_>) -> TrenResult<u128> {
        nicr_of(&self.node(slot).owner)
    }

    fn owner_of(&self, slot: Option<usize>) -> Option<Address> {
        slot.map(|s| self.node(s).owner)
    }

    // Slots reachable from head, tail or `slots` are never on the free list
    fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        &mut self.nodes[slot]
    }
}

/// Owners from head to tail
pub struct SortedIter<'a> {
    list: &'a SortedTrenBoxes,
    cursor: Option<usize>,
}

impl<'a> Iterator for SortedIter<'a> {
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.list.node(slot);
        self.cursor = node.next;
        Some(node.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(n: u8) -> Address {
        [n; 32]
    }

    /// List plus the NICR table it reads from
    struct Fixture {
        list: SortedTrenBoxes,
        nicrs: BTreeMap<Address, u128>,
    }

    impl Fixture {
        fn new(max_search_depth: usize) -> Self {
            Self {
                list: SortedTrenBoxes::new(max_search_depth),
                nicrs: BTreeMap::new(),
            }
        }

        fn insert(&mut self, n: u8, nicr: u128, prev: Option<&Address>, next: Option<&Address>) -> TrenResult<()> {
            if !self.list.contains(&owner(n)) {
                self.nicrs.insert(owner(n), nicr);
            }
            let nicrs = &self.nicrs;
            self.list.insert(&owner(n), nicr, prev, next, &|o: &Address| Ok(nicrs[o]))
        }

        fn reinsert(&mut self, n: u8, nicr: u128, prev: Option<&Address>, next: Option<&Address>) -> TrenResult<()> {
            if self.list.contains(&owner(n)) {
                self.nicrs.insert(owner(n), nicr);
            }
            let nicrs = &self.nicrs;
            self.list.reinsert(&owner(n), nicr, prev, next, &|o: &Address| Ok(nicrs[o]))
        }

        fn find(&self, nicr: u128, hint: Option<&Address>) -> (Option<Address>, Option<Address>) {
            let nicrs = &self.nicrs;
            self.list
                .find_insert_position(nicr, hint, hint, &|o: &Address| Ok(nicrs[o]))
                .unwrap()
        }

        fn scan(&self, nicr: u128) -> (Option<Address>, Option<Address>) {
            let nicrs = &self.nicrs;
            self.list.scan_position(nicr, &|o: &Address| Ok(nicrs[o])).unwrap()
        }

        fn is_valid(&self, nicr: u128, prev: Option<&Address>, next: Option<&Address>) -> bool {
            let nicrs = &self.nicrs;
            self.list
                .valid_insert_position(nicr, prev, next, &|o: &Address| Ok(nicrs[o]))
                .unwrap()
        }

        fn nicrs(&self) -> Vec<u128> {
            self.list.iter().map(|o| self.nicrs[&o]).collect()
        }

        fn owners(&self) -> Vec<Address> {
            self.list.iter().collect()
        }
    }

    #[test]
    fn test_insert_without_hints_keeps_descending_order() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        for (i, nicr) in [50u128, 200, 10, 120, 75].iter().enumerate() {
            fx.insert(i as u8 + 1, *nicr, None, None).unwrap();
        }
        assert_eq!(fx.nicrs(), vec![200, 120, 75, 50, 10]);
        assert_eq!(fx.list.first(), Some(owner(2)));
        assert_eq!(fx.list.last(), Some(owner(3)));
        assert_eq!(fx.list.size(), 5);
    }

    #[test]
    fn test_equal_nicr_keeps_insertion_order() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 100, None, None).unwrap();
        fx.insert(2, 100, None, None).unwrap();
        fx.insert(3, 100, Some(&owner(1)), Some(&owner(2))).unwrap();
        // The (1, 2) hint is not the valid position for a third equal NICR
        assert_eq!(fx.owners(), vec![owner(1), owner(2), owner(3)]);
    }

    #[test]
    fn test_correct_hint_used() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 300, None, None).unwrap();
        fx.insert(2, 100, None, None).unwrap();
        assert!(fx.is_valid(200, Some(&owner(1)), Some(&owner(2))));
        assert!(!fx.is_valid(400, Some(&owner(1)), Some(&owner(2))));
        fx.insert(3, 200, Some(&owner(1)), Some(&owner(2))).unwrap();
        assert_eq!(fx.list.next(&owner(1)), Some(owner(3)));
        assert_eq!(fx.list.prev(&owner(2)), Some(owner(3)));
    }

    #[test]
    fn test_stale_hints_fall_back() {
        let mut fx = Fixture::new(1);
        for i in 1..=20u8 {
            fx.insert(i, 1_000 - i as u128 * 10, None, None).unwrap();
        }
        // Hint far from the real spot and beyond the walk limit
        fx.insert(100, 805, Some(&owner(1)), None).unwrap();
        // Hint pointing at a removed node
        fx.list.remove(&owner(5)).unwrap();
        fx.insert(101, 951, Some(&owner(5)), Some(&owner(5))).unwrap();
        // Next-only hint that is below the NICR
        fx.insert(102, 999, None, Some(&owner(20))).unwrap();

        assert!(fx.nicrs().windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(fx.list.first(), Some(owner(102)));
        assert_eq!(fx.list.next(&owner(100)), Some(owner(20)));
        assert_eq!(fx.list.prev(&owner(100)), Some(owner(19)));
    }

    #[test]
    fn test_find_matches_scan() {
        let mut fx = Fixture::new(2);
        for (i, nicr) in [900u128, 700, 700, 500, 300, 100].iter().enumerate() {
            fx.insert(i as u8 + 1, *nicr, None, None).unwrap();
        }
        for nicr in [1_000u128, 900, 800, 700, 600, 100, 50] {
            for hint in [None, Some(owner(1)), Some(owner(6)), Some(owner(42))] {
                assert_eq!(
                    fx.find(nicr, hint.as_ref()),
                    fx.scan(nicr),
                    "nicr {} hint {:?}",
                    nicr,
                    hint.map(|h| h[0])
                );
            }
        }
    }

    #[test]
    fn test_insert_reads_current_neighbour_nicr() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 500, None, None).unwrap();
        fx.insert(2, 300, None, None).unwrap();

        // Both positions drop by the same share without being reinserted
        fx.nicrs.insert(owner(1), 384);
        fx.nicrs.insert(owner(2), 272);

        fx.insert(3, 290, None, None).unwrap();
        assert_eq!(fx.owners(), vec![owner(1), owner(3), owner(2)]);
        assert_eq!(fx.list.last(), Some(owner(2)));
        assert_eq!(fx.scan(280), (Some(owner(3)), Some(owner(2))));
    }

    #[test]
    fn test_lookup_error_propagates() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 500, None, None).unwrap();
        let failing = |o: &Address| -> TrenResult<u128> { Err(TrenError::NodeNotInList { owner: *o }) };
        assert_eq!(
            fx.list.insert(&owner(2), 100, None, None, &failing),
            Err(TrenError::NodeNotInList { owner: owner(1) })
        );
        assert!(!fx.list.contains(&owner(2)));
        assert_eq!(fx.list.size(), 1);
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 300, None, None).unwrap();
        fx.insert(2, 200, None, None).unwrap();
        fx.insert(3, 100, None, None).unwrap();

        fx.list.remove(&owner(1)).unwrap();
        assert_eq!(fx.list.first(), Some(owner(2)));
        fx.list.remove(&owner(3)).unwrap();
        assert_eq!(fx.list.last(), Some(owner(2)));

        fx.insert(4, 250, None, None).unwrap();
        assert_eq!(fx.owners(), vec![owner(4), owner(2)]);
        assert_eq!(fx.list.nodes.len(), 3);

        fx.list.remove(&owner(2)).unwrap();
        fx.list.remove(&owner(4)).unwrap();
        assert!(fx.list.is_empty());
        assert_eq!(fx.list.first(), None);
        assert_eq!(fx.list.last(), None);
    }

    #[test]
    fn test_reinsert_moves_node() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 300, None, None).unwrap();
        fx.insert(2, 200, None, None).unwrap();
        fx.reinsert(2, 400, None, Some(&owner(1))).unwrap();
        assert_eq!(fx.owners(), vec![owner(2), owner(1)]);
        assert_eq!(fx.nicrs(), vec![400, 300]);
    }

    #[test]
    fn test_errors() {
        let mut fx = Fixture::new(MAX_SEARCH_DEPTH);
        fx.insert(1, 300, None, None).unwrap();
        assert_eq!(
            fx.insert(1, 300, None, None),
            Err(TrenError::NodeAlreadyInList { owner: owner(1) })
        );
        assert_eq!(fx.insert(2, 0, None, None), Err(TrenError::ZeroNicr));
        assert_eq!(fx.list.remove(&owner(2)), Err(TrenError::NodeNotInList { owner: owner(2) }));
        assert_eq!(
            fx.reinsert(2, 5, None, None),
            Err(TrenError::NodeNotInList { owner: owner(2) })
        );
    }
}
