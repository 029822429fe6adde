//! Position ledger
//!
//! One [`TrenBox`] per owner plus a dense owner array. The array lets
//! sequences index positions in O(1); closing swaps the last owner into the
//! freed slot and records the move on both sides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tren_common::{
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{safe_add, safe_sub},
    types::{Address, AssetId, TrenBox, TrenBoxStatus},
};

/// Positions of one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrenBoxLedger {
    trenboxes: BTreeMap<Address, TrenBox>,
    owners: Vec<Address>,
}

impl TrenBoxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ============ Views ============

    /// Record of an owner, closed positions included
    pub fn get(&self, owner: &Address) -> Option<&TrenBox> {
        self.trenboxes.get(owner)
    }

    /// Status of an owner's position
    pub fn status(&self, owner: &Address) -> TrenBoxStatus {
        self.trenboxes
            .get(owner)
            .map(|t| t.status)
            .unwrap_or(TrenBoxStatus::NonExistent)
    }

    pub fn is_active(&self, owner: &Address) -> bool {
        self.status(owner) == TrenBoxStatus::Active
    }

    /// Active record or `TrenBoxNotActive`
    pub fn require_active(&self, asset: &AssetId, owner: &Address) -> TrenResult<&TrenBox> {
        match self.trenboxes.get(owner) {
            Some(t) if t.is_active() => Ok(t),
            _ => Err(TrenError::TrenBoxNotActive { asset: *asset, owner: *owner }),
        }
    }

    /// Owners of Active positions in array order
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn owner_at(&self, index: usize) -> Option<&Address> {
        self.owners.get(index)
    }

    /// Number of Active positions
    pub fn count(&self) -> usize {
        self.owners.len()
    }

    /// Every record with its owner, closed positions included
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &TrenBox)> {
        self.trenboxes.iter()
    }

    // ============ Mutations ============

    /// Create an Active position and append its owner to the array.
    ///
    /// The stake is left at zero; the caller computes it once the record
    /// exists. Reopening a closed position reuses the owner's record.
    pub fn create(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        coll: u128,
        debt: u128,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        if self.is_active(owner) {
            return Err(TrenError::TrenBoxIsActive { asset: *asset, owner: *owner });
        }

        let index = self.owners.len() as u128;
        self.owners.push(*owner);
        self.trenboxes.insert(
            *owner,
            TrenBox {
                debt,
                coll,
                stake: 0,
                status: TrenBoxStatus::Active,
                array_index: index,
            },
        );

        events.emit(TrenEvent::TrenBoxCreated {
            asset: *asset,
            owner: *owner,
            array_index: index,
        });
        Ok(index)
    }

    /// Mutable access to an Active record
    pub fn active_mut(&mut self, asset: &AssetId, owner: &Address) -> TrenResult<&mut TrenBox> {
        match self.trenboxes.get_mut(owner) {
            Some(t) if t.is_active() => Ok(t),
            _ => Err(TrenError::TrenBoxNotActive { asset: *asset, owner: *owner }),
        }
    }

    pub fn increase_coll(&mut self, asset: &AssetId, owner: &Address, amount: u128) -> TrenResult<u128> {
        let t = self.active_mut(asset, owner)?;
        t.coll = safe_add(t.coll, amount)?;
        Ok(t.coll)
    }

    pub fn decrease_coll(&mut self, asset: &AssetId, owner: &Address, amount: u128) -> TrenResult<u128> {
        let t = self.active_mut(asset, owner)?;
        if amount > t.coll {
            return Err(TrenError::InsufficientCollateral {
                available: t.coll,
                requested: amount,
            });
        }
        t.coll -= amount;
        Ok(t.coll)
    }

    pub fn increase_debt(&mut self, asset: &AssetId, owner: &Address, amount: u128) -> TrenResult<u128> {
        let t = self.active_mut(asset, owner)?;
        t.debt = safe_add(t.debt, amount)?;
        Ok(t.debt)
    }

    pub fn decrease_debt(&mut self, asset: &AssetId, owner: &Address, amount: u128) -> TrenResult<u128> {
        let t = self.active_mut(asset, owner)?;
        t.debt = safe_sub(t.debt, amount)?;
        Ok(t.debt)
    }

    /// Close a position and drop its owner from the array.
    ///
    /// The last Active position of an asset can never be closed. The stake
    /// must already have been removed from the totals.
    pub fn close(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        status: TrenBoxStatus,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if !status.is_closed() {
            return Err(TrenError::InvalidParameter {
                param: "status",
                reason: "closing status must be terminal",
            });
        }
        self.require_active(asset, owner)?;
        if self.owners.len() <= 1 {
            return Err(TrenError::OnlyOneTrenBox { asset: *asset });
        }

        let index = self.trenboxes.get(owner).map(|t| t.array_index).unwrap_or_default();
        self.remove_owner(asset, owner, index as usize, events)?;

        if let Some(t) = self.trenboxes.get_mut(owner) {
            t.status = status;
            t.coll = 0;
            t.debt = 0;
            t.stake = 0;
            t.array_index = 0;
        }
        Ok(())
    }

    // swap-and-pop, keeping the moved owner's back-reference in sync
    fn remove_owner(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        index: usize,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if self.owners.get(index) != Some(owner) {
            return Err(TrenError::NodeNotInList { owner: *owner });
        }

        let last = self.owners.len() - 1;
        self.owners.swap_remove(index);
        if index != last {
            let moved = self.owners[index];
            if let Some(t) = self.trenboxes.get_mut(&moved) {
                t.array_index = index as u128;
            }
            events.emit(TrenEvent::TrenBoxIndexUpdated {
                asset: *asset,
                owner: moved,
                new_index: index as u128,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::events::EventType;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn asset() -> AssetId {
        [0xAA; 32]
    }

    fn owner(n: u8) -> Address {
        [n; 32]
    }

    fn ledger_with(n: u8) -> (TrenBoxLedger, EventLog) {
        let mut ledger = TrenBoxLedger::new();
        let mut events = EventLog::new();
        for i in 1..=n {
            ledger
                .create(&asset(), &owner(i), 100 * ONE, 2_000 * ONE, &mut events)
                .unwrap();
        }
        (ledger, events)
    }

    #[test]
    fn test_create_assigns_indices() {
        let (ledger, events) = ledger_with(3);
        assert_eq!(ledger.count(), 3);
        assert_eq!(ledger.get(&owner(3)).unwrap().array_index, 2);
        assert_eq!(events.filter_by_type(EventType::TrenBoxCreated).len(), 3);
    }

    #[test]
    fn test_create_twice_rejected() {
        let (mut ledger, mut events) = ledger_with(1);
        assert_eq!(
            ledger.create(&asset(), &owner(1), ONE, ONE, &mut events),
            Err(TrenError::TrenBoxIsActive { asset: asset(), owner: owner(1) })
        );
    }

    #[test]
    fn test_close_swaps_last_into_slot() {
        let (mut ledger, mut events) = ledger_with(3);
        events.clear();
        ledger
            .close(&asset(), &owner(1), TrenBoxStatus::ClosedByOwner, &mut events)
            .unwrap();

        assert_eq!(ledger.owners(), &[owner(3), owner(2)]);
        assert_eq!(ledger.get(&owner(3)).unwrap().array_index, 0);
        assert_eq!(ledger.status(&owner(1)), TrenBoxStatus::ClosedByOwner);
        assert_eq!(ledger.get(&owner(1)).unwrap().coll, 0);
        assert_eq!(
            events.events(),
            &[TrenEvent::TrenBoxIndexUpdated { asset: asset(), owner: owner(3), new_index: 0 }]
        );
    }

    #[test]
    fn test_close_last_in_array_emits_nothing() {
        let (mut ledger, mut events) = ledger_with(2);
        events.clear();
        ledger
            .close(&asset(), &owner(2), TrenBoxStatus::ClosedByLiquidation, &mut events)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(ledger.owners(), &[owner(1)]);
    }

    #[test]
    fn test_close_only_one_left() {
        let (mut ledger, mut events) = ledger_with(1);
        assert_eq!(
            ledger.close(&asset(), &owner(1), TrenBoxStatus::ClosedByOwner, &mut events),
            Err(TrenError::OnlyOneTrenBox { asset: asset() })
        );
    }

    #[test]
    fn test_reopen_after_close() {
        let (mut ledger, mut events) = ledger_with(2);
        ledger
            .close(&asset(), &owner(1), TrenBoxStatus::ClosedByOwner, &mut events)
            .unwrap();
        let index = ledger.create(&asset(), &owner(1), ONE, ONE, &mut events).unwrap();
        assert_eq!(index, 1);
        assert!(ledger.is_active(&owner(1)));
    }

    #[test]
    fn test_adjust_requires_active() {
        let (mut ledger, _) = ledger_with(1);
        assert_eq!(
            ledger.increase_coll(&asset(), &owner(9), ONE),
            Err(TrenError::TrenBoxNotActive { asset: asset(), owner: owner(9) })
        );
        assert_eq!(ledger.increase_coll(&asset(), &owner(1), ONE).unwrap(), 101 * ONE);
        assert_eq!(ledger.decrease_debt(&asset(), &owner(1), 500 * ONE).unwrap(), 1_500 * ONE);
        assert!(ledger.decrease_coll(&asset(), &owner(1), 1_000 * ONE).is_err());
    }
}
