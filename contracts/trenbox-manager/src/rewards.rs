//! Reward accumulator
//!
//! Debt and collateral redistributed from liquidated positions are spread
//! over all remaining stakes in O(1): the per-unit-staked sums `L_coll` and
//! `L_debt` grow, and each position settles `stake * (L - snapshot)` the
//! next time it is touched.
//!
//! Stakes are scaled by `total_stakes_snapshot / total_collateral_snapshot`
//! so a position opened after a redistribution does not earn rewards from
//! collateral that was already distributed.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use tren_common::{
    constants::precision::DECIMAL_PRECISION,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{mul_div, safe_add, safe_sub, to_u128},
    types::{Address, AssetId, EntireDebtAndColl, RewardSnapshot, TrenBox},
};

/// Redistribution sums and stake totals of one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAccumulator {
    pub total_stakes: u128,
    pub total_stakes_snapshot: u128,
    pub total_collateral_snapshot: u128,
    /// Collateral reward per unit staked
    pub l_coll: u128,
    /// Debt reward per unit staked
    pub l_debt: u128,
    pub last_coll_error_redistribution: u128,
    pub last_debt_error_redistribution: u128,
    snapshots: BTreeMap<Address, RewardSnapshot>,
}

impl RewardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator values last applied to an owner
    pub fn snapshot_of(&self, owner: &Address) -> RewardSnapshot {
        self.snapshots.get(owner).copied().unwrap_or_default()
    }

    // ============ Pending Rewards ============

    /// Collateral owed to an Active position from redistributions
    pub fn pending_coll_reward(&self, owner: &Address, trenbox: &TrenBox) -> TrenResult<u128> {
        let snapshot = self.snapshot_of(owner).coll;
        let per_unit = safe_sub(self.l_coll, snapshot)?;
        if per_unit == 0 || !trenbox.is_active() {
            return Ok(0);
        }
        mul_div(trenbox.stake, per_unit, DECIMAL_PRECISION)
    }

    /// Debt owed by an Active position from redistributions
    pub fn pending_debt_reward(&self, owner: &Address, trenbox: &TrenBox) -> TrenResult<u128> {
        let snapshot = self.snapshot_of(owner).debt;
        let per_unit = safe_sub(self.l_debt, snapshot)?;
        if per_unit == 0 || !trenbox.is_active() {
            return Ok(0);
        }
        mul_div(trenbox.stake, per_unit, DECIMAL_PRECISION)
    }

    /// Whether the position has rewards it has not settled yet
    pub fn has_pending_rewards(&self, owner: &Address, trenbox: &TrenBox) -> bool {
        let snapshot = self.snapshot_of(owner);
        trenbox.is_active() && (snapshot.coll < self.l_coll || snapshot.debt < self.l_debt)
    }

    /// Recorded amounts plus pending rewards
    pub fn entire_debt_and_coll(&self, owner: &Address, trenbox: &TrenBox) -> TrenResult<EntireDebtAndColl> {
        let pending_debt_reward = self.pending_debt_reward(owner, trenbox)?;
        let pending_coll_reward = self.pending_coll_reward(owner, trenbox)?;
        Ok(EntireDebtAndColl {
            debt: safe_add(trenbox.debt, pending_debt_reward)?,
            coll: safe_add(trenbox.coll, pending_coll_reward)?,
            pending_debt_reward,
            pending_coll_reward,
        })
    }

    /// Record the current sums as the owner's snapshot
    pub fn update_snapshots(&mut self, asset: &AssetId, owner: &Address, events: &mut EventLog) {
        self.snapshots.insert(
            *owner,
            RewardSnapshot {
                coll: self.l_coll,
                debt: self.l_debt,
            },
        );
        events.emit(TrenEvent::TrenBoxSnapshotsUpdated {
            asset: *asset,
            l_coll: self.l_coll,
            l_debt: self.l_debt,
        });
    }

    /// Forget a closed position's snapshot
    pub fn clear_snapshots(&mut self, owner: &Address) {
        self.snapshots.remove(owner);
    }

    // ============ Stakes ============

    /// Stake for `coll` under the current system snapshots
    pub fn compute_new_stake(&self, coll: u128) -> TrenResult<u128> {
        if self.total_collateral_snapshot == 0 {
            return Ok(coll);
        }
        // Snapshots exist only after a liquidation, which leaves stakes behind
        if self.total_stakes_snapshot == 0 {
            return Err(TrenError::DivisionByZero);
        }
        mul_div(coll, self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    /// Recompute a position's stake from its collateral and fix the total
    pub fn update_stake_and_total_stakes(
        &mut self,
        asset: &AssetId,
        trenbox: &mut TrenBox,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        let new_stake = self.compute_new_stake(trenbox.coll)?;
        let old_stake = trenbox.stake;
        trenbox.stake = new_stake;

        self.total_stakes = safe_add(safe_sub(self.total_stakes, old_stake)?, new_stake)?;
        events.emit(TrenEvent::TotalStakesUpdated {
            asset: *asset,
            new_total_stakes: self.total_stakes,
        });
        Ok(new_stake)
    }

    /// Drop a position's stake from the total
    pub fn remove_stake(&mut self, asset: &AssetId, trenbox: &mut TrenBox, events: &mut EventLog) -> TrenResult<()> {
        self.total_stakes = safe_sub(self.total_stakes, trenbox.stake)?;
        trenbox.stake = 0;
        events.emit(TrenEvent::TotalStakesUpdated {
            asset: *asset,
            new_total_stakes: self.total_stakes,
        });
        Ok(())
    }

    // ============ Redistribution ============

    /// Spread `debt` and `coll` over all current stakes.
    ///
    /// Division remainders are carried to the next redistribution. Moving
    /// the amounts between pools is left to the caller.
    pub fn redistribute(&mut self, asset: &AssetId, debt: u128, coll: u128, events: &mut EventLog) -> TrenResult<()> {
        if debt == 0 {
            return Ok(());
        }
        if self.total_stakes == 0 {
            return Err(TrenError::DivisionByZero);
        }

        let total = U256::from(self.total_stakes);
        let precision = U256::from(DECIMAL_PRECISION);

        let coll_numerator = U256::from(coll) * precision + U256::from(self.last_coll_error_redistribution);
        let debt_numerator = U256::from(debt) * precision + U256::from(self.last_debt_error_redistribution);

        let coll_per_unit = coll_numerator / total;
        let debt_per_unit = debt_numerator / total;

        self.last_coll_error_redistribution = to_u128(coll_numerator - coll_per_unit * total)?;
        self.last_debt_error_redistribution = to_u128(debt_numerator - debt_per_unit * total)?;

        self.l_coll = safe_add(self.l_coll, to_u128(coll_per_unit)?)?;
        self.l_debt = safe_add(self.l_debt, to_u128(debt_per_unit)?)?;

        events.emit(TrenEvent::LTermsUpdated {
            asset: *asset,
            l_coll: self.l_coll,
            l_debt: self.l_debt,
        });
        events.emit(TrenEvent::Redistribution {
            asset: *asset,
            debt,
            coll,
        });
        log::debug!("redistributed {} debt and {} coll over {} stakes", debt, coll, self.total_stakes);
        Ok(())
    }

    /// Refresh the stake snapshots after a liquidation sequence.
    ///
    /// `coll_remainder` is collateral still in the active pool that is about
    /// to leave it (gas compensation). With no stakes left both snapshots
    /// reset so the next position starts from par.
    pub fn update_system_snapshots_exclude_coll_remainder(
        &mut self,
        asset: &AssetId,
        active_coll: u128,
        default_coll: u128,
        coll_remainder: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if self.total_stakes == 0 {
            self.total_stakes_snapshot = 0;
            self.total_collateral_snapshot = 0;
        } else {
            self.total_stakes_snapshot = self.total_stakes;
            self.total_collateral_snapshot = safe_add(safe_sub(active_coll, coll_remainder)?, default_coll)?;
        }
        events.emit(TrenEvent::SystemSnapshotsUpdated {
            asset: *asset,
            total_stakes_snapshot: self.total_stakes_snapshot,
            total_collateral_snapshot: self.total_collateral_snapshot,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::types::TrenBoxStatus;

    const ONE: u128 = DECIMAL_PRECISION;

    fn asset() -> AssetId {
        [0xAA; 32]
    }

    fn owner(n: u8) -> Address {
        [n; 32]
    }

    fn active(coll: u128, debt: u128) -> TrenBox {
        TrenBox {
            debt,
            coll,
            stake: 0,
            status: TrenBoxStatus::Active,
            array_index: 0,
        }
    }

    #[test]
    fn test_stake_equals_coll_before_any_liquidation() {
        let acc = RewardAccumulator::new();
        assert_eq!(acc.compute_new_stake(123 * ONE).unwrap(), 123 * ONE);
    }

    #[test]
    fn test_stake_scaled_by_snapshots() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = 100 * ONE;
        let mut events = EventLog::new();
        // 100 stakes now backed by 150 collateral
        acc.update_system_snapshots_exclude_coll_remainder(&asset(), 151 * ONE, 0, ONE, &mut events)
            .unwrap();
        assert_eq!(acc.compute_new_stake(150 * ONE).unwrap(), 100 * ONE);
    }

    #[test]
    fn test_snapshots_reset_without_stakes() {
        let mut acc = RewardAccumulator::new();
        let mut events = EventLog::new();
        acc.update_system_snapshots_exclude_coll_remainder(&asset(), 50 * ONE, 0, 0, &mut events)
            .unwrap();
        assert_eq!(acc.total_collateral_snapshot, 0);
        assert_eq!(acc.compute_new_stake(7 * ONE).unwrap(), 7 * ONE);
    }

    #[test]
    fn test_redistribution_and_pending() {
        let mut acc = RewardAccumulator::new();
        let mut events = EventLog::new();
        let mut a = active(100 * ONE, 2_000 * ONE);
        let mut b = active(300 * ONE, 2_000 * ONE);
        acc.update_stake_and_total_stakes(&asset(), &mut a, &mut events).unwrap();
        acc.update_stake_and_total_stakes(&asset(), &mut b, &mut events).unwrap();
        acc.update_snapshots(&asset(), &owner(1), &mut events);
        acc.update_snapshots(&asset(), &owner(2), &mut events);

        acc.redistribute(&asset(), 1_000 * ONE, 40 * ONE, &mut events).unwrap();

        assert_eq!(acc.pending_coll_reward(&owner(1), &a).unwrap(), 10 * ONE);
        assert_eq!(acc.pending_debt_reward(&owner(1), &a).unwrap(), 250 * ONE);
        assert_eq!(acc.pending_coll_reward(&owner(2), &b).unwrap(), 30 * ONE);
        assert!(acc.has_pending_rewards(&owner(1), &a));

        let entire = acc.entire_debt_and_coll(&owner(2), &b).unwrap();
        assert_eq!(entire.debt, 2_750 * ONE);
        assert_eq!(entire.coll, 330 * ONE);

        // Settled: nothing left
        acc.update_snapshots(&asset(), &owner(1), &mut events);
        assert_eq!(acc.pending_coll_reward(&owner(1), &a).unwrap(), 0);
        assert!(!acc.has_pending_rewards(&owner(1), &a));
    }

    #[test]
    fn test_redistribution_error_carry() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = 3;
        let mut events = EventLog::new();
        acc.redistribute(&asset(), 1, 1, &mut events).unwrap();
        // 1e18 / 3 leaves a remainder of 1
        assert_eq!(acc.l_coll, 333_333_333_333_333_333);
        assert_eq!(acc.last_coll_error_redistribution, 1);
        acc.redistribute(&asset(), 1, 2, &mut events).unwrap();
        assert_eq!(acc.l_coll, 333_333_333_333_333_333 + 666_666_666_666_666_667);
        assert_eq!(acc.last_coll_error_redistribution, 0);
    }

    #[test]
    fn test_closed_position_earns_nothing() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = ONE;
        let mut events = EventLog::new();
        acc.redistribute(&asset(), ONE, ONE, &mut events).unwrap();
        let closed = TrenBox { stake: ONE, ..TrenBox::default() };
        assert_eq!(acc.pending_coll_reward(&owner(1), &closed).unwrap(), 0);
        assert!(!acc.has_pending_rewards(&owner(1), &closed));
    }

    #[test]
    fn test_redistribute_without_stakes_fails() {
        let mut acc = RewardAccumulator::new();
        let mut events = EventLog::new();
        assert_eq!(
            acc.redistribute(&asset(), ONE, ONE, &mut events),
            Err(TrenError::DivisionByZero)
        );
        // Zero debt is a no-op even without stakes
        acc.redistribute(&asset(), 0, 0, &mut events).unwrap();
    }
}
