//! Per-asset ledger state
//!
//! Everything the engine keeps for one collateral asset: position records,
//! the sorted index, the reward accumulator, the base rate and the pools.
//! The position-level operations here keep those parts consistent with each
//! other; the checks that depend on prices, fees or tokens live in the
//! coordinator and the engines.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tren_common::{
    config::AssetParams,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{compute_cr, compute_nominal_cr, safe_add, safe_sub},
    types::{Address, AssetId, EntireDebtAndColl, TrenBox, TrenBoxOperation, TrenBoxStatus},
};

use crate::fees::FeeState;
use crate::pools::{ActivePool, CollSurplusPool, DefaultPool};
use crate::rewards::RewardAccumulator;
use crate::sorted_trenboxes::SortedTrenBoxes;
use crate::trenboxes::TrenBoxLedger;

/// Change applied to one position by [`AssetLedgerState::adjust`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionDelta {
    pub coll_change: u128,
    pub is_coll_increase: bool,
    pub debt_change: u128,
    pub is_debt_increase: bool,
}

/// State of one collateral asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLedgerState {
    pub asset: AssetId,
    pub params: AssetParams,
    pub trenboxes: TrenBoxLedger,
    pub sorted: SortedTrenBoxes,
    pub rewards: RewardAccumulator,
    pub fees: FeeState,
    pub active_pool: ActivePool,
    pub default_pool: DefaultPool,
    pub coll_surplus: CollSurplusPool,
}

impl AssetLedgerState {
    pub fn new(asset: AssetId, params: AssetParams, max_search_depth: usize) -> Self {
        Self {
            asset,
            params,
            trenboxes: TrenBoxLedger::new(),
            sorted: SortedTrenBoxes::new(max_search_depth),
            rewards: RewardAccumulator::new(),
            fees: FeeState::new(),
            active_pool: ActivePool::default(),
            default_pool: DefaultPool::default(),
            coll_surplus: CollSurplusPool::default(),
        }
    }

    // ============ System Views ============

    /// Collateral in the active and default pools
    pub fn entire_system_coll(&self) -> TrenResult<u128> {
        safe_add(self.active_pool.coll(), self.default_pool.coll())
    }

    /// Debt in the active and default pools
    pub fn entire_system_debt(&self) -> TrenResult<u128> {
        safe_add(self.active_pool.debt(), self.default_pool.debt())
    }

    /// Total collateral ratio at `price`
    pub fn tcr(&self, price: u128) -> TrenResult<u128> {
        Ok(compute_cr(self.entire_system_coll()?, self.entire_system_debt()?, price))
    }

    pub fn is_recovery_mode(&self, price: u128) -> TrenResult<bool> {
        Ok(self.tcr(price)? < self.params.ccr)
    }

    /// TCR after a position change of the given size
    pub fn tcr_after(&self, delta: &PositionDelta, price: u128) -> TrenResult<u128> {
        let mut coll = self.entire_system_coll()?;
        let mut debt = self.entire_system_debt()?;
        coll = if delta.is_coll_increase {
            safe_add(coll, delta.coll_change)?
        } else {
            safe_sub(coll, delta.coll_change)?
        };
        debt = if delta.is_debt_increase {
            safe_add(debt, delta.debt_change)?
        } else {
            safe_sub(debt, delta.debt_change)?
        };
        Ok(compute_cr(coll, debt, price))
    }

    // ============ Position Views ============

    /// Recorded amounts plus pending rewards; zero for unknown owners
    pub fn entire_debt_and_coll(&self, owner: &Address) -> TrenResult<EntireDebtAndColl> {
        match self.trenboxes.get(owner) {
            Some(trenbox) => self.rewards.entire_debt_and_coll(owner, trenbox),
            None => Ok(EntireDebtAndColl::default()),
        }
    }

    /// NICR including pending rewards
    pub fn nominal_icr(&self, owner: &Address) -> TrenResult<u128> {
        live_nicr(&self.trenboxes, &self.rewards, owner)
    }

    /// Valid `(prev, next)` index position for `nicr` against live NICRs
    pub fn find_insert_position(
        &self,
        nicr: u128,
        prev_hint: Option<&Address>,
        next_hint: Option<&Address>,
    ) -> TrenResult<(Option<Address>, Option<Address>)> {
        let nicr_of = |o: &Address| live_nicr(&self.trenboxes, &self.rewards, o);
        self.sorted.find_insert_position(nicr, prev_hint, next_hint, &nicr_of)
    }

    /// ICR including pending rewards
    pub fn current_icr(&self, owner: &Address, price: u128) -> TrenResult<u128> {
        let entire = self.entire_debt_and_coll(owner)?;
        Ok(compute_cr(entire.coll, entire.debt, price))
    }

    /// Whether the riskiest position is below MCR
    pub fn has_undercollateralized(&self, price: u128) -> TrenResult<bool> {
        match self.sorted.last() {
            Some(owner) => Ok(self.current_icr(&owner, price)? < self.params.mcr),
            None => Ok(false),
        }
    }

    // ============ Position Operations ============

    /// Create an Active position, give it a stake and index it.
    ///
    /// Returns the new stake. Pools and tokens are left to the caller.
    pub fn open(
        &mut self,
        owner: &Address,
        coll: u128,
        debt: u128,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        let asset = self.asset;
        self.trenboxes.create(&asset, owner, coll, debt, events)?;

        let trenbox = self.trenboxes.active_mut(&asset, owner)?;
        let stake = self.rewards.update_stake_and_total_stakes(&asset, trenbox, events)?;

        self.reindex(owner, compute_nominal_cr(coll, debt), upper_hint, lower_hint)?;
        self.rewards.update_snapshots(&asset, owner, events);

        events.emit(TrenEvent::TrenBoxUpdated {
            asset,
            owner: *owner,
            debt,
            coll,
            stake,
            operation: TrenBoxOperation::OpenTrenBox,
        });
        log::debug!("opened trenbox: coll {} debt {} stake {}", coll, debt, stake);
        Ok(stake)
    }

    /// Settle pending rewards, apply `delta`, restake and re-index
    pub fn adjust(
        &mut self,
        owner: &Address,
        delta: PositionDelta,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
        events: &mut EventLog,
    ) -> TrenResult<TrenBox> {
        let asset = self.asset;
        self.trenboxes.require_active(&asset, owner)?;
        self.apply_pending_rewards(owner, events)?;

        if delta.coll_change > 0 {
            if delta.is_coll_increase {
                self.trenboxes.increase_coll(&asset, owner, delta.coll_change)?;
            } else {
                self.trenboxes.decrease_coll(&asset, owner, delta.coll_change)?;
            }
        }
        if delta.debt_change > 0 {
            if delta.is_debt_increase {
                self.trenboxes.increase_debt(&asset, owner, delta.debt_change)?;
            } else {
                self.trenboxes.decrease_debt(&asset, owner, delta.debt_change)?;
            }
        }

        let trenbox = self.trenboxes.active_mut(&asset, owner)?;
        self.rewards.update_stake_and_total_stakes(&asset, trenbox, events)?;
        let updated = trenbox.clone();

        self.reindex(owner, compute_nominal_cr(updated.coll, updated.debt), upper_hint, lower_hint)?;

        events.emit(TrenEvent::TrenBoxUpdated {
            asset,
            owner: *owner,
            debt: updated.debt,
            coll: updated.coll,
            stake: updated.stake,
            operation: TrenBoxOperation::AdjustTrenBox,
        });
        Ok(updated)
    }

    /// Add or remove collateral
    pub fn adjust_collateral(
        &mut self,
        owner: &Address,
        amount: u128,
        is_increase: bool,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
        events: &mut EventLog,
    ) -> TrenResult<TrenBox> {
        let delta = PositionDelta {
            coll_change: amount,
            is_coll_increase: is_increase,
            ..PositionDelta::default()
        };
        self.adjust(owner, delta, upper_hint, lower_hint, events)
    }

    /// Add or remove debt
    pub fn adjust_debt(
        &mut self,
        owner: &Address,
        amount: u128,
        is_increase: bool,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
        events: &mut EventLog,
    ) -> TrenResult<TrenBox> {
        let delta = PositionDelta {
            debt_change: amount,
            is_debt_increase: is_increase,
            ..PositionDelta::default()
        };
        self.adjust(owner, delta, upper_hint, lower_hint, events)
    }

    /// Close an Active position with a terminal `status`.
    ///
    /// Removes its stake, snapshot and index node. Fails for the last
    /// position of the asset.
    pub fn close(&mut self, owner: &Address, status: TrenBoxStatus, events: &mut EventLog) -> TrenResult<()> {
        let asset = self.asset;
        self.trenboxes.require_active(&asset, owner)?;
        if self.trenboxes.count() <= 1 || self.sorted.size() <= 1 {
            return Err(TrenError::OnlyOneTrenBox { asset });
        }

        let trenbox = self.trenboxes.active_mut(&asset, owner)?;
        self.rewards.remove_stake(&asset, trenbox, events)?;
        self.rewards.clear_snapshots(owner);
        self.sorted.remove(owner)?;
        self.trenboxes.close(&asset, owner, status, events)
    }

    /// Insert or move an owner in the sorted index at `nicr`.
    ///
    /// Neighbours are compared by their live NICR, pending rewards included.
    pub fn reindex(
        &mut self,
        owner: &Address,
        nicr: u128,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
    ) -> TrenResult<()> {
        let Self {
            trenboxes,
            rewards,
            sorted,
            ..
        } = self;
        let (trenboxes, rewards) = (&*trenboxes, &*rewards);
        let nicr_of = |o: &Address| live_nicr(trenboxes, rewards, o);

        if sorted.contains(owner) {
            sorted.reinsert(owner, nicr, upper_hint, lower_hint, &nicr_of)
        } else {
            sorted.insert(owner, nicr, upper_hint, lower_hint, &nicr_of)
        }
    }

    // ============ Rewards ============

    /// Move an owner's pending redistribution rewards into the record
    pub fn apply_pending_rewards(&mut self, owner: &Address, events: &mut EventLog) -> TrenResult<()> {
        let asset = self.asset;
        let trenbox = match self.trenboxes.get(owner) {
            Some(t) if self.rewards.has_pending_rewards(owner, t) => t,
            _ => return Ok(()),
        };
        let pending_coll = self.rewards.pending_coll_reward(owner, trenbox)?;
        let pending_debt = self.rewards.pending_debt_reward(owner, trenbox)?;

        let trenbox = self.trenboxes.active_mut(&asset, owner)?;
        trenbox.coll = safe_add(trenbox.coll, pending_coll)?;
        trenbox.debt = safe_add(trenbox.debt, pending_debt)?;
        let (debt, coll, stake) = (trenbox.debt, trenbox.coll, trenbox.stake);

        self.rewards.update_snapshots(&asset, owner, events);
        self.move_pending_to_active(pending_debt, pending_coll, events)?;

        events.emit(TrenEvent::TrenBoxUpdated {
            asset,
            owner: *owner,
            debt,
            coll,
            stake,
            operation: TrenBoxOperation::ApplyPendingRewards,
        });
        Ok(())
    }

    /// Default pool to active pool
    pub fn move_pending_to_active(&mut self, debt: u128, coll: u128, events: &mut EventLog) -> TrenResult<()> {
        let asset = self.asset;
        if debt > 0 {
            self.default_pool.decrease_debt(&asset, debt, events)?;
            self.active_pool.increase_debt(&asset, debt, events)?;
        }
        if coll > 0 {
            self.default_pool.send_coll(&asset, coll, events)?;
            self.active_pool.receive_coll(&asset, coll, events)?;
        }
        Ok(())
    }

    /// Spread `debt` and `coll` over all stakes and park them in the default pool
    pub fn redistribute_debt_and_coll(&mut self, debt: u128, coll: u128, events: &mut EventLog) -> TrenResult<()> {
        if debt == 0 {
            return Ok(());
        }
        let asset = self.asset;
        self.rewards.redistribute(&asset, debt, coll, events)?;

        self.active_pool.decrease_debt(&asset, debt, events)?;
        self.default_pool.increase_debt(&asset, debt, events)?;
        self.active_pool.send_coll(&asset, coll, events)?;
        self.default_pool.receive_coll(&asset, coll, events)
    }

    // ============ Commitment ============

    /// SHA-256 over every position record and aggregate of the asset
    pub fn state_digest(&self) -> TrenResult<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.asset);

        for (owner, trenbox) in self.trenboxes.iter() {
            hasher.update(owner);
            hasher.update(borsh::to_vec(trenbox)?);
            hasher.update(borsh::to_vec(&self.rewards.snapshot_of(owner))?);
        }
        for owner in self.trenboxes.owners() {
            hasher.update(owner);
        }
        for owner in self.sorted.iter() {
            hasher.update(owner);
        }

        let totals = [
            self.rewards.total_stakes,
            self.rewards.total_stakes_snapshot,
            self.rewards.total_collateral_snapshot,
            self.rewards.l_coll,
            self.rewards.l_debt,
            self.rewards.last_coll_error_redistribution,
            self.rewards.last_debt_error_redistribution,
            self.active_pool.coll(),
            self.active_pool.debt(),
            self.default_pool.coll(),
            self.default_pool.debt(),
            self.coll_surplus.total(),
            self.fees.base_rate,
        ];
        for value in totals {
            hasher.update(value.to_le_bytes());
        }
        hasher.update(self.fees.last_fee_operation_time.to_le_bytes());
        Ok(hasher.finalize().into())
    }
}

// Recorded amounts plus pending rewards; zero for owners without a record
fn live_nicr(trenboxes: &TrenBoxLedger, rewards: &RewardAccumulator, owner: &Address) -> TrenResult<u128> {
    match trenboxes.get(owner) {
        Some(trenbox) => {
            let entire = rewards.entire_debt_and_coll(owner, trenbox)?;
            Ok(compute_nominal_cr(entire.coll, entire.debt))
        }
        None => Ok(0),
    }
}
