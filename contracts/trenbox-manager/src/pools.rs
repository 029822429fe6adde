//! Collateral pools
//!
//! - **ActivePool**: collateral and debt of Active positions
//! - **DefaultPool**: redistributed collateral and debt not yet applied
//! - **CollSurplusPool**: collateral owners can claim after a capped
//!   liquidation or a full redemption
//! - **CollateralLedger**: collateral paid out of the system, per account
//!
//! Every balance change emits the matching pool event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tren_common::{
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{safe_add, safe_sub},
    types::{Address, AssetId},
};

// ============ Active Pool ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePool {
    coll: u128,
    debt: u128,
}

impl ActivePool {
    pub fn coll(&self) -> u128 {
        self.coll
    }

    pub fn debt(&self) -> u128 {
        self.debt
    }

    pub fn receive_coll(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.coll = safe_add(self.coll, amount)?;
        events.emit(TrenEvent::ActivePoolAssetBalanceUpdated { asset: *asset, balance: self.coll });
        Ok(())
    }

    pub fn send_coll(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        if amount > self.coll {
            return Err(TrenError::InsufficientCollateral {
                available: self.coll,
                requested: amount,
            });
        }
        self.coll -= amount;
        events.emit(TrenEvent::ActivePoolAssetBalanceUpdated { asset: *asset, balance: self.coll });
        Ok(())
    }

    pub fn increase_debt(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.debt = safe_add(self.debt, amount)?;
        events.emit(TrenEvent::ActivePoolDebtUpdated { asset: *asset, debt: self.debt });
        Ok(())
    }

    pub fn decrease_debt(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.debt = safe_sub(self.debt, amount)?;
        events.emit(TrenEvent::ActivePoolDebtUpdated { asset: *asset, debt: self.debt });
        Ok(())
    }
}

// ============ Default Pool ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPool {
    coll: u128,
    debt: u128,
}

impl DefaultPool {
    pub fn coll(&self) -> u128 {
        self.coll
    }

    pub fn debt(&self) -> u128 {
        self.debt
    }

    pub fn receive_coll(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.coll = safe_add(self.coll, amount)?;
        events.emit(TrenEvent::DefaultPoolAssetBalanceUpdated { asset: *asset, balance: self.coll });
        Ok(())
    }

    pub fn send_coll(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        if amount > self.coll {
            return Err(TrenError::InsufficientCollateral {
                available: self.coll,
                requested: amount,
            });
        }
        self.coll -= amount;
        events.emit(TrenEvent::DefaultPoolAssetBalanceUpdated { asset: *asset, balance: self.coll });
        Ok(())
    }

    pub fn increase_debt(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.debt = safe_add(self.debt, amount)?;
        events.emit(TrenEvent::DefaultPoolDebtUpdated { asset: *asset, debt: self.debt });
        Ok(())
    }

    pub fn decrease_debt(&mut self, asset: &AssetId, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        self.debt = safe_sub(self.debt, amount)?;
        events.emit(TrenEvent::DefaultPoolDebtUpdated { asset: *asset, debt: self.debt });
        Ok(())
    }
}

// ============ Coll Surplus Pool ============

/// Claimable collateral per owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollSurplusPool {
    balances: BTreeMap<Address, u128>,
    total: u128,
}

impl CollSurplusPool {
    /// Total collateral held for claims
    pub fn total(&self) -> u128 {
        self.total
    }

    pub fn claimable(&self, owner: &Address) -> u128 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    /// Credit `amount` to an owner's claim
    pub fn account_surplus(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balances.entry(*owner).or_insert(0);
        *balance = safe_add(*balance, amount)?;
        self.total = safe_add(self.total, amount)?;
        events.emit(TrenEvent::CollSurplusUpdated {
            asset: *asset,
            owner: *owner,
            amount: *balance,
        });
        Ok(())
    }

    /// Empty an owner's claim and return its amount
    pub fn claim(&mut self, asset: &AssetId, owner: &Address, events: &mut EventLog) -> TrenResult<u128> {
        let amount = self
            .balances
            .remove(owner)
            .filter(|a| *a > 0)
            .ok_or(TrenError::NoCollAvailableToClaim { asset: *asset, owner: *owner })?;
        self.total = safe_sub(self.total, amount)?;
        events.emit(TrenEvent::CollSurplusUpdated {
            asset: *asset,
            owner: *owner,
            amount: 0,
        });
        Ok(amount)
    }
}

// ============ Collateral Ledger ============

/// Collateral that has left the pools, per (asset, account)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralLedger {
    balances: BTreeMap<(AssetId, Address), u128>,
}

impl CollateralLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a payout of `amount` to `to`
    pub fn credit(&mut self, asset: &AssetId, to: &Address, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balances.entry((*asset, *to)).or_insert(0);
        *balance = safe_add(*balance, amount)?;
        events.emit(TrenEvent::CollateralSent {
            asset: *asset,
            to: *to,
            amount,
        });
        Ok(())
    }

    pub fn balance_of(&self, asset: &AssetId, account: &Address) -> u128 {
        self.balances.get(&(*asset, *account)).copied().unwrap_or(0)
    }

    /// Everything paid out of one asset
    pub fn total_paid(&self, asset: &AssetId) -> u128 {
        self.balances
            .iter()
            .filter(|((a, _), _)| a == asset)
            .map(|(_, v)| *v)
            .sum()
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

    fn owner() -> Address {
        [1u8; 32]
    }

    #[test]
    fn test_active_pool_balances() {
        let mut pool = ActivePool::default();
        let mut events = EventLog::new();
        pool.receive_coll(&asset(), 10 * ONE, &mut events).unwrap();
        pool.increase_debt(&asset(), 2_000 * ONE, &mut events).unwrap();
        pool.send_coll(&asset(), 4 * ONE, &mut events).unwrap();
        pool.decrease_debt(&asset(), 500 * ONE, &mut events).unwrap();
        assert_eq!(pool.coll(), 6 * ONE);
        assert_eq!(pool.debt(), 1_500 * ONE);
        assert_eq!(events.filter_by_type(EventType::ActivePoolDebtUpdated).len(), 2);

        assert!(pool.send_coll(&asset(), 7 * ONE, &mut events).is_err());
        assert_eq!(pool.decrease_debt(&asset(), 2_000 * ONE, &mut events), Err(TrenError::Underflow));
    }

    #[test]
    fn test_default_pool_balances() {
        let mut pool = DefaultPool::default();
        let mut events = EventLog::new();
        pool.receive_coll(&asset(), ONE, &mut events).unwrap();
        pool.increase_debt(&asset(), 20 * ONE, &mut events).unwrap();
        pool.send_coll(&asset(), ONE, &mut events).unwrap();
        pool.decrease_debt(&asset(), 20 * ONE, &mut events).unwrap();
        assert_eq!((pool.coll(), pool.debt()), (0, 0));
    }

    #[test]
    fn test_surplus_claim() {
        let mut pool = CollSurplusPool::default();
        let mut events = EventLog::new();
        pool.account_surplus(&asset(), &owner(), 3 * ONE, &mut events).unwrap();
        pool.account_surplus(&asset(), &owner(), 2 * ONE, &mut events).unwrap();
        assert_eq!(pool.claimable(&owner()), 5 * ONE);

        assert_eq!(pool.claim(&asset(), &owner(), &mut events).unwrap(), 5 * ONE);
        assert_eq!(pool.total(), 0);
        assert_eq!(
            pool.claim(&asset(), &owner(), &mut events),
            Err(TrenError::NoCollAvailableToClaim { asset: asset(), owner: owner() })
        );
    }

    #[test]
    fn test_collateral_ledger() {
        let mut ledger = CollateralLedger::new();
        let mut events = EventLog::new();
        ledger.credit(&asset(), &owner(), ONE, &mut events).unwrap();
        ledger.credit(&asset(), &owner(), ONE, &mut events).unwrap();
        ledger.credit(&[0xBB; 32], &owner(), ONE, &mut events).unwrap();
        assert_eq!(ledger.balance_of(&asset(), &owner()), 2 * ONE);
        assert_eq!(ledger.total_paid(&asset()), 2 * ONE);
    }
}
