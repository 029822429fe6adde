//! Tren Debt Token
//!
//! Account-balance ledger for the protocol debt token. Only engine modules
//! may mint or burn, and protocol-owned accounts cannot receive plain user
//! transfers; tokens reach pools only through [`DebtToken::send_to_pool`].

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tren_common::{
    access_control::{ModuleRegistry, ModuleRole},
    constants::token,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    types::Address,
};

// ============ Token State ============

/// Debt token balances and supply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct DebtToken {
    balances: BTreeMap<Address, u128>,
    total_supply: u128,
}

impl DebtToken {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get token name
    pub fn name() -> &'static str {
        token::NAME
    }

    /// Get token symbol
    pub fn symbol() -> &'static str {
        token::SYMBOL
    }

    /// Get token decimals
    pub fn decimals() -> u8 {
        token::DECIMALS
    }

    /// Total tokens in circulation
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Balance of an account
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    // ============ Privileged Operations ============

    /// Mint new tokens; caller must be a module allowed to mint
    pub fn mint(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        to: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        match registry.role_of(caller) {
            Some(role) if role.can_mint() => {}
            _ => return Err(TrenError::MintUnauthorized { caller: *caller }),
        }
        if amount == 0 {
            return Ok(());
        }

        self.total_supply = self.total_supply.checked_add(amount).ok_or(TrenError::Overflow)?;
        self.credit(to, amount)?;

        events.emit(TrenEvent::TokenMint {
            to: *to,
            amount,
            new_total_supply: self.total_supply,
        });
        Ok(())
    }

    /// Burn tokens held by `from`; caller must be a module allowed to burn
    pub fn burn(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        from: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        match registry.role_of(caller) {
            Some(role) if role.can_burn() => {}
            _ => return Err(TrenError::BurnUnauthorized { caller: *caller }),
        }
        if amount == 0 {
            return Ok(());
        }

        self.debit(from, amount)?;
        self.total_supply = self.total_supply.checked_sub(amount).ok_or(TrenError::Underflow)?;

        events.emit(TrenEvent::TokenBurn {
            from: *from,
            amount,
            new_total_supply: self.total_supply,
        });
        Ok(())
    }

    /// Move a user's tokens into a pool; only the Stability Pool pulls deposits
    pub fn send_to_pool(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        sender: &Address,
        pool: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        registry.require_role(caller, ModuleRole::StabilityPool)?;
        if pool != caller {
            return Err(TrenError::InvalidRecipient { recipient: *pool });
        }
        self.move_balance(sender, pool, amount, events)
    }

    /// Pay tokens out of a protocol account
    pub fn return_from_pool(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        pool: &Address,
        receiver: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if !registry.has_role(caller, ModuleRole::StabilityPool)
            && !registry.has_role(caller, ModuleRole::TrenBoxManager)
        {
            return Err(TrenError::TrenBoxManagerOnly { caller: *caller });
        }
        if !registry.is_module(pool) {
            return Err(TrenError::InvalidRecipient { recipient: *pool });
        }
        self.move_balance(pool, receiver, amount, events)
    }

    // ============ User Operations ============

    /// Plain transfer between user accounts
    pub fn transfer(
        &mut self,
        registry: &ModuleRegistry,
        from: &Address,
        to: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if *to == [0u8; 32] || registry.is_module(to) {
            return Err(TrenError::InvalidRecipient { recipient: *to });
        }
        self.move_balance(from, to, amount, events)
    }

    // ============ Internals ============

    fn move_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.credit(to, amount)?;
        events.emit(TrenEvent::TokenTransfer {
            from: *from,
            to: *to,
            amount,
        });
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: u128) -> TrenResult<()> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(TrenError::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, account: &Address, amount: u128) -> TrenResult<()> {
        let available = self.balance_of(account);
        if available < amount {
            log::debug!("debit of {} rejected, balance {}", amount, available);
            return Err(TrenError::InsufficientBalance { available, requested: amount });
        }
        let remaining = available - amount;
        if remaining == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        Ok(())
    }

    /// Sum of every balance; equals `total_supply` when the ledger is sound
    pub fn sum_of_balances(&self) -> u128 {
        self.balances.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::events::EventType;

    const ONE: u128 = token::ONE;

    fn test_user() -> Address {
        [1u8; 32]
    }

    fn test_recipient() -> Address {
        [2u8; 32]
    }

    fn role(registry: &ModuleRegistry, role: ModuleRole) -> Address {
        registry.address_of(role).unwrap()
    }

    fn funded() -> (DebtToken, ModuleRegistry, EventLog) {
        let registry = ModuleRegistry::default();
        let mut tokenl = DebtToken::new();
        let mut events = EventLog::new();
        let bo = role(&registry, ModuleRole::BorrowerOperations);
        tokenl.mint(&registry, &bo, &test_user(), 1_000 * ONE, &mut events).unwrap();
        (tokenl, registry, events)
    }

    #[test]
    fn test_mint() {
        let (tokenl, _, events) = funded();
        assert_eq!(tokenl.total_supply(), 1_000 * ONE);
        assert_eq!(tokenl.balance_of(&test_user()), 1_000 * ONE);
        assert_eq!(events.filter_by_type(EventType::TokenMint).len(), 1);
    }

    #[test]
    fn test_mint_unauthorized() {
        let (mut tokenl, registry, mut events) = funded();
        let sp = role(&registry, ModuleRole::StabilityPool);
        assert_eq!(
            tokenl.mint(&registry, &sp, &test_user(), ONE, &mut events),
            Err(TrenError::MintUnauthorized { caller: sp })
        );
        assert_eq!(
            tokenl.mint(&registry, &test_user(), &test_user(), ONE, &mut events),
            Err(TrenError::MintUnauthorized { caller: test_user() })
        );
    }

    #[test]
    fn test_burn() {
        let (mut tokenl, registry, mut events) = funded();
        let tm = role(&registry, ModuleRole::TrenBoxManager);
        tokenl.burn(&registry, &tm, &test_user(), 400 * ONE, &mut events).unwrap();
        assert_eq!(tokenl.total_supply(), 600 * ONE);
        assert_eq!(tokenl.balance_of(&test_user()), 600 * ONE);

        let ap = role(&registry, ModuleRole::ActivePool);
        assert_eq!(
            tokenl.burn(&registry, &ap, &test_user(), ONE, &mut events),
            Err(TrenError::BurnUnauthorized { caller: ap })
        );
    }

    #[test]
    fn test_burn_insufficient() {
        let (mut tokenl, registry, mut events) = funded();
        let tm = role(&registry, ModuleRole::TrenBoxManager);
        assert_eq!(
            tokenl.burn(&registry, &tm, &test_user(), 1_001 * ONE, &mut events),
            Err(TrenError::InsufficientBalance { available: 1_000 * ONE, requested: 1_001 * ONE })
        );
    }

    #[test]
    fn test_transfer() {
        let (mut tokenl, registry, mut events) = funded();
        tokenl
            .transfer(&registry, &test_user(), &test_recipient(), 250 * ONE, &mut events)
            .unwrap();
        assert_eq!(tokenl.balance_of(&test_user()), 750 * ONE);
        assert_eq!(tokenl.balance_of(&test_recipient()), 250 * ONE);
        assert_eq!(tokenl.sum_of_balances(), tokenl.total_supply());
    }

    #[test]
    fn test_transfer_to_module_rejected() {
        let (mut tokenl, registry, mut events) = funded();
        let sp = role(&registry, ModuleRole::StabilityPool);
        assert_eq!(
            tokenl.transfer(&registry, &test_user(), &sp, ONE, &mut events),
            Err(TrenError::InvalidRecipient { recipient: sp })
        );
    }

    #[test]
    fn test_pool_round_trip() {
        let (mut tokenl, registry, mut events) = funded();
        let sp = role(&registry, ModuleRole::StabilityPool);
        tokenl
            .send_to_pool(&registry, &sp, &test_user(), &sp, 300 * ONE, &mut events)
            .unwrap();
        assert_eq!(tokenl.balance_of(&sp), 300 * ONE);

        tokenl
            .return_from_pool(&registry, &sp, &sp, &test_user(), 100 * ONE, &mut events)
            .unwrap();
        assert_eq!(tokenl.balance_of(&sp), 200 * ONE);
        assert_eq!(tokenl.balance_of(&test_user()), 800 * ONE);

        // Only the pool itself can pull deposits
        let tm = role(&registry, ModuleRole::TrenBoxManager);
        assert!(tokenl
            .send_to_pool(&registry, &tm, &test_user(), &tm, ONE, &mut events)
            .is_err());
        // Users cannot drain a pool
        assert!(tokenl
            .return_from_pool(&registry, &test_user(), &sp, &test_user(), ONE, &mut events)
            .is_err());
    }

    #[test]
    fn test_metadata() {
        assert_eq!(DebtToken::decimals(), 18);
        assert_eq!(DebtToken::symbol(), "trenUSD");
    }
}
