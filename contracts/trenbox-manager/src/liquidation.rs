//! Liquidation Engine
//!
//! ## Liquidation Flow
//!
//! ```text
//! Position ICR < MCR (or < CCR in Recovery Mode)
//!                 │
//!                 ▼
//! ┌───────────────────────────────────────┐
//! │  STEP 1: Settle pending rewards       │
//! │  (default pool -> active pool)        │
//! └───────────────┬───────────────────────┘
//!                 ▼
//! ┌───────────────────────────────────────┐
//! │  STEP 2: Split the debt               │
//! │  offset up to the pool's deposits,    │
//! │  redistribute the rest over stakes    │
//! └───────────────┬───────────────────────┘
//!                 ▼
//! ┌───────────────────────────────────────┐
//! │  STEP 3: Close ClosedByLiquidation    │
//! └───────────────┬───────────────────────┘
//!                 ▼
//! ┌───────────────────────────────────────┐
//! │  STEP 4: Settle the sequence          │
//! │  - offset via the Stability Pool      │
//! │  - redistribute via L_coll / L_debt   │
//! │  - surplus to the CollSurplusPool     │
//! │  - gas compensation to the liquidator │
//! └───────────────────────────────────────┘
//! ```
//!
//! In Recovery Mode a position with MCR <= ICR < TCR whose debt the pool
//! can absorb is liquidated at a capped collateral amount; the rest of its
//! collateral stays claimable by the owner.

use tren_common::{
    access_control::{ModuleRegistry, ModuleRole},
    config::AssetParams,
    constants::liquidation::BATCH_SIZE_LIMIT,
    constants::precision::ONE_HUNDRED_PCT,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{compute_cr, mul_div, safe_add, safe_sub},
    types::{Address, TrenBoxOperation, TrenBoxStatus},
};
use tren_debt_token::DebtToken;
use tren_stability_pool::StabilityPool;

use crate::pools::CollateralLedger;
use crate::state::AssetLedgerState;

// ============ Values ============

/// Amounts produced by liquidating one position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiquidationValues {
    pub entire_debt: u128,
    pub entire_coll: u128,
    pub coll_gas_compensation: u128,
    pub debt_token_gas_compensation: u128,
    pub debt_to_offset: u128,
    pub coll_to_send_to_sp: u128,
    pub debt_to_redistribute: u128,
    pub coll_to_redistribute: u128,
    pub coll_surplus: u128,
}

/// Sums over a liquidation sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiquidationTotals {
    pub liquidated: usize,
    pub coll_in_sequence: u128,
    pub debt_in_sequence: u128,
    pub coll_gas_compensation: u128,
    pub debt_token_gas_compensation: u128,
    pub debt_to_offset: u128,
    pub coll_to_send_to_sp: u128,
    pub debt_to_redistribute: u128,
    pub coll_to_redistribute: u128,
    pub coll_surplus: u128,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) -> TrenResult<()> {
        if values.entire_debt == 0 {
            return Ok(());
        }
        self.liquidated += 1;
        self.coll_in_sequence = safe_add(self.coll_in_sequence, values.entire_coll)?;
        self.debt_in_sequence = safe_add(self.debt_in_sequence, values.entire_debt)?;
        self.coll_gas_compensation = safe_add(self.coll_gas_compensation, values.coll_gas_compensation)?;
        self.debt_token_gas_compensation =
            safe_add(self.debt_token_gas_compensation, values.debt_token_gas_compensation)?;
        self.debt_to_offset = safe_add(self.debt_to_offset, values.debt_to_offset)?;
        self.coll_to_send_to_sp = safe_add(self.coll_to_send_to_sp, values.coll_to_send_to_sp)?;
        self.debt_to_redistribute = safe_add(self.debt_to_redistribute, values.debt_to_redistribute)?;
        self.coll_to_redistribute = safe_add(self.coll_to_redistribute, values.coll_to_redistribute)?;
        self.coll_surplus = safe_add(self.coll_surplus, values.coll_surplus)?;
        Ok(())
    }

    /// Collateral that left the system as the `Liquidation` event reports it
    pub fn liquidated_coll(&self) -> TrenResult<u128> {
        safe_sub(safe_sub(self.coll_in_sequence, self.coll_gas_compensation)?, self.coll_surplus)
    }
}

// ============ Pure Helpers ============

/// Collateral paid to the liquidator: `coll / percent_divisor`, optionally capped
pub fn coll_gas_compensation(params: &AssetParams, coll: u128) -> u128 {
    let comp = coll / params.percent_divisor.max(1);
    match params.coll_gas_compensation_cap {
        Some(cap) => comp.min(cap),
        None => comp,
    }
}

/// Split `(debt, coll)` between the Stability Pool and redistribution.
///
/// Returns `(debt_to_offset, coll_to_send_to_sp, debt_to_redistribute,
/// coll_to_redistribute)`; the pool takes collateral in proportion to the
/// debt it absorbs.
pub fn offset_and_redistribution_vals(
    debt: u128,
    coll: u128,
    sp_deposits: u128,
) -> TrenResult<(u128, u128, u128, u128)> {
    if sp_deposits == 0 || debt == 0 {
        return Ok((0, 0, debt, coll));
    }
    let debt_to_offset = debt.min(sp_deposits);
    let coll_to_send_to_sp = mul_div(coll, debt_to_offset, debt)?;
    Ok((
        debt_to_offset,
        coll_to_send_to_sp,
        debt - debt_to_offset,
        coll - coll_to_send_to_sp,
    ))
}

/// Values of a capped Recovery Mode liquidation.
///
/// The pool absorbs all the debt for `debt * cap_ratio / price` collateral;
/// whatever is left above that becomes the owner's surplus.
pub fn capped_offset_vals(
    params: &AssetParams,
    entire_debt: u128,
    entire_coll: u128,
    price: u128,
) -> TrenResult<LiquidationValues> {
    let capped_coll = mul_div(entire_debt, params.recovery_coll_cap_ratio, price)?.min(entire_coll);
    let coll_gas = coll_gas_compensation(params, capped_coll);
    Ok(LiquidationValues {
        entire_debt,
        entire_coll,
        coll_gas_compensation: coll_gas,
        debt_token_gas_compensation: params.debt_token_gas_compensation,
        debt_to_offset: entire_debt,
        coll_to_send_to_sp: capped_coll - coll_gas,
        debt_to_redistribute: 0,
        coll_to_redistribute: 0,
        coll_surplus: entire_coll - capped_coll,
    })
}

fn check_potential_recovery_mode(coll: u128, debt: u128, price: u128, ccr: u128) -> bool {
    compute_cr(coll, debt, price) < ccr
}

// ============ Engine ============

/// Everything a liquidation touches for one asset at one price
pub struct LiquidationContext<'a> {
    pub registry: &'a ModuleRegistry,
    pub ledger: &'a mut AssetLedgerState,
    pub stability_pool: &'a mut StabilityPool,
    pub debt_token: &'a mut DebtToken,
    pub payouts: &'a mut CollateralLedger,
    pub price: u128,
    pub liquidator: Address,
}

impl<'a> LiquidationContext<'a> {
    /// Liquidate one position.
    ///
    /// Unlike the sequences, an ineligible or last position is an error
    /// here rather than a skip.
    pub fn liquidate(&mut self, owner: &Address, events: &mut EventLog) -> TrenResult<LiquidationTotals> {
        let asset = self.ledger.asset;
        self.ledger.trenboxes.require_active(&asset, owner)?;
        if self.ledger.trenboxes.count() <= 1 {
            return Err(TrenError::OnlyOneTrenBox { asset });
        }
        self.batch_liquidate_trenboxes(&[*owner], events)
    }

    /// Liquidate up to `n` positions from the tail of the sorted index
    pub fn liquidate_trenboxes(&mut self, n: usize, events: &mut EventLog) -> TrenResult<LiquidationTotals> {
        let totals = if self.ledger.is_recovery_mode(self.price)? {
            log::warn!("liquidating in Recovery Mode, TCR {}", self.ledger.tcr(self.price)?);
            self.totals_from_sequence_recovery_mode(n, events)?
        } else {
            self.totals_from_sequence_normal_mode(n, events)?
        };
        self.finalize(totals, events)
    }

    /// Liquidate the listed owners; inactive or healthy ones are skipped
    pub fn batch_liquidate_trenboxes(
        &mut self,
        owners: &[Address],
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        if owners.is_empty() || owners.len() > BATCH_SIZE_LIMIT {
            return Err(TrenError::InvalidArraySize {
                len: owners.len(),
                max: BATCH_SIZE_LIMIT,
            });
        }

        let totals = if self.ledger.is_recovery_mode(self.price)? {
            self.totals_from_batch_recovery_mode(owners, events)?
        } else {
            self.totals_from_batch_normal_mode(owners, events)?
        };
        self.finalize(totals, events)
    }

    // ============ Sequences ============

    fn totals_from_sequence_normal_mode(&mut self, n: usize, events: &mut EventLog) -> TrenResult<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        let mut remaining_sp = self.stability_pool.total_deposits();

        for _ in 0..n {
            if self.ledger.trenboxes.count() <= 1 {
                break;
            }
            let owner = match self.ledger.sorted.last() {
                Some(o) => o,
                None => break,
            };
            let icr = self.ledger.current_icr(&owner, self.price)?;
            if icr >= self.ledger.params.mcr {
                break;
            }

            let values = self.liquidate_normal_mode(&owner, remaining_sp, events)?;
            remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
            totals.add(&values)?;
        }
        Ok(totals)
    }

    fn totals_from_sequence_recovery_mode(
        &mut self,
        n: usize,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        let mut remaining_sp = self.stability_pool.total_deposits();
        let mut system_debt = self.ledger.entire_system_debt()?;
        let mut system_coll = self.ledger.entire_system_coll()?;
        let mut back_to_normal_mode = false;

        let first = self.ledger.sorted.first();
        let mut cursor = self.ledger.sorted.last();

        for _ in 0..n {
            let owner = match cursor {
                Some(o) => o,
                None => break,
            };
            // The head is never liquidated in a Recovery Mode sweep
            if Some(owner) == first {
                break;
            }
            let next = self.ledger.sorted.prev(&owner);
            let icr = self.ledger.current_icr(&owner, self.price)?;

            if !back_to_normal_mode {
                if icr >= self.ledger.params.mcr && remaining_sp == 0 {
                    break;
                }
                let tcr = compute_cr(system_coll, system_debt, self.price);
                let values = self.liquidate_recovery_mode(&owner, icr, remaining_sp, tcr, events)?;

                remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
                system_debt = safe_sub(system_debt, values.debt_to_offset)?;
                system_coll = safe_sub(
                    system_coll,
                    values.coll_to_send_to_sp + values.coll_gas_compensation + values.coll_surplus,
                )?;
                totals.add(&values)?;

                back_to_normal_mode =
                    !check_potential_recovery_mode(system_coll, system_debt, self.price, self.ledger.params.ccr);
            } else if icr < self.ledger.params.mcr {
                if self.ledger.trenboxes.count() <= 1 {
                    break;
                }
                let values = self.liquidate_normal_mode(&owner, remaining_sp, events)?;
                remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
                totals.add(&values)?;
            } else {
                break;
            }
            cursor = next;
        }
        Ok(totals)
    }

    fn totals_from_batch_normal_mode(
        &mut self,
        owners: &[Address],
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        let mut remaining_sp = self.stability_pool.total_deposits();

        for owner in owners {
            if !self.ledger.trenboxes.is_active(owner) || self.ledger.trenboxes.count() <= 1 {
                continue;
            }
            let icr = self.ledger.current_icr(owner, self.price)?;
            if icr < self.ledger.params.mcr {
                let values = self.liquidate_normal_mode(owner, remaining_sp, events)?;
                remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
                totals.add(&values)?;
            }
        }
        Ok(totals)
    }

    fn totals_from_batch_recovery_mode(
        &mut self,
        owners: &[Address],
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        let mut remaining_sp = self.stability_pool.total_deposits();
        let mut system_debt = self.ledger.entire_system_debt()?;
        let mut system_coll = self.ledger.entire_system_coll()?;
        let mut back_to_normal_mode = false;

        for owner in owners {
            if !self.ledger.trenboxes.is_active(owner) {
                continue;
            }
            let icr = self.ledger.current_icr(owner, self.price)?;

            if !back_to_normal_mode {
                if icr >= self.ledger.params.mcr && remaining_sp == 0 {
                    continue;
                }
                let tcr = compute_cr(system_coll, system_debt, self.price);
                let values = self.liquidate_recovery_mode(owner, icr, remaining_sp, tcr, events)?;

                remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
                system_debt = safe_sub(system_debt, values.debt_to_offset)?;
                system_coll = safe_sub(
                    system_coll,
                    values.coll_to_send_to_sp + values.coll_gas_compensation + values.coll_surplus,
                )?;
                totals.add(&values)?;

                back_to_normal_mode =
                    !check_potential_recovery_mode(system_coll, system_debt, self.price, self.ledger.params.ccr);
            } else if icr < self.ledger.params.mcr && self.ledger.trenboxes.count() > 1 {
                let values = self.liquidate_normal_mode(owner, remaining_sp, events)?;
                remaining_sp = safe_sub(remaining_sp, values.debt_to_offset)?;
                totals.add(&values)?;
            }
        }
        Ok(totals)
    }

    // ============ Single Position ============

    fn liquidate_normal_mode(
        &mut self,
        owner: &Address,
        remaining_sp: u128,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationValues> {
        let entire = self.ledger.entire_debt_and_coll(owner)?;
        self.ledger
            .move_pending_to_active(entire.pending_debt_reward, entire.pending_coll_reward, events)?;

        let coll_gas = coll_gas_compensation(&self.ledger.params, entire.coll);
        let coll_to_liquidate = safe_sub(entire.coll, coll_gas)?;
        let (debt_to_offset, coll_to_send_to_sp, debt_to_redistribute, coll_to_redistribute) =
            offset_and_redistribution_vals(entire.debt, coll_to_liquidate, remaining_sp)?;

        let values = LiquidationValues {
            entire_debt: entire.debt,
            entire_coll: entire.coll,
            coll_gas_compensation: coll_gas,
            debt_token_gas_compensation: self.ledger.params.debt_token_gas_compensation,
            debt_to_offset,
            coll_to_send_to_sp,
            debt_to_redistribute,
            coll_to_redistribute,
            coll_surplus: 0,
        };
        self.close_liquidated(owner, &values, TrenBoxOperation::LiquidateInNormalMode, events)?;
        Ok(values)
    }

    fn liquidate_recovery_mode(
        &mut self,
        owner: &Address,
        icr: u128,
        remaining_sp: u128,
        tcr: u128,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationValues> {
        if self.ledger.trenboxes.count() <= 1 {
            return Ok(LiquidationValues::default());
        }
        let params = self.ledger.params.clone();
        let entire = self.ledger.entire_debt_and_coll(owner)?;

        let values = if icr <= ONE_HUNDRED_PCT {
            // Nothing left for depositors: everything goes to the stakes
            let coll_gas = coll_gas_compensation(&params, entire.coll);
            LiquidationValues {
                entire_debt: entire.debt,
                entire_coll: entire.coll,
                coll_gas_compensation: coll_gas,
                debt_token_gas_compensation: params.debt_token_gas_compensation,
                debt_to_redistribute: entire.debt,
                coll_to_redistribute: safe_sub(entire.coll, coll_gas)?,
                ..LiquidationValues::default()
            }
        } else if icr < params.mcr {
            let coll_gas = coll_gas_compensation(&params, entire.coll);
            let (debt_to_offset, coll_to_send_to_sp, debt_to_redistribute, coll_to_redistribute) =
                offset_and_redistribution_vals(entire.debt, safe_sub(entire.coll, coll_gas)?, remaining_sp)?;
            LiquidationValues {
                entire_debt: entire.debt,
                entire_coll: entire.coll,
                coll_gas_compensation: coll_gas,
                debt_token_gas_compensation: params.debt_token_gas_compensation,
                debt_to_offset,
                coll_to_send_to_sp,
                debt_to_redistribute,
                coll_to_redistribute,
                coll_surplus: 0,
            }
        } else if icr < tcr && entire.debt <= remaining_sp {
            capped_offset_vals(&params, entire.debt, entire.coll, self.price)?
        } else {
            return Ok(LiquidationValues::default());
        };

        self.ledger
            .move_pending_to_active(entire.pending_debt_reward, entire.pending_coll_reward, events)?;
        self.close_liquidated(owner, &values, TrenBoxOperation::LiquidateInRecoveryMode, events)?;
        if values.coll_surplus > 0 {
            let asset = self.ledger.asset;
            self.ledger
                .coll_surplus
                .account_surplus(&asset, owner, values.coll_surplus, events)?;
        }
        Ok(values)
    }

    fn close_liquidated(
        &mut self,
        owner: &Address,
        values: &LiquidationValues,
        operation: TrenBoxOperation,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        let asset = self.ledger.asset;
        self.ledger.close(owner, TrenBoxStatus::ClosedByLiquidation, events)?;

        events.emit(TrenEvent::TrenBoxLiquidated {
            asset,
            owner: *owner,
            debt: values.entire_debt,
            coll: safe_sub(values.entire_coll, values.coll_surplus)?,
            operation,
        });
        events.emit(TrenEvent::TrenBoxUpdated {
            asset,
            owner: *owner,
            debt: 0,
            coll: 0,
            stake: 0,
            operation,
        });
        log::debug!(
            "liquidated: debt {} coll {} (offset {}, redistributed {})",
            values.entire_debt,
            values.entire_coll,
            values.debt_to_offset,
            values.debt_to_redistribute
        );
        Ok(())
    }

    // ============ Settlement ============

    fn finalize(&mut self, totals: LiquidationTotals, events: &mut EventLog) -> TrenResult<LiquidationTotals> {
        if totals.debt_in_sequence == 0 {
            return Err(TrenError::NothingToLiquidate);
        }
        let asset = self.ledger.asset;
        let trenbox_manager = self.registry.address_of(ModuleRole::TrenBoxManager)?;
        let stability_pool = self.registry.address_of(ModuleRole::StabilityPool)?;
        let active_pool = self.registry.address_of(ModuleRole::ActivePool)?;
        let gas_pool = self.registry.address_of(ModuleRole::GasPool)?;

        // 1. Offset against the Stability Pool
        if totals.debt_to_offset > 0 {
            self.stability_pool.offset(
                self.registry,
                &trenbox_manager,
                &asset,
                totals.debt_to_offset,
                totals.coll_to_send_to_sp,
                events,
            )?;
            self.ledger.active_pool.decrease_debt(&asset, totals.debt_to_offset, events)?;
            self.debt_token
                .burn(self.registry, &stability_pool, &stability_pool, totals.debt_to_offset, events)?;
            self.ledger.active_pool.send_coll(&asset, totals.coll_to_send_to_sp, events)?;
            self.stability_pool.received_collateral(
                self.registry,
                &active_pool,
                &asset,
                totals.coll_to_send_to_sp,
                events,
            )?;
        }

        // 2. Redistribute the rest
        self.ledger
            .redistribute_debt_and_coll(totals.debt_to_redistribute, totals.coll_to_redistribute, events)?;

        // 3. Surplus collateral leaves the active pool for owner claims
        if totals.coll_surplus > 0 {
            self.ledger.active_pool.send_coll(&asset, totals.coll_surplus, events)?;
        }

        // 4. Snapshots exclude the gas compensation about to be paid out
        let active_coll = self.ledger.active_pool.coll();
        let default_coll = self.ledger.default_pool.coll();
        self.ledger.rewards.update_system_snapshots_exclude_coll_remainder(
            &asset,
            active_coll,
            default_coll,
            totals.coll_gas_compensation,
            events,
        )?;

        events.emit(TrenEvent::Liquidation {
            asset,
            liquidated_debt: totals.debt_in_sequence,
            liquidated_coll: totals.liquidated_coll()?,
            coll_gas_compensation: totals.coll_gas_compensation,
            debt_token_gas_compensation: totals.debt_token_gas_compensation,
        });

        // 5. Compensate the liquidator
        self.debt_token.return_from_pool(
            self.registry,
            &trenbox_manager,
            &gas_pool,
            &self.liquidator,
            totals.debt_token_gas_compensation,
            events,
        )?;
        self.ledger.active_pool.send_coll(&asset, totals.coll_gas_compensation, events)?;
        self.payouts
            .credit(&asset, &self.liquidator, totals.coll_gas_compensation, events)?;

        log::info!(
            "liquidated {} trenbox(es): debt {}, offset {}, redistributed {}",
            totals.liquidated,
            totals.debt_in_sequence,
            totals.debt_to_offset,
            totals.debt_to_redistribute
        );
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::constants::precision::DECIMAL_PRECISION;
    use tren_common::constants::sorted::MAX_SEARCH_DEPTH;
    use tren_common::events::EventType;
    use tren_common::types::AssetId;

    const ONE: u128 = DECIMAL_PRECISION;

    fn asset() -> AssetId {
        [0xAA; 32]
    }

    fn owner(n: u8) -> Address {
        [n; 32]
    }

    struct Fixture {
        registry: ModuleRegistry,
        ledger: AssetLedgerState,
        pool: StabilityPool,
        token: DebtToken,
        payouts: CollateralLedger,
        events: EventLog,
    }

    impl Fixture {
        // Positions are opened directly on the ledger; each one's debt is
        // minted to its owner except the gas compensation
        fn new(positions: &[(u8, u128, u128)]) -> Self {
            let registry = ModuleRegistry::with_default_addresses();
            let mut ledger = AssetLedgerState::new(asset(), AssetParams::default(), MAX_SEARCH_DEPTH);
            let mut token = DebtToken::new();
            let mut events = EventLog::new();
            let bo = registry.address_of(ModuleRole::BorrowerOperations).unwrap();
            let gas_pool = registry.address_of(ModuleRole::GasPool).unwrap();
            let gas = ledger.params.debt_token_gas_compensation;

            for (n, coll, debt) in positions {
                ledger.open(&owner(*n), *coll, *debt, None, None, &mut events).unwrap();
                ledger.active_pool.receive_coll(&asset(), *coll, &mut events).unwrap();
                ledger.active_pool.increase_debt(&asset(), *debt, &mut events).unwrap();
                token.mint(&registry, &bo, &owner(*n), debt - gas, &mut events).unwrap();
                token.mint(&registry, &bo, &gas_pool, gas, &mut events).unwrap();
            }
            Self {
                registry,
                ledger,
                pool: StabilityPool::new(),
                token,
                payouts: CollateralLedger::new(),
                events,
            }
        }

        fn deposit(&mut self, depositor: &Address, amount: u128) {
            let sp = self.registry.address_of(ModuleRole::StabilityPool).unwrap();
            self.pool.provide(depositor, amount, &[asset()], &mut self.events).unwrap();
            self.token
                .send_to_pool(&self.registry, &sp, depositor, &sp, amount, &mut self.events)
                .unwrap();
        }

        fn context(&mut self, price: u128) -> LiquidationContext<'_> {
            LiquidationContext {
                registry: &self.registry,
                ledger: &mut self.ledger,
                stability_pool: &mut self.pool,
                debt_token: &mut self.token,
                payouts: &mut self.payouts,
                price,
                liquidator: owner(0xEE),
            }
        }
    }

    #[test]
    fn test_offset_split_proportional() {
        let (offset, coll_sp, redist, coll_redist) =
            offset_and_redistribution_vals(2_000 * ONE, 100 * ONE, 500 * ONE).unwrap();
        assert_eq!(offset, 500 * ONE);
        assert_eq!(coll_sp, 25 * ONE);
        assert_eq!(redist, 1_500 * ONE);
        assert_eq!(coll_redist, 75 * ONE);

        assert_eq!(
            offset_and_redistribution_vals(2_000 * ONE, 100 * ONE, 0).unwrap(),
            (0, 0, 2_000 * ONE, 100 * ONE)
        );
    }

    #[test]
    fn test_gas_compensation_cap() {
        let mut params = AssetParams::default();
        assert_eq!(coll_gas_compensation(&params, 100 * ONE), ONE / 2);
        params.coll_gas_compensation_cap = Some(ONE / 10);
        assert_eq!(coll_gas_compensation(&params, 100 * ONE), ONE / 10);
    }

    #[test]
    fn test_capped_values() {
        let params = AssetParams::default();
        // 2000 debt at price 25 with MCR 110%: 88 coll to the pool side
        let values = capped_offset_vals(&params, 2_000 * ONE, 100 * ONE, 25 * ONE).unwrap();
        assert_eq!(values.coll_gas_compensation, 88 * ONE / 200);
        assert_eq!(values.coll_to_send_to_sp + values.coll_gas_compensation, 88 * ONE);
        assert_eq!(values.coll_surplus, 12 * ONE);
        assert_eq!(values.debt_to_offset, 2_000 * ONE);
    }

    #[test]
    fn test_normal_mode_offset_and_redistribute() {
        let mut fx = Fixture::new(&[
            (1, 100 * ONE, 2_000 * ONE),
            (2, 100 * ONE, 2_000 * ONE),
            (3, 40 * ONE, 2_000 * ONE),
        ]);
        fx.deposit(&owner(1), 1_000 * ONE);

        // TCR 240 * 100 / 6000 = 400%; owner 3 at 200%
        let totals = fx.context(100 * ONE).liquidate(&owner(3), &mut EventLog::new());
        assert_eq!(totals, Err(TrenError::NothingToLiquidate));

        // owner 3 ICR = 40 * 54 / 2000 = 108%, TCR = 240 * 54 / 6000 = 216%
        let mut events = EventLog::new();
        let totals = fx.context(54 * ONE).liquidate(&owner(3), &mut events).unwrap();
        assert_eq!(totals.liquidated, 1);
        assert_eq!(totals.coll_gas_compensation, ONE / 5);
        assert_eq!(totals.debt_to_offset, 1_000 * ONE);
        assert_eq!(totals.debt_to_redistribute, 1_000 * ONE);

        assert_eq!(fx.pool.total_deposits(), 0);
        assert_eq!(fx.ledger.trenboxes.status(&owner(3)), TrenBoxStatus::ClosedByLiquidation);
        assert_eq!(fx.ledger.default_pool.debt(), 1_000 * ONE);
        assert_eq!(fx.payouts.balance_of(&asset(), &owner(0xEE)), ONE / 5);
        assert_eq!(fx.token.balance_of(&owner(0xEE)), 200 * ONE);

        // collateral: gas + pool share + redistributed = liquidated
        let collateral_out = totals.coll_gas_compensation + totals.coll_to_send_to_sp + totals.coll_to_redistribute;
        assert_eq!(collateral_out, 40 * ONE);
        assert_eq!(fx.pool.asset_balance(&asset()), totals.coll_to_send_to_sp);
        assert!(events.last_of_type(EventType::Liquidation).is_some());
    }

    #[test]
    fn test_last_position_is_protected() {
        let mut fx = Fixture::new(&[(1, 100 * ONE, 2_000 * ONE)]);
        assert_eq!(
            fx.context(ONE).liquidate(&owner(1), &mut EventLog::new()),
            Err(TrenError::OnlyOneTrenBox { asset: asset() })
        );
        assert_eq!(
            fx.context(ONE).liquidate_trenboxes(10, &mut EventLog::new()),
            Err(TrenError::NothingToLiquidate)
        );
    }

    #[test]
    fn test_batch_size_limits() {
        let mut fx = Fixture::new(&[(1, 100 * ONE, 2_000 * ONE), (2, 100 * ONE, 2_000 * ONE)]);
        assert_eq!(
            fx.context(ONE).batch_liquidate_trenboxes(&[], &mut EventLog::new()),
            Err(TrenError::InvalidArraySize { len: 0, max: BATCH_SIZE_LIMIT })
        );
        let owners = vec![owner(1); BATCH_SIZE_LIMIT + 1];
        assert_eq!(
            fx.context(ONE).batch_liquidate_trenboxes(&owners, &mut EventLog::new()),
            Err(TrenError::InvalidArraySize { len: BATCH_SIZE_LIMIT + 1, max: BATCH_SIZE_LIMIT })
        );
    }

    #[test]
    fn test_sequence_stops_at_healthy_position() {
        let mut fx = Fixture::new(&[
            (1, 200 * ONE, 2_000 * ONE),
            (2, 45 * ONE, 2_000 * ONE),
            (3, 44 * ONE, 2_000 * ONE),
            (4, 150 * ONE, 2_000 * ONE),
        ]);
        // price 50: owners 3 (110%) and 2 (112.5%) are healthy, TCR 274%
        assert_eq!(
            fx.context(50 * ONE).liquidate_trenboxes(10, &mut EventLog::new()),
            Err(TrenError::NothingToLiquidate)
        );

        // price 48: owner 3 at 105.6%; owner 2 drops below MCR once it
        // picks up owner 3's redistributed debt
        let totals = fx.context(48 * ONE).liquidate_trenboxes(10, &mut EventLog::new()).unwrap();
        assert_eq!(totals.liquidated, 2);
        assert_eq!(totals.debt_to_offset, 0);
        assert!(totals.debt_to_redistribute > 4_000 * ONE);
        assert!(fx.ledger.trenboxes.is_active(&owner(1)));
        assert!(fx.ledger.trenboxes.is_active(&owner(4)));
        assert_eq!(fx.ledger.trenboxes.count(), 2);
    }
}
