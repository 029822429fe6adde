//! Redemption Engine
//!
//! Debt token holders swap tokens for collateral at face value, drawn from
//! the positions with the lowest ICR at or above MCR. A position redeemed
//! down to its gas compensation is closed and its leftover collateral
//! becomes claimable; otherwise it is reduced in place and re-indexed at
//! the caller's hinted NICR. Every redemption raises the base rate.

use tren_common::{
    access_control::{ModuleRegistry, ModuleRole},
    constants::precision::{DECIMAL_PRECISION, PERCENTAGE_PRECISION},
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{compute_nominal_cr, mul_div, safe_add, safe_sub},
    types::{Address, TrenBoxOperation, TrenBoxStatus},
};
use tren_debt_token::DebtToken;

use crate::fees::require_user_accepts_fee;
use crate::pools::CollateralLedger;
use crate::state::AssetLedgerState;

/// Parameters of one redemption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionRequest {
    /// Debt tokens to redeem
    pub debt_amount: u128,
    /// Expected first position; checked and ignored when invalid
    pub first_hint: Option<Address>,
    /// Insert hints for the partially redeemed position
    pub upper_partial_hint: Option<Address>,
    pub lower_partial_hint: Option<Address>,
    /// Expected NICR of the partially redeemed position
    pub partial_nicr: u128,
    /// Positions to visit at most, 0 for no limit
    pub max_iterations: usize,
    /// Highest acceptable fee as an 18-decimal fraction
    pub max_fee_percent: u128,
}

/// Result of a redemption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionOutcome {
    pub attempted_debt: u128,
    pub debt_redeemed: u128,
    pub coll_drawn: u128,
    pub coll_fee: u128,
    pub coll_sent: u128,
    pub positions_redeemed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct SingleRedemption {
    debt_lot: u128,
    coll_lot: u128,
    cancelled_partial: bool,
}

/// Everything a redemption touches for one asset at one price
pub struct RedemptionContext<'a> {
    pub registry: &'a ModuleRegistry,
    pub ledger: &'a mut AssetLedgerState,
    pub debt_token: &'a mut DebtToken,
    pub payouts: &'a mut CollateralLedger,
    pub price: u128,
    pub now: u64,
    pub redeemer: Address,
}

impl<'a> RedemptionContext<'a> {
    pub fn redeem_collateral(
        &mut self,
        request: &RedemptionRequest,
        events: &mut EventLog,
    ) -> TrenResult<RedemptionOutcome> {
        let asset = self.ledger.asset;
        let params = self.ledger.params.clone();

        // 1. Preconditions
        if self.now < params.redemption_block_timestamp {
            return Err(TrenError::RedemptionIsBlocked {
                until: params.redemption_block_timestamp,
            });
        }
        if request.max_fee_percent < params.redemption_fee_floor || request.max_fee_percent > DECIMAL_PRECISION {
            return Err(TrenError::FeePercentOutOfBounds {
                fee: request.max_fee_percent,
                lower: params.redemption_fee_floor,
                upper: DECIMAL_PRECISION,
            });
        }
        if request.debt_amount == 0 {
            return Err(TrenError::EmptyAmount);
        }
        let balance = self.debt_token.balance_of(&self.redeemer);
        if balance < request.debt_amount {
            return Err(TrenError::InsufficientDebtTokenBalance {
                available: balance,
                requested: request.debt_amount,
            });
        }
        let tcr = self.ledger.tcr(self.price)?;
        if tcr < params.mcr {
            return Err(TrenError::TcrMustBeAboveMcr { tcr, mcr: params.mcr });
        }

        let total_debt_at_start = self.ledger.entire_system_debt()?;
        let mut remaining = request.debt_amount;
        let mut outcome = RedemptionOutcome {
            attempted_debt: request.debt_amount,
            ..RedemptionOutcome::default()
        };

        // 2. First position with ICR >= MCR
        let mut current = match request.first_hint {
            Some(hint) if self.is_valid_first_hint(&hint)? => Some(hint),
            _ => self.first_redeemable()?,
        };

        // 3. Walk towards the head
        let mut iterations = 0usize;
        while let Some(owner) = current {
            if remaining == 0 || (request.max_iterations > 0 && iterations >= request.max_iterations) {
                break;
            }
            iterations += 1;

            let next = self.ledger.sorted.prev(&owner);
            self.ledger.apply_pending_rewards(&owner, events)?;

            let single = self.redeem_from_trenbox(&owner, remaining, request, events)?;
            if single.cancelled_partial {
                break;
            }
            outcome.debt_redeemed = safe_add(outcome.debt_redeemed, single.debt_lot)?;
            outcome.coll_drawn = safe_add(outcome.coll_drawn, single.coll_lot)?;
            outcome.positions_redeemed += 1;
            remaining = safe_sub(remaining, single.debt_lot)?;
            current = next;
        }

        if outcome.coll_drawn == 0 {
            return Err(TrenError::UnableToRedeemAnyAmount);
        }

        // 4. Base rate and fee
        self.ledger.fees.update_base_rate_from_redemption(
            &asset,
            outcome.coll_drawn,
            self.price,
            total_debt_at_start,
            self.now,
            events,
        )?;
        outcome.coll_fee = self.ledger.fees.redemption_fee(&params, outcome.coll_drawn)?;
        require_user_accepts_fee(
            outcome.coll_fee,
            outcome.coll_drawn,
            request.max_fee_percent,
            params.redemption_fee_floor,
        )?;

        // 5. Burn the redeemed tokens and pay out collateral
        let operations = self.registry.address_of(ModuleRole::TrenBoxManagerOperations)?;
        let fee_collector = self.registry.address_of(ModuleRole::FeeCollector)?;
        self.debt_token
            .burn(self.registry, &operations, &self.redeemer, outcome.debt_redeemed, events)?;
        self.ledger.active_pool.decrease_debt(&asset, outcome.debt_redeemed, events)?;

        outcome.coll_sent = outcome.coll_drawn - outcome.coll_fee;
        self.ledger.active_pool.send_coll(&asset, outcome.coll_drawn, events)?;
        self.payouts.credit(&asset, &fee_collector, outcome.coll_fee, events)?;
        self.payouts.credit(&asset, &self.redeemer, outcome.coll_sent, events)?;

        events.emit(TrenEvent::Redemption {
            asset,
            attempted_debt_amount: outcome.attempted_debt,
            actual_debt_amount: outcome.debt_redeemed,
            coll_sent: outcome.coll_sent,
            coll_fee: outcome.coll_fee,
        });
        log::info!(
            "redeemed {} of {} debt from {} trenbox(es) for {} coll (fee {})",
            outcome.debt_redeemed,
            outcome.attempted_debt,
            outcome.positions_redeemed,
            outcome.coll_sent,
            outcome.coll_fee
        );
        Ok(outcome)
    }

    // A hint is valid when it is redeemable and the next riskier position is not
    fn is_valid_first_hint(&self, hint: &Address) -> TrenResult<bool> {
        if !self.ledger.sorted.contains(hint) || self.ledger.current_icr(hint, self.price)? < self.ledger.params.mcr {
            return Ok(false);
        }
        match self.ledger.sorted.next(hint) {
            None => Ok(true),
            Some(next) => Ok(self.ledger.current_icr(&next, self.price)? < self.ledger.params.mcr),
        }
    }

    fn first_redeemable(&self) -> TrenResult<Option<Address>> {
        let mut current = self.ledger.sorted.last();
        while let Some(owner) = current {
            if self.ledger.current_icr(&owner, self.price)? >= self.ledger.params.mcr {
                return Ok(Some(owner));
            }
            current = self.ledger.sorted.prev(&owner);
        }
        Ok(None)
    }

    fn redeem_from_trenbox(
        &mut self,
        owner: &Address,
        max_debt: u128,
        request: &RedemptionRequest,
        events: &mut EventLog,
    ) -> TrenResult<SingleRedemption> {
        let asset = self.ledger.asset;
        let gas = self.ledger.params.debt_token_gas_compensation;
        let trenbox = self.ledger.trenboxes.require_active(&asset, owner)?.clone();

        let debt_lot = max_debt.min(safe_sub(trenbox.debt, gas)?);
        let coll_lot = mul_div(
            mul_div(debt_lot, DECIMAL_PRECISION, self.price)?,
            self.ledger.params.redemption_softening_param,
            PERCENTAGE_PRECISION,
        )?;
        let new_debt = trenbox.debt - debt_lot;
        let new_coll = safe_sub(trenbox.coll, coll_lot)?;

        if new_debt == gas {
            // Fully redeemed: close and leave the rest of the collateral claimable
            self.ledger.close(owner, TrenBoxStatus::ClosedByRedemption, events)?;
            self.redeem_close_trenbox(owner, gas, new_coll, events)?;
            events.emit(TrenEvent::TrenBoxUpdated {
                asset,
                owner: *owner,
                debt: 0,
                coll: 0,
                stake: 0,
                operation: TrenBoxOperation::RedeemCollateral,
            });
        } else {
            let new_nicr = compute_nominal_cr(new_coll, new_debt);
            let net_debt = new_debt - gas;
            if new_nicr != request.partial_nicr || net_debt < self.ledger.params.min_net_debt {
                log::debug!("partial redemption cancelled: nicr {} hint {}", new_nicr, request.partial_nicr);
                return Ok(SingleRedemption {
                    cancelled_partial: true,
                    ..SingleRedemption::default()
                });
            }

            let record = self.ledger.trenboxes.active_mut(&asset, owner)?;
            record.debt = new_debt;
            record.coll = new_coll;
            let stake = self.ledger.rewards.update_stake_and_total_stakes(&asset, record, events)?;
            self.ledger.reindex(
                owner,
                new_nicr,
                request.upper_partial_hint.as_ref(),
                request.lower_partial_hint.as_ref(),
            )?;

            events.emit(TrenEvent::TrenBoxUpdated {
                asset,
                owner: *owner,
                debt: new_debt,
                coll: new_coll,
                stake,
                operation: TrenBoxOperation::RedeemCollateral,
            });
        }

        Ok(SingleRedemption {
            debt_lot,
            coll_lot,
            cancelled_partial: false,
        })
    }

    // Burn the gas compensation and move leftover collateral to the surplus pool
    fn redeem_close_trenbox(
        &mut self,
        owner: &Address,
        gas: u128,
        coll: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        let asset = self.ledger.asset;
        let operations = self.registry.address_of(ModuleRole::TrenBoxManagerOperations)?;
        let gas_pool = self.registry.address_of(ModuleRole::GasPool)?;

        self.debt_token.burn(self.registry, &operations, &gas_pool, gas, events)?;
        self.ledger.active_pool.decrease_debt(&asset, gas, events)?;

        self.ledger.coll_surplus.account_surplus(&asset, owner, coll, events)?;
        self.ledger.active_pool.send_coll(&asset, coll, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::config::AssetParams;
    use tren_common::constants::sorted::MAX_SEARCH_DEPTH;
    use tren_common::events::EventType;
    use tren_common::types::AssetId;

    const ONE: u128 = DECIMAL_PRECISION;
    const PRICE: u128 = 100 * ONE;

    fn asset() -> AssetId {
        [0xAA; 32]
    }

    fn owner(n: u8) -> Address {
        [n; 32]
    }

    struct Fixture {
        registry: ModuleRegistry,
        ledger: AssetLedgerState,
        token: DebtToken,
        payouts: CollateralLedger,
    }

    impl Fixture {
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
                token,
                payouts: CollateralLedger::new(),
            }
        }

        fn context(&mut self, redeemer: Address, now: u64) -> RedemptionContext<'_> {
            RedemptionContext {
                registry: &self.registry,
                ledger: &mut self.ledger,
                debt_token: &mut self.token,
                payouts: &mut self.payouts,
                price: PRICE,
                now,
                redeemer,
            }
        }
    }

    fn three_positions() -> Fixture {
        Fixture::new(&[
            (1, 100 * ONE, 2_000 * ONE),
            (2, 80 * ONE, 2_000 * ONE),
            (3, 50 * ONE, 4_200 * ONE),
        ])
    }

    fn request(amount: u128) -> RedemptionRequest {
        RedemptionRequest {
            debt_amount: amount,
            max_fee_percent: ONE,
            ..RedemptionRequest::default()
        }
    }

    #[test]
    fn test_partial_redemption_of_weakest() {
        let mut fx = three_positions();
        let mut events = EventLog::new();
        let req = RedemptionRequest {
            partial_nicr: compute_nominal_cr(30 * ONE, 2_200 * ONE),
            ..request(2_000 * ONE)
        };
        let supply_before = fx.token.total_supply();

        let outcome = fx.context(owner(3), 3_600).redeem_collateral(&req, &mut events).unwrap();
        assert_eq!(outcome.debt_redeemed, 2_000 * ONE);
        assert_eq!(outcome.coll_drawn, 20 * ONE);
        assert_eq!(outcome.coll_sent + outcome.coll_fee, 20 * ONE);

        let rate = fx.ledger.fees.redemption_rate(&fx.ledger.params);
        assert_eq!(outcome.coll_fee, mul_div(rate, 20 * ONE, ONE).unwrap());
        assert!(fx.ledger.fees.base_rate > 0);

        let trenbox = fx.ledger.trenboxes.get(&owner(3)).unwrap();
        assert_eq!((trenbox.debt, trenbox.coll), (2_200 * ONE, 30 * ONE));
        assert_eq!(trenbox.stake, 30 * ONE);
        assert_eq!(fx.token.total_supply(), supply_before - 2_000 * ONE);
        assert_eq!(fx.payouts.balance_of(&asset(), &owner(3)), outcome.coll_sent);
        assert_eq!(fx.ledger.active_pool.debt(), 6_200 * ONE);
        assert_eq!(fx.ledger.active_pool.coll(), 210 * ONE);
        assert!(events.last_of_type(EventType::Redemption).is_some());
    }

    #[test]
    fn test_full_redemption_leaves_surplus() {
        let mut fx = three_positions();
        let gas_pool = fx.registry.address_of(ModuleRole::GasPool).unwrap();
        let outcome = fx
            .context(owner(3), 0)
            .redeem_collateral(&request(4_000 * ONE), &mut EventLog::new())
            .unwrap();

        assert_eq!(outcome.coll_drawn, 40 * ONE);
        assert_eq!(fx.ledger.trenboxes.status(&owner(3)), TrenBoxStatus::ClosedByRedemption);
        assert_eq!(fx.ledger.coll_surplus.claimable(&owner(3)), 10 * ONE);
        assert_eq!(fx.token.balance_of(&gas_pool), 400 * ONE);
        assert_eq!(fx.ledger.active_pool.debt(), 4_000 * ONE);
        assert!(!fx.ledger.sorted.contains(&owner(3)));
    }

    #[test]
    fn test_wrong_partial_hint_cancels() {
        let mut fx = three_positions();
        assert_eq!(
            fx.context(owner(3), 0).redeem_collateral(&request(2_000 * ONE), &mut EventLog::new()),
            Err(TrenError::UnableToRedeemAnyAmount)
        );
    }

    #[test]
    fn test_skips_positions_below_mcr() {
        let mut fx = Fixture::new(&[
            (1, 100 * ONE, 2_000 * ONE),
            (2, 80 * ONE, 2_000 * ONE),
            (3, 50 * ONE, 4_200 * ONE),
            (4, 20 * ONE, 2_000 * ONE),
        ]);
        // owner 2 is not a valid first hint: owner 3 after it is redeemable
        let req = RedemptionRequest {
            first_hint: Some(owner(2)),
            ..request(4_000 * ONE)
        };
        fx.context(owner(3), 0).redeem_collateral(&req, &mut EventLog::new()).unwrap();

        assert_eq!(fx.ledger.trenboxes.status(&owner(3)), TrenBoxStatus::ClosedByRedemption);
        assert_eq!(fx.ledger.trenboxes.get(&owner(4)).unwrap().debt, 2_000 * ONE);
        assert_eq!(fx.ledger.trenboxes.get(&owner(2)).unwrap().debt, 2_000 * ONE);
    }

    #[test]
    fn test_max_iterations_limits_walk() {
        let mut fx = three_positions();
        let req = RedemptionRequest {
            max_iterations: 1,
            ..request(5_000 * ONE)
        };
        fx.token
            .transfer(&fx.registry, &owner(1), &owner(3), 1_000 * ONE, &mut EventLog::new())
            .unwrap();
        let outcome = fx.context(owner(3), 0).redeem_collateral(&req, &mut EventLog::new()).unwrap();
        assert_eq!(outcome.positions_redeemed, 1);
        assert_eq!(outcome.debt_redeemed, 4_000 * ONE);
    }

    #[test]
    fn test_preconditions_in_order() {
        let mut fx = three_positions();
        fx.ledger.params.redemption_block_timestamp = 1_000;
        let mut events = EventLog::new();

        assert_eq!(
            fx.context(owner(3), 999).redeem_collateral(&request(0), &mut events),
            Err(TrenError::RedemptionIsBlocked { until: 1_000 })
        );

        let low_fee = RedemptionRequest {
            max_fee_percent: ONE / 1_000,
            ..request(0)
        };
        assert!(matches!(
            fx.context(owner(3), 1_000).redeem_collateral(&low_fee, &mut events),
            Err(TrenError::FeePercentOutOfBounds { .. })
        ));
        assert_eq!(
            fx.context(owner(3), 1_000).redeem_collateral(&request(0), &mut events),
            Err(TrenError::EmptyAmount)
        );
        assert_eq!(
            fx.context(owner(9), 1_000).redeem_collateral(&request(ONE), &mut events),
            Err(TrenError::InsufficientDebtTokenBalance { available: 0, requested: ONE })
        );

        // TCR at price 100 is 230 * 100 / 8200, well above MCR; at 3 it is not
        let mut ctx = fx.context(owner(3), 1_000);
        ctx.price = 3 * ONE;
        assert!(matches!(
            ctx.redeem_collateral(&request(ONE), &mut events),
            Err(TrenError::TcrMustBeAboveMcr { .. })
        ));
        assert!(events.is_empty());
    }
}
