//! Protocol coordinator
//!
//! [`TrenProtocol`] owns the whole engine state and is the single entry
//! point for owner operations, liquidations, redemptions and Stability Pool
//! deposits. Every call runs against a copy of [`ProtocolState`] with its
//! own event log; the copy and the events are committed only when the call
//! succeeds, so a failed call leaves no trace.
//!
//! Owner operations run under the BorrowerOperations identity: they re-check
//! every collateral ratio, Recovery Mode, minimum debt and mint cap rule
//! themselves before minting or burning.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tren_common::{
    access_control::{ModuleRegistry, ModuleRole},
    config::{AssetParams, ProtocolConfig},
    constants::sorted::MAX_SEARCH_DEPTH,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{compute_cr, safe_add, safe_sub},
    oracle::PriceFeed,
    types::{Address, AssetId, EntireDebtAndColl, TrenBox, TrenBoxOperation, TrenBoxStatus},
};
use tren_debt_token::DebtToken;
use tren_stability_pool::{DepositChange, StabilityPool};

use crate::liquidation::{LiquidationContext, LiquidationTotals};
use crate::pools::CollateralLedger;
use crate::redemption::{RedemptionContext, RedemptionOutcome, RedemptionRequest};
use crate::state::{AssetLedgerState, PositionDelta};

// ============ Requests ============

/// Change requested by an owner on an Active position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjustTrenBoxRequest {
    pub coll_added: u128,
    pub coll_withdrawn: u128,
    /// Debt tokens to mint or repay, before any borrowing fee
    pub debt_change: u128,
    pub is_debt_increase: bool,
    pub upper_hint: Option<Address>,
    pub lower_hint: Option<Address>,
}

// ============ State ============

/// Everything the engine stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub registry: ModuleRegistry,
    pub assets: BTreeMap<AssetId, AssetLedgerState>,
    pub stability_pool: StabilityPool,
    pub debt_token: DebtToken,
    pub payouts: CollateralLedger,
    pub max_search_depth: usize,
    /// Unix time used by fees, redemptions and price freshness
    pub timestamp: u64,
}

impl ProtocolState {
    pub fn new(registry: ModuleRegistry, max_search_depth: usize) -> Self {
        Self {
            registry,
            assets: BTreeMap::new(),
            stability_pool: StabilityPool::new(),
            debt_token: DebtToken::new(),
            payouts: CollateralLedger::new(),
            max_search_depth,
            timestamp: 0,
        }
    }

    pub fn asset(&self, asset: &AssetId) -> TrenResult<&AssetLedgerState> {
        self.assets.get(asset).ok_or(TrenError::UnknownAsset { asset: *asset })
    }

    pub fn asset_ids(&self) -> Vec<AssetId> {
        self.assets.keys().copied().collect()
    }

    /// Register a collateral asset
    pub fn add_asset(&mut self, asset: AssetId, params: AssetParams) -> TrenResult<()> {
        params.validate()?;
        if self.assets.contains_key(&asset) {
            return Err(TrenError::InvalidParameter {
                param: "asset",
                reason: "already registered",
            });
        }
        self.assets
            .insert(asset, AssetLedgerState::new(asset, params, self.max_search_depth));
        Ok(())
    }

    /// SHA-256 commitment over every asset, the token ledger and the pool
    pub fn state_digest(&self) -> TrenResult<[u8; 32]> {
        let mut hasher = Sha256::new();
        for (id, ledger) in &self.assets {
            hasher.update(id);
            hasher.update(ledger.state_digest()?);
            hasher.update(self.payouts.total_paid(id).to_le_bytes());
            hasher.update(self.stability_pool.asset_balance(id).to_le_bytes());
        }
        hasher.update(borsh::to_vec(&self.debt_token)?);
        for depositor in self.stability_pool.depositors() {
            hasher.update(depositor);
            hasher.update(self.stability_pool.deposit_of(depositor).to_le_bytes());
        }
        for value in [
            self.stability_pool.total_deposits(),
            self.stability_pool.p(),
            self.stability_pool.current_epoch(),
            self.stability_pool.current_scale(),
        ] {
            hasher.update(value.to_le_bytes());
        }
        hasher.update(self.timestamp.to_le_bytes());
        Ok(hasher.finalize().into())
    }

    // ============ Owner Operations ============

    /// Open a position minting `debt_amount` to the owner
    #[allow(clippy::too_many_arguments)]
    pub fn open_trenbox<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        owner: &Address,
        coll: u128,
        debt_amount: u128,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
        events: &mut EventLog,
    ) -> TrenResult<TrenBox> {
        let now = self.timestamp;
        let ProtocolState {
            registry,
            assets,
            debt_token,
            ..
        } = self;
        let ledger = ledger_mut(assets, asset)?;
        let params = ledger.params.clone();

        // 1. Asset, price and owner
        if !params.is_active {
            return Err(TrenError::AssetNotActive { asset: *asset });
        }
        let price = feed.fetch_price(asset, now)?;
        if ledger.trenboxes.is_active(owner) {
            return Err(TrenError::TrenBoxIsActive {
                asset: *asset,
                owner: *owner,
            });
        }

        // 2. Fee, outside Recovery Mode only
        let recovery = ledger.is_recovery_mode(price)?;
        let mut fee = 0;
        if !recovery {
            ledger.fees.decay_base_rate_from_borrowing(asset, now, events)?;
            fee = ledger.fees.borrowing_fee(&params, debt_amount)?;
        }

        // 3. Debt and collateral ratio checks
        let net_debt = safe_add(debt_amount, fee)?;
        if net_debt < params.min_net_debt {
            return Err(TrenError::NetDebtBelowMinimum {
                net_debt,
                minimum: params.min_net_debt,
            });
        }
        let composite_debt = safe_add(net_debt, params.debt_token_gas_compensation)?;
        let icr = compute_cr(coll, composite_debt, price);
        if recovery {
            log::warn!("opening trenbox in Recovery Mode");
            if icr < params.ccr {
                return Err(TrenError::IcrBelowCcr { icr, ccr: params.ccr });
            }
        } else {
            if icr < params.mcr {
                return Err(TrenError::IcrBelowMcr { icr, mcr: params.mcr });
            }
            let delta = PositionDelta {
                coll_change: coll,
                is_coll_increase: true,
                debt_change: composite_debt,
                is_debt_increase: true,
            };
            let new_tcr = ledger.tcr_after(&delta, price)?;
            if new_tcr < params.ccr {
                return Err(TrenError::TcrBelowCcr {
                    tcr: new_tcr,
                    ccr: params.ccr,
                });
            }
        }
        require_within_mint_cap(ledger, composite_debt)?;

        // 4. Record, pools and tokens
        ledger.open(owner, coll, composite_debt, upper_hint, lower_hint, events)?;
        ledger.active_pool.receive_coll(asset, coll, events)?;
        ledger.active_pool.increase_debt(asset, composite_debt, events)?;

        let borrower_operations = registry.address_of(ModuleRole::BorrowerOperations)?;
        let fee_collector = registry.address_of(ModuleRole::FeeCollector)?;
        let gas_pool = registry.address_of(ModuleRole::GasPool)?;
        debt_token.mint(registry, &borrower_operations, owner, debt_amount, events)?;
        debt_token.mint(registry, &borrower_operations, &fee_collector, fee, events)?;
        debt_token.mint(
            registry,
            &borrower_operations,
            &gas_pool,
            params.debt_token_gas_compensation,
            events,
        )?;
        if fee > 0 {
            events.emit(TrenEvent::BorrowingFeePaid {
                asset: *asset,
                owner: *owner,
                fee,
            });
        }

        log::info!("trenbox opened: coll {} debt {} fee {}", coll, composite_debt, fee);
        ledger
            .trenboxes
            .get(owner)
            .cloned()
            .ok_or(TrenError::TrenBoxNotActive {
                asset: *asset,
                owner: *owner,
            })
    }

    /// Add or withdraw collateral and draw or repay debt in one step
    pub fn adjust_trenbox<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        owner: &Address,
        request: &AdjustTrenBoxRequest,
        events: &mut EventLog,
    ) -> TrenResult<TrenBox> {
        if request.coll_added > 0 && request.coll_withdrawn > 0 {
            return Err(TrenError::CannotWithdrawAndAddColl);
        }
        if request.coll_added == 0 && request.coll_withdrawn == 0 && request.debt_change == 0 {
            return Err(TrenError::ZeroAdjustment);
        }

        let now = self.timestamp;
        let ProtocolState {
            registry,
            assets,
            debt_token,
            payouts,
            ..
        } = self;
        let ledger = ledger_mut(assets, asset)?;
        let params = ledger.params.clone();
        ledger.trenboxes.require_active(asset, owner)?;

        let is_debt_increase = request.is_debt_increase && request.debt_change > 0;
        let is_repayment = !request.is_debt_increase && request.debt_change > 0;

        // 1. Risk-increasing changes need a price
        let price = if request.coll_withdrawn > 0 || is_debt_increase {
            Some(feed.fetch_price(asset, now)?)
        } else {
            None
        };
        ledger.apply_pending_rewards(owner, events)?;
        let trenbox = ledger.trenboxes.require_active(asset, owner)?.clone();
        let recovery = match price {
            Some(p) => ledger.is_recovery_mode(p)?,
            None => false,
        };

        // 2. Fee and net debt change
        let mut fee = 0;
        let mut debt_change = request.debt_change;
        if is_debt_increase {
            if !recovery {
                ledger.fees.decay_base_rate_from_borrowing(asset, now, events)?;
                fee = ledger.fees.borrowing_fee(&params, request.debt_change)?;
            }
            debt_change = safe_add(debt_change, fee)?;
        }
        if is_repayment {
            let max = safe_sub(trenbox.debt, params.debt_token_gas_compensation)?;
            if debt_change > max {
                return Err(TrenError::RepaymentExceedsDebt {
                    repayment: debt_change,
                    max,
                });
            }
            let balance = debt_token.balance_of(owner);
            if balance < debt_change {
                return Err(TrenError::InsufficientDebtTokenBalance {
                    available: balance,
                    requested: debt_change,
                });
            }
        }

        let delta = PositionDelta {
            coll_change: request.coll_added.max(request.coll_withdrawn),
            is_coll_increase: request.coll_added > 0,
            debt_change,
            is_debt_increase,
        };
        if !delta.is_coll_increase && delta.coll_change > trenbox.coll {
            return Err(TrenError::InsufficientCollateral {
                available: trenbox.coll,
                requested: delta.coll_change,
            });
        }
        let new_coll = if delta.is_coll_increase {
            safe_add(trenbox.coll, delta.coll_change)?
        } else {
            trenbox.coll - delta.coll_change
        };
        let new_debt = if is_debt_increase {
            safe_add(trenbox.debt, debt_change)?
        } else {
            trenbox.debt - debt_change
        };

        // 3. Collateral ratio checks
        if let Some(price) = price {
            let old_icr = compute_cr(trenbox.coll, trenbox.debt, price);
            let new_icr = compute_cr(new_coll, new_debt, price);
            if recovery {
                if request.coll_withdrawn > 0 {
                    return Err(TrenError::CollWithdrawalInRecoveryMode);
                }
                if is_debt_increase {
                    if new_icr < params.ccr {
                        return Err(TrenError::IcrBelowCcr {
                            icr: new_icr,
                            ccr: params.ccr,
                        });
                    }
                    if new_icr < old_icr {
                        return Err(TrenError::IcrDecreasedInRecoveryMode { old_icr, new_icr });
                    }
                }
            } else {
                if new_icr < params.mcr {
                    return Err(TrenError::IcrBelowMcr {
                        icr: new_icr,
                        mcr: params.mcr,
                    });
                }
                let new_tcr = ledger.tcr_after(&delta, price)?;
                if new_tcr < params.ccr {
                    return Err(TrenError::TcrBelowCcr {
                        tcr: new_tcr,
                        ccr: params.ccr,
                    });
                }
            }
        }
        if is_repayment {
            let net_debt = safe_sub(new_debt, params.debt_token_gas_compensation)?;
            if net_debt < params.min_net_debt {
                return Err(TrenError::NetDebtBelowMinimum {
                    net_debt,
                    minimum: params.min_net_debt,
                });
            }
        }
        if is_debt_increase {
            require_within_mint_cap(ledger, debt_change)?;
        }

        // 4. Record, pools and tokens
        let updated = ledger.adjust(
            owner,
            delta,
            request.upper_hint.as_ref(),
            request.lower_hint.as_ref(),
            events,
        )?;

        if delta.coll_change > 0 {
            if delta.is_coll_increase {
                ledger.active_pool.receive_coll(asset, delta.coll_change, events)?;
            } else {
                ledger.active_pool.send_coll(asset, delta.coll_change, events)?;
                payouts.credit(asset, owner, delta.coll_change, events)?;
            }
        }

        let borrower_operations = registry.address_of(ModuleRole::BorrowerOperations)?;
        if is_debt_increase {
            let fee_collector = registry.address_of(ModuleRole::FeeCollector)?;
            ledger.active_pool.increase_debt(asset, debt_change, events)?;
            debt_token.mint(registry, &borrower_operations, owner, request.debt_change, events)?;
            debt_token.mint(registry, &borrower_operations, &fee_collector, fee, events)?;
            if fee > 0 {
                events.emit(TrenEvent::BorrowingFeePaid {
                    asset: *asset,
                    owner: *owner,
                    fee,
                });
            }
        } else if is_repayment {
            ledger.active_pool.decrease_debt(asset, debt_change, events)?;
            debt_token.burn(registry, &borrower_operations, owner, debt_change, events)?;
        }

        log::debug!("trenbox adjusted: coll {} debt {}", updated.coll, updated.debt);
        Ok(updated)
    }

    /// Repay everything and take the collateral back
    pub fn close_trenbox<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        owner: &Address,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        let now = self.timestamp;
        let ProtocolState {
            registry,
            assets,
            debt_token,
            payouts,
            ..
        } = self;
        let ledger = ledger_mut(assets, asset)?;
        let params = ledger.params.clone();
        ledger.trenboxes.require_active(asset, owner)?;

        let price = feed.fetch_price(asset, now)?;
        if ledger.is_recovery_mode(price)? {
            return Err(TrenError::NotAllowedInRecoveryMode);
        }
        ledger.apply_pending_rewards(owner, events)?;
        let trenbox = ledger.trenboxes.require_active(asset, owner)?.clone();

        let repayment = safe_sub(trenbox.debt, params.debt_token_gas_compensation)?;
        let balance = debt_token.balance_of(owner);
        if balance < repayment {
            return Err(TrenError::InsufficientDebtTokenBalance {
                available: balance,
                requested: repayment,
            });
        }
        let delta = PositionDelta {
            coll_change: trenbox.coll,
            is_coll_increase: false,
            debt_change: trenbox.debt,
            is_debt_increase: false,
        };
        let new_tcr = ledger.tcr_after(&delta, price)?;
        if new_tcr < params.ccr {
            return Err(TrenError::TcrBelowCcr {
                tcr: new_tcr,
                ccr: params.ccr,
            });
        }

        ledger.close(owner, TrenBoxStatus::ClosedByOwner, events)?;
        events.emit(TrenEvent::TrenBoxUpdated {
            asset: *asset,
            owner: *owner,
            debt: 0,
            coll: 0,
            stake: 0,
            operation: TrenBoxOperation::CloseTrenBox,
        });

        let borrower_operations = registry.address_of(ModuleRole::BorrowerOperations)?;
        let gas_pool = registry.address_of(ModuleRole::GasPool)?;
        debt_token.burn(registry, &borrower_operations, owner, repayment, events)?;
        debt_token.burn(
            registry,
            &borrower_operations,
            &gas_pool,
            params.debt_token_gas_compensation,
            events,
        )?;
        ledger.active_pool.decrease_debt(asset, trenbox.debt, events)?;
        ledger.active_pool.send_coll(asset, trenbox.coll, events)?;
        payouts.credit(asset, owner, trenbox.coll, events)?;

        log::info!("trenbox closed: returned {} coll", trenbox.coll);
        Ok(())
    }

    /// Pay out collateral left over from a capped liquidation or full redemption
    pub fn claim_collateral(&mut self, asset: &AssetId, owner: &Address, events: &mut EventLog) -> TrenResult<u128> {
        let ProtocolState { assets, payouts, .. } = self;
        let ledger = ledger_mut(assets, asset)?;
        let amount = ledger.coll_surplus.claim(asset, owner, events)?;
        payouts.credit(asset, owner, amount, events)?;
        Ok(amount)
    }

    // ============ Liquidations ============

    pub fn liquidate<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        owner: &Address,
        liquidator: &Address,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        self.with_liquidation(feed, asset, liquidator, |ctx| ctx.liquidate(owner, events))
    }

    pub fn liquidate_trenboxes<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        n: usize,
        liquidator: &Address,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        self.with_liquidation(feed, asset, liquidator, |ctx| ctx.liquidate_trenboxes(n, events))
    }

    pub fn batch_liquidate_trenboxes<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        owners: &[Address],
        liquidator: &Address,
        events: &mut EventLog,
    ) -> TrenResult<LiquidationTotals> {
        self.with_liquidation(feed, asset, liquidator, |ctx| {
            ctx.batch_liquidate_trenboxes(owners, events)
        })
    }

    fn with_liquidation<F, T>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        liquidator: &Address,
        run: impl FnOnce(&mut LiquidationContext<'_>) -> TrenResult<T>,
    ) -> TrenResult<T>
    where
        F: PriceFeed,
    {
        let price = feed.fetch_price(asset, self.timestamp)?;
        let ProtocolState {
            registry,
            assets,
            stability_pool,
            debt_token,
            payouts,
            ..
        } = self;
        let mut ctx = LiquidationContext {
            registry,
            ledger: ledger_mut(assets, asset)?,
            stability_pool,
            debt_token,
            payouts,
            price,
            liquidator: *liquidator,
        };
        run(&mut ctx)
    }

    // ============ Redemptions ============

    pub fn redeem_collateral<F: PriceFeed>(
        &mut self,
        feed: &F,
        asset: &AssetId,
        redeemer: &Address,
        request: &RedemptionRequest,
        events: &mut EventLog,
    ) -> TrenResult<RedemptionOutcome> {
        let now = self.timestamp;
        let ProtocolState {
            registry,
            assets,
            debt_token,
            payouts,
            ..
        } = self;
        let ledger = ledger_mut(assets, asset)?;
        // Blocked redemptions fail before the price is read
        if now < ledger.params.redemption_block_timestamp {
            return Err(TrenError::RedemptionIsBlocked {
                until: ledger.params.redemption_block_timestamp,
            });
        }
        let price = feed.fetch_price(asset, now)?;
        let mut ctx = RedemptionContext {
            registry,
            ledger,
            debt_token,
            payouts,
            price,
            now,
            redeemer: *redeemer,
        };
        ctx.redeem_collateral(request, events)
    }

    // ============ Stability Pool ============

    /// Deposit debt tokens; pending gains on every asset are paid out
    pub fn provide_to_stability_pool(
        &mut self,
        depositor: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<DepositChange> {
        let asset_ids = self.asset_ids();
        let pool = self.registry.address_of(ModuleRole::StabilityPool)?;

        let change = self.stability_pool.provide(depositor, amount, &asset_ids, events)?;
        self.debt_token
            .send_to_pool(&self.registry, &pool, depositor, &pool, amount, events)?;
        self.pay_gains(depositor, &change, events)?;
        Ok(change)
    }

    /// Withdraw up to `amount`; `0` only claims gains
    pub fn withdraw_from_stability_pool<F: PriceFeed>(
        &mut self,
        feed: &F,
        depositor: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<DepositChange> {
        if self.stability_pool.deposit_of(depositor) == 0 {
            return Err(TrenError::UserHasNoDeposit { depositor: *depositor });
        }
        if amount > 0 {
            for (id, ledger) in &self.assets {
                if ledger.sorted.is_empty() {
                    continue;
                }
                let price = feed.fetch_price(id, self.timestamp)?;
                if ledger.has_undercollateralized(price)? {
                    return Err(TrenError::UnderCollateralizedTrenBoxes { asset: *id });
                }
            }
        }

        let asset_ids = self.asset_ids();
        let pool = self.registry.address_of(ModuleRole::StabilityPool)?;
        let change = self.stability_pool.withdraw(depositor, amount, &asset_ids, events)?;
        self.debt_token.return_from_pool(
            &self.registry,
            &pool,
            &pool,
            depositor,
            change.debt_tokens_withdrawn,
            events,
        )?;
        self.pay_gains(depositor, &change, events)?;
        Ok(change)
    }

    /// Issuance rewards handed to depositors by the CommunityIssuance module
    pub fn distribute_issuance(&mut self, amount: u128, events: &mut EventLog) -> TrenResult<()> {
        let issuer = self.registry.address_of(ModuleRole::CommunityIssuance)?;
        self.stability_pool
            .distribute_issuance(&self.registry, &issuer, amount, events)
    }

    fn pay_gains(&mut self, depositor: &Address, change: &DepositChange, events: &mut EventLog) -> TrenResult<()> {
        for (asset, gain) in &change.gains {
            self.payouts.credit(asset, depositor, *gain, events)?;
        }
        Ok(())
    }
}

fn ledger_mut<'s>(
    assets: &'s mut BTreeMap<AssetId, AssetLedgerState>,
    asset: &AssetId,
) -> TrenResult<&'s mut AssetLedgerState> {
    assets.get_mut(asset).ok_or(TrenError::UnknownAsset { asset: *asset })
}

fn require_within_mint_cap(ledger: &AssetLedgerState, additional_debt: u128) -> TrenResult<()> {
    let requested = safe_add(ledger.entire_system_debt()?, additional_debt)?;
    if requested > ledger.params.mint_cap {
        return Err(TrenError::ExceedMintCap {
            requested,
            cap: ledger.params.mint_cap,
        });
    }
    Ok(())
}

// ============ Coordinator ============

/// The engine with its price feed and committed event history
pub struct TrenProtocol<F: PriceFeed> {
    state: ProtocolState,
    price_feed: F,
    events: EventLog,
}

impl<F: PriceFeed> TrenProtocol<F> {
    /// Empty engine with every module at its default address
    pub fn new(price_feed: F) -> Self {
        Self {
            state: ProtocolState::new(ModuleRegistry::with_default_addresses(), MAX_SEARCH_DEPTH),
            price_feed,
            events: EventLog::new(),
        }
    }

    /// Engine with the assets of a configuration file
    pub fn from_config(config: &ProtocolConfig, price_feed: F) -> TrenResult<Self> {
        config.validate()?;
        let mut state = ProtocolState::new(ModuleRegistry::with_default_addresses(), config.max_search_depth);
        for (symbol, id, params) in config.asset_params()? {
            log::info!("registering asset {}", symbol);
            state.add_asset(id, params)?;
        }
        Ok(Self {
            state,
            price_feed,
            events: EventLog::new(),
        })
    }

    pub fn add_asset(&mut self, asset: AssetId, params: AssetParams) -> TrenResult<()> {
        self.transact(|state, _, _| state.add_asset(asset, params))
    }

    pub fn set_timestamp(&mut self, now: u64) {
        self.state.timestamp = now;
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn price_feed(&self) -> &F {
        &self.price_feed
    }

    pub fn price_feed_mut(&mut self) -> &mut F {
        &mut self.price_feed
    }

    /// Events of every committed call so far
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Drain the committed events
    pub fn take_events(&mut self) -> Vec<TrenEvent> {
        std::mem::take(&mut self.events).into_events()
    }

    /// Run `op` against a copy of the state; commit only on success
    pub fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut ProtocolState, &F, &mut EventLog) -> TrenResult<T>,
    ) -> TrenResult<T> {
        let mut working = self.state.clone();
        let mut events = EventLog::new();
        match op(&mut working, &self.price_feed, &mut events) {
            Ok(value) => {
                self.state = working;
                self.events.append(events);
                Ok(value)
            }
            Err(err) => {
                log::debug!("operation rolled back: {} ({})", err, err.code());
                Err(err)
            }
        }
    }

    // ============ Owner Operations ============

    pub fn open_trenbox(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        coll: u128,
        debt_amount: u128,
        upper_hint: Option<&Address>,
        lower_hint: Option<&Address>,
    ) -> TrenResult<TrenBox> {
        self.transact(|state, feed, events| {
            state.open_trenbox(feed, asset, owner, coll, debt_amount, upper_hint, lower_hint, events)
        })
    }

    pub fn adjust_trenbox(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        request: &AdjustTrenBoxRequest,
    ) -> TrenResult<TrenBox> {
        self.transact(|state, feed, events| state.adjust_trenbox(feed, asset, owner, request, events))
    }

    pub fn close_trenbox(&mut self, asset: &AssetId, owner: &Address) -> TrenResult<()> {
        self.transact(|state, feed, events| state.close_trenbox(feed, asset, owner, events))
    }

    pub fn claim_collateral(&mut self, asset: &AssetId, owner: &Address) -> TrenResult<u128> {
        self.transact(|state, _, events| state.claim_collateral(asset, owner, events))
    }

    // ============ Engines ============

    pub fn liquidate(&mut self, asset: &AssetId, owner: &Address, liquidator: &Address) -> TrenResult<LiquidationTotals> {
        self.transact(|state, feed, events| state.liquidate(feed, asset, owner, liquidator, events))
    }

    pub fn liquidate_trenboxes(
        &mut self,
        asset: &AssetId,
        n: usize,
        liquidator: &Address,
    ) -> TrenResult<LiquidationTotals> {
        self.transact(|state, feed, events| state.liquidate_trenboxes(feed, asset, n, liquidator, events))
    }

    pub fn batch_liquidate_trenboxes(
        &mut self,
        asset: &AssetId,
        owners: &[Address],
        liquidator: &Address,
    ) -> TrenResult<LiquidationTotals> {
        self.transact(|state, feed, events| {
            state.batch_liquidate_trenboxes(feed, asset, owners, liquidator, events)
        })
    }

    pub fn redeem_collateral(
        &mut self,
        asset: &AssetId,
        redeemer: &Address,
        request: &RedemptionRequest,
    ) -> TrenResult<RedemptionOutcome> {
        self.transact(|state, feed, events| state.redeem_collateral(feed, asset, redeemer, request, events))
    }

    pub fn provide_to_stability_pool(&mut self, depositor: &Address, amount: u128) -> TrenResult<DepositChange> {
        self.transact(|state, _, events| state.provide_to_stability_pool(depositor, amount, events))
    }

    pub fn withdraw_from_stability_pool(&mut self, depositor: &Address, amount: u128) -> TrenResult<DepositChange> {
        self.transact(|state, feed, events| state.withdraw_from_stability_pool(feed, depositor, amount, events))
    }

    pub fn distribute_issuance(&mut self, amount: u128) -> TrenResult<()> {
        self.transact(|state, _, events| state.distribute_issuance(amount, events))
    }

    /// Plain debt token transfer between user accounts
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> TrenResult<()> {
        self.transact(|state, _, events| {
            let ProtocolState {
                registry, debt_token, ..
            } = state;
            debt_token.transfer(registry, from, to, amount, events)
        })
    }

    // ============ Views ============

    pub fn asset_state(&self, asset: &AssetId) -> TrenResult<&AssetLedgerState> {
        self.state.asset(asset)
    }

    pub fn trenbox(&self, asset: &AssetId, owner: &Address) -> Option<TrenBox> {
        self.state.assets.get(asset)?.trenboxes.get(owner).cloned()
    }

    pub fn entire_debt_and_coll(&self, asset: &AssetId, owner: &Address) -> TrenResult<EntireDebtAndColl> {
        self.state.asset(asset)?.entire_debt_and_coll(owner)
    }

    pub fn current_icr(&self, asset: &AssetId, owner: &Address) -> TrenResult<u128> {
        let price = self.price_feed.fetch_price(asset, self.state.timestamp)?;
        self.state.asset(asset)?.current_icr(owner, price)
    }

    pub fn tcr(&self, asset: &AssetId) -> TrenResult<u128> {
        let price = self.price_feed.fetch_price(asset, self.state.timestamp)?;
        self.state.asset(asset)?.tcr(price)
    }

    pub fn is_recovery_mode(&self, asset: &AssetId) -> TrenResult<bool> {
        let price = self.price_feed.fetch_price(asset, self.state.timestamp)?;
        self.state.asset(asset)?.is_recovery_mode(price)
    }

    /// Debt token balance
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.state.debt_token.balance_of(account)
    }

    /// Collateral paid out to an account
    pub fn collateral_balance(&self, asset: &AssetId, account: &Address) -> u128 {
        self.state.payouts.balance_of(asset, account)
    }

    pub fn stability_pool(&self) -> &StabilityPool {
        &self.state.stability_pool
    }

    pub fn state_digest(&self) -> TrenResult<[u8; 32]> {
        self.state.state_digest()
    }
}

// ============ Shared Handle ============

/// Thread-safe handle serialising calls into one engine
pub struct ProtocolHandle<F: PriceFeed> {
    inner: Arc<Mutex<TrenProtocol<F>>>,
}

impl<F: PriceFeed> Clone for ProtocolHandle<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: PriceFeed> ProtocolHandle<F> {
    pub fn new(protocol: TrenProtocol<F>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(protocol)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// A panic inside an earlier call cannot leave half-applied state, since
    /// state is only replaced on commit, so a poisoned lock is recovered.
    pub fn with<T>(&self, f: impl FnOnce(&mut TrenProtocol<F>) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
