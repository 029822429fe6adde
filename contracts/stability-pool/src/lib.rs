//! Stability Pool
//!
//! First line of defense for the Tren system. Depositors lock debt tokens;
//! liquidations burn pooled tokens against the liquidated debt and hand the
//! matching collateral to depositors pro rata.
//!
//! ## Product-sum accounting
//!
//! Individual deposits are never iterated. The pool keeps a running product
//! `P` (how much one unit deposited at the start is worth now) and per-asset
//! running sums `S` (collateral earned per unit). A depositor stores the
//! values at their last touch; their compounded deposit and gains follow
//! from the current values alone.
//!
//! - `P` below [`SCALE_FACTOR`] is multiplied back up and the scale bumps.
//! - An offset that empties the pool starts a new epoch with `P = 1e18`;
//!   deposits made in an older epoch compound to zero.
//! - `G` tracks issuance rewards the same way `S` tracks collateral.

use std::collections::{BTreeMap, BTreeSet};

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use tren_common::{
    access_control::{ModuleRegistry, ModuleRole},
    constants::precision::DECIMAL_PRECISION,
    constants::stability_pool::{DEPOSIT_DUST_DIVISOR, SCALE_FACTOR},
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{mul_div, safe_add, safe_sub, to_u128},
    types::{Address, AssetId},
};

// ============ Types ============

/// Pool values captured when a deposit last changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSnapshots {
    /// Per-asset sums at (epoch, scale)
    pub s: BTreeMap<AssetId, U256>,
    /// Product at snapshot time
    pub p: u128,
    /// Issuance sum at (epoch, scale)
    pub g: U256,
    pub scale: u128,
    pub epoch: u128,
}

/// What a provide or withdraw paid out and left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositChange {
    /// Collateral gains sent to the depositor
    pub gains: Vec<(AssetId, u128)>,
    /// Debt tokens lost to offsets since the last touch
    pub debt_token_loss: u128,
    /// Issuance rewards paid
    pub reward_gain: u128,
    /// Debt tokens to return to the depositor
    pub debt_tokens_withdrawn: u128,
    /// Deposit after the operation
    pub new_deposit: u128,
}

/// Result of one offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetOutcome {
    /// Debt cancelled against deposits
    pub debt_offset: u128,
    /// Debt loss per unit staked (18 decimals)
    pub debt_loss_per_unit_staked: u128,
    /// The offset emptied the pool
    pub epoch_changed: bool,
    /// P was rescaled
    pub scale_changed: bool,
}

// ============ Pool State ============

/// Stability Pool state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityPool {
    total_deposits: u128,
    deposits: BTreeMap<Address, u128>,
    snapshots: BTreeMap<Address, DepositSnapshots>,
    p: u128,
    current_scale: u128,
    current_epoch: u128,
    epoch_to_scale_to_sum: BTreeMap<(u128, u128), BTreeMap<AssetId, U256>>,
    epoch_to_scale_to_g: BTreeMap<(u128, u128), U256>,
    last_asset_error_offset: BTreeMap<AssetId, u128>,
    last_debt_loss_error_offset: u128,
    last_issuance_error: u128,
    asset_balances: BTreeMap<AssetId, u128>,
    rewards_paid: BTreeMap<Address, u128>,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    /// Empty pool at epoch 0, scale 0, `P = 1e18`
    pub fn new() -> Self {
        Self {
            total_deposits: 0,
            deposits: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            p: DECIMAL_PRECISION,
            current_scale: 0,
            current_epoch: 0,
            epoch_to_scale_to_sum: BTreeMap::new(),
            epoch_to_scale_to_g: BTreeMap::new(),
            last_asset_error_offset: BTreeMap::new(),
            last_debt_loss_error_offset: 0,
            last_issuance_error: 0,
            asset_balances: BTreeMap::new(),
            rewards_paid: BTreeMap::new(),
        }
    }

    // ============ Depositor Operations ============

    /// Add `amount` debt tokens to the depositor's position.
    ///
    /// Pending collateral gains and issuance rewards are paid out and the
    /// compounded deposit is re-snapshotted. The caller moves the tokens.
    pub fn provide(
        &mut self,
        depositor: &Address,
        amount: u128,
        assets: &[AssetId],
        events: &mut EventLog,
    ) -> TrenResult<DepositChange> {
        if amount == 0 {
            return Err(TrenError::AmountMustBeNonZero);
        }

        let initial_deposit = self.deposit_of(depositor);
        let gains = self.depositor_gains(depositor, assets)?;
        let reward_gain = self.depositor_reward_gain(depositor)?;
        let compounded = self.compounded_deposit(depositor)?;
        let loss = safe_sub(initial_deposit, compounded)?;

        self.total_deposits = safe_add(self.total_deposits, amount)?;
        events.emit(TrenEvent::StabilityPoolDebtTokenBalanceUpdated {
            total_deposits: self.total_deposits,
        });

        let new_deposit = safe_add(compounded, amount)?;
        self.update_deposit_and_snapshots(depositor, new_deposit, events);
        events.emit(TrenEvent::UserDepositChanged {
            depositor: *depositor,
            new_deposit,
        });

        self.pay_out(depositor, &gains, reward_gain, loss, events)?;
        log::debug!("deposit provided: {} (compounded {}, new {})", amount, compounded, new_deposit);

        Ok(DepositChange {
            gains,
            debt_token_loss: loss,
            reward_gain,
            debt_tokens_withdrawn: 0,
            new_deposit,
        })
    }

    /// Withdraw up to `amount` of the compounded deposit.
    ///
    /// `withdraw(0)` only claims gains. The withdrawal is capped at the
    /// compounded value. The caller checks for undercollateralized
    /// positions before a non-zero withdrawal and moves the tokens.
    pub fn withdraw(
        &mut self,
        depositor: &Address,
        amount: u128,
        assets: &[AssetId],
        events: &mut EventLog,
    ) -> TrenResult<DepositChange> {
        let initial_deposit = self.deposit_of(depositor);
        if initial_deposit == 0 {
            return Err(TrenError::UserHasNoDeposit { depositor: *depositor });
        }

        let gains = self.depositor_gains(depositor, assets)?;
        let reward_gain = self.depositor_reward_gain(depositor)?;
        let compounded = self.compounded_deposit(depositor)?;
        let to_withdraw = amount.min(compounded);
        let loss = safe_sub(initial_deposit, compounded)?;

        self.total_deposits = safe_sub(self.total_deposits, to_withdraw)?;
        events.emit(TrenEvent::StabilityPoolDebtTokenBalanceUpdated {
            total_deposits: self.total_deposits,
        });

        let new_deposit = compounded - to_withdraw;
        self.update_deposit_and_snapshots(depositor, new_deposit, events);
        events.emit(TrenEvent::UserDepositChanged {
            depositor: *depositor,
            new_deposit,
        });

        self.pay_out(depositor, &gains, reward_gain, loss, events)?;
        log::debug!("deposit withdrawn: {} of {} requested", to_withdraw, amount);

        Ok(DepositChange {
            gains,
            debt_token_loss: loss,
            reward_gain,
            debt_tokens_withdrawn: to_withdraw,
            new_deposit,
        })
    }

    // ============ Module Operations ============

    /// Cancel `debt_to_offset` against deposits and credit `coll_to_add` of
    /// `asset` to depositors. Only the TrenBoxManager may call this.
    ///
    /// A no-op when the pool or the debt is empty. The collateral itself
    /// arrives separately through [`Self::received_collateral`].
    pub fn offset(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        asset: &AssetId,
        debt_to_offset: u128,
        coll_to_add: u128,
        events: &mut EventLog,
    ) -> TrenResult<OffsetOutcome> {
        registry.require_role(caller, ModuleRole::TrenBoxManager)?;

        let total = self.total_deposits;
        if total == 0 || debt_to_offset == 0 {
            return Ok(OffsetOutcome::default());
        }
        if debt_to_offset > total {
            return Err(TrenError::InsufficientBalance {
                available: total,
                requested: debt_to_offset,
            });
        }

        let (coll_gain_per_unit, debt_loss_per_unit) =
            self.compute_rewards_per_unit_staked(asset, coll_to_add, debt_to_offset, total)?;
        let (epoch_changed, scale_changed) =
            self.update_reward_sum_and_product(asset, coll_gain_per_unit, debt_loss_per_unit, events)?;

        self.total_deposits = total - debt_to_offset;
        events.emit(TrenEvent::StabilityPoolDebtTokenBalanceUpdated {
            total_deposits: self.total_deposits,
        });

        log::info!(
            "stability pool offset {} debt, {} remaining (epoch {}, scale {})",
            debt_to_offset,
            self.total_deposits,
            self.current_epoch,
            self.current_scale
        );

        Ok(OffsetOutcome {
            debt_offset: debt_to_offset,
            debt_loss_per_unit_staked: debt_loss_per_unit,
            epoch_changed,
            scale_changed,
        })
    }

    /// Record collateral sent in by the ActivePool
    pub fn received_collateral(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        asset: &AssetId,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        registry.require_role(caller, ModuleRole::ActivePool)?;
        let balance = self.asset_balances.entry(*asset).or_insert(0);
        *balance = safe_add(*balance, amount)?;
        events.emit(TrenEvent::StabilityPoolAssetBalanceUpdated {
            asset: *asset,
            balance: *balance,
        });
        Ok(())
    }

    /// Spread `amount` of issuance rewards over current deposits
    pub fn distribute_issuance(
        &mut self,
        registry: &ModuleRegistry,
        caller: &Address,
        amount: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        registry.require_role(caller, ModuleRole::CommunityIssuance)?;
        let total = self.total_deposits;
        if total == 0 || amount == 0 {
            return Ok(());
        }

        let numerator = U256::from(amount) * U256::from(DECIMAL_PRECISION)
            + U256::from(self.last_issuance_error);
        let per_unit = numerator / U256::from(total);
        self.last_issuance_error = to_u128(numerator - per_unit * U256::from(total))?;

        let marginal = per_unit * U256::from(self.p);
        let key = (self.current_epoch, self.current_scale);
        let g = self.epoch_to_scale_to_g.entry(key).or_insert_with(U256::zero);
        *g = g.checked_add(marginal).ok_or(TrenError::Overflow)?;
        events.emit(TrenEvent::GUpdated {
            g: *g,
            epoch: key.0,
            scale: key.1,
        });
        Ok(())
    }

    // ============ Views ============

    /// Deposit value recorded at the last touch
    pub fn deposit_of(&self, depositor: &Address) -> u128 {
        self.deposits.get(depositor).copied().unwrap_or(0)
    }

    /// Snapshots of a depositor, if they have a deposit
    pub fn snapshots_of(&self, depositor: &Address) -> Option<&DepositSnapshots> {
        self.snapshots.get(depositor)
    }

    /// Current deposit value after offsets
    pub fn compounded_deposit(&self, depositor: &Address) -> TrenResult<u128> {
        let initial = self.deposit_of(depositor);
        if initial == 0 {
            return Ok(0);
        }
        let snapshots = match self.snapshots.get(depositor) {
            Some(s) => s,
            None => return Ok(0),
        };
        self.compounded_stake_from_snapshots(initial, snapshots)
    }

    fn compounded_stake_from_snapshots(&self, initial: u128, snapshots: &DepositSnapshots) -> TrenResult<u128> {
        if snapshots.epoch < self.current_epoch {
            return Ok(0);
        }
        let scale_diff = self.current_scale - snapshots.scale;
        let compounded = match scale_diff {
            0 => mul_div(initial, self.p, snapshots.p)?,
            1 => mul_div(initial, self.p, snapshots.p)? / SCALE_FACTOR,
            _ => 0,
        };
        if compounded < initial / DEPOSIT_DUST_DIVISOR {
            return Ok(0);
        }
        Ok(compounded)
    }

    /// Collateral gains owed to a depositor, one entry per distinct asset
    pub fn depositor_gains(&self, depositor: &Address, assets: &[AssetId]) -> TrenResult<Vec<(AssetId, u128)>> {
        let unique: BTreeSet<AssetId> = assets.iter().copied().collect();
        let initial = self.deposit_of(depositor);
        let snapshots = self.snapshots.get(depositor);

        unique
            .into_iter()
            .map(|asset| {
                let gain = match snapshots {
                    Some(snap) if initial > 0 => self.gain_from_snapshots(initial, snap, &asset)?,
                    _ => 0,
                };
                Ok((asset, gain))
            })
            .collect()
    }

    fn gain_from_snapshots(&self, initial: u128, snap: &DepositSnapshots, asset: &AssetId) -> TrenResult<u128> {
        let s_snapshot = snap.s.get(asset).copied().unwrap_or_default();
        let first_portion = self
            .sum_at(snap.epoch, snap.scale, asset)
            .checked_sub(s_snapshot)
            .ok_or(TrenError::Underflow)?;
        let second_portion = self.sum_at(snap.epoch, snap.scale + 1, asset) / U256::from(SCALE_FACTOR);

        let gain = U256::from(initial) * (first_portion + second_portion)
            / U256::from(snap.p)
            / U256::from(DECIMAL_PRECISION);
        to_u128(gain)
    }

    /// Issuance rewards owed to a depositor
    pub fn depositor_reward_gain(&self, depositor: &Address) -> TrenResult<u128> {
        let initial = self.deposit_of(depositor);
        let snap = match self.snapshots.get(depositor) {
            Some(s) if initial > 0 => s,
            _ => return Ok(0),
        };
        let first_portion = self
            .g_at(snap.epoch, snap.scale)
            .checked_sub(snap.g)
            .ok_or(TrenError::Underflow)?;
        let second_portion = self.g_at(snap.epoch, snap.scale + 1) / U256::from(SCALE_FACTOR);

        let gain = U256::from(initial) * (first_portion + second_portion)
            / U256::from(snap.p)
            / U256::from(DECIMAL_PRECISION);
        to_u128(gain)
    }

    /// Total debt tokens currently deposited
    pub fn total_deposits(&self) -> u128 {
        self.total_deposits
    }

    /// Collateral of `asset` held for depositors
    pub fn asset_balance(&self, asset: &AssetId) -> u128 {
        self.asset_balances.get(asset).copied().unwrap_or(0)
    }

    /// Issuance rewards paid to a depositor so far
    pub fn rewards_paid(&self, depositor: &Address) -> u128 {
        self.rewards_paid.get(depositor).copied().unwrap_or(0)
    }

    /// Running product
    pub fn p(&self) -> u128 {
        self.p
    }

    pub fn current_epoch(&self) -> u128 {
        self.current_epoch
    }

    pub fn current_scale(&self) -> u128 {
        self.current_scale
    }

    /// `S` for an asset at (epoch, scale)
    pub fn sum_at(&self, epoch: u128, scale: u128, asset: &AssetId) -> U256 {
        self.epoch_to_scale_to_sum
            .get(&(epoch, scale))
            .and_then(|sums| sums.get(asset))
            .copied()
            .unwrap_or_default()
    }

    /// `G` at (epoch, scale)
    pub fn g_at(&self, epoch: u128, scale: u128) -> U256 {
        self.epoch_to_scale_to_g
            .get(&(epoch, scale))
            .copied()
            .unwrap_or_default()
    }

    /// Depositors with a non-zero recorded deposit
    pub fn depositors(&self) -> impl Iterator<Item = &Address> {
        self.deposits.keys()
    }

    // ============ Internals ============

    fn compute_rewards_per_unit_staked(
        &mut self,
        asset: &AssetId,
        coll_to_add: u128,
        debt_to_offset: u128,
        total_deposits: u128,
    ) -> TrenResult<(U256, u128)> {
        let total = U256::from(total_deposits);
        let last_asset_error = self.last_asset_error_offset.get(asset).copied().unwrap_or(0);
        let coll_numerator =
            U256::from(coll_to_add) * U256::from(DECIMAL_PRECISION) + U256::from(last_asset_error);

        let debt_loss_per_unit = if debt_to_offset == total_deposits {
            self.last_debt_loss_error_offset = 0;
            DECIMAL_PRECISION
        } else {
            let loss_numerator = U256::from(debt_to_offset) * U256::from(DECIMAL_PRECISION)
                - U256::from(self.last_debt_loss_error_offset);
            // Rounded up so depositors absorb slightly more loss than exact
            let per_unit = loss_numerator / total + U256::one();
            self.last_debt_loss_error_offset = to_u128(per_unit * total - loss_numerator)?;
            to_u128(per_unit)?
        };

        let coll_gain_per_unit = coll_numerator / total;
        let remainder = coll_numerator - coll_gain_per_unit * total;
        self.last_asset_error_offset.insert(*asset, to_u128(remainder)?);

        Ok((coll_gain_per_unit, debt_loss_per_unit))
    }

    fn update_reward_sum_and_product(
        &mut self,
        asset: &AssetId,
        coll_gain_per_unit: U256,
        debt_loss_per_unit: u128,
        events: &mut EventLog,
    ) -> TrenResult<(bool, bool)> {
        let current_p = self.p;
        let new_product_factor = safe_sub(DECIMAL_PRECISION, debt_loss_per_unit)?;

        // S first: gains depend on deposits before this offset
        let key = (self.current_epoch, self.current_scale);
        let marginal_gain = coll_gain_per_unit
            .checked_mul(U256::from(current_p))
            .ok_or(TrenError::Overflow)?;
        let sum = self
            .epoch_to_scale_to_sum
            .entry(key)
            .or_default()
            .entry(*asset)
            .or_insert_with(U256::zero);
        *sum = sum.checked_add(marginal_gain).ok_or(TrenError::Overflow)?;
        events.emit(TrenEvent::SUpdated {
            asset: *asset,
            sum: *sum,
            epoch: key.0,
            scale: key.1,
        });

        let mut epoch_changed = false;
        let mut scale_changed = false;
        let new_p = if new_product_factor == 0 {
            self.current_epoch += 1;
            events.emit(TrenEvent::EpochUpdated { epoch: self.current_epoch });
            self.current_scale = 0;
            events.emit(TrenEvent::ScaleUpdated { scale: 0 });
            epoch_changed = true;
            DECIMAL_PRECISION
        } else {
            let product = current_p
                .checked_mul(new_product_factor)
                .ok_or(TrenError::Overflow)?;
            if product / DECIMAL_PRECISION < SCALE_FACTOR {
                self.current_scale += 1;
                events.emit(TrenEvent::ScaleUpdated { scale: self.current_scale });
                scale_changed = true;
                mul_div(product, SCALE_FACTOR, DECIMAL_PRECISION)?
            } else {
                product / DECIMAL_PRECISION
            }
        };

        if new_p == 0 {
            return Err(TrenError::Underflow);
        }
        self.p = new_p;
        events.emit(TrenEvent::PUpdated { p: new_p });
        Ok((epoch_changed, scale_changed))
    }

    fn update_deposit_and_snapshots(&mut self, depositor: &Address, new_value: u128, events: &mut EventLog) {
        if new_value == 0 {
            self.deposits.remove(depositor);
            self.snapshots.remove(depositor);
            events.emit(TrenEvent::DepositSnapshotUpdated {
                depositor: *depositor,
                p: 0,
                g: U256::zero(),
                scale: 0,
                epoch: 0,
            });
            return;
        }

        let key = (self.current_epoch, self.current_scale);
        let snapshots = DepositSnapshots {
            s: self.epoch_to_scale_to_sum.get(&key).cloned().unwrap_or_default(),
            p: self.p,
            g: self.g_at(key.0, key.1),
            scale: key.1,
            epoch: key.0,
        };
        events.emit(TrenEvent::DepositSnapshotUpdated {
            depositor: *depositor,
            p: snapshots.p,
            g: snapshots.g,
            scale: snapshots.scale,
            epoch: snapshots.epoch,
        });
        self.deposits.insert(*depositor, new_value);
        self.snapshots.insert(*depositor, snapshots);
    }

    fn pay_out(
        &mut self,
        depositor: &Address,
        gains: &[(AssetId, u128)],
        reward_gain: u128,
        loss: u128,
        events: &mut EventLog,
    ) -> TrenResult<()> {
        for (asset, amount) in gains.iter().filter(|(_, a)| *a > 0) {
            let balance = self.asset_balances.entry(*asset).or_insert(0);
            if *balance < *amount {
                return Err(TrenError::InsufficientCollateral {
                    available: *balance,
                    requested: *amount,
                });
            }
            *balance -= amount;
            events.emit(TrenEvent::StabilityPoolAssetBalanceUpdated {
                asset: *asset,
                balance: *balance,
            });
        }
        events.emit(TrenEvent::GainsWithdrawn {
            depositor: *depositor,
            assets: gains.iter().map(|(a, _)| *a).collect(),
            amounts: gains.iter().map(|(_, g)| *g).collect(),
            debt_token_loss: loss,
        });

        if reward_gain > 0 {
            let paid = self.rewards_paid.entry(*depositor).or_insert(0);
            *paid = safe_add(*paid, reward_gain)?;
            events.emit(TrenEvent::IssuanceRewardPaid {
                depositor: *depositor,
                amount: reward_gain,
            });
        }
        Ok(())
    }
}

// ============ Tests ============
