//! Fee engine
//!
//! Borrowing and redemption fees share one base rate per asset. Redemptions
//! raise it in proportion to the share of supply redeemed; it decays back
//! towards zero with a 12 hour half-life, minute by minute.

use serde::{Deserialize, Serialize};

use tren_common::{
    config::AssetParams,
    constants::fees::{BETA, MAX_BORROWING_FEE, MINUTE_DECAY_FACTOR, SECONDS_IN_ONE_MINUTE},
    constants::precision::DECIMAL_PRECISION,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    math::{dec_pow, mul_div, safe_add},
    types::AssetId,
};

/// Base rate state of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    pub base_rate: u128,
    pub last_fee_operation_time: u64,
}

impl FeeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole minutes since the last fee operation
    pub fn minutes_passed_since_last_fee_op(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_IN_ONE_MINUTE
    }

    /// Base rate after decay up to `now`
    pub fn decayed_base_rate(&self, now: u64) -> TrenResult<u128> {
        let minutes = self.minutes_passed_since_last_fee_op(now);
        let decay_factor = dec_pow(MINUTE_DECAY_FACTOR, minutes)?;
        mul_div(self.base_rate, decay_factor, DECIMAL_PRECISION)
    }

    // ============ Rates ============

    /// `min(floor + base_rate, 100%)`
    pub fn calc_redemption_rate(params: &AssetParams, base_rate: u128) -> u128 {
        params
            .redemption_fee_floor
            .saturating_add(base_rate)
            .min(DECIMAL_PRECISION)
    }

    /// `min(floor + base_rate, 5%)`
    pub fn calc_borrowing_rate(params: &AssetParams, base_rate: u128) -> u128 {
        params
            .borrowing_fee_floor
            .saturating_add(base_rate)
            .min(MAX_BORROWING_FEE)
    }

    pub fn redemption_rate(&self, params: &AssetParams) -> u128 {
        Self::calc_redemption_rate(params, self.base_rate)
    }

    pub fn redemption_rate_with_decay(&self, params: &AssetParams, now: u64) -> TrenResult<u128> {
        Ok(Self::calc_redemption_rate(params, self.decayed_base_rate(now)?))
    }

    pub fn borrowing_rate(&self, params: &AssetParams) -> u128 {
        Self::calc_borrowing_rate(params, self.base_rate)
    }

    pub fn borrowing_rate_with_decay(&self, params: &AssetParams, now: u64) -> TrenResult<u128> {
        Ok(Self::calc_borrowing_rate(params, self.decayed_base_rate(now)?))
    }

    /// Redemption fee on `coll_drawn`, which must leave something to send
    pub fn redemption_fee(&self, params: &AssetParams, coll_drawn: u128) -> TrenResult<u128> {
        let fee = mul_div(self.redemption_rate(params), coll_drawn, DECIMAL_PRECISION)?;
        if fee >= coll_drawn {
            return Err(TrenError::FeeBiggerThanAssetDraw { fee, drawn: coll_drawn });
        }
        Ok(fee)
    }

    /// Borrowing fee on `debt` at the current base rate
    pub fn borrowing_fee(&self, params: &AssetParams, debt: u128) -> TrenResult<u128> {
        mul_div(self.borrowing_rate(params), debt, DECIMAL_PRECISION)
    }

    // ============ Updates ============

    /// Raise the base rate after a redemption of `coll_drawn` at `price`
    /// against `total_debt` outstanding.
    pub fn update_base_rate_from_redemption(
        &mut self,
        asset: &AssetId,
        coll_drawn: u128,
        price: u128,
        total_debt: u128,
        now: u64,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        if total_debt == 0 {
            return Err(TrenError::DivisionByZero);
        }
        let decayed = self.decayed_base_rate(now)?;
        let redeemed_fraction = mul_div(coll_drawn, price, total_debt)?;
        let new_base_rate = safe_add(decayed, redeemed_fraction / BETA)?.min(DECIMAL_PRECISION);
        if new_base_rate == 0 {
            return Err(TrenError::InvalidParameter {
                param: "base_rate",
                reason: "redemption left the base rate at zero",
            });
        }

        self.base_rate = new_base_rate;
        events.emit(TrenEvent::BaseRateUpdated {
            asset: *asset,
            base_rate: new_base_rate,
        });
        self.update_last_fee_op_time(asset, now, events);
        Ok(new_base_rate)
    }

    /// Let the base rate decay ahead of a borrowing fee
    pub fn decay_base_rate_from_borrowing(
        &mut self,
        asset: &AssetId,
        now: u64,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        let decayed = self.decayed_base_rate(now)?.min(DECIMAL_PRECISION);
        self.base_rate = decayed;
        events.emit(TrenEvent::BaseRateUpdated {
            asset: *asset,
            base_rate: decayed,
        });
        self.update_last_fee_op_time(asset, now, events);
        Ok(decayed)
    }

    // Advances only once a full minute has passed
    fn update_last_fee_op_time(&mut self, asset: &AssetId, now: u64, events: &mut EventLog) {
        if now.saturating_sub(self.last_fee_operation_time) >= SECONDS_IN_ONE_MINUTE {
            self.last_fee_operation_time = now;
            events.emit(TrenEvent::LastFeeOpTimeUpdated {
                asset: *asset,
                timestamp: now,
            });
        }
    }
}

/// `fee / amount` as an 18-decimal fraction
pub fn fee_percentage(fee: u128, amount: u128) -> TrenResult<u128> {
    mul_div(fee, DECIMAL_PRECISION, amount)
}

/// Check a fee against the user's maximum; `floor` is reported as the lower bound
pub fn require_user_accepts_fee(fee: u128, amount: u128, max_fee_percent: u128, floor: u128) -> TrenResult<()> {
    let percentage = fee_percentage(fee, amount)?;
    if percentage > max_fee_percent {
        return Err(TrenError::FeePercentOutOfBounds {
            fee: percentage,
            lower: floor,
            upper: max_fee_percent,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tren_common::math::abs_diff;

    const ONE: u128 = DECIMAL_PRECISION;

    fn asset() -> AssetId {
        [0xAA; 32]
    }

    #[test]
    fn test_rates_start_at_floor() {
        let fees = FeeState::new();
        let params = AssetParams::default();
        assert_eq!(fees.redemption_rate(&params), params.redemption_fee_floor);
        assert_eq!(fees.borrowing_rate(&params), params.borrowing_fee_floor);
        assert_eq!(fees.borrowing_fee(&params, 1_000 * ONE).unwrap(), 5 * ONE);
    }

    #[test]
    fn test_rate_caps() {
        let params = AssetParams::default();
        assert_eq!(FeeState::calc_redemption_rate(&params, ONE), ONE);
        assert_eq!(FeeState::calc_borrowing_rate(&params, ONE / 10), MAX_BORROWING_FEE);
    }

    #[test]
    fn test_redemption_raises_base_rate() {
        let mut fees = FeeState::new();
        let mut events = EventLog::new();
        // 10 coll at price 200 out of 20_000 debt: 10% redeemed, base rate 5%
        let rate = fees
            .update_base_rate_from_redemption(&asset(), 10 * ONE, 200 * ONE, 20_000 * ONE, 3_600, &mut events)
            .unwrap();
        assert_eq!(rate, ONE / 20);
        assert_eq!(fees.last_fee_operation_time, 3_600);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_base_rate_half_life() {
        let fees = FeeState {
            base_rate: ONE / 10,
            last_fee_operation_time: 0,
        };
        let decayed = fees.decayed_base_rate(720 * 60).unwrap();
        assert!(abs_diff(decayed, ONE / 20) < ONE / 1_000_000, "decayed {}", decayed);
        // Less than a minute: no decay
        assert_eq!(fees.decayed_base_rate(59).unwrap(), ONE / 10);
    }

    #[test]
    fn test_last_fee_op_time_needs_a_minute() {
        let mut fees = FeeState {
            base_rate: ONE / 10,
            last_fee_operation_time: 1_000,
        };
        let mut events = EventLog::new();
        fees.decay_base_rate_from_borrowing(&asset(), 1_030, &mut events).unwrap();
        assert_eq!(fees.last_fee_operation_time, 1_000);
        fees.decay_base_rate_from_borrowing(&asset(), 1_060, &mut events).unwrap();
        assert_eq!(fees.last_fee_operation_time, 1_060);
    }

    #[test]
    fn test_redemption_fee_bounds() {
        let params = AssetParams::default();
        let fees = FeeState {
            base_rate: ONE,
            last_fee_operation_time: 0,
        };
        assert_eq!(
            fees.redemption_fee(&params, 10 * ONE),
            Err(TrenError::FeeBiggerThanAssetDraw { fee: 10 * ONE, drawn: 10 * ONE })
        );

        let fees = FeeState::new();
        assert_eq!(fees.redemption_fee(&params, 10 * ONE).unwrap(), ONE / 20);
    }

    #[test]
    fn test_user_max_fee() {
        require_user_accepts_fee(ONE / 20, 10 * ONE, ONE / 100, 0).unwrap();
        assert!(require_user_accepts_fee(ONE, 10 * ONE, ONE / 100, 0).is_err());
    }
}
