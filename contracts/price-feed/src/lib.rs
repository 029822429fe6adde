//! Price Feed
//!
//! Per-asset prices pushed by a trusted operator. Raw oracle answers are
//! normalised to 18 decimals on write, so readers never see the source
//! precision.
//!
//! ## Freshness
//!
//! Every asset has its own timeout. [`PriceFeed::fetch_price`] refuses a
//! price older than that timeout instead of falling back to it; only
//! [`PriceFeedState::price_for_display`] ever returns a stale value.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tren_common::{
    constants::oracle::{DEFAULT_TIMEOUT_SECS, MAX_PRICE_DEVIATION_BPS, TARGET_DIGITS},
    constants::precision::PERCENTAGE_PRECISION,
    errors::{TrenError, TrenResult},
    events::{EventLog, TrenEvent},
    oracle::PriceFeed,
    types::{Address, AssetId},
};

// ============ Oracle State ============

/// Settings for one asset's oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct OracleSetup {
    /// Decimals of the raw answers the operator submits
    pub decimals: u8,
    /// Seconds after which a price is stale
    pub timeout_secs: u64,
    /// Largest accepted move between two updates, `None` disables the check
    pub max_deviation_bps: Option<u128>,
}

impl Default for OracleSetup {
    fn default() -> Self {
        Self {
            decimals: TARGET_DIGITS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_deviation_bps: Some(MAX_PRICE_DEVIATION_BPS),
        }
    }
}

/// Latest price of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct OracleRecord {
    /// Oracle settings
    pub setup: OracleSetup,
    /// Latest price in 18 decimals, 0 before the first update
    pub price: u128,
    /// Timestamp of the latest update
    pub updated_at: u64,
    /// Whether the oracle may be read
    pub is_active: bool,
}

/// Price feed contract state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PriceFeedState {
    /// Can register oracles and change the operator
    pub admin: Address,
    /// Can push prices
    pub operator: Address,
    records: BTreeMap<AssetId, OracleRecord>,
}

impl PriceFeedState {
    /// Create an empty feed
    pub fn new(admin: Address, operator: Address) -> Self {
        Self {
            admin,
            operator,
            records: BTreeMap::new(),
        }
    }

    /// Register (or reconfigure) the oracle of an asset
    pub fn add_oracle(&mut self, caller: &Address, asset: AssetId, setup: OracleSetup) -> TrenResult<()> {
        if *caller != self.admin {
            return Err(TrenError::AdminOnly { caller: *caller });
        }
        if setup.timeout_secs == 0 {
            return Err(TrenError::InvalidParameter {
                param: "timeout_secs",
                reason: "must be non-zero",
            });
        }
        if setup.decimals > 36 {
            return Err(TrenError::InvalidParameter {
                param: "decimals",
                reason: "must be at most 36",
            });
        }

        let record = self.records.entry(asset).or_insert(OracleRecord {
            setup,
            price: 0,
            updated_at: 0,
            is_active: true,
        });
        record.setup = setup;
        record.is_active = true;
        log::info!("oracle configured: {} decimals, {}s timeout", setup.decimals, setup.timeout_secs);
        Ok(())
    }

    /// Disable reads for an asset
    pub fn deactivate(&mut self, caller: &Address, asset: &AssetId) -> TrenResult<()> {
        if *caller != self.admin {
            return Err(TrenError::AdminOnly { caller: *caller });
        }
        let record = self
            .records
            .get_mut(asset)
            .ok_or(TrenError::PriceFeedUnavailable { asset: *asset })?;
        record.is_active = false;
        Ok(())
    }

    /// Push a raw oracle answer for an asset
    pub fn set_price(
        &mut self,
        caller: &Address,
        asset: &AssetId,
        raw_price: u128,
        timestamp: u64,
        events: &mut EventLog,
    ) -> TrenResult<u128> {
        if *caller != self.operator {
            return Err(TrenError::OracleOperatorOnly { caller: *caller });
        }
        let record = self
            .records
            .get_mut(asset)
            .ok_or(TrenError::PriceFeedUnavailable { asset: *asset })?;
        if !record.is_active {
            return Err(TrenError::PriceFeedUnavailable { asset: *asset });
        }
        if raw_price == 0 {
            return Err(TrenError::InvalidParameter {
                param: "price",
                reason: "must be non-zero",
            });
        }
        if timestamp < record.updated_at {
            return Err(TrenError::InvalidParameter {
                param: "timestamp",
                reason: "older than the current price",
            });
        }

        let new_price = scale_price_by_digits(raw_price, record.setup.decimals)?;
        let old_price = record.price;

        if let Some(max_bps) = record.setup.max_deviation_bps {
            if old_price != 0 && price_deviation_bps(old_price, new_price) > max_bps {
                log::warn!("rejected price update {} -> {}", old_price, new_price);
                return Err(TrenError::PriceDeviation {
                    old_price,
                    new_price,
                    max_deviation_bps: max_bps,
                });
            }
        }

        record.price = new_price;
        record.updated_at = timestamp;

        events.emit(TrenEvent::PriceUpdated {
            asset: *asset,
            old_price,
            new_price,
            timestamp,
        });
        Ok(new_price)
    }

    /// Hand the operator role to another address
    pub fn set_operator(&mut self, caller: &Address, new_operator: Address) -> TrenResult<()> {
        if *caller != self.admin {
            return Err(TrenError::AdminOnly { caller: *caller });
        }
        if new_operator == self.operator {
            return Err(TrenError::InvalidParameter {
                param: "operator",
                reason: "same as current",
            });
        }
        self.operator = new_operator;
        Ok(())
    }

    /// Latest record of an asset
    pub fn record(&self, asset: &AssetId) -> Option<&OracleRecord> {
        self.records.get(asset)
    }

    /// Price with a staleness flag, for read-only display
    pub fn price_for_display(&self, asset: &AssetId, now: u64) -> Option<(u128, bool)> {
        self.records
            .get(asset)
            .map(|r| (r.price, is_stale(r, now)))
    }
}

impl PriceFeed for PriceFeedState {
    fn fetch_price(&self, asset: &AssetId, now: u64) -> TrenResult<u128> {
        let record = self
            .records
            .get(asset)
            .ok_or(TrenError::PriceFeedUnavailable { asset: *asset })?;
        if !record.is_active || record.price == 0 {
            return Err(TrenError::PriceFeedUnavailable { asset: *asset });
        }
        if is_stale(record, now) {
            return Err(TrenError::StalePrice {
                asset: *asset,
                updated_at: record.updated_at,
                now,
            });
        }
        Ok(record.price)
    }
}

// ============ Helper Functions ============

fn is_stale(record: &OracleRecord, now: u64) -> bool {
    now.saturating_sub(record.updated_at) > record.setup.timeout_secs
}

/// Normalise a raw answer with `decimals` digits to 18 decimals
pub fn scale_price_by_digits(price: u128, decimals: u8) -> TrenResult<u128> {
    if decimals == TARGET_DIGITS {
        return Ok(price);
    }
    if decimals > TARGET_DIGITS {
        let divisor = 10u128.pow((decimals - TARGET_DIGITS) as u32);
        Ok(price / divisor)
    } else {
        let multiplier = 10u128.pow((TARGET_DIGITS - decimals) as u32);
        price.checked_mul(multiplier).ok_or(TrenError::Overflow)
    }
}

/// Deviation between two prices in basis points
fn price_deviation_bps(old_price: u128, new_price: u128) -> u128 {
    if old_price == 0 {
        return PERCENTAGE_PRECISION;
    }
    let diff = tren_common::math::abs_diff(old_price, new_price);
    tren_common::math::mul_div(diff, PERCENTAGE_PRECISION, old_price).unwrap_or(u128::MAX)
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn admin() -> Address {
        [1u8; 32]
    }

    fn operator() -> Address {
        [2u8; 32]
    }

    fn asset() -> AssetId {
        [9u8; 32]
    }

    fn create_feed(setup: OracleSetup) -> PriceFeedState {
        let mut feed = PriceFeedState::new(admin(), operator());
        feed.add_oracle(&admin(), asset(), setup).unwrap();
        feed
    }

    #[test]
    fn test_update_price_success() {
        let mut feed = create_feed(OracleSetup::default());
        let mut events = EventLog::new();
        feed.set_price(&operator(), &asset(), 2_000 * ONE, 100, &mut events).unwrap();
        assert_eq!(feed.fetch_price(&asset(), 100).unwrap(), 2_000 * ONE);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_decimals_scaled() {
        let mut feed = create_feed(OracleSetup { decimals: 8, ..OracleSetup::default() });
        let mut events = EventLog::new();
        let price = feed.set_price(&operator(), &asset(), 2_000_00000000, 1, &mut events).unwrap();
        assert_eq!(price, 2_000 * ONE);
        assert_eq!(scale_price_by_digits(5 * 10u128.pow(20), 20).unwrap(), 5 * ONE);
    }

    #[test]
    fn test_update_price_too_large_deviation() {
        let mut feed = create_feed(OracleSetup::default());
        let mut events = EventLog::new();
        feed.set_price(&operator(), &asset(), 20 * ONE, 1, &mut events).unwrap();
        let err = feed.set_price(&operator(), &asset(), 2 * ONE, 2, &mut events).unwrap_err();
        assert!(matches!(err, TrenError::PriceDeviation { .. }));

        let mut unchecked = create_feed(OracleSetup { max_deviation_bps: None, ..OracleSetup::default() });
        unchecked.set_price(&operator(), &asset(), 20 * ONE, 1, &mut events).unwrap();
        unchecked.set_price(&operator(), &asset(), 2 * ONE, 2, &mut events).unwrap();
    }

    #[test]
    fn test_update_price_unauthorized() {
        let mut feed = create_feed(OracleSetup::default());
        let mut events = EventLog::new();
        assert_eq!(
            feed.set_price(&admin(), &asset(), ONE, 1, &mut events),
            Err(TrenError::OracleOperatorOnly { caller: admin() })
        );
        assert_eq!(
            feed.add_oracle(&operator(), [3u8; 32], OracleSetup::default()),
            Err(TrenError::AdminOnly { caller: operator() })
        );
    }

    #[test]
    fn test_price_staleness() {
        let mut feed = create_feed(OracleSetup { timeout_secs: 60, ..OracleSetup::default() });
        let mut events = EventLog::new();
        feed.set_price(&operator(), &asset(), ONE, 1_000, &mut events).unwrap();
        assert!(feed.fetch_price(&asset(), 1_060).is_ok());
        assert_eq!(
            feed.fetch_price(&asset(), 1_061),
            Err(TrenError::StalePrice { asset: asset(), updated_at: 1_000, now: 1_061 })
        );
        assert_eq!(feed.price_for_display(&asset(), 1_061), Some((ONE, true)));
    }

    #[test]
    fn test_unavailable() {
        let mut feed = create_feed(OracleSetup::default());
        // Registered but never priced
        assert_eq!(
            feed.fetch_price(&asset(), 0),
            Err(TrenError::PriceFeedUnavailable { asset: asset() })
        );
        assert_eq!(
            feed.fetch_price(&[4u8; 32], 0),
            Err(TrenError::PriceFeedUnavailable { asset: [4u8; 32] })
        );

        let mut events = EventLog::new();
        feed.set_price(&operator(), &asset(), ONE, 1, &mut events).unwrap();
        feed.deactivate(&admin(), &asset()).unwrap();
        assert!(feed.fetch_price(&asset(), 1).is_err());
    }

    #[test]
    fn test_set_operator() {
        let mut feed = create_feed(OracleSetup::default());
        feed.set_operator(&admin(), [5u8; 32]).unwrap();
        assert_eq!(feed.operator, [5u8; 32]);
        assert!(feed.set_operator(&admin(), [5u8; 32]).is_err());
    }

    #[test]
    fn test_price_deviation_calculation() {
        assert_eq!(price_deviation_bps(100, 105), 500);
        assert_eq!(price_deviation_bps(100, 90), 1_000);
        assert_eq!(price_deviation_bps(0, 90), 10_000);
    }
}
