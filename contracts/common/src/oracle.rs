//! Price feed interface
//!
//! The engine never reads prices directly; it asks a [`PriceFeed`] for an
//! 18-decimal price of one collateral unit in debt tokens. A failed fetch
//! aborts the operation that needed it.

use crate::errors::TrenResult;
use crate::types::AssetId;

/// Source of collateral prices
pub trait PriceFeed {
    /// Current price of `asset` at time `now`, 18 decimals.
    ///
    /// Implementations return `PriceFeedUnavailable` or `StalePrice` rather
    /// than a zero price.
    fn fetch_price(&self, asset: &AssetId, now: u64) -> TrenResult<u128>;
}

impl<T: PriceFeed + ?Sized> PriceFeed for &T {
    fn fetch_price(&self, asset: &AssetId, now: u64) -> TrenResult<u128> {
        (**self).fetch_price(asset, now)
    }
}

impl<T: PriceFeed + ?Sized> PriceFeed for Box<T> {
    fn fetch_price(&self, asset: &AssetId, now: u64) -> TrenResult<u128> {
        (**self).fetch_price(asset, now)
    }
}

/// Fixed price for every asset, for tests and simulations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPriceFeed(pub u128);

impl PriceFeed for FixedPriceFeed {
    fn fetch_price(&self, asset: &AssetId, _now: u64) -> TrenResult<u128> {
        if self.0 == 0 {
            return Err(crate::errors::TrenError::PriceFeedUnavailable { asset: *asset });
        }
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TrenError;

    #[test]
    fn test_fixed_feed() {
        let feed = FixedPriceFeed(20);
        assert_eq!(feed.fetch_price(&[1u8; 32], 0).unwrap(), 20);
        let boxed: Box<dyn PriceFeed> = Box::new(FixedPriceFeed(0));
        assert_eq!(
            boxed.fetch_price(&[1u8; 32], 0),
            Err(TrenError::PriceFeedUnavailable { asset: [1u8; 32] })
        );
    }
}
