//! Protocol Constants
//!
//! Fixed-point precisions and default risk parameters for the Tren engine.
//! Per-asset values can be overridden through [`crate::config::AssetParams`];
//! the values here are what a freshly whitelisted asset starts with.
//!
//! # Network Configuration
//!
//! Use feature flags to compile for different networks:
//! - `mainnet` - Production values (2,000 minimum net debt)
//! - Default (no feature) - Test values (1,800 minimum net debt, so a
//!   2,000 composite debt is the smallest openable position)
//!
//! ```toml
//! tren-common = { path = "...", features = ["mainnet"] }
//! ```

/// Debt token metadata
pub mod token {
    /// Token name
    pub const NAME: &str = "Tren Debt Token";
    /// Token symbol
    pub const SYMBOL: &str = "trenUSD";
    /// Decimal places
    pub const DECIMALS: u8 = 18;
    /// One whole token in base units
    pub const ONE: u128 = 1_000_000_000_000_000_000;
}

/// Precision constants
pub mod precision {
    /// Fixed-point precision for amounts, prices and ratios (1e18)
    pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

    /// Precision of the nominal collateral ratio used for sorting (1e20)
    pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

    /// 100% expressed in [`DECIMAL_PRECISION`]
    pub const ONE_HUNDRED_PCT: u128 = DECIMAL_PRECISION;

    /// Denominator for basis-point style parameters
    pub const PERCENTAGE_PRECISION: u128 = 10_000;
}

/// Collateralization Ratios (18-decimal, e.g. 1.1e18 = 110%)
pub mod ratios {
    /// Minimum Collateral Ratio - below this a position can be liquidated
    pub const MCR: u128 = 1_100_000_000_000_000_000;

    /// Critical Collateral Ratio - the asset enters Recovery Mode below this TCR
    pub const CCR: u128 = 1_500_000_000_000_000_000;
}

/// Fee configuration (18-decimal fractions)
pub mod fees {
    /// Borrowing fee floor (0.5%)
    pub const BORROWING_FEE_FLOOR: u128 = 5_000_000_000_000_000;

    /// Maximum borrowing fee (5%)
    pub const MAX_BORROWING_FEE: u128 = 50_000_000_000_000_000;

    /// Redemption fee floor (0.5%)
    pub const REDEMPTION_FEE_FLOOR: u128 = 5_000_000_000_000_000;

    /// Half-life of 12h: 0.5 = d^720 => d = 0.5^(1/720)
    pub const MINUTE_DECAY_FACTOR: u128 = 999_037_758_833_783_000;

    /// Divisor applied to the redeemed fraction when raising the base rate
    pub const BETA: u128 = 2;

    /// Seconds per minute, used for base rate decay
    pub const SECONDS_IN_ONE_MINUTE: u64 = 60;

    /// Cap on the decay exponent (1000 years in minutes)
    pub const MAX_DECAY_MINUTES: u64 = 525_600_000;
}

/// Debt limits
///
/// Values differ between mainnet and test builds so scenarios can use
/// small positions.
pub mod limits {
    use super::token::ONE;

    /// Minimum net debt of an Active position
    #[cfg(feature = "mainnet")]
    pub const MIN_NET_DEBT: u128 = 2_000 * ONE;
    #[cfg(not(feature = "mainnet"))]
    pub const MIN_NET_DEBT: u128 = 1_800 * ONE;

    /// Debt tokens reserved per position to compensate liquidators
    pub const DEBT_TOKEN_GAS_COMPENSATION: u128 = 200 * ONE;

    /// Default mint cap per asset
    pub const MINT_CAP: u128 = 1_000_000_000 * ONE;

    /// Helper to check if running in mainnet mode
    #[cfg(feature = "mainnet")]
    pub const IS_MAINNET: bool = true;
    #[cfg(not(feature = "mainnet"))]
    pub const IS_MAINNET: bool = false;
}

/// Liquidation configuration
pub mod liquidation {
    /// Collateral gas compensation divisor (1/200 = 0.5%)
    pub const PERCENT_DIVISOR: u128 = 200;

    /// Maximum number of owners in a batch liquidation
    pub const BATCH_SIZE_LIMIT: usize = 25;
}

/// Redemption configuration
pub mod redemption {
    /// Softening applied to the redeemed collateral lot, out of
    /// [`super::precision::PERCENTAGE_PRECISION`]. 10_000 means no softening.
    pub const SOFTENING_PARAM: u128 = 10_000;

    /// Lowest softening value governance may configure (97%)
    pub const MIN_SOFTENING_PARAM: u128 = 9_700;
}

/// Stability Pool configuration
pub mod stability_pool {
    /// Factor applied to P when it would otherwise drop below it (1e9)
    pub const SCALE_FACTOR: u128 = 1_000_000_000;

    /// Compounded deposits below initial / this are treated as zero
    pub const DEPOSIT_DUST_DIVISOR: u128 = 1_000_000_000;
}

/// Sorted index configuration
pub mod sorted {
    /// Default number of nodes walked from a stale hint before falling back
    /// to a scan from the head
    pub const MAX_SEARCH_DEPTH: usize = 64;
}

/// Price feed configuration
pub mod oracle {
    /// Default staleness timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 3_600;

    /// Maximum allowed price deviation per update (50%)
    pub const MAX_PRICE_DEVIATION_BPS: u128 = 5_000;

    /// Target price decimals
    pub const TARGET_DIGITS: u8 = 18;
}
