//! Protocol configuration
//!
//! Risk parameters live per collateral asset. On disk they are written in
//! human units (basis points and whole tokens) because TOML integers are
//! 64-bit; [`AssetConfig::to_params`] converts them into the 18-decimal
//! [`AssetParams`] the engine works with.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{fees, limits, liquidation, oracle, precision, ratios, redemption, sorted, token};
use crate::errors::{TrenError, TrenResult};
use crate::types::{asset_id, AssetId};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TREN_CONFIG";

/// Configuration file used when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "tren-config.toml";

const BPS_TO_DECIMAL: u128 = precision::DECIMAL_PRECISION / precision::PERCENTAGE_PRECISION;

// ============ Engine Parameters ============

/// Per-asset risk parameters in 18-decimal fixed point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    /// Minimum collateral ratio
    pub mcr: u128,
    /// Critical collateral ratio (Recovery Mode threshold)
    pub ccr: u128,
    /// Minimum net debt of an Active position
    pub min_net_debt: u128,
    /// Debt reserved per position for liquidator compensation
    pub debt_token_gas_compensation: u128,
    /// Collateral gas compensation divisor
    pub percent_divisor: u128,
    /// Lower bound of the borrowing rate
    pub borrowing_fee_floor: u128,
    /// Lower bound of the redemption rate
    pub redemption_fee_floor: u128,
    /// Maximum debt that may be outstanding against the asset
    pub mint_cap: u128,
    /// Redemptions rejected before this Unix timestamp
    pub redemption_block_timestamp: u64,
    /// Redeemed collateral multiplier out of 10_000
    pub redemption_softening_param: u128,
    /// Optional absolute cap on the collateral gas compensation
    pub coll_gas_compensation_cap: Option<u128>,
    /// Ratio applied to debt when capping Recovery Mode liquidations
    pub recovery_coll_cap_ratio: u128,
    /// Oracle staleness timeout in seconds
    pub price_timeout_secs: u64,
    /// Whether new positions may be opened
    pub is_active: bool,
}

impl Default for AssetParams {
    fn default() -> Self {
        Self {
            mcr: ratios::MCR,
            ccr: ratios::CCR,
            min_net_debt: limits::MIN_NET_DEBT,
            debt_token_gas_compensation: limits::DEBT_TOKEN_GAS_COMPENSATION,
            percent_divisor: liquidation::PERCENT_DIVISOR,
            borrowing_fee_floor: fees::BORROWING_FEE_FLOOR,
            redemption_fee_floor: fees::REDEMPTION_FEE_FLOOR,
            mint_cap: limits::MINT_CAP,
            redemption_block_timestamp: 0,
            redemption_softening_param: redemption::SOFTENING_PARAM,
            coll_gas_compensation_cap: None,
            recovery_coll_cap_ratio: ratios::MCR,
            price_timeout_secs: oracle::DEFAULT_TIMEOUT_SECS,
            is_active: true,
        }
    }
}

impl AssetParams {
    /// Range checks mirroring the admin setters
    pub fn validate(&self) -> TrenResult<()> {
        let one = precision::DECIMAL_PRECISION;
        if self.mcr <= one || self.mcr > 10 * one {
            return Err(invalid("mcr", "must be in (100%, 1000%]"));
        }
        if self.ccr < self.mcr || self.ccr > 10 * one {
            return Err(invalid("ccr", "must be in [mcr, 1000%]"));
        }
        if self.min_net_debt == 0 {
            return Err(invalid("min_net_debt", "must be non-zero"));
        }
        if !(2..=200).contains(&self.percent_divisor) {
            return Err(invalid("percent_divisor", "must be in [2, 200]"));
        }
        if self.borrowing_fee_floor > fees::MAX_BORROWING_FEE {
            return Err(invalid("borrowing_fee_floor", "must not exceed the max borrowing fee"));
        }
        if self.redemption_fee_floor == 0 || self.redemption_fee_floor > one / 10 {
            return Err(invalid("redemption_fee_floor", "must be in (0%, 10%]"));
        }
        if self.redemption_softening_param < redemption::MIN_SOFTENING_PARAM
            || self.redemption_softening_param > precision::PERCENTAGE_PRECISION
        {
            return Err(invalid("redemption_softening_param", "must be in [9700, 10000]"));
        }
        if self.recovery_coll_cap_ratio < one {
            return Err(invalid("recovery_coll_cap_ratio", "must be at least 100%"));
        }
        if self.price_timeout_secs == 0 {
            return Err(invalid("price_timeout_secs", "must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(param: &'static str, reason: &'static str) -> TrenError {
    TrenError::InvalidParameter { param, reason }
}

// ============ File Format ============

/// Per-asset section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Minimum collateral ratio in basis points (11_000 = 110%)
    pub mcr_bps: u64,
    /// Critical collateral ratio in basis points
    pub ccr_bps: u64,
    /// Minimum net debt in whole tokens
    pub min_net_debt: u64,
    /// Gas compensation in whole tokens
    pub gas_compensation: u64,
    /// Collateral gas compensation divisor
    pub percent_divisor: u64,
    /// Borrowing fee floor in basis points
    pub borrowing_fee_bps: u64,
    /// Redemption fee floor in basis points
    pub redemption_fee_floor_bps: u64,
    /// Mint cap in whole tokens
    pub mint_cap: u64,
    /// Redemptions blocked before this Unix timestamp
    pub redemption_block_timestamp: u64,
    /// Redemption softening out of 10_000
    pub redemption_softening: u64,
    /// Collateral gas compensation cap in whole collateral units
    pub coll_gas_compensation_cap: Option<u64>,
    /// Recovery Mode cap ratio in basis points, defaults to the MCR
    pub recovery_coll_cap_bps: Option<u64>,
    /// Oracle staleness timeout in seconds
    pub price_timeout_secs: u64,
    /// Whether the asset accepts new positions
    pub active: bool,
}

impl Default for AssetConfig {
    fn default() -> Self {
        let params = AssetParams::default();
        Self {
            mcr_bps: (params.mcr / BPS_TO_DECIMAL) as u64,
            ccr_bps: (params.ccr / BPS_TO_DECIMAL) as u64,
            min_net_debt: (params.min_net_debt / token::ONE) as u64,
            gas_compensation: (params.debt_token_gas_compensation / token::ONE) as u64,
            percent_divisor: params.percent_divisor as u64,
            borrowing_fee_bps: (params.borrowing_fee_floor / BPS_TO_DECIMAL) as u64,
            redemption_fee_floor_bps: (params.redemption_fee_floor / BPS_TO_DECIMAL) as u64,
            mint_cap: (params.mint_cap / token::ONE) as u64,
            redemption_block_timestamp: 0,
            redemption_softening: params.redemption_softening_param as u64,
            coll_gas_compensation_cap: None,
            recovery_coll_cap_bps: None,
            price_timeout_secs: params.price_timeout_secs,
            active: true,
        }
    }
}

impl AssetConfig {
    /// Convert to engine units and validate
    pub fn to_params(&self) -> TrenResult<AssetParams> {
        let mcr = bps(self.mcr_bps);
        let params = AssetParams {
            mcr,
            ccr: bps(self.ccr_bps),
            min_net_debt: tokens(self.min_net_debt),
            debt_token_gas_compensation: tokens(self.gas_compensation),
            percent_divisor: self.percent_divisor as u128,
            borrowing_fee_floor: bps(self.borrowing_fee_bps),
            redemption_fee_floor: bps(self.redemption_fee_floor_bps),
            mint_cap: tokens(self.mint_cap),
            redemption_block_timestamp: self.redemption_block_timestamp,
            redemption_softening_param: self.redemption_softening as u128,
            coll_gas_compensation_cap: self.coll_gas_compensation_cap.map(tokens),
            recovery_coll_cap_ratio: self.recovery_coll_cap_bps.map(bps).unwrap_or(mcr),
            price_timeout_secs: self.price_timeout_secs,
            is_active: self.active,
        };
        params.validate()?;
        Ok(params)
    }
}

fn bps(value: u64) -> u128 {
    value as u128 * BPS_TO_DECIMAL
}

fn tokens(value: u64) -> u128 {
    value as u128 * token::ONE
}

/// Whole-protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Nodes walked from a stale sort hint before scanning from the head
    #[serde(default = "default_search_depth")]
    pub max_search_depth: usize,

    /// Collateral assets keyed by symbol
    #[serde(default)]
    pub assets: BTreeMap<String, AssetConfig>,
}

fn default_search_depth() -> usize {
    sorted::MAX_SEARCH_DEPTH
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_search_depth: sorted::MAX_SEARCH_DEPTH,
            assets: BTreeMap::new(),
        }
    }
}

impl ProtocolConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> TrenResult<Self> {
        let config: ProtocolConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `TREN_CONFIG`, or `tren-config.toml`
    pub fn load() -> TrenResult<Self> {
        let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load from an explicit path
    pub fn load_from(path: impl AsRef<Path>) -> TrenResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| TrenError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&source)?;
        log::info!("loaded {} asset(s) from {}", config.assets.len(), path.display());
        Ok(config)
    }

    /// Serialize as pretty TOML
    pub fn to_toml_string(&self) -> TrenResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrenError::Config { message: e.to_string() })
    }

    /// Check every asset section
    pub fn validate(&self) -> TrenResult<()> {
        if self.max_search_depth == 0 {
            return Err(invalid("max_search_depth", "must be non-zero"));
        }
        for asset in self.assets.values() {
            asset.to_params()?;
        }
        Ok(())
    }

    /// Assets with their derived identifiers and engine parameters
    pub fn asset_params(&self) -> TrenResult<Vec<(String, AssetId, AssetParams)>> {
        self.assets
            .iter()
            .map(|(symbol, cfg)| Ok((symbol.clone(), asset_id(symbol), cfg.to_params()?)))
            .collect()
    }
}
