//! Error Types for the Tren Protocol
//!
//! Every fallible operation returns [`TrenResult`]. Variants carry enough
//! context to debug a rejected transaction; [`TrenError::code`] gives a
//! stable identifier for logs and [`TrenError::category`] groups the
//! failures the way callers react to them.

use thiserror::Error;

use crate::access_control::ModuleRole;
use crate::types::{Address, AssetId};

/// Result type alias for Tren operations
pub type TrenResult<T> = Result<T, TrenError>;

/// Short hex rendering of a 32-byte identifier for error messages.
pub fn short_id(id: &[u8; 32]) -> String {
    id[..4].iter().map(|b| format!("{:02x}", b)).collect::<String>() + ".."
}

/// Main error enum for all Tren protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrenError {
    // ============ Position Errors ============
    /// Position already active for this owner
    #[error("trenbox of {} on asset {} is already active", short_id(.owner), short_id(.asset))]
    TrenBoxIsActive { asset: AssetId, owner: Address },

    /// Position missing or closed
    #[error("trenbox of {} on asset {} is not active", short_id(.owner), short_id(.asset))]
    TrenBoxNotActive { asset: AssetId, owner: Address },

    /// Closing would leave the asset without positions
    #[error("cannot close the only trenbox of asset {}", short_id(.asset))]
    OnlyOneTrenBox { asset: AssetId },

    /// Node already present in the sorted index
    #[error("{} is already in the sorted list", short_id(.owner))]
    NodeAlreadyInList { owner: Address },

    /// Node missing from the sorted index
    #[error("{} is not in the sorted list", short_id(.owner))]
    NodeNotInList { owner: Address },

    /// Sorted index only accepts strictly positive NICRs
    #[error("NICR must be positive")]
    ZeroNicr,

    // ============ Borrowing Errors ============
    /// Individual collateral ratio below MCR
    #[error("ICR {icr} is below MCR {mcr}")]
    IcrBelowMcr { icr: u128, mcr: u128 },

    /// Individual collateral ratio below CCR (Recovery Mode)
    #[error("ICR {icr} is below CCR {ccr}")]
    IcrBelowCcr { icr: u128, ccr: u128 },

    /// Operation would push the total collateral ratio below CCR
    #[error("TCR {tcr} would fall below CCR {ccr}")]
    TcrBelowCcr { tcr: u128, ccr: u128 },

    /// Debt increase in Recovery Mode must improve the ICR
    #[error("ICR may not decrease in Recovery Mode ({old_icr} -> {new_icr})")]
    IcrDecreasedInRecoveryMode { old_icr: u128, new_icr: u128 },

    /// Collateral withdrawal is forbidden in Recovery Mode
    #[error("collateral withdrawal not permitted in Recovery Mode")]
    CollWithdrawalInRecoveryMode,

    /// Operation is forbidden in Recovery Mode
    #[error("operation not permitted in Recovery Mode")]
    NotAllowedInRecoveryMode,

    /// Net debt below the configured minimum
    #[error("net debt {net_debt} is below the minimum {minimum}")]
    NetDebtBelowMinimum { net_debt: u128, minimum: u128 },

    /// Adjustment both adds and withdraws collateral
    #[error("cannot withdraw and add collateral in one adjustment")]
    CannotWithdrawAndAddColl,

    /// Adjustment changes nothing
    #[error("adjustment must change collateral or debt")]
    ZeroAdjustment,

    /// Repayment larger than the repayable debt
    #[error("repayment {repayment} exceeds repayable debt {max}")]
    RepaymentExceedsDebt { repayment: u128, max: u128 },

    /// Minting would exceed the asset's mint cap
    #[error("minting {requested} exceeds the mint cap {cap}")]
    ExceedMintCap { requested: u128, cap: u128 },

    /// Not enough collateral in a position or pool
    #[error("insufficient collateral: {available} available, {requested} requested")]
    InsufficientCollateral { available: u128, requested: u128 },

    /// No surplus collateral to claim
    #[error("no collateral available to claim for {}", short_id(.owner))]
    NoCollAvailableToClaim { asset: AssetId, owner: Address },

    // ============ Liquidation Errors ============
    /// No position in the request could be liquidated
    #[error("nothing to liquidate")]
    NothingToLiquidate,

    /// Batch empty or above the batch limit
    #[error("invalid array size {len} (max {max})")]
    InvalidArraySize { len: usize, max: usize },

    // ============ Redemption Errors ============
    /// Redemptions disabled until the given timestamp
    #[error("redemptions are blocked until {until}")]
    RedemptionIsBlocked { until: u64 },

    /// Redemptions require TCR >= MCR
    #[error("TCR {tcr} must be above MCR {mcr} to redeem")]
    TcrMustBeAboveMcr { tcr: u128, mcr: u128 },

    /// Redemption of zero tokens
    #[error("redemption amount must be non-zero")]
    EmptyAmount,

    /// Caller does not hold enough debt tokens
    #[error("insufficient debt token balance: {available} available, {requested} requested")]
    InsufficientDebtTokenBalance { available: u128, requested: u128 },

    /// Nothing could be redeemed
    #[error("unable to redeem any amount")]
    UnableToRedeemAnyAmount,

    /// Fee percentage outside the accepted bounds
    #[error("fee percentage {fee} outside [{lower}, {upper}]")]
    FeePercentOutOfBounds { fee: u128, lower: u128, upper: u128 },

    /// Redemption fee would consume the whole draw
    #[error("fee {fee} is not smaller than the asset draw {drawn}")]
    FeeBiggerThanAssetDraw { fee: u128, drawn: u128 },

    // ============ Stability Pool Errors ============
    /// Deposit or offset of zero
    #[error("amount must be non-zero")]
    AmountMustBeNonZero,

    /// Depositor has no deposit
    #[error("{} has no stability pool deposit", short_id(.depositor))]
    UserHasNoDeposit { depositor: Address },

    /// Withdrawals blocked while an undercollateralized position exists
    #[error("asset {} has undercollateralized trenboxes", short_id(.asset))]
    UnderCollateralizedTrenBoxes { asset: AssetId },

    // ============ Token Errors ============
    /// Caller may not mint
    #[error("{} is not allowed to mint", short_id(.caller))]
    MintUnauthorized { caller: Address },

    /// Caller may not burn
    #[error("{} is not allowed to burn", short_id(.caller))]
    BurnUnauthorized { caller: Address },

    /// Account balance too small
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: u128, requested: u128 },

    /// Tokens may not be sent directly to this protocol account
    #[error("invalid recipient {}", short_id(.recipient))]
    InvalidRecipient { recipient: Address },

    // ============ Authorization Errors ============
    /// Caller is not BorrowerOperations
    #[error("caller {} is not BorrowerOperations", short_id(.caller))]
    BorrowerOperationsOnly { caller: Address },

    /// Caller is not the TrenBoxManager
    #[error("caller {} is not the TrenBoxManager", short_id(.caller))]
    TrenBoxManagerOnly { caller: Address },

    /// Caller is not TrenBoxManagerOperations
    #[error("caller {} is not TrenBoxManagerOperations", short_id(.caller))]
    TrenBoxManagerOperationsOnly { caller: Address },

    /// Caller is not the ActivePool
    #[error("caller {} is not the ActivePool", short_id(.caller))]
    ActivePoolOnly { caller: Address },

    /// Caller is not the StabilityPool
    #[error("caller {} is not the StabilityPool", short_id(.caller))]
    StabilityPoolOnly { caller: Address },

    /// Caller is not the protocol admin
    #[error("caller {} is not the admin", short_id(.caller))]
    AdminOnly { caller: Address },

    /// Caller lacks any other module role
    #[error("caller {} lacks role {role:?}", short_id(.caller))]
    Unauthorized { caller: Address, role: ModuleRole },

    // ============ Oracle Errors ============
    /// No usable price for the asset
    #[error("price feed unavailable for asset {}", short_id(.asset))]
    PriceFeedUnavailable { asset: AssetId },

    /// Price older than the feed timeout
    #[error("stale price for asset {}: updated at {updated_at}, now {now}", short_id(.asset))]
    StalePrice { asset: AssetId, updated_at: u64, now: u64 },

    /// Caller is not the oracle operator
    #[error("caller {} is not the oracle operator", short_id(.caller))]
    OracleOperatorOnly { caller: Address },

    /// Price update deviates too far from the last one
    #[error("price deviation too large: {old_price} -> {new_price}")]
    PriceDeviation { old_price: u128, new_price: u128, max_deviation_bps: u128 },

    // ============ Asset / Config Errors ============
    /// Asset never registered
    #[error("unknown asset {}", short_id(.asset))]
    UnknownAsset { asset: AssetId },

    /// Asset registered but deactivated
    #[error("asset {} is not active", short_id(.asset))]
    AssetNotActive { asset: AssetId },

    /// Parameter outside its valid range
    #[error("invalid parameter {param}: {reason}")]
    InvalidParameter { param: &'static str, reason: &'static str },

    /// Configuration could not be read or parsed
    #[error("configuration error: {message}")]
    Config { message: String },

    // ============ Math Errors ============
    /// Arithmetic overflow occurred
    #[error("arithmetic overflow")]
    Overflow,

    /// Arithmetic underflow occurred
    #[error("arithmetic underflow")]
    Underflow,

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,
}

/// How callers should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input, missing position, wrong caller
    Precondition,
    /// Collateral ratios, fee bounds, caps, price availability
    SystemHealth,
    /// Operations that would break a structural invariant
    InvariantGuard,
    /// Checked arithmetic failure
    Arithmetic,
    /// Invalid parameters or configuration
    Configuration,
}

impl TrenError {
    /// Returns a stable error code for logging/debugging
    pub fn code(&self) -> &'static str {
        match self {
            Self::TrenBoxIsActive { .. } => "E001_TRENBOX_ACTIVE",
            Self::TrenBoxNotActive { .. } => "E002_TRENBOX_NOT_ACTIVE",
            Self::OnlyOneTrenBox { .. } => "E003_ONLY_ONE_TRENBOX",
            Self::NodeAlreadyInList { .. } => "E004_NODE_EXISTS",
            Self::NodeNotInList { .. } => "E005_NODE_MISSING",
            Self::ZeroNicr => "E006_ZERO_NICR",
            Self::IcrBelowMcr { .. } => "E010_ICR_BELOW_MCR",
            Self::IcrBelowCcr { .. } => "E011_ICR_BELOW_CCR",
            Self::TcrBelowCcr { .. } => "E012_TCR_BELOW_CCR",
            Self::IcrDecreasedInRecoveryMode { .. } => "E013_ICR_DECREASED_RM",
            Self::CollWithdrawalInRecoveryMode => "E014_COLL_WITHDRAWAL_RM",
            Self::NotAllowedInRecoveryMode => "E015_RECOVERY_MODE",
            Self::NetDebtBelowMinimum { .. } => "E016_NET_DEBT_TOO_LOW",
            Self::CannotWithdrawAndAddColl => "E017_WITHDRAW_AND_ADD",
            Self::ZeroAdjustment => "E018_ZERO_ADJUSTMENT",
            Self::RepaymentExceedsDebt { .. } => "E019_REPAYMENT_TOO_LARGE",
            Self::ExceedMintCap { .. } => "E020_MINT_CAP",
            Self::InsufficientCollateral { .. } => "E021_INSUFFICIENT_COLL",
            Self::NoCollAvailableToClaim { .. } => "E022_NO_COLL_TO_CLAIM",
            Self::NothingToLiquidate => "E030_NOTHING_TO_LIQ",
            Self::InvalidArraySize { .. } => "E031_INVALID_ARRAY_SIZE",
            Self::RedemptionIsBlocked { .. } => "E040_REDEMPTION_BLOCKED",
            Self::TcrMustBeAboveMcr { .. } => "E041_TCR_BELOW_MCR",
            Self::EmptyAmount => "E042_EMPTY_AMOUNT",
            Self::InsufficientDebtTokenBalance { .. } => "E043_INSUFFICIENT_DEBT_TOKENS",
            Self::UnableToRedeemAnyAmount => "E044_NOTHING_REDEEMED",
            Self::FeePercentOutOfBounds { .. } => "E045_FEE_OUT_OF_BOUNDS",
            Self::FeeBiggerThanAssetDraw { .. } => "E046_FEE_TOO_LARGE",
            Self::AmountMustBeNonZero => "E050_ZERO_AMOUNT",
            Self::UserHasNoDeposit { .. } => "E051_NO_DEPOSIT",
            Self::UnderCollateralizedTrenBoxes { .. } => "E052_UNDERCOLLATERALIZED",
            Self::MintUnauthorized { .. } => "E060_MINT_UNAUTH",
            Self::BurnUnauthorized { .. } => "E061_BURN_UNAUTH",
            Self::InsufficientBalance { .. } => "E062_INSUFFICIENT_BALANCE",
            Self::InvalidRecipient { .. } => "E063_INVALID_RECIPIENT",
            Self::BorrowerOperationsOnly { .. } => "E070_BORROWER_OPS_ONLY",
            Self::TrenBoxManagerOnly { .. } => "E071_MANAGER_ONLY",
            Self::TrenBoxManagerOperationsOnly { .. } => "E072_MANAGER_OPS_ONLY",
            Self::ActivePoolOnly { .. } => "E073_ACTIVE_POOL_ONLY",
            Self::StabilityPoolOnly { .. } => "E074_STABILITY_POOL_ONLY",
            Self::Unauthorized { .. } => "E075_UNAUTHORIZED",
            Self::AdminOnly { .. } => "E076_ADMIN_ONLY",
            Self::PriceFeedUnavailable { .. } => "E080_PRICE_UNAVAILABLE",
            Self::StalePrice { .. } => "E081_STALE_PRICE",
            Self::PriceDeviation { .. } => "E082_PRICE_DEVIATION",
            Self::OracleOperatorOnly { .. } => "E083_ORACLE_OPERATOR_ONLY",
            Self::UnknownAsset { .. } => "E090_UNKNOWN_ASSET",
            Self::AssetNotActive { .. } => "E091_ASSET_INACTIVE",
            Self::InvalidParameter { .. } => "E092_INVALID_PARAM",
            Self::Config { .. } => "E093_CONFIG",
            Self::Overflow => "E100_OVERFLOW",
            Self::Underflow => "E101_UNDERFLOW",
            Self::DivisionByZero => "E102_DIV_ZERO",
        }
    }

    /// Groups the error by how a caller should react
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IcrBelowMcr { .. }
            | Self::IcrBelowCcr { .. }
            | Self::TcrBelowCcr { .. }
            | Self::IcrDecreasedInRecoveryMode { .. }
            | Self::CollWithdrawalInRecoveryMode
            | Self::NotAllowedInRecoveryMode
            | Self::ExceedMintCap { .. }
            | Self::RedemptionIsBlocked { .. }
            | Self::TcrMustBeAboveMcr { .. }
            | Self::FeePercentOutOfBounds { .. }
            | Self::FeeBiggerThanAssetDraw { .. }
            | Self::UnderCollateralizedTrenBoxes { .. }
            | Self::PriceFeedUnavailable { .. }
            | Self::StalePrice { .. }
            | Self::PriceDeviation { .. } => ErrorCategory::SystemHealth,
            Self::OnlyOneTrenBox { .. }
            | Self::NothingToLiquidate
            | Self::UnableToRedeemAnyAmount
            | Self::NodeAlreadyInList { .. }
            | Self::NodeNotInList { .. } => ErrorCategory::InvariantGuard,
            Self::Overflow | Self::Underflow | Self::DivisionByZero => ErrorCategory::Arithmetic,
            Self::InvalidParameter { .. } | Self::Config { .. } => ErrorCategory::Configuration,
            _ => ErrorCategory::Precondition,
        }
    }

    /// Returns true if this error is recoverable (user can fix it)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::IcrBelowMcr { .. } => true,                  // Add more collateral
            Self::InsufficientBalance { .. } => true,          // Get more funds
            Self::InsufficientDebtTokenBalance { .. } => true, // Get more tokens
            Self::NetDebtBelowMinimum { .. } => true,          // Borrow more
            Self::StalePrice { .. } => true,                   // Wait for update
            Self::RedemptionIsBlocked { .. } => true,          // Wait for the window
            _ => false,
        }
    }

    /// Map a role to the error raised when a caller lacks it
    pub fn missing_role(caller: Address, role: ModuleRole) -> Self {
        match role {
            ModuleRole::BorrowerOperations => Self::BorrowerOperationsOnly { caller },
            ModuleRole::TrenBoxManager => Self::TrenBoxManagerOnly { caller },
            ModuleRole::TrenBoxManagerOperations => Self::TrenBoxManagerOperationsOnly { caller },
            ModuleRole::ActivePool => Self::ActivePoolOnly { caller },
            ModuleRole::StabilityPool => Self::StabilityPoolOnly { caller },
            _ => Self::Unauthorized { caller, role },
        }
    }
}

impl From<toml::de::Error> for TrenError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config { message: err.to_string() }
    }
}

impl From<std::io::Error> for TrenError {
    fn from(err: std::io::Error) -> Self {
        Self::Config { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_error_codes_unique() {
        let errors = [
            TrenError::TrenBoxNotActive { asset: [1u8; 32], owner: [2u8; 32] },
            TrenError::OnlyOneTrenBox { asset: [1u8; 32] },
            TrenError::IcrBelowMcr { icr: 1, mcr: 2 },
            TrenError::NothingToLiquidate,
            TrenError::RedemptionIsBlocked { until: 10 },
            TrenError::AmountMustBeNonZero,
            TrenError::TrenBoxManagerOnly { caller: [0u8; 32] },
            TrenError::Overflow,
        ];

        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        let unique: BTreeSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes must be unique");
    }

    #[test]
    fn test_categories() {
        assert_eq!(TrenError::NothingToLiquidate.category(), ErrorCategory::InvariantGuard);
        assert_eq!(
            TrenError::OnlyOneTrenBox { asset: [0u8; 32] }.category(),
            ErrorCategory::InvariantGuard
        );
        assert_eq!(
            TrenError::TcrMustBeAboveMcr { tcr: 1, mcr: 2 }.category(),
            ErrorCategory::SystemHealth
        );
        assert_eq!(TrenError::EmptyAmount.category(), ErrorCategory::Precondition);
        assert_eq!(TrenError::Underflow.category(), ErrorCategory::Arithmetic);
    }

    #[test]
    fn test_missing_role_mapping() {
        let caller = [9u8; 32];
        assert_eq!(
            TrenError::missing_role(caller, ModuleRole::ActivePool),
            TrenError::ActivePoolOnly { caller }
        );
        assert_eq!(
            TrenError::missing_role(caller, ModuleRole::GasPool),
            TrenError::Unauthorized { caller, role: ModuleRole::GasPool }
        );
    }

    #[test]
    fn test_display_includes_short_id() {
        let err = TrenError::UserHasNoDeposit { depositor: [0xab; 32] };
        assert_eq!(err.to_string(), "abababab.. has no stability pool deposit");
    }
}
