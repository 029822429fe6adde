//! Core Types for the Tren Protocol
//!
//! Identifiers and the position record shared by every engine crate.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Type alias for account and module addresses (32-byte hash)
pub type Address = [u8; 32];

/// Type alias for collateral asset identifiers
pub type AssetId = [u8; 32];

/// Derive a deterministic asset identifier from its symbol.
pub fn asset_id(symbol: &str) -> AssetId {
    let mut hasher = Sha256::new();
    hasher.update(b"tren:asset:");
    hasher.update(symbol.as_bytes());
    hasher.finalize().into()
}

/// Derive a deterministic module address from its name.
pub fn module_address(name: &str) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"tren:module:");
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

// ============ Position Types ============

/// Lifecycle status of a position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum TrenBoxStatus {
    /// Never opened
    #[default]
    NonExistent = 0,
    /// Open and counted in stakes and the sorted index
    Active = 1,
    /// Closed by its owner
    ClosedByOwner = 2,
    /// Closed by a liquidation
    ClosedByLiquidation = 3,
    /// Fully redeemed
    ClosedByRedemption = 4,
}

impl TrenBoxStatus {
    /// True for the three terminal states
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ClosedByOwner | Self::ClosedByLiquidation | Self::ClosedByRedemption
        )
    }
}

/// A collateralized debt position of one owner on one asset
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct TrenBox {
    /// Recorded debt including gas compensation, excluding pending rewards
    pub debt: u128,
    /// Recorded collateral, excluding pending rewards
    pub coll: u128,
    /// Share of future redistributions
    pub stake: u128,
    /// Current status
    pub status: TrenBoxStatus,
    /// Position in the asset's owner array
    pub array_index: u128,
}

impl TrenBox {
    /// Whether the position is open
    pub fn is_active(&self) -> bool {
        self.status == TrenBoxStatus::Active
    }
}

/// Reward accumulator values last applied to a position
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct RewardSnapshot {
    /// `L_coll` at last touch
    pub coll: u128,
    /// `L_debt` at last touch
    pub debt: u128,
}

/// Operation recorded in `TrenBoxUpdated` events
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum TrenBoxOperation {
    OpenTrenBox = 0,
    CloseTrenBox = 1,
    AdjustTrenBox = 2,
    ApplyPendingRewards = 3,
    LiquidateInNormalMode = 4,
    LiquidateInRecoveryMode = 5,
    RedeemCollateral = 6,
}

/// Entire position amounts including pending rewards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntireDebtAndColl {
    pub debt: u128,
    pub coll: u128,
    pub pending_debt_reward: u128,
    pub pending_coll_reward: u128,
}
