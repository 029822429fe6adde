//! Protocol Events for Tren
//!
//! Events are collected in an [`EventLog`] while an operation runs and are
//! only published when the operation commits. Field order follows the
//! on-chain event signatures so indexers can decode either source.

use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::types::{Address, AssetId, TrenBoxOperation};

/// Event types for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EventType {
    // Position Events (0x01 - 0x1F)
    TrenBoxUpdated = 0x01,
    TrenBoxCreated = 0x02,
    TrenBoxIndexUpdated = 0x03,
    TrenBoxLiquidated = 0x04,
    TrenBoxSnapshotsUpdated = 0x05,
    TotalStakesUpdated = 0x06,
    SystemSnapshotsUpdated = 0x07,
    LTermsUpdated = 0x08,
    Liquidation = 0x09,
    Redistribution = 0x0A,
    Redemption = 0x0B,
    BaseRateUpdated = 0x0C,
    LastFeeOpTimeUpdated = 0x0D,
    BorrowingFeePaid = 0x0E,
    CollSurplusUpdated = 0x0F,

    // Pool Events (0x20 - 0x2F)
    ActivePoolDebtUpdated = 0x20,
    ActivePoolAssetBalanceUpdated = 0x21,
    DefaultPoolDebtUpdated = 0x22,
    DefaultPoolAssetBalanceUpdated = 0x23,
    CollateralSent = 0x24,

    // Stability Pool Events (0x30 - 0x4F)
    StabilityPoolDebtTokenBalanceUpdated = 0x30,
    StabilityPoolAssetBalanceUpdated = 0x31,
    UserDepositChanged = 0x32,
    GainsWithdrawn = 0x33,
    DepositSnapshotUpdated = 0x34,
    SUpdated = 0x35,
    GUpdated = 0x36,
    PUpdated = 0x37,
    EpochUpdated = 0x38,
    ScaleUpdated = 0x39,
    IssuanceRewardPaid = 0x3A,

    // Token Events (0x50 - 0x5F)
    TokenTransfer = 0x50,
    TokenMint = 0x51,
    TokenBurn = 0x52,

    // Oracle Events (0x60 - 0x6F)
    PriceUpdated = 0x60,
}

/// Main event enum containing all protocol events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrenEvent {
    // ============ Position Events ============
    TrenBoxUpdated {
        asset: AssetId,
        owner: Address,
        debt: u128,
        coll: u128,
        stake: u128,
        operation: TrenBoxOperation,
    },
    TrenBoxCreated {
        asset: AssetId,
        owner: Address,
        array_index: u128,
    },
    TrenBoxIndexUpdated {
        asset: AssetId,
        owner: Address,
        new_index: u128,
    },
    TrenBoxLiquidated {
        asset: AssetId,
        owner: Address,
        debt: u128,
        coll: u128,
        operation: TrenBoxOperation,
    },
    TrenBoxSnapshotsUpdated {
        asset: AssetId,
        l_coll: u128,
        l_debt: u128,
    },
    TotalStakesUpdated {
        asset: AssetId,
        new_total_stakes: u128,
    },
    SystemSnapshotsUpdated {
        asset: AssetId,
        total_stakes_snapshot: u128,
        total_collateral_snapshot: u128,
    },
    LTermsUpdated {
        asset: AssetId,
        l_coll: u128,
        l_debt: u128,
    },
    Liquidation {
        asset: AssetId,
        liquidated_debt: u128,
        liquidated_coll: u128,
        coll_gas_compensation: u128,
        debt_token_gas_compensation: u128,
    },
    Redistribution {
        asset: AssetId,
        debt: u128,
        coll: u128,
    },
    Redemption {
        asset: AssetId,
        attempted_debt_amount: u128,
        actual_debt_amount: u128,
        coll_sent: u128,
        coll_fee: u128,
    },
    BaseRateUpdated {
        asset: AssetId,
        base_rate: u128,
    },
    LastFeeOpTimeUpdated {
        asset: AssetId,
        timestamp: u64,
    },
    BorrowingFeePaid {
        asset: AssetId,
        owner: Address,
        fee: u128,
    },
    CollSurplusUpdated {
        asset: AssetId,
        owner: Address,
        amount: u128,
    },

    // ============ Pool Events ============
    ActivePoolDebtUpdated {
        asset: AssetId,
        debt: u128,
    },
    ActivePoolAssetBalanceUpdated {
        asset: AssetId,
        balance: u128,
    },
    DefaultPoolDebtUpdated {
        asset: AssetId,
        debt: u128,
    },
    DefaultPoolAssetBalanceUpdated {
        asset: AssetId,
        balance: u128,
    },
    CollateralSent {
        asset: AssetId,
        to: Address,
        amount: u128,
    },

    // ============ Stability Pool Events ============
    StabilityPoolDebtTokenBalanceUpdated {
        total_deposits: u128,
    },
    StabilityPoolAssetBalanceUpdated {
        asset: AssetId,
        balance: u128,
    },
    UserDepositChanged {
        depositor: Address,
        new_deposit: u128,
    },
    GainsWithdrawn {
        depositor: Address,
        assets: Vec<AssetId>,
        amounts: Vec<u128>,
        debt_token_loss: u128,
    },
    DepositSnapshotUpdated {
        depositor: Address,
        p: u128,
        g: U256,
        scale: u128,
        epoch: u128,
    },
    SUpdated {
        asset: AssetId,
        sum: U256,
        epoch: u128,
        scale: u128,
    },
    GUpdated {
        g: U256,
        epoch: u128,
        scale: u128,
    },
    PUpdated {
        p: u128,
    },
    EpochUpdated {
        epoch: u128,
    },
    ScaleUpdated {
        scale: u128,
    },
    IssuanceRewardPaid {
        depositor: Address,
        amount: u128,
    },

    // ============ Token Events ============
    TokenTransfer {
        from: Address,
        to: Address,
        amount: u128,
    },
    TokenMint {
        to: Address,
        amount: u128,
        new_total_supply: u128,
    },
    TokenBurn {
        from: Address,
        amount: u128,
        new_total_supply: u128,
    },

    // ============ Oracle Events ============
    PriceUpdated {
        asset: AssetId,
        old_price: u128,
        new_price: u128,
        timestamp: u64,
    },
}

impl TrenEvent {
    /// Get the event type for filtering
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TrenBoxUpdated { .. } => EventType::TrenBoxUpdated,
            Self::TrenBoxCreated { .. } => EventType::TrenBoxCreated,
            Self::TrenBoxIndexUpdated { .. } => EventType::TrenBoxIndexUpdated,
            Self::TrenBoxLiquidated { .. } => EventType::TrenBoxLiquidated,
            Self::TrenBoxSnapshotsUpdated { .. } => EventType::TrenBoxSnapshotsUpdated,
            Self::TotalStakesUpdated { .. } => EventType::TotalStakesUpdated,
            Self::SystemSnapshotsUpdated { .. } => EventType::SystemSnapshotsUpdated,
            Self::LTermsUpdated { .. } => EventType::LTermsUpdated,
            Self::Liquidation { .. } => EventType::Liquidation,
            Self::Redistribution { .. } => EventType::Redistribution,
            Self::Redemption { .. } => EventType::Redemption,
            Self::BaseRateUpdated { .. } => EventType::BaseRateUpdated,
            Self::LastFeeOpTimeUpdated { .. } => EventType::LastFeeOpTimeUpdated,
            Self::BorrowingFeePaid { .. } => EventType::BorrowingFeePaid,
            Self::CollSurplusUpdated { .. } => EventType::CollSurplusUpdated,
            Self::ActivePoolDebtUpdated { .. } => EventType::ActivePoolDebtUpdated,
            Self::ActivePoolAssetBalanceUpdated { .. } => EventType::ActivePoolAssetBalanceUpdated,
            Self::DefaultPoolDebtUpdated { .. } => EventType::DefaultPoolDebtUpdated,
            Self::DefaultPoolAssetBalanceUpdated { .. } => EventType::DefaultPoolAssetBalanceUpdated,
            Self::CollateralSent { .. } => EventType::CollateralSent,
            Self::StabilityPoolDebtTokenBalanceUpdated { .. } => {
                EventType::StabilityPoolDebtTokenBalanceUpdated
            }
            Self::StabilityPoolAssetBalanceUpdated { .. } => EventType::StabilityPoolAssetBalanceUpdated,
            Self::UserDepositChanged { .. } => EventType::UserDepositChanged,
            Self::GainsWithdrawn { .. } => EventType::GainsWithdrawn,
            Self::DepositSnapshotUpdated { .. } => EventType::DepositSnapshotUpdated,
            Self::SUpdated { .. } => EventType::SUpdated,
            Self::GUpdated { .. } => EventType::GUpdated,
            Self::PUpdated { .. } => EventType::PUpdated,
            Self::EpochUpdated { .. } => EventType::EpochUpdated,
            Self::ScaleUpdated { .. } => EventType::ScaleUpdated,
            Self::IssuanceRewardPaid { .. } => EventType::IssuanceRewardPaid,
            Self::TokenTransfer { .. } => EventType::TokenTransfer,
            Self::TokenMint { .. } => EventType::TokenMint,
            Self::TokenBurn { .. } => EventType::TokenBurn,
            Self::PriceUpdated { .. } => EventType::PriceUpdated,
        }
    }

    /// Encode the event as CBOR for indexers
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match ciborium::ser::into_writer(self, &mut buf) {
            Ok(()) => buf,
            Err(err) => {
                log::error!("failed to encode {:?} event: {}", self.event_type(), err);
                Vec::new()
            }
        }
    }

    /// Decode an event from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        ciborium::de::from_reader(bytes).ok()
    }
}

/// Event log for collecting events during one operation
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<TrenEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Emit an event (add to log)
    pub fn emit(&mut self, event: TrenEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[TrenEvent] {
        &self.events
    }

    /// Take ownership of all events
    pub fn into_events(self) -> Vec<TrenEvent> {
        self.events
    }

    /// Append every event of another log
    pub fn append(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: EventType) -> Vec<&TrenEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Most recent event of a type
    pub fn last_of_type(&self, event_type: EventType) -> Option<&TrenEvent> {
        self.events.iter().rev().find(|e| e.event_type() == event_type)
    }

    /// Check if any events were emitted
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no event was emitted
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
