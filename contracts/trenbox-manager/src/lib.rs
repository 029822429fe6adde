//! Tren TrenBox Manager
//!
//! Collateralized debt positions for every registered collateral asset:
//!
//! - **TrenBoxes**: the position ledger and owner array
//! - **Sorted TrenBoxes**: positions ordered by nominal collateral ratio
//! - **Rewards**: stakes and the redistribution accumulator
//! - **Liquidation**: Normal and Recovery Mode liquidations, offset
//!   against the Stability Pool and redistribution of the rest
//! - **Redemption**: swapping debt tokens for collateral, riskiest first
//! - **Protocol**: the coordinator that owns all state and commits each
//!   call atomically
//!
//! ```text
//! owner ops ─┐
//! liquidate ─┼──▶ TrenProtocol ──▶ AssetLedgerState (per asset)
//! redeem ────┘         │               ├─ TrenBoxLedger / SortedTrenBoxes
//!                      │               ├─ RewardAccumulator / FeeState
//!                      │               └─ Active / Default / CollSurplus pools
//!                      ├──▶ StabilityPool
//!                      └──▶ DebtToken
//! ```

pub mod fees;
pub mod liquidation;
pub mod pools;
pub mod protocol;
pub mod redemption;
pub mod rewards;
pub mod sorted_trenboxes;
pub mod state;
pub mod trenboxes;

pub use liquidation::{LiquidationTotals, LiquidationValues};
pub use pools::{ActivePool, CollSurplusPool, CollateralLedger, DefaultPool};
pub use protocol::{AdjustTrenBoxRequest, ProtocolHandle, ProtocolState, TrenProtocol};
pub use redemption::{RedemptionOutcome, RedemptionRequest};
pub use sorted_trenboxes::SortedTrenBoxes;
pub use state::{AssetLedgerState, PositionDelta};
pub use trenboxes::TrenBoxLedger;

pub use tren_price_feed::{OracleSetup, PriceFeedState};
