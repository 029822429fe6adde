//! Tren Common Library
//!
//! Shared types, constants, and utilities for all Tren engine crates:
//!
//! - **Constants**: fixed-point precisions and default risk parameters
//! - **Errors**: one error enum with stable codes and categories
//! - **Math**: 256-bit backed mul-div, collateral ratios, fee decay
//! - **Events**: typed protocol events and the per-operation event log
//! - **Config**: per-asset parameters, loadable from TOML
//! - **Access Control**: the closed set of module roles
//! - **Oracle**: the price feed interface
//!
//! Amounts, prices and ratios are `u128` with 18 decimals throughout.

pub mod access_control;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod math;
pub mod oracle;
pub mod types;

// Re-exports for convenience
pub use access_control::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use math::*;
pub use oracle::*;
pub use types::*;
