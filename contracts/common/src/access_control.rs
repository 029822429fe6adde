//! Access Control Module
//!
//! The engine modules call each other through a closed set of roles. Each
//! role is bound to exactly one address; privileged entry points check the
//! caller against the role they require instead of trusting the call path.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::errors::{TrenError, TrenResult};
use crate::types::{module_address, Address};

// ============ Roles ============

/// Engine module identities
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    BorshSerialize, BorshDeserialize,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum ModuleRole {
    /// User facade for open/adjust/close
    BorrowerOperations = 0,
    /// Position ledger owner
    TrenBoxManager = 1,
    /// Liquidation and redemption entry points
    TrenBoxManagerOperations = 2,
    /// Stability pool
    StabilityPool = 3,
    /// Holds collateral and debt of Active positions
    ActivePool = 4,
    /// Holds redistributed collateral and debt not yet applied
    DefaultPool = 5,
    /// Holds claimable surplus collateral
    CollSurplusPool = 6,
    /// Holds the debt token gas compensation reserve
    GasPool = 7,
    /// Receives borrowing and redemption fees
    FeeCollector = 8,
    /// Feeds issuance rewards to the stability pool
    CommunityIssuance = 9,
}

impl ModuleRole {
    /// All roles in registration order
    pub const ALL: [ModuleRole; 10] = [
        ModuleRole::BorrowerOperations,
        ModuleRole::TrenBoxManager,
        ModuleRole::TrenBoxManagerOperations,
        ModuleRole::StabilityPool,
        ModuleRole::ActivePool,
        ModuleRole::DefaultPool,
        ModuleRole::CollSurplusPool,
        ModuleRole::GasPool,
        ModuleRole::FeeCollector,
        ModuleRole::CommunityIssuance,
    ];

    /// Stable name, also used to derive default addresses
    pub fn name(&self) -> &'static str {
        match self {
            Self::BorrowerOperations => "BorrowerOperations",
            Self::TrenBoxManager => "TrenBoxManager",
            Self::TrenBoxManagerOperations => "TrenBoxManagerOperations",
            Self::StabilityPool => "StabilityPool",
            Self::ActivePool => "ActivePool",
            Self::DefaultPool => "DefaultPool",
            Self::CollSurplusPool => "CollSurplusPool",
            Self::GasPool => "GasPool",
            Self::FeeCollector => "FeeCollector",
            Self::CommunityIssuance => "CommunityIssuance",
        }
    }

    /// Roles allowed to mint debt tokens
    pub fn can_mint(&self) -> bool {
        matches!(self, Self::BorrowerOperations)
    }

    /// Roles allowed to burn debt tokens
    pub fn can_burn(&self) -> bool {
        matches!(
            self,
            Self::BorrowerOperations
                | Self::TrenBoxManager
                | Self::TrenBoxManagerOperations
                | Self::StabilityPool
        )
    }
}

// ============ Registry ============

/// Role to address bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ModuleRegistry {
    addresses: BTreeMap<ModuleRole, Address>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_default_addresses()
    }
}

impl ModuleRegistry {
    /// Empty registry; every role check fails until roles are registered
    pub fn empty() -> Self {
        Self { addresses: BTreeMap::new() }
    }

    /// Every role bound to the address derived from its name
    pub fn with_default_addresses() -> Self {
        let addresses = ModuleRole::ALL
            .iter()
            .map(|role| (*role, module_address(role.name())))
            .collect();
        Self { addresses }
    }

    /// Bind a role to an address, replacing any previous binding
    pub fn register(&mut self, role: ModuleRole, address: Address) -> TrenResult<()> {
        if address == [0u8; 32] {
            return Err(TrenError::InvalidParameter {
                param: "address",
                reason: "module address must be non-zero",
            });
        }
        if let Some((other, _)) = self.addresses.iter().find(|(r, a)| **a == address && **r != role) {
            log::warn!("address already bound to {}", other.name());
            return Err(TrenError::InvalidParameter {
                param: "address",
                reason: "address already bound to another role",
            });
        }
        log::debug!("registered {}", role.name());
        self.addresses.insert(role, address);
        Ok(())
    }

    /// Address bound to a role
    pub fn address_of(&self, role: ModuleRole) -> TrenResult<Address> {
        self.addresses
            .get(&role)
            .copied()
            .ok_or(TrenError::Unauthorized { caller: [0u8; 32], role })
    }

    /// Role bound to an address, if any
    pub fn role_of(&self, address: &Address) -> Option<ModuleRole> {
        self.addresses
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(r, _)| *r)
    }

    /// Whether `caller` holds `role`
    pub fn has_role(&self, caller: &Address, role: ModuleRole) -> bool {
        self.addresses.get(&role) == Some(caller)
    }

    /// Fail with the role-specific error unless `caller` holds `role`
    pub fn require_role(&self, caller: &Address, role: ModuleRole) -> TrenResult<()> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            Err(TrenError::missing_role(*caller, role))
        }
    }

    /// Whether `address` belongs to any module (protocol-owned account)
    pub fn is_module(&self, address: &Address) -> bool {
        self.role_of(address).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outsider() -> Address {
        [7u8; 32]
    }

    #[test]
    fn test_default_registry_binds_all_roles() {
        let registry = ModuleRegistry::with_default_addresses();
        for role in ModuleRole::ALL {
            let addr = registry.address_of(role).unwrap();
            assert!(registry.has_role(&addr, role));
            assert_eq!(registry.role_of(&addr), Some(role));
        }
    }

    #[test]
    fn test_require_role_errors() {
        let registry = ModuleRegistry::default();
        assert_eq!(
            registry.require_role(&outsider(), ModuleRole::TrenBoxManager),
            Err(TrenError::TrenBoxManagerOnly { caller: outsider() })
        );
        assert_eq!(
            registry.require_role(&outsider(), ModuleRole::ActivePool),
            Err(TrenError::ActivePoolOnly { caller: outsider() })
        );
        let sp = registry.address_of(ModuleRole::StabilityPool).unwrap();
        assert!(registry.require_role(&sp, ModuleRole::StabilityPool).is_ok());
        assert!(registry.require_role(&sp, ModuleRole::ActivePool).is_err());
    }

    #[test]
    fn test_register_rejects_zero_and_duplicates() {
        let mut registry = ModuleRegistry::empty();
        assert!(registry.register(ModuleRole::GasPool, [0u8; 32]).is_err());
        registry.register(ModuleRole::GasPool, [1u8; 32]).unwrap();
        assert!(registry.register(ModuleRole::FeeCollector, [1u8; 32]).is_err());
        // Rebinding the same role is allowed
        registry.register(ModuleRole::GasPool, [2u8; 32]).unwrap();
        assert!(registry.has_role(&[2u8; 32], ModuleRole::GasPool));
        assert!(!registry.is_module(&[1u8; 32]));
    }

    #[test]
    fn test_mint_burn_capabilities() {
        assert!(ModuleRole::BorrowerOperations.can_mint());
        assert!(!ModuleRole::StabilityPool.can_mint());
        assert!(ModuleRole::StabilityPool.can_burn());
        assert!(!ModuleRole::ActivePool.can_burn());
    }
}
