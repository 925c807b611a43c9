//! Role hierarchy and permission tables.
//!
//! Both tables are static. Adding a role means adding explicit rows to
//! both; nothing is inferred.

use crate::model::Role;
use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A capability a role may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Create and manage regional admins.
    ManageAdmins,
    /// Create and manage sub-distributors.
    ManageDistributors,
    /// Create and manage sellers.
    ManageSellers,
    /// Issue keys.
    CreateKeys,
    /// Mark keys as paid.
    ApproveKeys,
    /// Ban and unban keys.
    BanKeys,
    /// Delete keys.
    DeleteKeys,
    /// Extend key validity outside the payment flow.
    ExtendKeys,
    /// Clear a key's device binding.
    ResetHwid,
    /// Read audit entries.
    ViewLogs,
    /// Read aggregate statistics.
    ViewStats,
}

impl Permission {
    /// Wire name of the permission.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ManageAdmins => "manage_admins",
            Permission::ManageDistributors => "manage_distributors",
            Permission::ManageSellers => "manage_sellers",
            Permission::CreateKeys => "create_keys",
            Permission::ApproveKeys => "approve_keys",
            Permission::BanKeys => "ban_keys",
            Permission::DeleteKeys => "delete_keys",
            Permission::ExtendKeys => "extend_keys",
            Permission::ResetHwid => "reset_hwid",
            Permission::ViewLogs => "view_logs",
            Permission::ViewStats => "view_stats",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PERMISSIONS
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidRequest(format!("unknown permission: {}", s)))
    }
}

const ALL_PERMISSIONS: &[Permission] = &[
    Permission::ManageAdmins,
    Permission::ManageDistributors,
    Permission::ManageSellers,
    Permission::CreateKeys,
    Permission::ApproveKeys,
    Permission::BanKeys,
    Permission::DeleteKeys,
    Permission::ExtendKeys,
    Permission::ResetHwid,
    Permission::ViewLogs,
    Permission::ViewStats,
];

const TOP_OPERATOR_PERMISSIONS: &[Permission] = &[
    Permission::ManageAdmins,
    Permission::ManageDistributors,
    Permission::ManageSellers,
    Permission::CreateKeys,
    Permission::ApproveKeys,
    Permission::BanKeys,
    Permission::DeleteKeys,
    Permission::ExtendKeys,
    Permission::ResetHwid,
    Permission::ViewLogs,
    Permission::ViewStats,
];

const REGIONAL_ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ManageDistributors,
    Permission::ManageSellers,
    Permission::CreateKeys,
    Permission::ApproveKeys,
    Permission::BanKeys,
    Permission::DeleteKeys,
    Permission::ResetHwid,
    Permission::ViewLogs,
    Permission::ViewStats,
];

const SUB_DISTRIBUTOR_PERMISSIONS: &[Permission] = &[
    Permission::ManageSellers,
    Permission::CreateKeys,
    Permission::ApproveKeys,
    Permission::BanKeys,
    Permission::ResetHwid,
    Permission::ViewLogs,
    Permission::ViewStats,
];

const SELLER_PERMISSIONS: &[Permission] = &[
    Permission::CreateKeys,
    Permission::ViewLogs,
    Permission::ResetHwid,
];

/// The role `role` may create, if any.
pub fn subordinate_of(role: Role) -> Option<Role> {
    match role {
        Role::TopOperator => Some(Role::RegionalAdmin),
        Role::RegionalAdmin => Some(Role::SubDistributor),
        Role::SubDistributor => Some(Role::Seller),
        Role::Seller => None,
    }
}

/// True only when `target` sits exactly one level below `actor`.
pub fn can_manage(actor: Role, target: Role) -> bool {
    subordinate_of(actor) == Some(target)
}

/// Permission set held by `role`.
pub fn permissions(role: Role) -> &'static [Permission] {
    match role {
        Role::TopOperator => TOP_OPERATOR_PERMISSIONS,
        Role::RegionalAdmin => REGIONAL_ADMIN_PERMISSIONS,
        Role::SubDistributor => SUB_DISTRIBUTOR_PERMISSIONS,
        Role::Seller => SELLER_PERMISSIONS,
    }
}

/// Whether `role` holds `permission`.
pub fn has_permission(role: Role, permission: Permission) -> bool {
    permissions(role).contains(&permission)
}

/// Lookup by wire name; unknown names are never granted.
pub fn has_named_permission(role: Role, name: &str) -> bool {
    name.parse::<Permission>()
        .map(|p| has_permission(role, p))
        .unwrap_or(false)
}

/// Fail with `PermissionDenied` unless `role` holds `permission`.
pub fn require(role: Role, permission: Permission) -> Result<(), LedgerError> {
    if has_permission(role, permission) {
        Ok(())
    } else {
        Err(LedgerError::PermissionDenied {
            permission: permission.to_string(),
        })
    }
}
