//! Ledger data model: resellers, license keys and audit entries.

pub mod audit;
pub mod license;
pub mod reseller;

pub use audit::{AuditAction, AuditEntry};
pub use license::{License, LicenseStatus, Tier};
pub use reseller::{Caller, Reseller, ResellerId, Role};
