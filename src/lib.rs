//! # Keyledger
//!
//! **License-key ledger for a four-level reseller hierarchy.**
//!
//! Keyledger is the engine behind a key-selling panel: a top operator,
//! regional admins, sub-distributors and sellers issue license keys that
//! end-user devices validate. Every sale owes money up the chain, and any
//! reseller who falls behind locks its own panel, its subtree, and every
//! key sold below it.
//!
//! ## Features
//!
//! - **Validation state machine** - lock chain, status, expiry and one-shot device binding
//! - **Debt cascade** - per-role unit prices billed to every ancestor below the top operator
//! - **Lock chain** - per-role grace periods counted in calendar days
//! - **Cycle-safe walks** - every ancestor walk is iterative, visited-set guarded and hop-capped
//! - **Race-free binding** - device binding and approval use conditional atomic updates
//! - **Shared rate limiting** - anonymous key generation is limited through the store
//!
//! ## Quickstart
//!
//! ```no_run
//! use keyledger::{
//!     Caller, IssueRequest, KeyCommand, LedgerConfig, LedgerManager, MemoryStore, Role,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), keyledger::LedgerError> {
//!     let manager = LedgerManager::new(LedgerConfig::default(), Arc::new(MemoryStore::new()))?;
//!
//!     let root = Caller::of(&manager.bootstrap_operator("root", "Operator")?);
//!     let admin = Caller::of(&manager.create_reseller(&root, "north", "North", Role::RegionalAdmin)?);
//!     let dist = Caller::of(&manager.create_reseller(&admin, "city", "City", Role::SubDistributor)?);
//!     let seller = Caller::of(&manager.create_reseller(&dist, "shop", "Shop", Role::Seller)?);
//!
//!     // Sellers issue pending keys; the distributor approves once paid.
//!     let receipt = manager.issue_keys(&seller, &IssueRequest::default())?;
//!     manager.execute(&dist, &receipt.keys[0], KeyCommand::Approve)?;
//!
//!     let outcome = manager.validate(&receipt.keys[0], "device-fingerprint", "203.0.113.5")?;
//!     println!("valid: {}", outcome.is_valid());
//!     Ok(())
//! }
//! ```
//!
//! ## Persistence
//!
//! The engine talks only to the [`LedgerStore`] trait. [`MemoryStore`] is
//! the reference implementation and can be snapshotted to an
//! integrity-checked JSON file through [`SnapshotFile`].
//!
//! ## Logging
//!
//! Diagnostics go through `tracing`; the embedding service installs the
//! subscriber. Integrity hazards in the reseller graph are `warn!` events.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;
pub mod model;

// Storage layer
pub mod store;

// Policy layer
pub mod policy;

// Ledger engine
pub mod ledger;

// Key validation and lifecycle
pub mod lifecycle;
pub mod validation;

// Metering layer
pub mod meter;

// Wire shapes
pub mod protocol;

// Manager (main public API)
pub mod manager;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::LedgerConfig;
pub use errors::LedgerError;
pub use lifecycle::{CommandOutcome, IssueReceipt, IssueRequest, KeyCommand};
pub use manager::{KeyFilter, KeyPage, LedgerManager, LedgerStats};
pub use model::{AuditAction, AuditEntry, Caller, License, LicenseStatus, Reseller, ResellerId, Role, Tier};
pub use policy::hierarchy::Permission;
pub use policy::lock_chain::{LockReason, LockStatus};
pub use protocol::{LoginResponse, ValidateResponse};
pub use store::{LedgerStore, MemoryStore, SnapshotFile};
pub use validation::{DaysLeft, Rejection, ValidationOutcome};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
