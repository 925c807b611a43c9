//! Ledger store: the persistence seam.
//!
//! The engine only talks to [`LedgerStore`]. Every method is a single
//! atomic step against the backing store; multi-record operations such as
//! the debt cascade are sequences of these steps, never one transaction.

pub mod memory;
pub mod snapshot;

use crate::model::{AuditEntry, License, Reseller, ResellerId};
use crate::LedgerError;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use snapshot::{Snapshot, SnapshotFile};

/// Result of a conditional device bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The key was unbound and is now bound to the presented device.
    Bound,
    /// The key was already bound; carries the existing fingerprint.
    AlreadyBound(String),
}

/// Durable storage for resellers, licenses, audit entries and rate counters.
pub trait LedgerStore: Send + Sync {
    /// Fetch a reseller by id.
    fn get_reseller(&self, id: ResellerId) -> Result<Option<Reseller>, LedgerError>;

    /// Fetch a reseller by unique username.
    fn find_reseller_by_username(&self, username: &str) -> Result<Option<Reseller>, LedgerError>;

    /// Insert a new reseller. Fails with `UsernameTaken` on a duplicate username.
    fn insert_reseller(&self, reseller: Reseller) -> Result<(), LedgerError>;

    /// Atomic read-modify-write of one reseller.
    ///
    /// If `apply` fails the record is left untouched and the error returned.
    /// Fails with `ResellerNotFound` if the id is unknown.
    fn update_reseller(
        &self,
        id: ResellerId,
        apply: &mut dyn FnMut(&mut Reseller) -> Result<(), LedgerError>,
    ) -> Result<Reseller, LedgerError>;

    /// All resellers.
    fn list_resellers(&self) -> Result<Vec<Reseller>, LedgerError>;

    /// Direct children of a reseller.
    fn children_of(&self, id: ResellerId) -> Result<Vec<Reseller>, LedgerError>;

    /// Fetch a license by exact key.
    fn get_license(&self, key: &str) -> Result<Option<License>, LedgerError>;

    /// Insert licenses, all or nothing. Fails with `KeyAlreadyExists` on any duplicate.
    fn insert_licenses(&self, licenses: Vec<License>) -> Result<(), LedgerError>;

    /// Atomic read-modify-write of one license.
    ///
    /// Same contract as [`LedgerStore::update_reseller`]; unknown keys fail
    /// with `LicenseNotFound`.
    fn update_license(
        &self,
        key: &str,
        apply: &mut dyn FnMut(&mut License) -> Result<(), LedgerError>,
    ) -> Result<License, LedgerError>;

    /// Remove a license, returning it if it existed.
    fn delete_license(&self, key: &str) -> Result<Option<License>, LedgerError>;

    /// All licenses.
    fn list_licenses(&self) -> Result<Vec<License>, LedgerError>;

    /// Append an audit entry.
    fn append_audit(&self, entry: AuditEntry) -> Result<(), LedgerError>;

    /// Audit entries for a key, newest first.
    fn audit_for_key(&self, key: &str) -> Result<Vec<AuditEntry>, LedgerError>;

    /// Increment the fixed-window counter `bucket` and return the new count.
    ///
    /// A counter whose stored window differs from `window_start` restarts at zero.
    fn hit_counter(&self, bucket: &str, window_start: DateTime<Utc>) -> Result<u64, LedgerError>;

    /// Bind `hwid` only if the key is currently unbound.
    ///
    /// The check and the write happen inside one atomic update, so two
    /// devices racing to activate the same key cannot both win.
    fn bind_hwid(&self, key: &str, hwid: &str) -> Result<BindOutcome, LedgerError> {
        let mut outcome = BindOutcome::Bound;
        self.update_license(key, &mut |license| {
            match &license.hwid {
                Some(existing) => outcome = BindOutcome::AlreadyBound(existing.clone()),
                None => {
                    license.hwid = Some(hwid.to_string());
                    outcome = BindOutcome::Bound;
                }
            }
            Ok(())
        })?;
        Ok(outcome)
    }
}

/// Append an audit entry, logging instead of failing if the write is refused.
pub fn record_audit(store: &dyn LedgerStore, entry: AuditEntry) {
    let action = entry.action;
    if let Err(e) = store.append_audit(entry) {
        tracing::warn!(?action, error = %e, "audit write failed");
    }
}
