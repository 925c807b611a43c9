//! In-process ledger store guarded by a single `RwLock`.
//!
//! Every trait method takes the lock once, which makes each primitive
//! atomic. Snapshots can be taken and restored for file persistence.

use super::snapshot::{CounterRecord, Snapshot};
use super::LedgerStore;
use crate::model::{AuditEntry, License, Reseller, ResellerId};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    resellers: HashMap<ResellerId, Reseller>,
    licenses: HashMap<String, License>,
    audit: Vec<AuditEntry>,
    counters: HashMap<String, (DateTime<Utc>, u64)>,
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let tables = Tables {
            resellers: snapshot
                .resellers
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            licenses: snapshot
                .licenses
                .into_iter()
                .map(|l| (l.key.clone(), l))
                .collect(),
            audit: snapshot.audit,
            counters: snapshot
                .counters
                .into_iter()
                .map(|c| (c.bucket, (c.window_start, c.count)))
                .collect(),
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Capture the current contents as a snapshot.
    pub fn snapshot(&self) -> Result<Snapshot, LedgerError> {
        let tables = self.read()?;
        let mut resellers: Vec<Reseller> = tables.resellers.values().cloned().collect();
        resellers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut licenses: Vec<License> = tables.licenses.values().cloned().collect();
        licenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        let mut counters: Vec<CounterRecord> = tables
            .counters
            .iter()
            .map(|(bucket, (window_start, count))| CounterRecord {
                bucket: bucket.clone(),
                window_start: *window_start,
                count: *count,
            })
            .collect();
        counters.sort_by(|a, b| a.bucket.cmp(&b.bucket));

        Ok(Snapshot::new(
            resellers,
            licenses,
            tables.audit.clone(),
            counters,
        ))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, LedgerError> {
        self.tables
            .read()
            .map_err(|_| LedgerError::Store("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, LedgerError> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Store("ledger lock poisoned".to_string()))
    }
}

impl LedgerStore for MemoryStore {
    fn get_reseller(&self, id: ResellerId) -> Result<Option<Reseller>, LedgerError> {
        Ok(self.read()?.resellers.get(&id).cloned())
    }

    fn find_reseller_by_username(&self, username: &str) -> Result<Option<Reseller>, LedgerError> {
        Ok(self
            .read()?
            .resellers
            .values()
            .find(|r| r.username == username)
            .cloned())
    }

    fn insert_reseller(&self, reseller: Reseller) -> Result<(), LedgerError> {
        let mut tables = self.write()?;
        if tables
            .resellers
            .values()
            .any(|r| r.username == reseller.username)
        {
            return Err(LedgerError::UsernameTaken(reseller.username));
        }
        tables.resellers.insert(reseller.id, reseller);
        Ok(())
    }

    fn update_reseller(
        &self,
        id: ResellerId,
        apply: &mut dyn FnMut(&mut Reseller) -> Result<(), LedgerError>,
    ) -> Result<Reseller, LedgerError> {
        let mut tables = self.write()?;
        let slot = tables
            .resellers
            .get_mut(&id)
            .ok_or_else(|| LedgerError::ResellerNotFound(id.to_string()))?;
        let mut updated = slot.clone();
        apply(&mut updated)?;
        *slot = updated.clone();
        Ok(updated)
    }

    fn list_resellers(&self) -> Result<Vec<Reseller>, LedgerError> {
        Ok(self.read()?.resellers.values().cloned().collect())
    }

    fn children_of(&self, id: ResellerId) -> Result<Vec<Reseller>, LedgerError> {
        Ok(self
            .read()?
            .resellers
            .values()
            .filter(|r| r.created_by == Some(id))
            .cloned()
            .collect())
    }

    fn get_license(&self, key: &str) -> Result<Option<License>, LedgerError> {
        Ok(self.read()?.licenses.get(key).cloned())
    }

    fn insert_licenses(&self, licenses: Vec<License>) -> Result<(), LedgerError> {
        let mut tables = self.write()?;
        let mut seen = std::collections::HashSet::new();
        for license in &licenses {
            if tables.licenses.contains_key(&license.key) || !seen.insert(license.key.as_str()) {
                return Err(LedgerError::KeyAlreadyExists(license.key.clone()));
            }
        }
        for license in licenses {
            tables.licenses.insert(license.key.clone(), license);
        }
        Ok(())
    }

    fn update_license(
        &self,
        key: &str,
        apply: &mut dyn FnMut(&mut License) -> Result<(), LedgerError>,
    ) -> Result<License, LedgerError> {
        let mut tables = self.write()?;
        let slot = tables
            .licenses
            .get_mut(key)
            .ok_or_else(|| LedgerError::LicenseNotFound(key.to_string()))?;
        let mut updated = slot.clone();
        apply(&mut updated)?;
        *slot = updated.clone();
        Ok(updated)
    }

    fn delete_license(&self, key: &str) -> Result<Option<License>, LedgerError> {
        Ok(self.write()?.licenses.remove(key))
    }

    fn list_licenses(&self) -> Result<Vec<License>, LedgerError> {
        Ok(self.read()?.licenses.values().cloned().collect())
    }

    fn append_audit(&self, entry: AuditEntry) -> Result<(), LedgerError> {
        self.write()?.audit.push(entry);
        Ok(())
    }

    fn audit_for_key(&self, key: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self
            .read()?
            .audit
            .iter()
            .rev()
            .filter(|e| e.license_key.as_deref() == Some(key))
            .cloned()
            .collect())
    }

    fn hit_counter(&self, bucket: &str, window_start: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut tables = self.write()?;
        let entry = tables
            .counters
            .entry(bucket.to_string())
            .or_insert((window_start, 0));
        if entry.0 != window_start {
            *entry = (window_start, 0);
        }
        entry.1 += 1;
        Ok(entry.1)
    }
}
