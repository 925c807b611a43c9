//! Named key commands.
//!
//! Each command has its own permission, preconditions and effects; the
//! dispatcher checks permission and scope once, then hands off.

use crate::clock::{add_days, Clock};
use crate::config::{LedgerConfig, MAX_VALIDITY_DAYS};
use crate::ledger::cascade::{CascadeReport, DebtCascade};
use crate::ledger::scope::require_key_scope;
use crate::model::{AuditAction, AuditEntry, Caller, License, LicenseStatus};
use crate::policy::hierarchy::{require, Permission};
use crate::store::{record_audit, LedgerStore};
use crate::validation::reset_device;
use crate::LedgerError;

/// An administrative action on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Mark an unpaid key as paid and bill the chain.
    Approve,
    /// Add validity and mark the key unpaid again.
    Renew,
    /// Clear the device binding.
    ResetDevice,
    /// Block the key.
    Ban,
    /// Lift a ban.
    Unban,
    /// Remove the key.
    Delete,
    /// Add days of validity without touching payment state.
    Extend {
        /// Days to add; must be positive.
        days: i64,
    },
}

impl KeyCommand {
    /// Permission the caller's role must hold.
    pub fn permission(self) -> Permission {
        match self {
            KeyCommand::Approve => Permission::ApproveKeys,
            KeyCommand::Renew => Permission::CreateKeys,
            KeyCommand::ResetDevice => Permission::ResetHwid,
            KeyCommand::Ban | KeyCommand::Unban => Permission::BanKeys,
            KeyCommand::Delete => Permission::DeleteKeys,
            KeyCommand::Extend { .. } => Permission::ExtendKeys,
        }
    }
}

/// Result of a key command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The key was approved; carries the debt added.
    Approved {
        /// Key after approval.
        license: License,
        /// Debt cascade applied.
        cascade: CascadeReport,
    },
    /// The key was changed.
    Updated(License),
    /// The key was removed.
    Deleted(License),
}

impl CommandOutcome {
    /// The key as it stands after the command (or as it was, if deleted).
    pub fn license(&self) -> &License {
        match self {
            CommandOutcome::Approved { license, .. } => license,
            CommandOutcome::Updated(license) | CommandOutcome::Deleted(license) => license,
        }
    }
}

/// Runs key commands.
pub struct KeyLifecycle<'a> {
    store: &'a dyn LedgerStore,
    config: &'a LedgerConfig,
    clock: &'a dyn Clock,
}

impl<'a> KeyLifecycle<'a> {
    /// Create a command runner.
    pub fn new(store: &'a dyn LedgerStore, config: &'a LedgerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Run `command` on `key` for `caller`.
    ///
    /// # Errors
    /// - `PermissionDenied` if the caller's role lacks the command's permission
    /// - `LicenseNotFound` if the key does not exist
    /// - `OutOfScope` if the key is outside the caller's subtree
    /// - command-specific errors (`AlreadyApproved`, `HwidResetLimit`, ...)
    pub fn execute(
        &self,
        caller: &Caller,
        key: &str,
        command: KeyCommand,
    ) -> Result<CommandOutcome, LedgerError> {
        require(caller.role, command.permission())?;
        let license = self
            .store
            .get_license(key)?
            .ok_or_else(|| LedgerError::LicenseNotFound(key.to_string()))?;
        require_key_scope(self.store, caller, &license, self.config.max_chain_hops)?;

        match command {
            KeyCommand::Approve => self.approve(caller, key),
            KeyCommand::Renew => self.renew(caller, key),
            KeyCommand::ResetDevice => self.reset_binding(caller, &license),
            KeyCommand::Ban => self.ban(caller, key),
            KeyCommand::Unban => self.unban(caller, key),
            KeyCommand::Delete => self.delete(caller, key),
            KeyCommand::Extend { days } => self.extend(caller, key, days),
        }
    }

    fn approve(&self, caller: &Caller, key: &str) -> Result<CommandOutcome, LedgerError> {
        let now = self.clock.now_utc();
        let min_expiry = add_days(now, self.config.approval_min_validity_days)?;
        let approver = caller.reseller_id;
        let mut bumped = false;

        // The approved_by check and the write are one atomic step, so two
        // concurrent approvals cannot both bill the chain.
        let license = self.store.update_license(key, &mut |l| {
            if l.approved_by.is_some() {
                return Err(LedgerError::AlreadyApproved(l.key.clone()));
            }
            l.approved_by = Some(approver);
            if matches!(l.status, LicenseStatus::Pending | LicenseStatus::Expired) {
                l.status = LicenseStatus::Active;
            }
            bumped = l.expires_at.is_some_and(|at| at < min_expiry);
            if bumped {
                l.expires_at = Some(min_expiry);
            }
            Ok(())
        })?;

        let cascade = DebtCascade::new(self.store, self.config, self.clock).on_key_approved(&license)?;

        let details = if bumped {
            format!("Marked paid. Validity ensured to {}", min_expiry.format("%Y-%m-%d"))
        } else {
            "Marked paid. Validity maintained.".to_string()
        };
        let mut entry = AuditEntry::new(AuditAction::KeyPaid, now)
            .key(key)
            .by(approver)
            .hwid(license.hwid.clone().unwrap_or_default())
            .details(details);
        if let Some((_, amount)) = cascade.billed.first() {
            entry = entry.amount(*amount);
        }
        record_audit(self.store, entry);

        Ok(CommandOutcome::Approved { license, cascade })
    }

    fn renew(&self, caller: &Caller, key: &str) -> Result<CommandOutcome, LedgerError> {
        let now = self.clock.now_utc();
        let renewal_days = self.config.renewal_days;

        let license = self.store.update_license(key, &mut |l| {
            if l.status == LicenseStatus::Banned {
                return Err(LedgerError::InvalidRequest(format!(
                    "banned key {} cannot be renewed",
                    l.key
                )));
            }
            let base = l.expires_at.filter(|at| *at > now).unwrap_or(now);
            l.expires_at = Some(add_days(base, renewal_days)?);
            l.approved_by = None;
            l.status = LicenseStatus::Active;
            Ok(())
        })?;

        DebtCascade::new(self.store, self.config, self.clock).on_key_renewed(&license)?;

        let expiry = license.expires_at.map(|at| at.format("%Y-%m-%d").to_string()).unwrap_or_default();
        record_audit(
            self.store,
            AuditEntry::new(AuditAction::RenewRequest, now)
                .key(key)
                .by(caller.reseller_id)
                .hwid(license.hwid.clone().unwrap_or_default())
                .details(format!(
                    "{} days added, key is now unpaid. New expiry: {}",
                    self.config.renewal_days, expiry
                )),
        );
        Ok(CommandOutcome::Updated(license))
    }

    fn reset_binding(&self, caller: &Caller, before: &License) -> Result<CommandOutcome, LedgerError> {
        let license = reset_device(self.store, &before.key, caller.role.is_top())?;
        record_audit(
            self.store,
            AuditEntry::new(AuditAction::HwidReset, self.clock.now_utc())
                .key(before.key.clone())
                .by(caller.reseller_id)
                .hwid(before.hwid.clone().unwrap_or_default())
                .details(format!(
                    "Reset by {}. Resets: {}/{}",
                    caller.role, license.hwid_resets_used, license.max_hwid_resets
                )),
        );
        Ok(CommandOutcome::Updated(license))
    }

    fn ban(&self, caller: &Caller, key: &str) -> Result<CommandOutcome, LedgerError> {
        let license = self.store.update_license(key, &mut |l| {
            l.status = LicenseStatus::Banned;
            Ok(())
        })?;
        self.audit(caller, key, AuditAction::KeyBanned, String::new());
        Ok(CommandOutcome::Updated(license))
    }

    fn unban(&self, caller: &Caller, key: &str) -> Result<CommandOutcome, LedgerError> {
        let license = self.store.update_license(key, &mut |l| {
            if l.status != LicenseStatus::Banned {
                return Err(LedgerError::InvalidRequest(format!("key {} is not banned", l.key)));
            }
            l.status = if l.is_paid() || l.is_cascade_exempt() {
                LicenseStatus::Active
            } else {
                LicenseStatus::Pending
            };
            Ok(())
        })?;
        self.audit(
            caller,
            key,
            AuditAction::KeyUnbanned,
            format!("Restored as {}", license.status),
        );
        Ok(CommandOutcome::Updated(license))
    }

    fn delete(&self, caller: &Caller, key: &str) -> Result<CommandOutcome, LedgerError> {
        let license = self
            .store
            .delete_license(key)?
            .ok_or_else(|| LedgerError::LicenseNotFound(key.to_string()))?;
        self.audit(caller, key, AuditAction::KeyDeleted, String::new());
        Ok(CommandOutcome::Deleted(license))
    }

    fn extend(&self, caller: &Caller, key: &str, days: i64) -> Result<CommandOutcome, LedgerError> {
        if !(1..=MAX_VALIDITY_DAYS).contains(&days) {
            return Err(LedgerError::InvalidRequest(format!(
                "extension must be between 1 and {} days, got {}",
                MAX_VALIDITY_DAYS, days
            )));
        }
        let now = self.clock.now_utc();
        let license = self.store.update_license(key, &mut |l| {
            let base = l.expires_at.unwrap_or(now).max(now);
            l.expires_at = Some(add_days(base, days)?);
            if l.status == LicenseStatus::Expired {
                l.status = LicenseStatus::Active;
            }
            Ok(())
        })?;
        let expiry = license.expires_at.map(|at| at.to_rfc3339()).unwrap_or_default();
        self.audit(
            caller,
            key,
            AuditAction::KeyExtended,
            format!("Extended by {} days. New expiry: {}", days, expiry),
        );
        Ok(CommandOutcome::Updated(license))
    }

    fn audit(&self, caller: &Caller, key: &str, action: AuditAction, details: String) {
        record_audit(
            self.store,
            AuditEntry::new(action, self.clock.now_utc())
                .key(key)
                .by(caller.reseller_id)
                .details(details),
        );
    }
}
