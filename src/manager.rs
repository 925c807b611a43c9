//! Ledger manager - the main public API for Keyledger.
//!
//! The `LedgerManager` ties the layers together for a request handler:
//! - Key validation for client devices
//! - Login lock checks for reseller panels
//! - Key issuance and named key commands
//! - Payments and reseller administration
//! - Read-side queries over the caller's subtree

use crate::clock::{business_date, Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::ledger::cascade::{DebtCascade, PaymentReceipt};
use crate::ledger::scope::{descendants, require_key_scope, require_reseller_scope, subtree_ids};
use crate::lifecycle::{CommandOutcome, IssueReceipt, IssueRequest, Issuer, KeyCommand, KeyLifecycle};
use crate::model::{
    AuditAction, AuditEntry, Caller, License, LicenseStatus, Reseller, ResellerId, Role, Tier,
};
use crate::policy::hierarchy::{can_manage, require, Permission};
use crate::policy::lock_chain::LockChainEvaluator;
use crate::protocol::{LoginResponse, ValidateResponse};
use crate::store::{record_audit, LedgerStore};
use crate::validation::{ValidateRequest, ValidationOutcome, Validator};
use crate::LedgerError;
use std::collections::HashMap;
use std::sync::Arc;

/// Most keys returned by one listing.
pub const KEY_LIST_LIMIT: usize = 200;

/// Filter for [`LedgerManager::keys_in_scope`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    /// Only keys in this status.
    pub status: Option<LicenseStatus>,
    /// Only keys of this tier.
    pub tier: Option<Tier>,
    /// Case-insensitive substring of the key.
    pub search: Option<String>,
}

impl KeyFilter {
    fn matches(&self, license: &License) -> bool {
        self.status.map_or(true, |s| license.status == s)
            && self.tier.map_or(true, |t| license.tier == t)
            && self.search.as_ref().map_or(true, |needle| {
                license.key.to_lowercase().contains(&needle.to_lowercase())
            })
    }
}

/// One page of keys.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPage {
    /// Matching keys, newest first, at most [`KEY_LIST_LIMIT`].
    pub keys: Vec<License>,
    /// Matching keys before the limit was applied.
    pub total: usize,
}

/// Dashboard aggregates for a caller's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    /// Keys per status, in [`LicenseStatus::ALL`] order.
    pub keys_by_status: Vec<(LicenseStatus, u64)>,
    /// Resellers below the caller per role, in [`Role::ALL`] order.
    pub resellers_by_role: Vec<(Role, u64)>,
    /// Keys in scope.
    pub total_keys: u64,
    /// Sum of outstanding balances below the caller.
    pub payment_due_total: i64,
    /// Keys issued today by the caller and everyone below it.
    pub today_sold: u64,
    /// Keys marked paid today by the caller and everyone below it.
    pub today_paid: u64,
}

/// Main entry point for Keyledger.
///
/// Create one instance per process and share it; all state lives in the
/// store, so several instances over one store behave as one.
pub struct LedgerManager {
    config: LedgerConfig,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl LedgerManager {
    /// Create a manager over `store` using the system clock.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: LedgerConfig, store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock (deterministic time in tests).
    pub fn with_clock(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            clock,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Underlying store.
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    // ----- validation ---------------------------------------------------

    /// Validate a key for a client device.
    ///
    /// # Errors
    /// Only store failures; refusals are reported in the outcome.
    pub fn validate(&self, key: &str, hwid: &str, ip: &str) -> Result<ValidationOutcome, LedgerError> {
        let req = ValidateRequest { key, hwid, ip };
        Validator::new(self.store.as_ref(), &self.config, self.clock.as_ref()).validate(&req)
    }

    /// Validate and render the client response body.
    ///
    /// Store failures become a generic failure body rather than an error.
    pub fn validate_response(&self, key: &str, hwid: &str, ip: &str) -> ValidateResponse {
        match self.validate(key, hwid, ip) {
            Ok(outcome) => ValidateResponse::from_outcome(&outcome, &self.config),
            Err(e) => {
                tracing::error!(error = %e, "validation failed");
                ValidateResponse::failure("Server error", &self.config)
            }
        }
    }

    // ----- login --------------------------------------------------------

    /// Lock status for an authenticated reseller's panel.
    ///
    /// Recomputes the lock chain and caches the result on the reseller's
    /// `is_locked` flag, together with the login time.
    pub fn login_status(&self, reseller_id: ResellerId) -> Result<LoginResponse, LedgerError> {
        if self.store.get_reseller(reseller_id)?.is_none() {
            return Err(LedgerError::ResellerNotFound(reseller_id.to_string()));
        }
        let lock = LockChainEvaluator::new(self.store.as_ref(), &self.config, self.clock.as_ref())
            .evaluate(reseller_id)?;

        let now = self.clock.now_utc();
        let reseller = self.store.update_reseller(reseller_id, &mut |r| {
            r.is_locked = lock.locked;
            r.last_login_at = Some(now);
            Ok(())
        })?;

        if lock.locked {
            tracing::info!(reseller = %reseller.username, reason = ?lock.reason, "panel locked");
        }
        Ok(LoginResponse::new(&reseller, &lock))
    }

    /// [`LedgerManager::login_status`] for a reseller identified by username.
    pub fn login_by_username(&self, username: &str) -> Result<LoginResponse, LedgerError> {
        let reseller = self
            .store
            .find_reseller_by_username(username.trim())?
            .ok_or_else(|| LedgerError::ResellerNotFound(username.to_string()))?;
        self.login_status(reseller.id)
    }

    // ----- keys ---------------------------------------------------------

    /// Issue keys owned by the caller.
    pub fn issue_keys(&self, caller: &Caller, req: &IssueRequest) -> Result<IssueReceipt, LedgerError> {
        self.issuer().issue(caller, req)
    }

    /// Run a named command on a key.
    pub fn execute(
        &self,
        caller: &Caller,
        key: &str,
        command: KeyCommand,
    ) -> Result<CommandOutcome, LedgerError> {
        KeyLifecycle::new(self.store.as_ref(), &self.config, self.clock.as_ref()).execute(caller, key, command)
    }

    /// Anonymous self-service key, rate limited per caller address.
    pub fn generate_public_key(&self, name: &str, ip: &str) -> Result<License, LedgerError> {
        self.issuer().generate_public(name, ip)
    }

    fn issuer(&self) -> Issuer<'_> {
        Issuer::new(self.store.as_ref(), &self.config, self.clock.as_ref())
    }

    // ----- payments -----------------------------------------------------

    /// Record a payment against a reseller's balance.
    ///
    /// The caller must be the top operator or an ancestor of the target.
    pub fn add_payment(
        &self,
        caller: &Caller,
        reseller_id: ResellerId,
        amount: i64,
    ) -> Result<PaymentReceipt, LedgerError> {
        if self.store.get_reseller(reseller_id)?.is_none() {
            return Err(LedgerError::ResellerNotFound(reseller_id.to_string()));
        }
        require_reseller_scope(self.store.as_ref(), caller, reseller_id, self.config.max_chain_hops)?;

        let receipt = DebtCascade::new(self.store.as_ref(), &self.config, self.clock.as_ref())
            .on_payment_received(reseller_id, amount)?;

        let mut details = format!("Balance now {}", receipt.reseller.payment_due);
        if receipt.surplus > 0 {
            details.push_str(&format!(", surplus {} discarded", receipt.surplus));
        }
        record_audit(
            self.store.as_ref(),
            AuditEntry::new(AuditAction::Paid, self.clock.now_utc())
                .by(caller.reseller_id)
                .target(reseller_id)
                .amount(amount)
                .details(details),
        );
        tracing::info!(
            reseller = %receipt.reseller.username,
            amount,
            balance = receipt.reseller.payment_due,
            "payment recorded"
        );
        Ok(receipt)
    }

    // ----- resellers ----------------------------------------------------

    /// Create the single top operator. Refused once one exists.
    pub fn bootstrap_operator(&self, username: &str, display_name: &str) -> Result<Reseller, LedgerError> {
        if self
            .store
            .list_resellers()?
            .iter()
            .any(|r| r.role.is_top())
        {
            return Err(LedgerError::InvalidRequest(
                "a top operator already exists".to_string(),
            ));
        }
        let operator = Reseller::new(
            validate_username(username)?,
            display_name,
            Role::TopOperator,
            None,
            self.clock.now_utc(),
        );
        self.store.insert_reseller(operator.clone())?;
        tracing::info!(username = %operator.username, "top operator created");
        Ok(operator)
    }

    /// Create a reseller exactly one level below the caller.
    pub fn create_reseller(
        &self,
        caller: &Caller,
        username: &str,
        display_name: &str,
        role: Role,
    ) -> Result<Reseller, LedgerError> {
        if !can_manage(caller.role, role) {
            return Err(LedgerError::CannotManageRole {
                actor: caller.role,
                target: role,
            });
        }
        let now = self.clock.now_utc();
        let reseller = Reseller::new(
            validate_username(username)?,
            display_name,
            role,
            Some(caller.reseller_id),
            now,
        );
        self.store.insert_reseller(reseller.clone())?;

        record_audit(
            self.store.as_ref(),
            AuditEntry::new(AuditAction::ResellerCreated, now)
                .by(caller.reseller_id)
                .target(reseller.id)
                .details(format!("{} {} created", role, reseller.username)),
        );
        Ok(reseller)
    }

    /// Activate or deactivate a reseller below the caller.
    ///
    /// A deactivated reseller locks its own panel and every key and panel below it.
    pub fn set_reseller_active(
        &self,
        caller: &Caller,
        target: ResellerId,
        active: bool,
    ) -> Result<Reseller, LedgerError> {
        let action = if active {
            AuditAction::ResellerActivated
        } else {
            AuditAction::ResellerDeactivated
        };
        self.update_managed(caller, target, action, &mut |r| {
            r.is_active = active;
            Ok(())
        })
    }

    /// Ban or unban a reseller below the caller. Banned resellers cannot log in.
    pub fn set_reseller_banned(
        &self,
        caller: &Caller,
        target: ResellerId,
        banned: bool,
    ) -> Result<Reseller, LedgerError> {
        let action = if banned {
            AuditAction::ResellerBanned
        } else {
            AuditAction::ResellerUnbanned
        };
        self.update_managed(caller, target, action, &mut |r| {
            r.is_banned = banned;
            Ok(())
        })
    }

    fn update_managed(
        &self,
        caller: &Caller,
        target: ResellerId,
        action: AuditAction,
        apply: &mut dyn FnMut(&mut Reseller) -> Result<(), LedgerError>,
    ) -> Result<Reseller, LedgerError> {
        if self.store.get_reseller(target)?.is_none() {
            return Err(LedgerError::ResellerNotFound(target.to_string()));
        }
        require_reseller_scope(self.store.as_ref(), caller, target, self.config.max_chain_hops)?;
        let reseller = self.store.update_reseller(target, apply)?;
        record_audit(
            self.store.as_ref(),
            AuditEntry::new(action, self.clock.now_utc())
                .by(caller.reseller_id)
                .target(target),
        );
        Ok(reseller)
    }

    // ----- read side ----------------------------------------------------

    /// Keys created by the caller or anyone below it, newest first.
    ///
    /// The top operator sees every key, including self-service ones.
    pub fn keys_in_scope(&self, caller: &Caller, filter: &KeyFilter) -> Result<KeyPage, LedgerError> {
        let mut keys = self.scoped_licenses(caller)?;
        keys.retain(|l| filter.matches(l));
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));
        let total = keys.len();
        keys.truncate(KEY_LIST_LIMIT);
        Ok(KeyPage { keys, total })
    }

    /// Aggregates over the caller's subtree.
    pub fn stats(&self, caller: &Caller) -> Result<LedgerStats, LedgerError> {
        require(caller.role, Permission::ViewStats)?;
        let keys = self.scoped_licenses(caller)?;
        let below = descendants(self.store.as_ref(), caller.reseller_id)?;
        let own = self
            .store
            .get_reseller(caller.reseller_id)?
            .ok_or_else(|| LedgerError::ResellerNotFound(caller.reseller_id.to_string()))?;
        let today = business_date(self.clock.now_utc(), self.config.utc_offset_minutes);

        let mut by_status: HashMap<LicenseStatus, u64> = HashMap::new();
        for l in &keys {
            *by_status.entry(l.status).or_default() += 1;
        }
        let mut by_role: HashMap<Role, u64> = HashMap::new();
        for r in &below {
            *by_role.entry(r.role).or_default() += 1;
        }

        Ok(LedgerStats {
            keys_by_status: LicenseStatus::ALL
                .iter()
                .map(|s| (*s, by_status.get(s).copied().unwrap_or(0)))
                .collect(),
            resellers_by_role: Role::ALL
                .iter()
                .map(|r| (*r, by_role.get(r).copied().unwrap_or(0)))
                .collect(),
            total_keys: keys.len() as u64,
            payment_due_total: below.iter().map(|r| r.payment_due.max(0)).sum(),
            today_sold: below.iter().chain([&own]).map(|r| r.sold_on(today)).sum(),
            today_paid: below.iter().chain([&own]).map(|r| r.paid_on(today)).sum(),
        })
    }

    /// Audit trail for a key, newest first.
    ///
    /// Trails of deleted keys are visible to the top operator only.
    pub fn audit_for_key(&self, caller: &Caller, key: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        require(caller.role, Permission::ViewLogs)?;
        match self.store.get_license(key)? {
            Some(license) => {
                require_key_scope(self.store.as_ref(), caller, &license, self.config.max_chain_hops)?
            }
            None if caller.role.is_top() => {}
            None => return Err(LedgerError::LicenseNotFound(key.to_string())),
        }
        self.store.audit_for_key(key)
    }

    /// Recompute every reseller's sale counters from the key collection.
    ///
    /// Balances are left alone. Returns the number of resellers updated.
    pub fn reconcile_counters(&self, caller: &Caller) -> Result<usize, LedgerError> {
        if !caller.role.is_top() {
            return Err(LedgerError::PermissionDenied {
                permission: "reconcile_counters".to_string(),
            });
        }
        let now = self.clock.now_utc();
        let today = business_date(now, self.config.utc_offset_minutes);

        #[derive(Default)]
        struct Tally {
            sold: u64,
            unpaid: u64,
            today: u64,
        }
        let mut tallies: HashMap<ResellerId, Tally> = HashMap::new();
        for l in self.store.list_licenses()? {
            let Some(creator) = l.created_by else { continue };
            let t = tallies.entry(creator).or_default();
            t.sold += 1;
            if !l.is_paid() {
                t.unpaid += 1;
            }
            if business_date(l.created_at, self.config.utc_offset_minutes) == today {
                t.today += 1;
            }
        }

        let resellers = self.store.list_resellers()?;
        for r in &resellers {
            let t = tallies.remove(&r.id).unwrap_or_default();
            self.store.update_reseller(r.id, &mut |rec| {
                rec.roll_daily(today);
                rec.total_sold = t.sold;
                rec.total_unpaid = t.unpaid;
                rec.total_paid = t.sold - t.unpaid;
                rec.today_sold = t.today;
                Ok(())
            })?;
        }

        record_audit(
            self.store.as_ref(),
            AuditEntry::new(AuditAction::CountersReconciled, now)
                .by(caller.reseller_id)
                .details(format!("{} resellers reconciled", resellers.len())),
        );
        tracing::info!(resellers = resellers.len(), "counters reconciled");
        Ok(resellers.len())
    }

    fn scoped_licenses(&self, caller: &Caller) -> Result<Vec<License>, LedgerError> {
        let all = self.store.list_licenses()?;
        if caller.role.is_top() {
            return Ok(all);
        }
        let ids = subtree_ids(self.store.as_ref(), caller.reseller_id)?;
        Ok(all
            .into_iter()
            .filter(|l| l.created_by.is_some_and(|c| ids.contains(&c)))
            .collect())
    }
}

fn validate_username(username: &str) -> Result<&str, LedgerError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "username cannot be empty".to_string(),
        ));
    }
    Ok(trimmed)
}
