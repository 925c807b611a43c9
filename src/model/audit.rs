//! Append-only audit records.

use super::reseller::ResellerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an audit entry records. Serialized as `snake_case` action names.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ValidateInvalid,
    ValidateLocked,
    ValidateBanned,
    ValidatePending,
    ValidateInactive,
    ValidateExpired,
    ValidateSuccess,
    HwidBound,
    HwidMismatch,
    HwidReset,
    KeysIssued,
    KeyGenerated,
    KeyPaid,
    RenewRequest,
    KeyExtended,
    KeyBanned,
    KeyUnbanned,
    KeyDeleted,
    Paid,
    ResellerCreated,
    ResellerActivated,
    ResellerDeactivated,
    ResellerBanned,
    ResellerUnbanned,
    CountersReconciled,
}

/// One audit record. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Key the entry concerns, if any.
    pub license_key: Option<String>,
    /// Recorded action.
    pub action: AuditAction,
    /// Reseller that triggered the action.
    pub performed_by: Option<ResellerId>,
    /// Reseller the action targeted.
    pub target_user: Option<ResellerId>,
    /// Money involved, if any.
    pub amount: Option<i64>,
    /// Caller address.
    pub ip: String,
    /// Device fingerprint presented or bound.
    pub hwid: String,
    /// Free-form details for support triage.
    pub details: String,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Start an entry for `action` at `now` with every optional field empty.
    pub fn new(action: AuditAction, now: DateTime<Utc>) -> Self {
        Self {
            license_key: None,
            action,
            performed_by: None,
            target_user: None,
            amount: None,
            ip: String::new(),
            hwid: String::new(),
            details: String::new(),
            created_at: now,
        }
    }

    /// Attach the license key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.license_key = Some(key.into());
        self
    }

    /// Attach the acting reseller.
    pub fn by(mut self, actor: ResellerId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    /// Attach the targeted reseller.
    pub fn target(mut self, target: ResellerId) -> Self {
        self.target_user = Some(target);
        self
    }

    /// Attach an amount.
    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Attach the caller address.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Attach a device fingerprint.
    pub fn hwid(mut self, hwid: impl Into<String>) -> Self {
        self.hwid = hwid.into();
        self
    }

    /// Attach details.
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}
