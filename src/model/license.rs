//! License keys and their lifecycle state.

use super::reseller::ResellerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// Issued by a seller, awaiting payment through the reseller chain.
    Pending,
    /// Usable.
    Active,
    /// Past its expiry; set by the validation that discovers it.
    Expired,
    /// Blocked by an administrator.
    Banned,
    /// Disabled by an administrator.
    Inactive,
}

impl LicenseStatus {
    /// All statuses, in display order.
    pub const ALL: [LicenseStatus; 5] = [
        LicenseStatus::Pending,
        LicenseStatus::Active,
        LicenseStatus::Expired,
        LicenseStatus::Banned,
        LicenseStatus::Inactive,
    ];
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LicenseStatus::Pending => "pending",
            LicenseStatus::Active => "active",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Banned => "banned",
            LicenseStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Informational classification; no engine logic depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Entry tier.
    #[default]
    Basic,
    /// Mid tier.
    Pro,
    /// Full tier.
    Ultimate,
}

/// A sellable license key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    /// The key string; unique.
    pub key: String,
    /// Lifecycle state.
    pub status: LicenseStatus,
    /// Classification.
    pub tier: Tier,
    /// Bound device fingerprint.
    pub hwid: Option<String>,
    /// Device resets consumed.
    pub hwid_resets_used: u32,
    /// Device reset quota.
    pub max_hwid_resets: u32,
    /// Absolute expiry; `None` is unlimited.
    pub expires_at: Option<DateTime<Utc>>,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Owning reseller; `None` for self-service keys.
    pub created_by: Option<ResellerId>,
    /// Set once the key's price has been collected.
    pub approved_by: Option<ResellerId>,
    /// Last successful validation.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Caller address of the last successful validation.
    pub last_used_ip: Option<String>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
}

impl License {
    /// Create a pending, unbound key.
    pub fn new(
        key: impl Into<String>,
        tier: Tier,
        created_by: Option<ResellerId>,
        max_hwid_resets: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            status: LicenseStatus::Pending,
            tier,
            hwid: None,
            hwid_resets_used: 0,
            max_hwid_resets,
            expires_at: None,
            created_at: now,
            created_by,
            approved_by: None,
            last_used_at: None,
            last_used_ip: None,
            notes: String::new(),
        }
    }

    /// Whether the key's price has been collected.
    pub fn is_paid(&self) -> bool {
        self.approved_by.is_some()
    }

    /// Keys without an owner never touch the debt cascade.
    pub fn is_cascade_exempt(&self) -> bool {
        self.created_by.is_none()
    }

    /// Whether the expiry lies strictly before `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether another device reset is within quota.
    pub fn has_reset_quota(&self) -> bool {
        self.hwid_resets_used < self.max_hwid_resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn new_license_is_pending_and_unbound() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let lic = License::new("KEY-AAAA", Tier::Pro, Some(ResellerId::new()), 3, now);
        assert_eq!(lic.status, LicenseStatus::Pending);
        assert!(lic.hwid.is_none());
        assert!(!lic.is_paid());
        assert!(!lic.is_cascade_exempt());
        assert!(lic.has_reset_quota());
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let mut lic = License::new("KEY-B", Tier::Basic, None, 3, now);
        assert!(!lic.is_past_expiry(now));

        lic.expires_at = Some(now);
        assert!(!lic.is_past_expiry(now));
        assert!(lic.is_past_expiry(now + Duration::seconds(1)));
    }

    #[test]
    fn license_json_is_camel_case() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let lic = License::new("KEY-C", Tier::Basic, None, 3, now);
        let json = serde_json::to_value(&lic).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["maxHwidResets"], 3);
        assert!(json["approvedBy"].is_null());
    }
}
