//! Keyledger configuration.

use crate::model::Role;
use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Longest validity, in days, any single expiry computation may add.
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

/// Unit price each layer owes upward per paid key.
///
/// Layers closer to the top pay less per key than the layers below them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PriceTable {
    /// Price billed to a seller.
    pub seller: i64,
    /// Price billed to a sub-distributor.
    pub sub_distributor: i64,
    /// Price billed to a regional admin.
    pub regional_admin: i64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            seller: 2400,
            sub_distributor: 2200,
            regional_admin: 2000,
        }
    }
}

impl PriceTable {
    /// Unit price for `role`; the top operator is never billed.
    pub fn price_for(&self, role: Role) -> Option<i64> {
        match role {
            Role::TopOperator => None,
            Role::RegionalAdmin => Some(self.regional_admin),
            Role::SubDistributor => Some(self.sub_distributor),
            Role::Seller => Some(self.seller),
        }
    }
}

/// Days an overdue balance is tolerated before lock-out, per role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GracePeriods {
    /// Seller grace in days.
    pub seller: i64,
    /// Sub-distributor grace in days.
    pub sub_distributor: i64,
    /// Regional admin grace in days.
    pub regional_admin: i64,
}

impl Default for GracePeriods {
    fn default() -> Self {
        Self {
            seller: 1,
            sub_distributor: 2,
            regional_admin: 4,
        }
    }
}

impl GracePeriods {
    /// Grace for `role`; `None` for the top operator, which is never evaluated.
    pub fn grace_for(&self, role: Role) -> Option<i64> {
        match role {
            Role::TopOperator => None,
            Role::RegionalAdmin => Some(self.regional_admin),
            Role::SubDistributor => Some(self.sub_distributor),
            Role::Seller => Some(self.seller),
        }
    }
}

/// Limits for anonymous self-service key generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PublicGeneration {
    /// Whether the anonymous endpoint is served at all.
    pub enabled: bool,
    /// Keys one caller address may generate per window.
    pub max_per_window: u64,
    /// Fixed window length in seconds.
    pub window_secs: i64,
    /// Shortest accepted key name, before the prefix.
    pub min_name_len: usize,
    /// Longest accepted key name, before the prefix.
    pub max_name_len: usize,
}

impl Default for PublicGeneration {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_window: 5,
            window_secs: 3600,
            min_name_len: 6,
            max_name_len: 50,
        }
    }
}

/// Configuration for the ledger engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Per-role unit prices.
    pub prices: PriceTable,

    /// Per-role grace periods.
    pub grace_days: GracePeriods,

    /// Paying for a key guarantees at least this many days of validity.
    pub approval_min_validity_days: i64,

    /// Days a renewal adds.
    pub renewal_days: i64,

    /// Device reset quota for new keys.
    pub default_max_hwid_resets: u32,

    /// Largest batch a single issue request may create.
    pub max_batch: u32,

    /// Prefix for generated keys (e.g., "KEY-").
    pub key_prefix: String,

    /// `leftDays` reported for keys without expiry.
    pub unlimited_days_sentinel: i64,

    /// Business timezone offset used for calendar-day arithmetic.
    pub utc_offset_minutes: i32,

    /// Hard cap on hops for every ancestor walk.
    pub max_chain_hops: usize,

    /// Anonymous key generation limits.
    pub public_generation: PublicGeneration,

    /// Opaque fields echoed verbatim in validate responses for client compatibility.
    pub client_compat: BTreeMap<String, String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            prices: PriceTable::default(),
            grace_days: GracePeriods::default(),
            approval_min_validity_days: 30,
            renewal_days: 30,
            default_max_hwid_resets: 3,
            max_batch: 100,
            key_prefix: "KEY-".to_string(),
            unlimited_days_sentinel: 999,
            utc_offset_minutes: 0,
            max_chain_hops: 16,
            public_generation: PublicGeneration::default(),
            client_compat: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file and validate it.
    ///
    /// Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Parse configuration from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, LedgerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let p = &self.prices;
        if p.regional_admin <= 0 || p.sub_distributor <= 0 || p.seller <= 0 {
            return Err(LedgerError::ConfigError(
                "prices must be positive".to_string(),
            ));
        }
        if !(p.regional_admin < p.sub_distributor && p.sub_distributor < p.seller) {
            return Err(LedgerError::ConfigError(format!(
                "prices must increase down the chain, got admin={} distributor={} seller={}",
                p.regional_admin, p.sub_distributor, p.seller
            )));
        }
        let g = &self.grace_days;
        if g.regional_admin < 1 || g.sub_distributor < 1 || g.seller < 1 {
            return Err(LedgerError::ConfigError(
                "grace periods must be at least one day".to_string(),
            ));
        }
        for (name, days) in [
            ("approval_min_validity_days", self.approval_min_validity_days),
            ("renewal_days", self.renewal_days),
        ] {
            if !(1..=MAX_VALIDITY_DAYS).contains(&days) {
                return Err(LedgerError::ConfigError(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_VALIDITY_DAYS, days
                )));
            }
        }
        if self.max_batch == 0 {
            return Err(LedgerError::ConfigError(
                "max_batch cannot be zero".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(LedgerError::ConfigError(
                "key_prefix cannot be empty".to_string(),
            ));
        }
        if self.max_chain_hops < Role::ALL.len() {
            return Err(LedgerError::ConfigError(format!(
                "max_chain_hops must cover the {}-level hierarchy, got {}",
                Role::ALL.len(),
                self.max_chain_hops
            )));
        }
        let pg = &self.public_generation;
        if pg.min_name_len == 0 || pg.min_name_len > pg.max_name_len {
            return Err(LedgerError::ConfigError(format!(
                "public key name bounds are inconsistent ({}..={})",
                pg.min_name_len, pg.max_name_len
            )));
        }
        if pg.window_secs < 1 {
            return Err(LedgerError::ConfigError(
                "public_generation.window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
