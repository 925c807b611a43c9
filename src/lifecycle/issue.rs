//! Key issuance and self-service generation.

use crate::clock::{add_days, Clock};
use crate::config::{LedgerConfig, MAX_VALIDITY_DAYS};
use crate::ledger::cascade::{CascadeReport, DebtCascade};
use crate::lifecycle::keygen::{batch_keys, public_key_name};
use crate::meter::FixedWindowLimiter;
use crate::model::{AuditAction, AuditEntry, Caller, License, LicenseStatus, Role, Tier};
use crate::policy::hierarchy::{require, Permission};
use crate::store::{record_audit, LedgerStore};
use crate::LedgerError;

/// A request to issue keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Keys wanted; clamped to `1..=max_batch`.
    pub count: u32,
    /// Tier for every key.
    pub tier: Tier,
    /// Validity from now; `None` issues unlimited keys.
    pub expiry_days: Option<i64>,
    /// Fixed key name instead of random keys.
    pub custom_name: Option<String>,
    /// Notes stored on every key.
    pub notes: String,
    /// A seller collected payment up front; the keys issue already paid.
    pub prepaid: bool,
}

impl Default for IssueRequest {
    fn default() -> Self {
        Self {
            count: 1,
            tier: Tier::Basic,
            expiry_days: None,
            custom_name: None,
            notes: String::new(),
            prepaid: false,
        }
    }
}

/// What an issuance produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueReceipt {
    /// Issued key strings.
    pub keys: Vec<String>,
    /// Status every key was issued in.
    pub status: LicenseStatus,
    /// Debt added up the chain (empty for unpaid keys).
    pub cascade: CascadeReport,
}

/// Creates keys.
pub struct Issuer<'a> {
    store: &'a dyn LedgerStore,
    config: &'a LedgerConfig,
    clock: &'a dyn Clock,
}

impl<'a> Issuer<'a> {
    /// Create an issuer.
    pub fn new(store: &'a dyn LedgerStore, config: &'a LedgerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Issue a batch of keys owned by the caller.
    ///
    /// Sellers issue pending keys unless the request is prepaid; every other
    /// role issues active keys approved by itself. Paid keys bill the chain
    /// immediately.
    pub fn issue(&self, caller: &Caller, req: &IssueRequest) -> Result<IssueReceipt, LedgerError> {
        require(caller.role, Permission::CreateKeys)?;
        let issuer = self
            .store
            .get_reseller(caller.reseller_id)?
            .ok_or_else(|| LedgerError::ResellerNotFound(caller.reseller_id.to_string()))?;

        let now = self.clock.now_utc();
        let expires_at = match req.expiry_days {
            Some(days) if !(1..=MAX_VALIDITY_DAYS).contains(&days) => {
                return Err(LedgerError::InvalidRequest(format!(
                    "expiry must be between 1 and {} days, got {}",
                    MAX_VALIDITY_DAYS, days
                )));
            }
            Some(days) => Some(add_days(now, days)?),
            None => None,
        };
        let count = req.count.clamp(1, self.config.max_batch);
        let keys = batch_keys(
            &self.config.key_prefix,
            req.custom_name.as_deref(),
            count,
            &mut rand::thread_rng(),
        );

        let auto_approved = issuer.role != Role::Seller || req.prepaid;
        let status = if auto_approved {
            LicenseStatus::Active
        } else {
            LicenseStatus::Pending
        };

        let licenses = keys
            .iter()
            .map(|key| {
                let mut l = License::new(
                    key.clone(),
                    req.tier,
                    Some(issuer.id),
                    self.config.default_max_hwid_resets,
                    now,
                );
                l.status = status;
                l.approved_by = auto_approved.then_some(issuer.id);
                l.expires_at = expires_at;
                l.notes = req.notes.clone();
                l
            })
            .collect();
        self.store.insert_licenses(licenses)?;

        let cascade = DebtCascade::new(self.store, self.config, self.clock).on_key_issued(
            issuer.id,
            u64::from(count),
            auto_approved,
        )?;

        let mut entry = AuditEntry::new(AuditAction::KeysIssued, now)
            .by(issuer.id)
            .details(format!("{} key(s) issued as {}", keys.len(), status));
        if let [only] = keys.as_slice() {
            entry = entry.key(only.clone());
        }
        if cascade.total() > 0 {
            entry = entry.amount(cascade.total());
        }
        record_audit(self.store, entry);

        tracing::info!(
            issuer = %issuer.username,
            count = keys.len(),
            %status,
            billed = cascade.total(),
            "keys issued"
        );
        Ok(IssueReceipt {
            keys,
            status,
            cascade,
        })
    }

    /// Create an active, unlimited, creator-less key from a chosen name.
    ///
    /// Rate limited per caller address through the store's shared counters.
    pub fn generate_public(&self, name: &str, ip: &str) -> Result<License, LedgerError> {
        let rules = &self.config.public_generation;
        if !rules.enabled {
            return Err(LedgerError::InvalidRequest(
                "public key generation is disabled".to_string(),
            ));
        }
        let key = public_key_name(&self.config.key_prefix, name, rules.min_name_len, rules.max_name_len)
            .ok_or_else(|| {
                LedgerError::InvalidRequest(format!(
                    "key name must be between {} and {} characters",
                    rules.min_name_len, rules.max_name_len
                ))
            })?;

        if self.store.get_license(&key)?.is_some() {
            return Err(LedgerError::KeyAlreadyExists(key));
        }

        let now = self.clock.now_utc();
        FixedWindowLimiter::new(rules.max_per_window, rules.window_secs).hit(
            self.store,
            &format!("public-keygen:{}", ip),
            now,
        )?;

        let mut license = License::new(key, Tier::Basic, None, self.config.default_max_hwid_resets, now);
        license.status = LicenseStatus::Active;
        license.notes = "GENERATED".to_string();
        self.store.insert_licenses(vec![license.clone()])?;

        record_audit(
            self.store,
            AuditEntry::new(AuditAction::KeyGenerated, now)
                .key(license.key.clone())
                .ip(ip),
        );
        tracing::info!(key = %license.key, ip, "public key generated");
        Ok(license)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::model::{Reseller, ResellerId};
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        config: LedgerConfig,
        clock: MockClock,
        top: Reseller,
        admin: Reseller,
        dist: Reseller,
        seller: Reseller,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let top = Reseller::new("top", "Top", Role::TopOperator, None, t0());
        let admin = Reseller::new("admin", "Admin", Role::RegionalAdmin, Some(top.id), t0());
        let dist = Reseller::new("dist", "Dist", Role::SubDistributor, Some(admin.id), t0());
        let seller = Reseller::new("seller", "Seller", Role::Seller, Some(dist.id), t0());
        for r in [&top, &admin, &dist, &seller] {
            store.insert_reseller(r.clone()).unwrap();
        }
        Fixture {
            store,
            config: LedgerConfig::default(),
            clock: MockClock::new(t0()),
            top,
            admin,
            dist,
            seller,
        }
    }

    impl Fixture {
        fn issuer(&self) -> Issuer<'_> {
            Issuer::new(&self.store, &self.config, &self.clock)
        }

        fn due(&self, id: ResellerId) -> i64 {
            self.store.get_reseller(id).unwrap().unwrap().payment_due
        }
    }

    #[test]
    fn seller_issues_pending_unbilled_keys() {
        let f = fixture();
        let req = IssueRequest {
            count: 3,
            expiry_days: Some(30),
            ..IssueRequest::default()
        };
        let receipt = f.issuer().issue(&Caller::of(&f.seller), &req).unwrap();
        assert_eq!(receipt.keys.len(), 3);
        assert_eq!(receipt.status, LicenseStatus::Pending);

        let key = f.store.get_license(&receipt.keys[0]).unwrap().unwrap();
        assert_eq!(key.created_by, Some(f.seller.id));
        assert!(key.approved_by.is_none());
        assert_eq!(key.expires_at, Some(t0() + Duration::days(30)));
        assert_eq!(f.due(f.seller.id), 0);
        assert_eq!(f.store.get_reseller(f.seller.id).unwrap().unwrap().total_unpaid, 3);
    }

    #[test]
    fn prepaid_seller_issue_matches_end_to_end_expectation() {
        let f = fixture();
        let req = IssueRequest {
            prepaid: true,
            ..IssueRequest::default()
        };
        let receipt = f.issuer().issue(&Caller::of(&f.seller), &req).unwrap();
        assert_eq!(receipt.status, LicenseStatus::Active);

        let key = f.store.get_license(&receipt.keys[0]).unwrap().unwrap();
        assert_eq!(key.approved_by, Some(f.seller.id));

        let seller = f.store.get_reseller(f.seller.id).unwrap().unwrap();
        assert_eq!((seller.total_sold, seller.total_unpaid), (1, 0));
        assert_eq!(f.due(f.dist.id), 2200);
        assert_eq!(f.due(f.admin.id), 2000);
        assert_eq!(f.due(f.top.id), 0);
    }

    #[test]
    fn distributor_issue_is_auto_approved_and_billed_from_itself() {
        let f = fixture();
        let req = IssueRequest {
            count: 2,
            ..IssueRequest::default()
        };
        let receipt = f.issuer().issue(&Caller::of(&f.dist), &req).unwrap();
        assert_eq!(receipt.status, LicenseStatus::Active);
        assert_eq!(f.due(f.dist.id), 4400);
        assert_eq!(f.due(f.admin.id), 4000);
        assert_eq!(f.due(f.seller.id), 0);
    }

    #[test]
    fn count_is_clamped() {
        let f = fixture();
        let zero = IssueRequest {
            count: 0,
            ..IssueRequest::default()
        };
        assert_eq!(f.issuer().issue(&Caller::of(&f.top), &zero).unwrap().keys.len(), 1);

        let huge = IssueRequest {
            count: 1000,
            ..IssueRequest::default()
        };
        assert_eq!(f.issuer().issue(&Caller::of(&f.top), &huge).unwrap().keys.len(), 100);
    }

    #[test]
    fn duplicate_custom_name_is_refused_without_side_effects() {
        let f = fixture();
        let req = IssueRequest {
            custom_name: Some("vip-club".to_string()),
            prepaid: true,
            ..IssueRequest::default()
        };
        f.issuer().issue(&Caller::of(&f.seller), &req).unwrap();
        let err = f.issuer().issue(&Caller::of(&f.seller), &req).unwrap_err();
        assert!(matches!(err, LedgerError::KeyAlreadyExists(_)));
        assert_eq!(f.due(f.seller.id), 2400);
    }

    #[test]
    fn invalid_expiry_is_rejected() {
        let f = fixture();
        let req = IssueRequest {
            expiry_days: Some(0),
            ..IssueRequest::default()
        };
        assert!(matches!(
            f.issuer().issue(&Caller::of(&f.seller), &req),
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn huge_expiry_is_rejected_without_side_effects() {
        let f = fixture();
        for days in [i64::MAX, 1_000_000_000_000, MAX_VALIDITY_DAYS + 1] {
            let req = IssueRequest {
                expiry_days: Some(days),
                prepaid: true,
                ..IssueRequest::default()
            };
            assert!(matches!(
                f.issuer().issue(&Caller::of(&f.seller), &req),
                Err(LedgerError::InvalidRequest(_))
            ));
        }
        assert!(f.store.list_licenses().unwrap().is_empty());
        assert_eq!(f.due(f.seller.id), 0);

        let req = IssueRequest {
            expiry_days: Some(MAX_VALIDITY_DAYS),
            ..IssueRequest::default()
        };
        let receipt = f.issuer().issue(&Caller::of(&f.seller), &req).unwrap();
        assert_eq!(receipt.keys.len(), 1);
    }

    #[test]
    fn issuance_is_audited() {
        let f = fixture();
        let req = IssueRequest {
            custom_name: Some("solo-key".to_string()),
            prepaid: true,
            ..IssueRequest::default()
        };
        f.issuer().issue(&Caller::of(&f.seller), &req).unwrap();
        let log = f.store.audit_for_key("solo-key").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::KeysIssued);
        assert_eq!(log[0].amount, Some(2400 + 2200 + 2000));
    }

    #[test]
    fn public_generation_is_rate_limited_per_ip() {
        let f = fixture();
        for i in 0..5 {
            let key = f.issuer().generate_public(&format!("player{}", i), "203.0.113.7").unwrap();
            assert_eq!(key.status, LicenseStatus::Active);
            assert!(key.created_by.is_none());
            assert!(key.expires_at.is_none());
        }
        assert!(matches!(
            f.issuer().generate_public("player9", "203.0.113.7"),
            Err(LedgerError::RateLimited { .. })
        ));
        assert!(f.issuer().generate_public("player9", "203.0.113.8").is_ok());
    }

    #[test]
    fn public_generation_checks_name() {
        let f = fixture();
        assert!(matches!(
            f.issuer().generate_public("abc", "203.0.113.7"),
            Err(LedgerError::InvalidRequest(_))
        ));
        f.issuer().generate_public("unique1", "203.0.113.7").unwrap();
        assert!(matches!(
            f.issuer().generate_public("UNIQUE1", "203.0.113.9"),
            Err(LedgerError::KeyAlreadyExists(_))
        ));
    }

    #[test]
    fn colliding_public_name_does_not_spend_a_hit() {
        let mut f = fixture();
        f.config.public_generation.max_per_window = 2;
        f.issuer().generate_public("taken1", "203.0.113.7").unwrap();

        for _ in 0..3 {
            assert!(matches!(
                f.issuer().generate_public("taken1", "203.0.113.7"),
                Err(LedgerError::KeyAlreadyExists(_))
            ));
        }
        f.issuer().generate_public("fresh1", "203.0.113.7").unwrap();
        assert!(matches!(
            f.issuer().generate_public("fresh2", "203.0.113.7"),
            Err(LedgerError::RateLimited { .. })
        ));
    }
}
