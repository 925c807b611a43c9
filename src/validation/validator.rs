//! Validation pipeline.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. Key lookup
//! 2. Lock chain of the key's creator (before any key state)
//! 3. Banned / pending / inactive / expired status
//! 4. Expiry against the clock (flips the key to expired once)
//! 5. Device binding (conditional, race-free)
//! 6. Usage recording

use crate::clock::{days_left_ceil, Clock};
use crate::config::LedgerConfig;
use crate::model::{AuditAction, AuditEntry, License, LicenseStatus};
use crate::policy::lock_chain::LockChainEvaluator;
use crate::store::{record_audit, BindOutcome, LedgerStore};
use crate::validation::{DaysLeft, Rejection, ValidateRequest, ValidationOutcome};
use crate::LedgerError;

/// Validates keys against a ledger store.
pub struct Validator<'a> {
    store: &'a dyn LedgerStore,
    config: &'a LedgerConfig,
    clock: &'a dyn Clock,
}

impl<'a> Validator<'a> {
    /// Create a validator.
    pub fn new(store: &'a dyn LedgerStore, config: &'a LedgerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Validate a key for a device.
    ///
    /// # Errors
    /// Only store failures; every refusal is a [`ValidationOutcome::Rejected`].
    pub fn validate(&self, req: &ValidateRequest<'_>) -> Result<ValidationOutcome, LedgerError> {
        if req.key.is_empty() {
            return Ok(ValidationOutcome::Rejected(Rejection::MissingKey));
        }

        let Some(license) = self.store.get_license(req.key)? else {
            self.audit(req, AuditAction::ValidateInvalid, "Key not found");
            return Ok(ValidationOutcome::Rejected(Rejection::InvalidKey));
        };

        if let Some(creator) = license.created_by {
            let status = LockChainEvaluator::new(self.store, self.config, self.clock).evaluate(creator)?;
            if status.locked {
                let who = status
                    .node
                    .as_ref()
                    .map(|n| format!("{} {}", n.role, n.username))
                    .unwrap_or_default();
                let why = status.reason.as_ref().map(|r| r.to_string()).unwrap_or_default();
                self.audit(
                    req,
                    AuditAction::ValidateLocked,
                    &format!("Chain locked at {}: {}", who, why),
                );
                return Ok(ValidationOutcome::Rejected(Rejection::Locked(status)));
            }
        }

        if let Some(rejection) = self.check_status(req, &license)? {
            return Ok(ValidationOutcome::Rejected(rejection));
        }

        if req.hwid.is_empty() {
            return Ok(ValidationOutcome::Rejected(Rejection::MissingDevice));
        }

        let newly_bound = match self.store.bind_hwid(req.key, req.hwid)? {
            BindOutcome::Bound => {
                self.audit(req, AuditAction::HwidBound, "First activation");
                true
            }
            BindOutcome::AlreadyBound(existing) if existing == req.hwid => false,
            BindOutcome::AlreadyBound(existing) => {
                self.audit(
                    req,
                    AuditAction::HwidMismatch,
                    &format!("Bound to {}, attempted from {}", existing, req.hwid),
                );
                return Ok(ValidationOutcome::Rejected(Rejection::DeviceMismatch));
            }
        };

        let now = self.clock.now_utc();
        let ip = req.ip.to_string();
        let license = self.store.update_license(req.key, &mut |l| {
            l.last_used_at = Some(now);
            l.last_used_ip = Some(ip.clone());
            Ok(())
        })?;

        let days_left = match license.expires_at {
            Some(at) => DaysLeft::Days(days_left_ceil(now, at)),
            None => DaysLeft::Unlimited,
        };
        self.audit(req, AuditAction::ValidateSuccess, "");
        tracing::debug!(key = %req.key, ?days_left, newly_bound, "key validated");

        Ok(ValidationOutcome::Valid {
            license,
            days_left,
            newly_bound,
        })
    }

    fn check_status(
        &self,
        req: &ValidateRequest<'_>,
        license: &License,
    ) -> Result<Option<Rejection>, LedgerError> {
        match license.status {
            LicenseStatus::Banned => {
                self.audit(req, AuditAction::ValidateBanned, "");
                return Ok(Some(Rejection::Banned));
            }
            LicenseStatus::Pending => {
                self.audit(req, AuditAction::ValidatePending, "");
                return Ok(Some(Rejection::Pending));
            }
            LicenseStatus::Inactive => {
                self.audit(req, AuditAction::ValidateInactive, "");
                return Ok(Some(Rejection::Inactive));
            }
            LicenseStatus::Expired => return Ok(Some(Rejection::Expired)),
            LicenseStatus::Active => {}
        }

        let now = self.clock.now_utc();
        if !license.is_past_expiry(now) {
            return Ok(None);
        }

        // Only an active key transitions; a concurrent admin change wins.
        let mut flipped = false;
        self.store.update_license(req.key, &mut |l| {
            flipped = l.status == LicenseStatus::Active && l.is_past_expiry(now);
            if flipped {
                l.status = LicenseStatus::Expired;
            }
            Ok(())
        })?;
        if flipped {
            tracing::info!(key = %req.key, "key expired");
            self.audit(req, AuditAction::ValidateExpired, "");
        }
        Ok(Some(Rejection::Expired))
    }

    fn audit(&self, req: &ValidateRequest<'_>, action: AuditAction, details: &str) {
        let entry = AuditEntry::new(action, self.clock.now_utc())
            .key(req.key)
            .hwid(req.hwid)
            .ip(req.ip)
            .details(details);
        record_audit(self.store, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::model::{Reseller, ResellerId, Role, Tier};
    use crate::policy::lock_chain::LockReason;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        config: LedgerConfig,
        clock: MockClock,
        dist: ResellerId,
        seller: ResellerId,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let top = Reseller::new("top", "Top", Role::TopOperator, None, t0());
        let dist = Reseller::new("dist", "Dist", Role::SubDistributor, Some(top.id), t0());
        let seller = Reseller::new("seller", "Seller", Role::Seller, Some(dist.id), t0());
        let (dist_id, seller_id) = (dist.id, seller.id);
        for r in [top, dist, seller] {
            store.insert_reseller(r).unwrap();
        }
        Fixture {
            store,
            config: LedgerConfig::default(),
            clock: MockClock::new(t0()),
            dist: dist_id,
            seller: seller_id,
        }
    }

    impl Fixture {
        fn add_key(&self, key: &str, status: LicenseStatus, expires_in: Option<Duration>) {
            let mut l = License::new(key, Tier::Basic, Some(self.seller), 3, t0());
            l.status = status;
            l.expires_at = expires_in.map(|d| t0() + d);
            self.store.insert_licenses(vec![l]).unwrap();
        }

        fn validate(&self, key: &str, hwid: &str) -> ValidationOutcome {
            let req = ValidateRequest {
                key,
                hwid,
                ip: "198.51.100.4",
            };
            Validator::new(&self.store, &self.config, &self.clock)
                .validate(&req)
                .unwrap()
        }

        fn actions(&self, key: &str) -> Vec<AuditAction> {
            self.store
                .audit_for_key(key)
                .unwrap()
                .into_iter()
                .map(|e| e.action)
                .collect()
        }

        fn license(&self, key: &str) -> License {
            self.store.get_license(key).unwrap().unwrap()
        }
    }

    #[test]
    fn unknown_key_is_invalid_and_logged() {
        let f = fixture();
        let out = f.validate("KEY-NOPE", "dev-a");
        assert_eq!(out.rejection(), Some(&Rejection::InvalidKey));
        assert_eq!(f.actions("KEY-NOPE"), vec![AuditAction::ValidateInvalid]);
    }

    #[test]
    fn empty_key_is_rejected_without_lookup() {
        let f = fixture();
        assert_eq!(f.validate("", "dev-a").rejection(), Some(&Rejection::MissingKey));
    }

    #[test]
    fn first_use_binds_then_mismatch_blocks() {
        let f = fixture();
        f.add_key("KEY-A", LicenseStatus::Active, Some(Duration::days(10)));

        let first = f.validate("KEY-A", "dev-a");
        assert!(matches!(first, ValidationOutcome::Valid { newly_bound: true, .. }));

        let other = f.validate("KEY-A", "dev-b");
        assert_eq!(other.rejection(), Some(&Rejection::DeviceMismatch));
        assert_eq!(f.license("KEY-A").hwid.as_deref(), Some("dev-a"));

        let again = f.validate("KEY-A", "dev-a");
        assert!(matches!(again, ValidationOutcome::Valid { newly_bound: false, .. }));

        let log = f.store.audit_for_key("KEY-A").unwrap();
        let mismatch = log.iter().find(|e| e.action == AuditAction::HwidMismatch).unwrap();
        assert!(mismatch.details.contains("dev-a"));
        assert!(mismatch.details.contains("dev-b"));
    }

    #[test]
    fn success_records_usage_and_days_left() {
        let f = fixture();
        f.add_key("KEY-A", LicenseStatus::Active, Some(Duration::hours(36)));
        match f.validate("KEY-A", "dev-a") {
            ValidationOutcome::Valid { license, days_left, .. } => {
                assert_eq!(days_left, DaysLeft::Days(2));
                assert_eq!(license.last_used_at, Some(t0()));
                assert_eq!(license.last_used_ip.as_deref(), Some("198.51.100.4"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            f.actions("KEY-A"),
            vec![AuditAction::ValidateSuccess, AuditAction::HwidBound]
        );
    }

    #[test]
    fn unlimited_key_reports_unlimited() {
        let f = fixture();
        f.add_key("KEY-U", LicenseStatus::Active, None);
        match f.validate("KEY-U", "dev-a") {
            ValidationOutcome::Valid { days_left, .. } => {
                assert_eq!(days_left, DaysLeft::Unlimited);
                assert_eq!(days_left.or_sentinel(999), 999);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn status_rejections() {
        let f = fixture();
        f.add_key("KEY-B", LicenseStatus::Banned, None);
        f.add_key("KEY-P", LicenseStatus::Pending, None);
        f.add_key("KEY-I", LicenseStatus::Inactive, None);
        assert_eq!(f.validate("KEY-B", "d").rejection(), Some(&Rejection::Banned));
        assert_eq!(f.validate("KEY-P", "d").rejection(), Some(&Rejection::Pending));
        assert_eq!(f.validate("KEY-I", "d").rejection(), Some(&Rejection::Inactive));
        assert_eq!(f.actions("KEY-B"), vec![AuditAction::ValidateBanned]);
        assert!(f.license("KEY-P").hwid.is_none());
    }

    #[test]
    fn expiry_transitions_once() {
        let f = fixture();
        f.add_key("KEY-E", LicenseStatus::Active, Some(Duration::days(1)));
        f.clock.advance(Duration::days(1) + Duration::seconds(1));

        assert_eq!(f.validate("KEY-E", "d").rejection(), Some(&Rejection::Expired));
        assert_eq!(f.license("KEY-E").status, LicenseStatus::Expired);
        assert_eq!(f.validate("KEY-E", "d").rejection(), Some(&Rejection::Expired));

        let expired_logs = f
            .actions("KEY-E")
            .into_iter()
            .filter(|a| *a == AuditAction::ValidateExpired)
            .count();
        assert_eq!(expired_logs, 1);
        assert!(f.license("KEY-E").hwid.is_none());
    }

    #[test]
    fn expiry_instant_itself_is_still_valid() {
        let f = fixture();
        f.add_key("KEY-E", LicenseStatus::Active, Some(Duration::days(1)));
        f.clock.advance(Duration::days(1));
        assert!(f.validate("KEY-E", "d").is_valid());
    }

    #[test]
    fn missing_device_is_rejected() {
        let f = fixture();
        f.add_key("KEY-A", LicenseStatus::Active, None);
        assert_eq!(f.validate("KEY-A", "").rejection(), Some(&Rejection::MissingDevice));
        assert!(f.license("KEY-A").hwid.is_none());
    }

    #[test]
    fn locked_chain_blocks_healthy_key() {
        let f = fixture();
        f.add_key("KEY-A", LicenseStatus::Active, None);
        f.store
            .update_reseller(f.dist, &mut |r| {
                r.payment_due = 2200;
                r.due_since = Some(t0());
                Ok(())
            })
            .unwrap();
        f.clock.advance(Duration::days(2));

        match f.validate("KEY-A", "d") {
            ValidationOutcome::Rejected(Rejection::Locked(status)) => {
                assert!(matches!(status.reason, Some(LockReason::Overdue { .. })));
                assert_eq!(status.node.unwrap().id, f.dist);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.actions("KEY-A"), vec![AuditAction::ValidateLocked]);
        assert_eq!(
            f.store.audit_for_key("KEY-A").unwrap()[0].details,
            "Chain locked at sub-distributor dist: overdue 2 day(s) against 2 day(s) grace, 2200 due"
        );
        assert!(f.license("KEY-A").hwid.is_none());
    }

    #[test]
    fn lock_check_precedes_status() {
        let f = fixture();
        f.add_key("KEY-B", LicenseStatus::Banned, None);
        f.store
            .update_reseller(f.seller, &mut |r| {
                r.is_active = false;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            f.validate("KEY-B", "d").rejection(),
            Some(Rejection::Locked(_))
        ));
        assert_eq!(
            f.store.audit_for_key("KEY-B").unwrap()[0].details,
            "Chain locked at seller seller: deactivated"
        );
    }

    #[test]
    fn creatorless_key_skips_lock_chain() {
        let f = fixture();
        let mut l = License::new("KEY-PUB", Tier::Basic, None, 3, t0());
        l.status = LicenseStatus::Active;
        f.store.insert_licenses(vec![l]).unwrap();
        assert!(f.validate("KEY-PUB", "d").is_valid());
    }
}
