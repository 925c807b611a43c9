//! End-to-end flows through the public `LedgerManager` API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use keyledger::{
    Caller, Clock, IssueRequest, KeyCommand, LedgerConfig, LedgerError, LedgerManager,
    LedgerStore, LicenseStatus, MemoryStore, Rejection, Role, SnapshotFile, ValidationOutcome,
};
use std::sync::{Arc, RwLock};
use tempfile::TempDir;

struct TestClock(RwLock<DateTime<Utc>>);

impl TestClock {
    fn at(instant: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(RwLock::new(instant)))
    }

    fn set(&self, instant: DateTime<Utc>) {
        *self.0.write().unwrap() = instant;
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.write().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.0.read().unwrap()
    }
}

struct Panel {
    manager: LedgerManager,
    store: Arc<MemoryStore>,
    clock: Arc<TestClock>,
    top: Caller,
    admin: Caller,
    dist: Caller,
    seller: Caller,
}

fn panel_at(start: DateTime<Utc>) -> Panel {
    let store = Arc::new(MemoryStore::new());
    let clock = TestClock::at(start);
    let manager = LedgerManager::with_clock(LedgerConfig::default(), store.clone(), clock.clone()).unwrap();
    let top = Caller::of(&manager.bootstrap_operator("root", "Root").unwrap());
    let admin = Caller::of(
        &manager
            .create_reseller(&top, "admin-a", "Admin A", Role::RegionalAdmin)
            .unwrap(),
    );
    let dist = Caller::of(
        &manager
            .create_reseller(&admin, "dist-d", "Dist D", Role::SubDistributor)
            .unwrap(),
    );
    let seller = Caller::of(
        &manager
            .create_reseller(&dist, "seller-s", "Seller S", Role::Seller)
            .unwrap(),
    );
    Panel {
        manager,
        store,
        clock,
        top,
        admin,
        dist,
        seller,
    }
}

fn panel() -> Panel {
    panel_at(Utc.with_ymd_and_hms(2025, 8, 4, 14, 0, 0).unwrap())
}

impl Panel {
    fn due(&self, who: &Caller) -> i64 {
        self.store.get_reseller(who.reseller_id).unwrap().unwrap().payment_due
    }

    fn issue_one(&self, who: &Caller, prepaid: bool) -> String {
        let req = IssueRequest {
            prepaid,
            ..IssueRequest::default()
        };
        self.manager.issue_keys(who, &req).unwrap().keys.remove(0)
    }
}

#[test]
fn paid_issue_bills_the_chain_end_to_end() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);

    let seller = p.store.get_reseller(p.seller.reseller_id).unwrap().unwrap();
    assert_eq!(seller.total_sold, 1);
    assert_eq!(seller.total_unpaid, 0);
    assert_eq!(p.due(&p.dist), 2200);
    assert_eq!(p.due(&p.admin), 2000);
    assert_eq!(p.due(&p.top), 0);

    let license = p.store.get_license(&key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.approved_by, Some(p.seller.reseller_id));
}

#[test]
fn five_paid_keys_scale_linearly() {
    let p = panel();
    let req = IssueRequest {
        count: 5,
        prepaid: true,
        ..IssueRequest::default()
    };
    p.manager.issue_keys(&p.seller, &req).unwrap();
    assert_eq!(p.due(&p.dist), 5 * 2200);
    assert_eq!(p.due(&p.admin), 5 * 2000);
    assert_eq!(p.due(&p.top), 0);

    for who in [&p.dist, &p.admin] {
        let r = p.store.get_reseller(who.reseller_id).unwrap().unwrap();
        assert_eq!((r.total_paid, r.total_unpaid), (0, 0));
    }
}

#[test]
fn seller_grace_boundary_is_calendar_based() {
    let p = panel_at(Utc.with_ymd_and_hms(2025, 8, 4, 23, 30, 0).unwrap());
    p.issue_one(&p.seller, true);

    p.clock.set(Utc.with_ymd_and_hms(2025, 8, 4, 23, 59, 0).unwrap());
    assert!(!p.manager.login_status(p.seller.reseller_id).unwrap().is_locked);

    p.clock.set(Utc.with_ymd_and_hms(2025, 8, 5, 0, 10, 0).unwrap());
    let login = p.manager.login_status(p.seller.reseller_id).unwrap();
    assert!(login.is_locked);
    assert_eq!(login.payment_due, 2400);
}

#[test]
fn payment_clears_lock_for_good() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);
    p.clock.advance(Duration::days(1));
    assert!(p.manager.login_status(p.seller.reseller_id).unwrap().is_locked);

    p.manager.add_payment(&p.dist, p.seller.reseller_id, 2400).unwrap();
    let seller = p.store.get_reseller(p.seller.reseller_id).unwrap().unwrap();
    assert!(seller.due_since.is_none());
    assert!(!p.manager.login_status(p.seller.reseller_id).unwrap().is_locked);

    // Upstream balances are still inside their grace periods.
    assert!(p.manager.validate(&key, "dev-1", "192.0.2.1").unwrap().is_valid());

    p.manager.add_payment(&p.admin, p.dist.reseller_id, 2200).unwrap();
    p.manager.add_payment(&p.top, p.admin.reseller_id, 2000).unwrap();
    p.clock.advance(Duration::days(365));
    assert!(!p.manager.login_status(p.seller.reseller_id).unwrap().is_locked);
}

#[test]
fn overdue_distributor_blocks_seller_keys() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);
    p.manager.add_payment(&p.dist, p.seller.reseller_id, 2400).unwrap();

    p.clock.advance(Duration::days(1));
    assert!(p.manager.validate(&key, "dev-1", "192.0.2.1").unwrap().is_valid());

    p.clock.advance(Duration::days(1));
    let body = p.manager.validate_response(&key, "dev-1", "192.0.2.1");
    assert!(!body.success);
    assert_eq!(body.left_days, 0);

    let login = p.manager.login_status(p.seller.reseller_id).unwrap();
    assert!(login.lock_message.unwrap().starts_with("ACCESS DENIED!"));
}

#[test]
fn device_binding_is_one_shot_until_reset() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);

    assert!(p.manager.validate(&key, "dev-A", "192.0.2.1").unwrap().is_valid());
    let second = p.manager.validate(&key, "dev-B", "192.0.2.2").unwrap();
    assert_eq!(second.rejection(), Some(&Rejection::DeviceMismatch));
    assert_eq!(
        p.store.get_license(&key).unwrap().unwrap().hwid.as_deref(),
        Some("dev-A")
    );

    p.manager.execute(&p.seller, &key, KeyCommand::ResetDevice).unwrap();
    assert!(p.manager.validate(&key, "dev-B", "192.0.2.2").unwrap().is_valid());
}

#[test]
fn concurrent_first_binds_have_one_winner() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);

    let outcomes: Vec<ValidationOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = &p.manager;
                let key = key.as_str();
                s.spawn(move || manager.validate(key, &format!("dev-{}", i), "192.0.2.1").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = outcomes.iter().filter(|o| o.is_valid()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .filter(|o| !o.is_valid())
        .all(|o| o.rejection() == Some(&Rejection::DeviceMismatch)));
}

#[test]
fn expiry_is_discovered_once() {
    let p = panel();
    let req = IssueRequest {
        expiry_days: Some(3),
        ..IssueRequest::default()
    };
    let key = p.manager.issue_keys(&p.dist, &req).unwrap().keys.remove(0);
    p.manager.add_payment(&p.admin, p.dist.reseller_id, 2200).unwrap();
    p.manager.add_payment(&p.top, p.admin.reseller_id, 2000).unwrap();

    p.clock.advance(Duration::days(4));
    for _ in 0..3 {
        let out = p.manager.validate(&key, "dev", "192.0.2.1").unwrap();
        assert_eq!(out.rejection(), Some(&Rejection::Expired));
    }
    assert_eq!(
        p.store.get_license(&key).unwrap().unwrap().status,
        LicenseStatus::Expired
    );

    p.manager
        .execute(&p.top, &key, KeyCommand::Extend { days: 7 })
        .unwrap();
    assert!(p.manager.validate(&key, "dev", "192.0.2.1").unwrap().is_valid());
}

#[test]
fn renewal_decouples_expiry_from_payment() {
    let p = panel();
    let key = p.issue_one(&p.seller, false);
    p.manager.execute(&p.dist, &key, KeyCommand::Approve).unwrap();
    assert_eq!(p.due(&p.dist), 2200);

    p.manager.execute(&p.seller, &key, KeyCommand::Renew).unwrap();
    let renewed = p.store.get_license(&key).unwrap().unwrap();
    assert!(renewed.approved_by.is_none());
    assert_eq!(p.due(&p.dist), 2200);

    p.manager.execute(&p.dist, &key, KeyCommand::Approve).unwrap();
    assert_eq!(p.due(&p.dist), 4400);
    assert!(matches!(
        p.manager.execute(&p.dist, &key, KeyCommand::Approve),
        Err(LedgerError::AlreadyApproved(_))
    ));
    assert_eq!(p.due(&p.dist), 4400);
}

#[test]
fn ownership_cycle_does_not_hang() {
    let p = panel();
    p.store
        .update_reseller(p.admin.reseller_id, &mut |r| {
            r.created_by = Some(p.seller.reseller_id);
            Ok(())
        })
        .unwrap();

    let key = p.issue_one(&p.seller, true);
    assert_eq!(p.due(&p.seller), 2400);
    assert_eq!(p.due(&p.dist), 2200);
    assert_eq!(p.due(&p.admin), 2000);

    let login = p.manager.login_status(p.seller.reseller_id).unwrap();
    assert!(!login.is_locked);
    assert!(p.manager.validate(&key, "dev", "192.0.2.1").unwrap().is_valid());
}

#[test]
fn snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let file = SnapshotFile::new(dir.path().join("ledger.json"));

    let p = panel();
    let key = p.issue_one(&p.seller, true);
    p.manager.validate(&key, "dev-A", "192.0.2.1").unwrap();
    file.save(&p.store.snapshot().unwrap()).unwrap();

    let restored = Arc::new(MemoryStore::from_snapshot(file.load().unwrap().unwrap()));
    let manager = LedgerManager::with_clock(LedgerConfig::default(), restored, p.clock.clone()).unwrap();
    assert!(manager.validate(&key, "dev-A", "192.0.2.1").unwrap().is_valid());
    assert_eq!(
        manager.validate(&key, "dev-B", "192.0.2.1").unwrap().rejection(),
        Some(&Rejection::DeviceMismatch)
    );
}

#[test]
fn config_loads_from_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(
        &path,
        r#"{ "keyPrefix": "ACME-", "clientCompat": { "appVersion": "3.0" } }"#,
    )
    .unwrap();

    let config = LedgerConfig::from_json_file(&path).unwrap();
    assert_eq!(config.key_prefix, "ACME-");
    assert_eq!(config.max_batch, 100);

    let store = Arc::new(MemoryStore::new());
    let clock = TestClock::at(Utc.with_ymd_and_hms(2025, 8, 4, 14, 0, 0).unwrap());
    let manager = LedgerManager::with_clock(config, store, clock).unwrap();
    let license = manager.generate_public_key("customer", "192.0.2.50").unwrap();
    assert_eq!(license.key, "ACME-CUSTOMER");

    let body = serde_json::to_value(manager.validate_response(&license.key, "dev", "192.0.2.50")).unwrap();
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["leftDays"], serde_json::json!(999));
    assert_eq!(body["appVersion"], serde_json::json!("3.0"));

    let refused = serde_json::to_value(manager.validate_response("ACME-NOPE", "dev", "192.0.2.50")).unwrap();
    assert_eq!(refused["success"], serde_json::json!(false));
    assert_eq!(refused["message"], serde_json::json!("Invalid license key"));
    assert_eq!(refused["appVersion"], serde_json::json!(""));
}

#[test]
fn out_of_range_day_counts_leave_the_ledger_usable() {
    let p = panel();
    let key = p.issue_one(&p.seller, true);

    let result = p
        .manager
        .execute(&p.top, &key, KeyCommand::Extend { days: 1_000_000_000_000 });
    assert!(matches!(result, Err(LedgerError::InvalidRequest(_))));

    let req = IssueRequest {
        expiry_days: Some(i64::MAX),
        ..IssueRequest::default()
    };
    assert!(matches!(
        p.manager.issue_keys(&p.seller, &req),
        Err(LedgerError::InvalidRequest(_))
    ));

    assert!(p.manager.validate(&key, "dev-1", "192.0.2.1").unwrap().is_valid());
    assert!(!p.manager.login_status(p.seller.reseller_id).unwrap().is_locked);
    p.manager
        .execute(&p.top, &key, KeyCommand::Extend { days: 7 })
        .unwrap();
}
