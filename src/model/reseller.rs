//! Resellers: role-bearing accounts in the distribution tree.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique reseller identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResellerId(Uuid);

impl ResellerId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResellerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Position in the fixed four-level chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Root of the tree; never locked, never billed.
    TopOperator,
    /// Created by the top operator.
    RegionalAdmin,
    /// Created by a regional admin.
    SubDistributor,
    /// Leaf reseller selling keys to end users.
    Seller,
}

impl Role {
    /// All roles, top first.
    pub const ALL: [Role; 4] = [
        Role::TopOperator,
        Role::RegionalAdmin,
        Role::SubDistributor,
        Role::Seller,
    ];

    /// Human-readable label used in lock messages.
    pub fn label(self) -> &'static str {
        match self {
            Role::TopOperator => "top operator",
            Role::RegionalAdmin => "regional admin",
            Role::SubDistributor => "sub-distributor",
            Role::Seller => "seller",
        }
    }

    /// Plural label, capitalised for sentence starts.
    pub fn plural_label(self) -> &'static str {
        match self {
            Role::TopOperator => "Top operators",
            Role::RegionalAdmin => "Regional admins",
            Role::SubDistributor => "Sub-distributors",
            Role::Seller => "Sellers",
        }
    }

    /// True for the root role.
    pub fn is_top(self) -> bool {
        matches!(self, Role::TopOperator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Already-authenticated identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Acting reseller.
    pub reseller_id: ResellerId,
    /// Its role.
    pub role: Role,
}

impl Caller {
    /// Identity of an existing reseller.
    pub fn of(reseller: &Reseller) -> Self {
        Self {
            reseller_id: reseller.id,
            role: reseller.role,
        }
    }
}

/// A reseller account and its running ledger counters.
///
/// Counters are maintained incrementally by the debt cascade; they are
/// only recomputed by an explicit reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reseller {
    /// Unique id.
    pub id: ResellerId,
    /// Unique login name.
    pub username: String,
    /// Display name shown on dashboards.
    pub display_name: String,
    /// Position in the hierarchy.
    pub role: Role,
    /// Parent reseller; `None` only for the top operator.
    pub created_by: Option<ResellerId>,

    /// Administratively enabled.
    pub is_active: bool,
    /// Banned by an upstream reseller.
    pub is_banned: bool,
    /// Cached result of the last lock-chain evaluation on login.
    pub is_locked: bool,

    /// Outstanding balance.
    pub payment_due: i64,
    /// When the balance last became positive.
    pub due_since: Option<DateTime<Utc>>,
    /// Keys issued, lifetime.
    pub total_sold: u64,
    /// Keys issued on the current business day.
    pub today_sold: u64,
    /// Keys marked paid, lifetime.
    pub total_paid: u64,
    /// Keys marked paid on the current business day.
    pub today_paid: u64,
    /// Keys issued or renewed and not yet paid.
    pub total_unpaid: u64,
    /// Business day the `today_*` counters belong to.
    #[serde(default)]
    pub counters_day: Option<NaiveDate>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful login.
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Reseller {
    /// Create an active reseller with zeroed counters.
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        created_by: Option<ResellerId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ResellerId::new(),
            username: username.into(),
            display_name: display_name.into(),
            role,
            created_by,
            is_active: true,
            is_banned: false,
            is_locked: false,
            payment_due: 0,
            due_since: None,
            total_sold: 0,
            today_sold: 0,
            total_paid: 0,
            today_paid: 0,
            total_unpaid: 0,
            counters_day: None,
            created_at: now,
            last_login_at: None,
        }
    }

    /// Reset the daily counters if `today` is a new business day.
    pub fn roll_daily(&mut self, today: NaiveDate) {
        if self.counters_day != Some(today) {
            self.today_sold = 0;
            self.today_paid = 0;
            self.counters_day = Some(today);
        }
    }

    /// Today's sold count as of `today`, without mutating.
    pub fn sold_on(&self, today: NaiveDate) -> u64 {
        if self.counters_day == Some(today) {
            self.today_sold
        } else {
            0
        }
    }

    /// Today's paid count as of `today`, without mutating.
    pub fn paid_on(&self, today: NaiveDate) -> u64 {
        if self.counters_day == Some(today) {
            self.today_paid
        } else {
            0
        }
    }

    /// Count `keys` issued keys; `unpaid` also grows the unpaid counter.
    pub fn record_sale(&mut self, keys: u64, unpaid: bool, today: NaiveDate) {
        self.roll_daily(today);
        self.total_sold += keys;
        self.today_sold += keys;
        if unpaid {
            self.total_unpaid += keys;
        }
    }

    /// Move one key from unpaid to paid.
    pub fn record_paid(&mut self, today: NaiveDate) {
        self.roll_daily(today);
        self.total_unpaid = self.total_unpaid.saturating_sub(1);
        self.total_paid += 1;
        self.today_paid += 1;
    }

    /// Grow the balance, arming the grace clock on the first positive balance.
    pub fn add_debt(&mut self, amount: i64, now: DateTime<Utc>) {
        self.payment_due += amount;
        if self.payment_due > 0 && self.due_since.is_none() {
            self.due_since = Some(now);
        }
    }

    /// Apply a payment, clamping the balance at zero.
    ///
    /// Returns the surplus that exceeded the balance. A settled balance
    /// disarms the grace clock and clears the cached lock flag.
    pub fn apply_payment(&mut self, amount: i64) -> i64 {
        let remaining = self.payment_due - amount;
        let surplus = if remaining < 0 { -remaining } else { 0 };
        self.payment_due = remaining.max(0);
        if self.payment_due <= 0 {
            self.due_since = None;
            self.is_locked = false;
        }
        surplus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap()
    }

    fn seller() -> Reseller {
        Reseller::new("s1", "Seller One", Role::Seller, Some(ResellerId::new()), now())
    }

    #[test]
    fn debt_arms_due_since_only_once() {
        let mut r = seller();
        r.add_debt(100, now());
        assert_eq!(r.due_since, Some(now()));

        r.add_debt(100, now() + Duration::days(3));
        assert_eq!(r.payment_due, 200);
        assert_eq!(r.due_since, Some(now()));
    }

    #[test]
    fn payment_clamps_and_clears() {
        let mut r = seller();
        r.add_debt(300, now());
        r.is_locked = true;

        assert_eq!(r.apply_payment(100), 0);
        assert_eq!(r.payment_due, 200);
        assert!(r.due_since.is_some());
        assert!(r.is_locked);

        assert_eq!(r.apply_payment(250), 50);
        assert_eq!(r.payment_due, 0);
        assert!(r.due_since.is_none());
        assert!(!r.is_locked);
    }

    #[test]
    fn daily_counters_roll_over() {
        let mut r = seller();
        let day1 = now().date_naive();
        let day2 = day1.succ_opt().unwrap();

        r.record_sale(3, true, day1);
        r.record_paid(day1);
        assert_eq!((r.today_sold, r.today_paid), (3, 1));
        assert_eq!(r.sold_on(day2), 0);

        r.record_sale(1, false, day2);
        assert_eq!((r.today_sold, r.today_paid), (1, 0));
        assert_eq!((r.total_sold, r.total_paid, r.total_unpaid), (4, 1, 2));
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::SubDistributor).unwrap();
        assert_eq!(json, "\"sub_distributor\"");
    }
}
