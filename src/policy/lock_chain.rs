//! Lock-chain evaluation.
//!
//! A reseller is locked when it, or any ancestor below the top operator,
//! is deactivated or has carried a positive balance past its role's grace
//! period. The walk stops at the first lock found.
//!
//! Overdue days count calendar midnights in the business timezone, so a
//! balance armed at 23:59 is one day overdue a minute later.

use crate::clock::{calendar_days_between, Clock};
use crate::config::LedgerConfig;
use crate::ledger::ChainWalk;
use crate::model::{Reseller, ResellerId, Role};
use crate::store::LedgerStore;
use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Why a chain is locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LockReason {
    /// A reseller in the chain is administratively disabled.
    Deactivated,
    /// A reseller in the chain is past its grace period.
    Overdue {
        /// Calendar days since the balance became positive.
        days_overdue: i64,
        /// Grace period for that reseller's role.
        grace_days: i64,
        /// Outstanding balance.
        payment_due: i64,
    },
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReason::Deactivated => f.write_str("deactivated"),
            LockReason::Overdue {
                days_overdue,
                grace_days,
                payment_due,
            } => write!(
                f,
                "overdue {} day(s) against {} day(s) grace, {} due",
                days_overdue, grace_days, payment_due
            ),
        }
    }
}

/// The reseller whose state caused the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedNode {
    /// Its id.
    pub id: ResellerId,
    /// Its username.
    pub username: String,
    /// Its role.
    pub role: Role,
    /// True when it is the reseller the evaluation started from.
    pub is_subject: bool,
}

/// Outcome of a lock-chain evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// Whether access must be denied.
    pub locked: bool,
    /// Why, when locked.
    pub reason: Option<LockReason>,
    /// Which reseller, when locked.
    pub node: Option<LockedNode>,
}

impl LockStatus {
    /// An unlocked result.
    pub fn clear() -> Self {
        Self {
            locked: false,
            reason: None,
            node: None,
        }
    }

    fn locked(reason: LockReason, node: &Reseller, subject: ResellerId) -> Self {
        Self {
            locked: true,
            reason: Some(reason),
            node: Some(LockedNode {
                id: node.id,
                username: node.username.clone(),
                role: node.role,
                is_subject: node.id == subject,
            }),
        }
    }

    /// Message for a panel login; distinguishes "you" from "your upstream".
    pub fn login_message(&self) -> String {
        let (Some(reason), Some(node)) = (&self.reason, &self.node) else {
            return String::new();
        };
        match (reason, node.is_subject) {
            (LockReason::Deactivated, true) => {
                "Your account has been deactivated. Please contact your upstream reseller."
                    .to_string()
            }
            (LockReason::Deactivated, false) => format!(
                "ACCESS DENIED! Your {} ({}) has been deactivated. All sub-panels are locked.",
                node.role, node.username
            ),
            (LockReason::Overdue { grace_days, .. }, true) => format!(
                "Your panel is locked due to unpaid balance. {} must clear dues within {} day{}.",
                node.role.plural_label(),
                grace_days,
                if *grace_days == 1 { "" } else { "s" }
            ),
            (LockReason::Overdue { .. }, false) => format!(
                "ACCESS DENIED! Your {} ({}) has outstanding dues. All sub-panels are temporarily locked.",
                node.role, node.username
            ),
        }
    }

    /// Message returned to an end client whose key is blocked by its seller chain.
    pub fn validation_message(&self) -> String {
        match &self.reason {
            Some(LockReason::Deactivated) => {
                "This key's reseller account has been deactivated. Contact your seller."
                    .to_string()
            }
            Some(LockReason::Overdue { .. }) => {
                "This key's reseller account is locked for an overdue balance. Contact your seller."
                    .to_string()
            }
            None => String::new(),
        }
    }
}

/// Check one reseller in isolation.
pub fn node_lock(
    node: &Reseller,
    now: DateTime<Utc>,
    config: &LedgerConfig,
) -> Option<LockReason> {
    if !node.is_active {
        return Some(LockReason::Deactivated);
    }
    let grace_days = config.grace_days.grace_for(node.role)?;
    let due_since = node.due_since?;
    if node.payment_due <= 0 {
        return None;
    }
    let days_overdue = calendar_days_between(due_since, now, config.utc_offset_minutes);
    if days_overdue >= grace_days {
        Some(LockReason::Overdue {
            days_overdue,
            grace_days,
            payment_due: node.payment_due,
        })
    } else {
        None
    }
}

/// Read-only evaluator over a reseller chain.
pub struct LockChainEvaluator<'a> {
    store: &'a dyn LedgerStore,
    config: &'a LedgerConfig,
    clock: &'a dyn Clock,
}

impl<'a> LockChainEvaluator<'a> {
    /// Create an evaluator.
    pub fn new(store: &'a dyn LedgerStore, config: &'a LedgerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Evaluate the chain starting at `subject`.
    ///
    /// Malformed chains end the walk early with whatever was found so far;
    /// only store failures are returned as errors.
    pub fn evaluate(&self, subject: ResellerId) -> Result<LockStatus, LedgerError> {
        let now = self.clock.now_utc();
        for node in ChainWalk::new(self.store, subject, self.config.max_chain_hops) {
            let node = node?;
            if let Some(reason) = node_lock(&node, now, self.config) {
                tracing::debug!(
                    subject = %subject,
                    locked_by = %node.id,
                    reason = ?reason,
                    "lock chain engaged"
                );
                return Ok(LockStatus::locked(reason, &node, subject));
            }
        }
        Ok(LockStatus::clear())
    }
}
