//! JSON response bodies.

use crate::config::LedgerConfig;
use crate::model::{Reseller, ResellerId, Role};
use crate::policy::lock_chain::LockStatus;
use crate::validation::ValidationOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body returned to a client device for a validation call.
///
/// Both shapes carry the configured compatibility keys at the top level:
/// with their values on success, blank on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// Whether the key was accepted.
    pub success: bool,
    /// Refusal reason; `null` on success.
    pub message: Option<String>,
    /// Days of validity left; the unlimited sentinel for keys without expiry.
    pub left_days: i64,
    /// Opaque client compatibility fields.
    #[serde(flatten)]
    pub compat: BTreeMap<String, String>,
}

impl ValidateResponse {
    /// Render a validation outcome.
    pub fn from_outcome(outcome: &ValidationOutcome, config: &LedgerConfig) -> Self {
        match outcome {
            ValidationOutcome::Valid { days_left, .. } => Self {
                success: true,
                message: None,
                left_days: days_left.or_sentinel(config.unlimited_days_sentinel),
                compat: config.client_compat.clone(),
            },
            ValidationOutcome::Rejected(rejection) => Self::failure(rejection.message(), config),
        }
    }

    /// A failure body with `message` and blank compatibility fields.
    pub fn failure(message: impl Into<String>, config: &LedgerConfig) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            left_days: 0,
            compat: config
                .client_compat
                .keys()
                .map(|k| (k.clone(), String::new()))
                .collect(),
        }
    }
}

/// Body returned to a panel after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// False for banned accounts; credentials are checked before this engine is called.
    pub authenticated: bool,
    /// Reseller id.
    pub user_id: ResellerId,
    /// Username.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Whether the panel is locked.
    pub is_locked: bool,
    /// Explanation when locked.
    pub lock_message: Option<String>,
    /// Outstanding balance.
    pub payment_due: i64,
}

impl LoginResponse {
    /// Build from a reseller and its lock evaluation.
    pub fn new(reseller: &Reseller, lock: &LockStatus) -> Self {
        Self {
            authenticated: !reseller.is_banned,
            user_id: reseller.id,
            username: reseller.username.clone(),
            role: reseller.role,
            is_locked: lock.locked,
            lock_message: lock.locked.then(|| lock.login_message()),
            payment_due: reseller.payment_due,
        }
    }
}
