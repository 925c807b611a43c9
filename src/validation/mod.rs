//! Key validation: the state machine an end client hits on every launch.

pub mod device;
pub mod validator;

use crate::model::License;
use crate::policy::lock_chain::LockStatus;

pub use device::reset_device;
pub use validator::Validator;

/// One validation call from a client device.
#[derive(Debug, Clone, Copy)]
pub struct ValidateRequest<'a> {
    /// Key as typed by the user.
    pub key: &'a str,
    /// Device fingerprint.
    pub hwid: &'a str,
    /// Caller address.
    pub ip: &'a str,
}

/// Why a key was refused. These are expected outcomes, not faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No key was presented.
    MissingKey,
    /// No key with that string exists.
    InvalidKey,
    /// The key's reseller chain is locked.
    Locked(LockStatus),
    /// Banned by an administrator.
    Banned,
    /// Awaiting payment through the reseller chain.
    Pending,
    /// Disabled by an administrator.
    Inactive,
    /// Past its expiry.
    Expired,
    /// No device fingerprint was presented.
    MissingDevice,
    /// Bound to a different device.
    DeviceMismatch,
}

impl Rejection {
    /// Message returned to the client.
    pub fn message(&self) -> String {
        match self {
            Rejection::MissingKey => "No key provided".to_string(),
            Rejection::InvalidKey => "Invalid license key".to_string(),
            Rejection::Locked(status) => status.validation_message(),
            Rejection::Banned => "This key has been banned".to_string(),
            Rejection::Pending => "This key is pending approval. Contact your seller.".to_string(),
            Rejection::Inactive => "This key is inactive".to_string(),
            Rejection::Expired => "This key has expired".to_string(),
            Rejection::MissingDevice => "No device identifier provided".to_string(),
            Rejection::DeviceMismatch => {
                "This key is bound to another device. Contact admin for MAC reset.".to_string()
            }
        }
    }
}

/// Remaining validity of an accepted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaysLeft {
    /// Whole days, rounded up, at least 1.
    Days(i64),
    /// No expiry.
    Unlimited,
}

impl DaysLeft {
    /// Numeric form for clients; unlimited keys report `sentinel`.
    pub fn or_sentinel(self, sentinel: i64) -> i64 {
        match self {
            DaysLeft::Days(days) => days,
            DaysLeft::Unlimited => sentinel,
        }
    }
}

/// Result of a validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The key may be used.
    Valid {
        /// The key after usage was recorded.
        license: License,
        /// Remaining validity.
        days_left: DaysLeft,
        /// True when this call bound the device.
        newly_bound: bool,
    },
    /// The key was refused.
    Rejected(Rejection),
}

impl ValidationOutcome {
    /// Whether the key was accepted.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }

    /// The rejection, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationOutcome::Rejected(r) => Some(r),
            ValidationOutcome::Valid { .. } => None,
        }
    }
}
