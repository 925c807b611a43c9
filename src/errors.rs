//! Keyledger error types.

use crate::model::Role;
use thiserror::Error;

/// Errors returned by ledger operations.
///
/// Key validation rejections are not errors; they are reported through
/// [`crate::validation::ValidationOutcome`]. Only infrastructure failures
/// surface as `Err` from the validation path.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The caller's role lacks the named permission.
    #[error("Permission denied: {permission}")]
    PermissionDenied {
        /// The permission that was required.
        permission: String,
    },

    /// The caller's role cannot create or manage the target role.
    #[error("Role {actor} cannot manage {target} accounts")]
    CannotManageRole {
        /// Role of the caller.
        actor: Role,
        /// Role that was targeted.
        target: Role,
    },

    /// The target record lies outside the caller's subtree.
    #[error("Target is outside the caller's hierarchy")]
    OutOfScope,

    /// No reseller with the given id or username.
    #[error("Reseller not found: {0}")]
    ResellerNotFound(String),

    /// No license with the given key.
    #[error("License not found: {0}")]
    LicenseNotFound(String),

    /// A license with this key string already exists.
    #[error("Key \"{0}\" already exists")]
    KeyAlreadyExists(String),

    /// A reseller with this username already exists.
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    /// The key has already been marked as paid.
    #[error("Key {0} is already approved")]
    AlreadyApproved(String),

    /// Device reset quota exhausted.
    #[error("Max HWID resets reached ({used}/{max})")]
    HwidResetLimit {
        /// Resets already consumed.
        used: u32,
        /// Quota for this key.
        max: u32,
    },

    /// Too many anonymous requests from this caller.
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the current window closes.
        retry_after_secs: i64,
    },

    /// Request parameters are malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Ledger store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Snapshot file I/O error.
    #[error("Snapshot I/O error: {0}")]
    SnapshotIO(String),

    /// Snapshot digest does not match its body.
    #[error("Snapshot tampering detected")]
    SnapshotTampered,
}
