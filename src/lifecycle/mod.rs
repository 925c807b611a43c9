//! Key lifecycle: issuance, named commands and key generation.

pub mod commands;
pub mod issue;
pub mod keygen;

pub use commands::{CommandOutcome, KeyCommand, KeyLifecycle};
pub use issue::{IssueReceipt, IssueRequest, Issuer};
