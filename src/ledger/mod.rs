//! Ledger engine: ancestor walks, the debt cascade and subtree queries.

pub mod cascade;
pub mod chain;
pub mod scope;

pub use cascade::DebtCascade;
pub use chain::{ChainWalk, WalkStop};
