//! Authorization policy: the static role tables and the lock-chain evaluator.

pub mod hierarchy;
pub mod lock_chain;
