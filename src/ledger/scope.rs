//! Who may touch which keys and resellers.
//!
//! The top operator sees everything. Everyone else sees their own subtree:
//! keys they created, keys created below them, and resellers below them.

use crate::ledger::chain::is_strict_ancestor;
use crate::model::{Caller, License, Reseller, ResellerId};
use crate::store::LedgerStore;
use crate::LedgerError;
use std::collections::{HashSet, VecDeque};

/// Require `caller` to be the top operator, the key's creator, or an ancestor of it.
///
/// Creator-less keys belong to the top operator alone.
pub fn require_key_scope(
    store: &dyn LedgerStore,
    caller: &Caller,
    license: &License,
    max_hops: usize,
) -> Result<(), LedgerError> {
    if caller.role.is_top() {
        return Ok(());
    }
    match license.created_by {
        Some(creator) if creator == caller.reseller_id => Ok(()),
        Some(creator) if is_strict_ancestor(store, caller.reseller_id, creator, max_hops)? => Ok(()),
        _ => Err(LedgerError::OutOfScope),
    }
}

/// Require `caller` to be the top operator or a strict ancestor of `target`.
pub fn require_reseller_scope(
    store: &dyn LedgerStore,
    caller: &Caller,
    target: ResellerId,
    max_hops: usize,
) -> Result<(), LedgerError> {
    if caller.role.is_top() || is_strict_ancestor(store, caller.reseller_id, target, max_hops)? {
        Ok(())
    } else {
        Err(LedgerError::OutOfScope)
    }
}

/// Every reseller below `root`, breadth first, `root` excluded.
pub fn descendants(store: &dyn LedgerStore, root: ResellerId) -> Result<Vec<Reseller>, LedgerError> {
    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut out = Vec::new();

    while let Some(id) = queue.pop_front() {
        for child in store.children_of(id)? {
            if !visited.insert(child.id) {
                tracing::warn!(reseller = %child.id, "subtree walk revisited reseller");
                continue;
            }
            queue.push_back(child.id);
            out.push(child);
        }
    }
    Ok(out)
}

/// Ids of `root` and everything below it.
pub fn subtree_ids(store: &dyn LedgerStore, root: ResellerId) -> Result<HashSet<ResellerId>, LedgerError> {
    let mut ids: HashSet<ResellerId> = descendants(store, root)?.into_iter().map(|r| r.id).collect();
    ids.insert(root);
    Ok(ids)
}
