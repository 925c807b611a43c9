//! Iterative ancestor walk with a cycle guard.
//!
//! Both the debt cascade and the lock chain follow `created_by` upward from
//! a starting reseller. The walk yields the starting reseller and each
//! ancestor in turn, and stops at:
//! - a reseller with no parent,
//! - the top operator (never yielded: it is never billed and never evaluated),
//! - a missing record, a repeated id, or the hop cap (integrity hazards).
//!
//! Integrity hazards end the walk quietly with a `warn!` diagnostic; only
//! store failures are yielded as errors.

use crate::model::{Reseller, ResellerId};
use crate::store::LedgerStore;
use crate::LedgerError;
use std::collections::HashSet;

/// Why a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStop {
    /// Reached a reseller without a parent.
    Root,
    /// Reached the top operator.
    TopOperator,
    /// A referenced reseller does not exist.
    MissingReseller(ResellerId),
    /// The chain revisited a reseller.
    Cycle(ResellerId),
    /// The hop cap was hit before the chain terminated.
    HopLimit,
    /// The store failed mid-walk.
    StoreFailure,
}

impl WalkStop {
    /// True for the stops that indicate malformed ownership data.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            WalkStop::MissingReseller(_) | WalkStop::Cycle(_) | WalkStop::HopLimit
        )
    }
}

/// Walk from a reseller up through its ancestors.
pub struct ChainWalk<'a> {
    store: &'a dyn LedgerStore,
    next: Option<ResellerId>,
    visited: HashSet<ResellerId>,
    max_hops: usize,
    stop: Option<WalkStop>,
}

impl<'a> ChainWalk<'a> {
    /// Start a walk at `start`, visiting at most `max_hops` resellers.
    pub fn new(store: &'a dyn LedgerStore, start: ResellerId, max_hops: usize) -> Self {
        Self {
            store,
            next: Some(start),
            visited: HashSet::new(),
            max_hops,
            stop: None,
        }
    }

    /// Why the walk ended; `None` while it is still running.
    pub fn stop_reason(&self) -> Option<&WalkStop> {
        self.stop.as_ref()
    }

    fn finish(&mut self, stop: WalkStop) {
        match &stop {
            WalkStop::MissingReseller(id) => {
                tracing::warn!(reseller = %id, "ancestor walk stopped: reseller missing");
            }
            WalkStop::Cycle(id) => {
                tracing::warn!(reseller = %id, "ancestor walk stopped: ownership cycle");
            }
            WalkStop::HopLimit => {
                tracing::warn!(max_hops = self.max_hops, "ancestor walk stopped: hop cap reached");
            }
            _ => {}
        }
        self.next = None;
        self.stop = Some(stop);
    }
}

impl Iterator for ChainWalk<'_> {
    type Item = Result<Reseller, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        let Some(id) = self.next.take() else {
            self.finish(WalkStop::Root);
            return None;
        };
        if self.visited.len() >= self.max_hops {
            self.finish(WalkStop::HopLimit);
            return None;
        }
        if !self.visited.insert(id) {
            self.finish(WalkStop::Cycle(id));
            return None;
        }

        match self.store.get_reseller(id) {
            Ok(Some(reseller)) if reseller.role.is_top() => {
                self.finish(WalkStop::TopOperator);
                None
            }
            Ok(Some(reseller)) => {
                self.next = reseller.created_by;
                Some(Ok(reseller))
            }
            Ok(None) => {
                self.finish(WalkStop::MissingReseller(id));
                None
            }
            Err(e) => {
                self.finish(WalkStop::StoreFailure);
                Some(Err(e))
            }
        }
    }
}

/// Whether `candidate` is a strict ancestor of `of` (top operator excluded).
pub fn is_strict_ancestor(
    store: &dyn LedgerStore,
    candidate: ResellerId,
    of: ResellerId,
    max_hops: usize,
) -> Result<bool, LedgerError> {
    let Some(start) = store.get_reseller(of)? else {
        return Ok(false);
    };
    let Some(parent) = start.created_by else {
        return Ok(false);
    };
    for node in ChainWalk::new(store, parent, max_hops) {
        if node?.id == candidate {
            return Ok(true);
        }
    }
    Ok(false)
}
