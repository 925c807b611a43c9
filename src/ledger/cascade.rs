//! Debt cascade: propagate owed money up the reseller chain.
//!
//! Every balance change is a per-node atomic update issued while walking
//! `created_by` upward. The walk as a whole is not a transaction: a broken
//! chain stops the walk early and the nodes already billed stay billed.

use crate::clock::{business_date, Clock};
use crate::config::LedgerConfig;
use crate::ledger::chain::{ChainWalk, WalkStop};
use crate::model::{License, Reseller, ResellerId};
use crate::store::LedgerStore;
use crate::LedgerError;

/// What a cascade walk did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Resellers billed and the amount added to each, in walk order.
    pub billed: Vec<(ResellerId, i64)>,
    /// Why the walk ended, if it ran.
    pub stop: Option<WalkStop>,
}

impl CascadeReport {
    /// Total added across the chain.
    pub fn total(&self) -> i64 {
        self.billed.iter().map(|(_, amount)| amount).sum()
    }
}

/// Result of recording a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    /// The reseller after the payment was applied.
    pub reseller: Reseller,
    /// Amount paid beyond the outstanding balance (discarded, not credited).
    pub surplus: i64,
}

/// Debt cascade over a ledger store.
pub struct DebtCascade<'a> {
    store: &'a dyn LedgerStore,
    config: &'a LedgerConfig,
    clock: &'a dyn Clock,
}

impl<'a> DebtCascade<'a> {
    /// Create a cascade engine.
    pub fn new(store: &'a dyn LedgerStore, config: &'a LedgerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Record `key_count` keys issued by `seller`.
    ///
    /// The issuer's sale counters always move; its unpaid counter moves only
    /// for keys issued unpaid. Keys issued already paid bill the issuer and
    /// every ancestor below the top operator immediately.
    pub fn on_key_issued(
        &self,
        seller: ResellerId,
        key_count: u64,
        auto_approved: bool,
    ) -> Result<CascadeReport, LedgerError> {
        let today = self.today();
        self.store.update_reseller(seller, &mut |r| {
            r.record_sale(key_count, !auto_approved, today);
            Ok(())
        })?;

        if !auto_approved {
            return Ok(CascadeReport::default());
        }
        self.bill_chain(seller, key_count, false)
    }

    /// Record payment for an issued, unpaid key.
    ///
    /// Each reseller from the creator upward is billed its unit price; only
    /// the creator's paid/unpaid counters move. Creator-less keys are exempt.
    pub fn on_key_approved(&self, license: &License) -> Result<CascadeReport, LedgerError> {
        let Some(creator) = license.created_by else {
            return Ok(CascadeReport::default());
        };
        self.bill_chain(creator, 1, true)
    }

    /// Count a renewed key as unpaid again on its creator.
    ///
    /// No balance moves until the renewal is approved.
    pub fn on_key_renewed(&self, license: &License) -> Result<(), LedgerError> {
        let Some(creator) = license.created_by else {
            return Ok(());
        };
        match self.store.update_reseller(creator, &mut |r| {
            r.total_unpaid += 1;
            Ok(())
        }) {
            Ok(_) => Ok(()),
            Err(LedgerError::ResellerNotFound(_)) => {
                tracing::warn!(key = %license.key, creator = %creator, "renewed key has no creator record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a manual payment to a reseller's balance.
    ///
    /// The balance is clamped at zero; a settled balance disarms the grace
    /// clock and clears the cached lock flag.
    pub fn on_payment_received(
        &self,
        reseller: ResellerId,
        amount: i64,
    ) -> Result<PaymentReceipt, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidRequest(
                "payment amount must be positive".to_string(),
            ));
        }
        let mut surplus = 0;
        let updated = self.store.update_reseller(reseller, &mut |r| {
            surplus = r.apply_payment(amount);
            Ok(())
        })?;
        if surplus > 0 {
            tracing::info!(reseller = %reseller, surplus, "payment exceeded balance");
        }
        Ok(PaymentReceipt {
            reseller: updated,
            surplus,
        })
    }

    fn bill_chain(
        &self,
        start: ResellerId,
        key_count: u64,
        settle_first: bool,
    ) -> Result<CascadeReport, LedgerError> {
        let now = self.clock.now_utc();
        let today = self.today();
        let count = i64::try_from(key_count)
            .map_err(|_| LedgerError::InvalidRequest(format!("key count too large: {}", key_count)))?;

        let mut report = CascadeReport::default();
        let mut walk = ChainWalk::new(self.store, start, self.config.max_chain_hops);
        let mut first = true;

        while let Some(node) = walk.next() {
            let node = node?;
            let Some(price) = self.config.prices.price_for(node.role) else {
                break;
            };
            let amount = price.saturating_mul(count);
            let settle = settle_first && first;
            first = false;

            let result = self.store.update_reseller(node.id, &mut |r| {
                r.add_debt(amount, now);
                if settle {
                    r.record_paid(today);
                }
                Ok(())
            });
            match result {
                Ok(_) => report.billed.push((node.id, amount)),
                Err(LedgerError::ResellerNotFound(_)) => {
                    tracing::warn!(reseller = %node.id, "reseller vanished during cascade");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        report.stop = walk.stop_reason().cloned();
        tracing::debug!(
            start = %start,
            billed = report.billed.len(),
            total = report.total(),
            stop = ?report.stop,
            "debt cascade applied"
        );
        Ok(report)
    }

    fn today(&self) -> chrono::NaiveDate {
        business_date(self.clock.now_utc(), self.config.utc_offset_minutes)
    }
}
