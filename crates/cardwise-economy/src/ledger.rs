// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user quota ledger.
//!
//! A [`QuotaLedger`] owns one [`UserEconomy`] behind a single critical
//! section. Reads go through an atomically swapped snapshot and never take
//! the lock; every mutation goes through a [`LedgerGuard`], which is only
//! handed out inside this crate to the consumption transaction, the period
//! reset scheduler, and the service's tier/reconcile paths.
//!
//! The critical section is a synchronous mutex and nothing inside it awaits,
//! so once a commit holds the guard it runs to completion.

use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use cardwise_core::{CardwiseError, IdempotencyKey, Tier, UserEconomy, UserId};
use chrono::{DateTime, Utc};

use crate::idempotency::IdempotencyWindow;
use crate::transaction::CommitReceipt;

/// A published, immutable view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub economy: UserEconomy,
    /// Bumped on every successful mutation, including zero-cost commits.
    pub version: u64,
}

#[derive(Debug)]
struct LedgerState {
    economy: UserEconomy,
    version: u64,
    recent: IdempotencyWindow,
}

/// One user's accounting record and its invariant-preserving mutators.
#[derive(Debug)]
pub struct QuotaLedger {
    user_id: UserId,
    state: Mutex<LedgerState>,
    published: ArcSwap<LedgerSnapshot>,
}

impl QuotaLedger {
    /// Wrap a loaded or freshly created record.
    pub fn new(economy: UserEconomy, idempotency_window: usize) -> Self {
        let snapshot = LedgerSnapshot {
            economy: economy.clone(),
            version: 0,
        };
        Self {
            user_id: economy.user_id.clone(),
            state: Mutex::new(LedgerState {
                economy,
                version: 0,
                recent: IdempotencyWindow::new(idempotency_window),
            }),
            published: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// An immutable copy of the record as of the last completed mutation.
    ///
    /// Re-take the snapshot after any await point rather than holding on to it.
    pub fn snapshot(&self) -> UserEconomy {
        self.published.load().economy.clone()
    }

    /// The last published snapshot together with its version.
    pub fn versioned_snapshot(&self) -> Arc<LedgerSnapshot> {
        self.published.load_full()
    }

    pub fn version(&self) -> u64 {
        self.published.load().version
    }

    /// Enter the per-user critical section.
    pub(crate) fn lock(&self) -> Result<LedgerGuard<'_>, CardwiseError> {
        let state = self.state.lock().map_err(|_| {
            CardwiseError::Internal(format!("ledger lock poisoned for user `{}`", self.user_id))
        })?;
        Ok(LedgerGuard {
            state,
            published: &self.published,
            dirty: false,
        })
    }
}

/// Exclusive access to a ledger. Publishes a fresh snapshot on drop if
/// anything changed, before the lock is released.
pub(crate) struct LedgerGuard<'a> {
    state: MutexGuard<'a, LedgerState>,
    published: &'a ArcSwap<LedgerSnapshot>,
    dirty: bool,
}

impl LedgerGuard<'_> {
    pub(crate) fn economy(&self) -> &UserEconomy {
        &self.state.economy
    }

    pub(crate) fn version(&self) -> u64 {
        self.state.version
    }

    fn bump(&mut self) {
        self.state.version += 1;
        self.dirty = true;
    }

    /// Charge `cost` credits.
    ///
    /// On a metered tier this fails with `InsufficientBalance`, leaving the
    /// record untouched, if the charge would push usage past quota plus
    /// rollover. A zero cost still counts as a write.
    pub(crate) fn apply_generation_consumption(
        &mut self,
        tier: &Tier,
        cost: u32,
    ) -> Result<(), CardwiseError> {
        let economy = &self.state.economy;
        let used = economy
            .credits_used_this_month
            .checked_add(cost)
            .ok_or_else(|| CardwiseError::Internal("credit counter overflow".to_string()))?;

        if tier.metered && used > economy.credit_capacity(tier) {
            return Err(CardwiseError::InsufficientBalance {
                required: cost,
                available: economy.credits_remaining(tier),
            });
        }

        self.state.economy.credits_used_this_month = used;
        self.bump();
        Ok(())
    }

    /// Charge `amount` export units; fails with `QuotaExhausted` past the
    /// monthly export quota.
    pub(crate) fn apply_export_consumption(
        &mut self,
        tier: &Tier,
        amount: u32,
    ) -> Result<(), CardwiseError> {
        let economy = &self.state.economy;
        let used = economy.exports_used_this_month.saturating_add(amount);
        if used > tier.monthly_export_quota {
            return Err(CardwiseError::QuotaExhausted {
                used: economy.exports_used_this_month,
                quota: tier.monthly_export_quota,
            });
        }

        self.state.economy.exports_used_this_month = used;
        self.bump();
        Ok(())
    }

    /// Close the current period: carry unused credits up to the tier's cap,
    /// zero both usage counters, and start the new period.
    pub(crate) fn apply_period_reset(&mut self, tier: &Tier, new_period_start: DateTime<Utc>) {
        let economy = &mut self.state.economy;
        let unused = economy.credits_remaining(tier);
        economy.rollover_credits = unused.min(tier.rollover_cap());
        economy.credits_used_this_month = 0;
        economy.exports_used_this_month = 0;
        economy.period_start = new_period_start;
        self.bump();
    }

    /// Switch tiers without touching usage counters.
    pub(crate) fn set_tier(&mut self, tier: &Tier) {
        self.state.economy.tier_id = tier.id.clone();
        self.bump();
    }

    /// Replace the whole record (used by reconciliation).
    pub(crate) fn overwrite(&mut self, economy: UserEconomy) {
        debug_assert_eq!(economy.user_id, self.state.economy.user_id);
        self.state.economy = economy;
        self.bump();
    }

    pub(crate) fn recall(&self, key: &IdempotencyKey) -> Option<&CommitReceipt> {
        self.state.recent.get(key)
    }

    pub(crate) fn remember(&mut self, receipt: CommitReceipt) {
        self.state.recent.insert(receipt);
    }
}

impl Drop for LedgerGuard<'_> {
    fn drop(&mut self) {
        if self.dirty {
            self.published.store(Arc::new(LedgerSnapshot {
                economy: self.state.economy.clone(),
                version: self.state.version,
            }));
        }
    }
}
