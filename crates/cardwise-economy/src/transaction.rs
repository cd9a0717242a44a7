// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic check-then-deduct.
//!
//! [`ConsumptionTransaction::commit`] runs the whole decision inside the
//! ledger's critical section: period rollover, idempotency replay, a fresh
//! re-evaluation, and the mutation itself. Two concurrent commits for the
//! same user are serialised, so they can never both see the last credit.

use cardwise_core::{CardwiseError, IdempotencyKey, Tier, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::TierCatalog;
use crate::engine::{EnforcementEngine, EnforcementResult};
use crate::ledger::{LedgerGuard, QuotaLedger};
use crate::request::{Action, ActionKind};
use crate::reset::{PeriodReset, PeriodResetScheduler};

/// The recorded result of a successful commit. A retried confirmation with
/// the same key gets this exact value back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub receipt_id: String,
    pub user_id: UserId,
    pub kind: ActionKind,
    pub cost: u32,
    pub idempotency_key: IdempotencyKey,
    /// Ledger version right after this commit.
    pub ledger_version: u64,
    pub credits_remaining: u32,
    pub exports_remaining: u32,
    pub committed_at: DateTime<Utc>,
}

/// What a commit did.
#[derive(Debug, Clone)]
pub struct Committed {
    pub receipt: CommitReceipt,
    /// `true` when the key was already committed and nothing was mutated.
    pub replayed: bool,
    /// Period resets applied inside the same critical section.
    pub resets: Vec<PeriodReset>,
}

/// A single-use commit against one ledger.
pub struct ConsumptionTransaction<'a> {
    catalog: &'a TierCatalog,
    engine: &'a EnforcementEngine,
    now: DateTime<Utc>,
}

impl<'a> ConsumptionTransaction<'a> {
    pub fn new(catalog: &'a TierCatalog, engine: &'a EnforcementEngine, now: DateTime<Utc>) -> Self {
        Self {
            catalog,
            engine,
            now,
        }
    }

    /// Commit `action` under `key`.
    ///
    /// `expected_version` is the ledger version the caller's estimate was
    /// computed against. If the fresh re-evaluation denies and the ledger has
    /// moved since then, `StaleSnapshot` is returned instead of the denial so
    /// the caller can refresh and retry. Pass `None` to get the denial
    /// directly.
    ///
    /// On any error the ledger's counters are untouched.
    pub fn commit(
        &self,
        ledger: &QuotaLedger,
        action: &Action,
        key: &IdempotencyKey,
        expected_version: Option<u64>,
    ) -> Result<Committed, CardwiseError> {
        let mut guard = ledger.lock()?;
        let resets = PeriodResetScheduler::apply_locked(&mut guard, self.catalog, self.now)?;

        if let Some(prior) = guard.recall(key) {
            if prior.kind != action.kind() {
                return Err(CardwiseError::IdempotencyConflict { key: key.0.clone() });
            }
            debug!(user_id = %prior.user_id, key = %key, "replaying committed confirmation");
            return Ok(Committed {
                receipt: prior.clone(),
                replayed: true,
                resets,
            });
        }

        let tier = self.catalog.lookup(&guard.economy().tier_id)?;
        let upgrade_available = !self.catalog.is_top_tier(&tier.id);
        let verdict = self
            .engine
            .evaluate(action, guard.economy(), tier, upgrade_available);

        if !verdict.can_proceed {
            if let Some(expected) = expected_version {
                if expected != guard.version() {
                    return Err(CardwiseError::StaleSnapshot {
                        expected,
                        actual: guard.version(),
                    });
                }
            }
            return Err(denial_error(&guard, action, &verdict, tier));
        }

        match action.kind() {
            ActionKind::Generation => guard.apply_generation_consumption(tier, verdict.cost)?,
            ActionKind::Export => guard.apply_export_consumption(tier, verdict.cost)?,
        }

        let economy = guard.economy();
        let receipt = CommitReceipt {
            receipt_id: uuid::Uuid::new_v4().to_string(),
            user_id: economy.user_id.clone(),
            kind: action.kind(),
            cost: verdict.cost,
            idempotency_key: key.clone(),
            ledger_version: guard.version(),
            credits_remaining: economy.credits_remaining(tier),
            exports_remaining: economy.exports_remaining(tier),
            committed_at: self.now,
        };
        guard.remember(receipt.clone());

        Ok(Committed {
            receipt,
            replayed: false,
            resets,
        })
    }
}

fn denial_error(
    guard: &LedgerGuard<'_>,
    action: &Action,
    verdict: &EnforcementResult,
    tier: &Tier,
) -> CardwiseError {
    let economy = guard.economy();
    match action {
        Action::Generation(_) => CardwiseError::InsufficientBalance {
            required: verdict.cost,
            available: economy.credits_remaining(tier),
        },
        Action::Export(_) => CardwiseError::QuotaExhausted {
            used: economy.exports_used_this_month,
            quota: tier.monthly_export_quota,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ExportKind, ExportRequest, GenerationRequest};
    use cardwise_core::UserEconomy;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn ledger(tier: &str) -> QuotaLedger {
        QuotaLedger::new(UserEconomy::new("u1".into(), tier.into(), start()), 16)
    }

    fn generation() -> Action {
        Action::Generation(GenerationRequest::default())
    }

    fn export() -> Action {
        Action::Export(ExportRequest {
            set_id: "set-1".into(),
            kind: ExportKind::Both,
            include_branding: false,
        })
    }

    #[test]
    fn commit_deducts_and_reports_remaining() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());

        let committed = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        assert!(!committed.replayed);
        assert!(committed.resets.is_empty());
        assert_eq!(committed.receipt.cost, 1);
        assert_eq!(committed.receipt.credits_remaining, 4);
        assert_eq!(committed.receipt.exports_remaining, 5);
        assert_eq!(committed.receipt.ledger_version, 1);
        assert_eq!(ledger.snapshot().credits_used_this_month, 1);
    }

    #[test]
    fn same_key_replays_without_mutation() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());

        let first = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        let second = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        assert!(second.replayed);
        assert_eq!(first.receipt, second.receipt);
        assert_eq!(ledger.snapshot().credits_used_this_month, 1);
        assert_eq!(ledger.version(), 1);
    }

    #[test]
    fn key_reused_for_other_kind_conflicts() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());

        tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        let err = tx.commit(&ledger, &export(), &"k1".into(), None).unwrap_err();
        assert!(matches!(err, CardwiseError::IdempotencyConflict { key } if key == "k1"));
        assert_eq!(ledger.snapshot().exports_used_this_month, 0);
    }

    #[test]
    fn exhausted_generation_is_refused_and_not_remembered() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());
        for i in 0..5 {
            tx.commit(&ledger, &generation(), &format!("k{i}").as_str().into(), None)
                .unwrap();
        }

        let err = tx.commit(&ledger, &generation(), &"late".into(), None).unwrap_err();
        assert!(matches!(
            err,
            CardwiseError::InsufficientBalance {
                required: 1,
                available: 0
            }
        ));

        // After the period rolls over the same key can succeed.
        let next = ConsumptionTransaction::new(&catalog, &engine, start() + Duration::days(31));
        let committed = next.commit(&ledger, &generation(), &"late".into(), None).unwrap();
        assert!(!committed.replayed);
        assert_eq!(committed.resets.len(), 1);
    }

    #[test]
    fn exhausted_export_reports_quota() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());
        for i in 0..5 {
            tx.commit(&ledger, &export(), &format!("e{i}").as_str().into(), None)
                .unwrap();
        }
        let err = tx.commit(&ledger, &export(), &"e5".into(), None).unwrap_err();
        assert!(matches!(err, CardwiseError::QuotaExhausted { used: 5, quota: 5 }));
    }

    #[test]
    fn denial_after_concurrent_change_is_stale() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("free");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());
        for i in 0..4 {
            tx.commit(&ledger, &export(), &format!("e{i}").as_str().into(), None)
                .unwrap();
        }

        // Caller estimated at version 4 with one export left; someone else takes it.
        let estimated = ledger.version();
        tx.commit(&ledger, &export(), &"other".into(), None).unwrap();

        let err = tx
            .commit(&ledger, &export(), &"mine".into(), Some(estimated))
            .unwrap_err();
        assert!(matches!(
            err,
            CardwiseError::StaleSnapshot {
                expected: 4,
                actual: 5
            }
        ));

        let err = tx
            .commit(&ledger, &export(), &"mine".into(), Some(ledger.version()))
            .unwrap_err();
        assert!(err.is_exhaustion());
    }

    #[test]
    fn unmetered_commit_is_a_zero_cost_write() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("unlimited");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());

        let committed = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        assert_eq!(committed.receipt.cost, 0);
        assert_eq!(committed.receipt.ledger_version, 1);
        assert_eq!(ledger.snapshot().credits_used_this_month, 0);

        let replay = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap();
        assert!(replay.replayed);
    }

    #[test]
    fn unknown_tier_on_record_is_a_hard_error() {
        let catalog = TierCatalog::default();
        let engine = EnforcementEngine::default();
        let ledger = ledger("platinum");
        let tx = ConsumptionTransaction::new(&catalog, &engine, start());
        let err = tx.commit(&ledger, &generation(), &"k1".into(), None).unwrap_err();
        assert!(matches!(err, CardwiseError::UnknownTier { .. }));
    }
}
