// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monthly period rollover.
//!
//! The scheduler is not a background task. It is a check run before every
//! evaluate and commit that compares the stored period start with the clock
//! and, when one or more calendar-month boundaries have passed, applies one
//! reset per boundary under the ledger's critical section.

use cardwise_core::{CardwiseError, UserEconomy, UserId};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::TierCatalog;
use crate::ledger::{LedgerGuard, QuotaLedger};

/// One applied reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReset {
    pub user_id: UserId,
    /// Start of the period the reset opened.
    pub period_start: DateTime<Utc>,
    /// Credits carried into that period.
    pub rollover_credits: u32,
}

/// Detects period boundaries and recomputes rollover.
pub struct PeriodResetScheduler;

impl PeriodResetScheduler {
    /// The instant the period starting at `period_start` ends.
    ///
    /// Month arithmetic clamps to the end of shorter months, so a period
    /// starting on 31 January ends on 28 (or 29) February.
    pub fn next_boundary(period_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        period_start.checked_add_months(Months::new(1))
    }

    /// Whether `now` has reached the end of the record's current period.
    pub fn is_due(economy: &UserEconomy, now: DateTime<Utc>) -> bool {
        Self::next_boundary(economy.period_start).is_some_and(|boundary| now >= boundary)
    }

    /// Apply any due resets to `ledger`.
    ///
    /// Checks the published snapshot first and only takes the lock when a
    /// boundary has passed; the check is repeated under the lock so
    /// redundant calls never reset twice.
    pub fn apply(
        ledger: &QuotaLedger,
        catalog: &TierCatalog,
        now: DateTime<Utc>,
    ) -> Result<Vec<PeriodReset>, CardwiseError> {
        if !Self::is_due(&ledger.snapshot(), now) {
            return Ok(Vec::new());
        }
        let mut guard = ledger.lock()?;
        Self::apply_locked(&mut guard, catalog, now)
    }

    /// Apply due resets while already holding the ledger lock.
    ///
    /// Within one call, boundaries are counted from the stored period start
    /// (`start + 1 month`, `start + 2 months`, ...) rather than chained, so
    /// catching up several months from the 31st lands on 28 February and
    /// then 31 March. Each applied boundary becomes the new period start,
    /// though, so resets applied by separate calls do chain: 31 January,
    /// then 28 February, then 28 March.
    pub(crate) fn apply_locked(
        guard: &mut LedgerGuard<'_>,
        catalog: &TierCatalog,
        now: DateTime<Utc>,
    ) -> Result<Vec<PeriodReset>, CardwiseError> {
        let mut resets = Vec::new();
        if !Self::is_due(guard.economy(), now) {
            return Ok(resets);
        }

        let anchor = guard.economy().period_start;
        let tier = catalog.lookup(&guard.economy().tier_id)?;
        let mut elapsed = 1u32;
        loop {
            let boundary = anchor
                .checked_add_months(Months::new(elapsed))
                .ok_or_else(|| CardwiseError::Internal("period boundary out of range".to_string()))?;
            if now < boundary {
                break;
            }

            guard.apply_period_reset(tier, boundary);
            let economy = guard.economy();
            info!(
                user_id = %economy.user_id,
                tier_id = %economy.tier_id,
                period_start = %boundary,
                rollover_credits = economy.rollover_credits,
                "monthly period reset"
            );
            resets.push(PeriodReset {
                user_id: economy.user_id.clone(),
                period_start: boundary,
                rollover_credits: economy.rollover_credits,
            });
            elapsed += 1;
        }

        Ok(resets)
    }
}
